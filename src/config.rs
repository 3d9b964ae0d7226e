use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for Reframer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output canvas and backdrop settings
    pub output: OutputConfig,

    /// Frame pipeline sizing and timing
    pub pipeline: PipelineConfig,

    /// External encoder settings
    pub encoder: EncoderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.output.validate()?;
        self.pipeline.validate()?;
        self.encoder.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Output canvas configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Target canvas width in pixels
    pub width: u32,

    /// Target canvas height in pixels
    pub height: u32,

    /// Gaussian blur radius applied to the backdrop, in output pixels
    pub blur_radius: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            blur_radius: 10,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        // yuv420p output needs even dimensions
        if self.width == 0 || self.width % 2 != 0 {
            return Err(invalid("output.width", self.width).into());
        }
        if self.height == 0 || self.height % 2 != 0 {
            return Err(invalid("output.height", self.height).into());
        }
        Ok(())
    }
}

/// Frame pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker pool size; 0 means "detect", falling back to 4
    pub workers: usize,

    /// Capacity of the bounded reader → dispatcher queue
    pub read_queue_capacity: usize,

    /// In-flight frame permits per worker
    pub permits_per_worker: usize,

    /// Timeout of every blocking queue/permit operation, in milliseconds
    pub queue_timeout_ms: u64,

    /// Emit a progress event every N written frames
    pub progress_interval: usize,

    /// Forward distances below this are skipped by decoding instead of seeking
    pub seek_skip_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            read_queue_capacity: 16,
            permits_per_worker: 2,
            queue_timeout_ms: 100,
            progress_interval: 10,
            seek_skip_threshold: 50,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_queue_capacity == 0 {
            return Err(invalid("pipeline.read_queue_capacity", self.read_queue_capacity).into());
        }
        if self.permits_per_worker == 0 {
            return Err(invalid("pipeline.permits_per_worker", self.permits_per_worker).into());
        }
        if self.queue_timeout_ms == 0 {
            return Err(invalid("pipeline.queue_timeout_ms", self.queue_timeout_ms).into());
        }
        if self.progress_interval == 0 {
            return Err(invalid("pipeline.progress_interval", self.progress_interval).into());
        }
        Ok(())
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            4
        } else {
            self.workers
        }
    }

    /// Maximum number of frames decoded but not yet written
    pub fn max_in_flight(&self) -> usize {
        self.worker_count() * self.permits_per_worker
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// External encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// ffmpeg binary
    pub ffmpeg: String,

    /// ffprobe binary
    pub ffprobe: String,

    /// Final video codec
    pub video_codec: String,

    /// Encoder preset
    pub preset: String,

    /// Constant rate factor (0-51)
    pub crf: u8,

    /// Final audio codec
    pub audio_codec: String,

    /// Audio bitrate, ffmpeg syntax
    pub audio_bitrate: String,

    /// Carry the source audio into the output
    pub include_audio: bool,

    /// Codec of the lossless intermediate written by the pipeline
    pub intermediate_codec: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            include_audio: true,
            intermediate_codec: "ffv1".to_string(),
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<()> {
        if self.crf > 51 {
            return Err(invalid("encoder.crf", self.crf).into());
        }
        if self.ffmpeg.trim().is_empty() {
            return Err(invalid("encoder.ffmpeg", &self.ffmpeg).into());
        }
        if self.ffprobe.trim().is_empty() {
            return Err(invalid("encoder.ffprobe", &self.ffprobe).into());
        }
        Ok(())
    }
}
