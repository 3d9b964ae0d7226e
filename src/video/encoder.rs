use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{EncoderError, Result};
use crate::video::types::Frame;

/// Consumer of the ordered composited frame stream.
///
/// Owned exclusively by the pipeline writer.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the stream; the output is complete afterwards
    fn finish(&mut self) -> Result<()>;

    /// Stop without producing a usable output
    fn abort(&mut self);
}

/// Render a command line for error messages and logs
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg)
            } else {
                arg.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check that the ffmpeg binary can be executed
pub async fn ffmpeg_available(ffmpeg: &str) -> bool {
    tokio::process::Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Read a child's stderr to the end on a helper thread.
/// The pipe must keep draining while frames are written to stdin.
fn drain_stderr<R: Read + Send + 'static>(mut stderr: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).trim().to_string()
    })
}

/// Streams raw rgb24 frames into an ffmpeg child writing a lossless intermediate
pub struct FfmpegFrameSink {
    command: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    written: usize,
}

impl FfmpegFrameSink {
    pub fn create<P: AsRef<Path>>(
        config: &EncoderConfig,
        output: P,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self> {
        let args: Vec<String> = vec![
            "-v".into(), "error".into(),
            "-y".into(),
            "-f".into(), "rawvideo".into(),
            "-pix_fmt".into(), "rgb24".into(),
            "-s".into(), format!("{}x{}", width, height),
            "-r".into(), format!("{}", fps),
            "-i".into(), "pipe:0".into(),
            "-an".into(),
            "-c:v".into(), config.intermediate_codec.clone(),
            output.as_ref().display().to_string(),
        ];
        let command = render_command(&config.ffmpeg, &args);
        debug!("Starting intermediate encoder: {}", command);

        let mut child = Command::new(&config.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::SpawnFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| EncoderError::PipeClosed {
            reason: "encoder stdin unavailable".to_string(),
        })?;
        let stderr = child.stderr.take().map(drain_stderr);

        Ok(Self {
            command,
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            width,
            height,
            written: 0,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.written
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl FrameSink for FfmpegFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncoderError::FrameSizeMismatch {
                got_width: frame.width(),
                got_height: frame.height(),
                width: self.width,
                height: self.height,
            }
            .into());
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| EncoderError::PipeClosed {
            reason: "sink already finished".to_string(),
        })?;
        stdin
            .write_all(frame.as_rgb_bytes())
            .map_err(|e| EncoderError::PipeClosed { reason: e.to_string() })?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin signals end of stream
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self.collect_stderr();
        if !status.success() {
            return Err(EncoderError::CommandFailed {
                command: self.command.clone(),
                status: status.code(),
                stderr,
            }
            .into());
        }

        debug!("Intermediate encoder finished after {} frames", self.written);
        Ok(())
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.collect_stderr();
    }
}

impl Drop for FfmpegFrameSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("Intermediate encoder dropped without finish; killing it");
            self.abort();
        }
    }
}

/// Collects written frames in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    frames: Vec<Frame>,
    fail_at: Option<usize>,
    finished: bool,
    aborted: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the write of the `index`-th frame
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl FrameSink for CollectingSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.fail_at == Some(self.frames.len()) {
            return Err(EncoderError::PipeClosed {
                reason: format!("refusing frame {}", self.frames.len()),
            }
            .into());
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// Where the final mux takes its audio from
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSource {
    pub path: PathBuf,
    /// Start offset in seconds
    pub offset: f64,
    /// Length in seconds; `None` runs to the end of the source
    pub duration: Option<f64>,
}

/// Tempo factors, each within ffmpeg's `atempo` range, whose product is `speed`
pub fn atempo_chain(speed: f64) -> Vec<f64> {
    if !speed.is_finite() || speed <= 0.0 || (speed - 1.0).abs() <= 0.01 {
        return Vec::new();
    }

    let mut factors = Vec::new();
    let mut remaining = speed;
    while remaining > 2.0 {
        factors.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        factors.push(0.5);
        remaining /= 0.5;
    }
    if (remaining - 1.0).abs() > 1e-9 {
        factors.push(remaining);
    }
    factors
}

/// `atempo=..,atempo=..` filter for `speed`, if any adjustment is needed
pub fn atempo_filter(speed: f64) -> Option<String> {
    let chain = atempo_chain(speed);
    if chain.is_empty() {
        return None;
    }
    Some(
        chain
            .iter()
            .map(|factor| format!("atempo={}", factor))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Represents an encoded video output
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub file_size: u64,
}

/// Final re-encode of the intermediate stream with optional audio
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Raw composited intermediate written by the pipeline
    pub input: PathBuf,
    pub output: PathBuf,
    pub audio: Option<AudioSource>,
    /// Playback-speed multiplier already applied to the video frames
    pub speed: f64,
}

impl EncodeRequest {
    /// ffmpeg arguments for this request
    pub fn build_args(&self, config: &EncoderConfig) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "error", "-y"].map(String::from).to_vec();
        args.extend(["-i".into(), self.input.display().to_string()]);

        if let Some(audio) = &self.audio {
            if audio.offset > 0.0 {
                args.extend(["-ss".into(), format!("{:.3}", audio.offset)]);
            }
            if let Some(duration) = audio.duration {
                args.extend(["-t".into(), format!("{:.3}", duration)]);
            }
            args.extend(["-i".into(), audio.path.display().to_string()]);
            args.extend(["-map", "0:v:0", "-map", "1:a?"].map(String::from));
        } else {
            args.extend(["-map", "0:v:0"].map(String::from));
        }

        args.extend([
            "-c:v".into(), config.video_codec.clone(),
            "-preset".into(), config.preset.clone(),
            "-crf".into(), config.crf.to_string(),
            "-pix_fmt".into(), "yuv420p".into(),
        ]);

        if self.audio.is_some() {
            args.extend([
                "-c:a".into(), config.audio_codec.clone(),
                "-b:a".into(), config.audio_bitrate.clone(),
            ]);
            if let Some(filter) = atempo_filter(self.speed) {
                args.extend(["-filter:a".into(), filter]);
            }
            args.push("-shortest".into());
        } else {
            args.push("-an".into());
        }

        args.extend(["-movflags", "+faststart"].map(String::from));
        args.push(self.output.display().to_string());
        args
    }

    /// Run ffmpeg and wait for it to finish
    pub async fn run(&self, config: &EncoderConfig) -> Result<EncodedVideo> {
        if !ffmpeg_available(&config.ffmpeg).await {
            return Err(EncoderError::NotFound { binary: config.ffmpeg.clone() }.into());
        }

        let args = self.build_args(config);
        let command = render_command(&config.ffmpeg, &args);
        info!("Encoding {}", self.output.display());
        debug!("Running: {}", command);

        let output = tokio::process::Command::new(&config.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EncoderError::SpawnFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(EncoderError::CommandFailed {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let file_size = tokio::fs::metadata(&self.output).await?.len();
        info!(
            "Encoded {} ({:.1} MB)",
            self.output.display(),
            file_size as f64 / 1024.0 / 1024.0
        );

        Ok(EncodedVideo {
            path: self.output.clone(),
            file_size,
        })
    }
}
