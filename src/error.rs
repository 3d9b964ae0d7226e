use thiserror::Error;

/// Main error type for the Reframer library
#[derive(Error, Debug)]
pub enum ReframeError {
    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Decode-source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open media file: {path}")]
    OpenFailed { path: String },

    #[error("Failed to probe {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("No video stream found in {path}")]
    NoVideoStream { path: String },

    #[error("Seek to frame {index} failed: {reason}")]
    SeekFailed { index: usize, reason: String },

    #[error("Frame decoding failed: {reason}")]
    DecodingFailed { reason: String },
}

/// Frame-pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Processing of frame {index} failed: {reason}")]
    FrameFailed { index: usize, reason: String },

    #[error("Invalid crop rectangle ({x1}, {y1}, {x2}, {y2}) for a {width}x{height} frame")]
    InvalidCrop {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        width: u32,
        height: u32,
    },

    #[error("Writing frame {index} failed: {reason}")]
    WriteFailed { index: usize, reason: String },

    #[error("Reorder buffer rejected frame {index}: {reason}")]
    OutOfOrder { index: usize, reason: String },

    #[error("Pipeline stage '{stage}' panicked")]
    StagePanicked { stage: String },

    #[error("Invalid pipeline parameters: {details}")]
    InvalidParameters { details: String },
}

/// External encoder errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("ffmpeg not found ({binary}). Please install ffmpeg and make sure it is on PATH.")]
    NotFound { binary: String },

    #[error("Failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("`{command}` exited with {}:\n{stderr}", status.map(|c| format!("status {c}")).unwrap_or_else(|| "a signal".to_string()))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Encoder pipe closed: {reason}")]
    PipeClosed { reason: String },

    #[error("Frame size mismatch: got {got_width}x{got_height}, expected {width}x{height}")]
    FrameSizeMismatch {
        got_width: u32,
        got_height: u32,
        width: u32,
        height: u32,
    },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid time value: {value}")]
    InvalidTime { value: String },
}

/// Convenience type alias for Results using ReframeError
pub type Result<T> = std::result::Result<T, ReframeError>;

impl ReframeError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Source(SourceError::OpenFailed { path }) => {
                format!("Could not open '{}'. Please check the file exists and is a supported format.", path)
            }
            Self::Encoder(EncoderError::NotFound { .. }) => {
                "ffmpeg is required for video processing but was not found on PATH.".to_string()
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_carries_command_and_output() {
        let err: ReframeError = EncoderError::CommandFailed {
            command: "ffmpeg -y -i in.mkv out.mp4".to_string(),
            status: Some(1),
            stderr: "Unknown encoder 'libx264'".to_string(),
        }
        .into();

        let message = err.to_string();
        assert!(message.contains("ffmpeg -y -i in.mkv out.mp4"));
        assert!(message.contains("status 1"));
        assert!(message.contains("Unknown encoder"));
    }

    #[test]
    fn test_user_message_for_missing_source() {
        let err: ReframeError = SourceError::OpenFailed { path: "clip.mp4".to_string() }.into();
        assert!(err.user_message().contains("clip.mp4"));
    }
}
