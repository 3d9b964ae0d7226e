//! # Video Processing Module
//!
//! Frame types, crop interpolation, compositing, and the ffmpeg-backed
//! decode source and encoder.

pub mod compositor;
pub mod encoder;
pub mod keyframes;
pub mod loader;
pub mod processor;
pub mod types;

pub use compositor::Compositor;
pub use encoder::{AudioSource, CollectingSink, EncodeRequest, EncodedVideo, FfmpegFrameSink, FrameSink};
pub use keyframes::interpolate;
pub use loader::{FfmpegFrameSource, FrameSource, MemoryFrameSource, SourceOp};
pub use processor::{MediaFilter, MediaProcessor, VideoJob, VideoOutcome};
pub use types::{CropKeyframes, CropRect, CropSpec, Frame, MediaFile, MediaKind, TimeRange, VideoMetadata};
