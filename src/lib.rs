//! # Reframer
//!
//! Crop, rescale and composite images and video clips onto a blurred backdrop
//! of a fixed output size.
//!
//! Video frames go through an ordered parallel pipeline: a single reader
//! decodes the trimmed, speed-adjusted frame sequence, a worker pool crops
//! and composites frames in any order, and a single writer restores the
//! original order before streaming frames to ffmpeg for the final mux.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reframer::{
//!     config::Config,
//!     video::{CropRect, CropSpec, MediaProcessor, VideoJob, VideoOutcome},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let processor = MediaProcessor::new(Config::default());
//!
//! let mut job = VideoJob::new("clip.mp4", "clip_processed.mp4");
//! job.crop = CropSpec::Static(CropRect::new(420, 0, 1500, 1080));
//! job.speed = 1.5;
//!
//! match processor.process_video(&job).await? {
//!     VideoOutcome::Completed { encoded, .. } => println!("wrote {:?}", encoded.path),
//!     VideoOutcome::Cancelled(_) => println!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - Frame types, keyframe interpolation, compositing, ffmpeg I/O
//! - [`pipeline`] - Reader / worker pool / reordering writer
//! - [`config`] - Configuration management
//!
//! ## Custom frame sources
//!
//! Anything that can seek and decode by frame index can feed the pipeline by
//! implementing [`FrameSource`](video::FrameSource):
//!
//! ```rust,no_run
//! use reframer::pipeline::{CropAndComposite, FramePipeline, PipelineSession};
//! use reframer::video::{CollectingSink, Compositor, CropSpec, Frame, MemoryFrameSource};
//!
//! # fn main() -> reframer::Result<()> {
//! let frames = vec![Frame::new_filled(640, 480, [30, 60, 90]); 48];
//! let mut source = MemoryFrameSource::new(frames, 24.0);
//! let mut sink = CollectingSink::new();
//! let processor = CropAndComposite::new(CropSpec::NoCrop, Compositor::new(1280, 720, 10));
//!
//! let session = PipelineSession::new();
//! FramePipeline::new(Default::default(), &session)
//!     .run(&mut source, &mut sink, &processor, None, 2.0)?;
//! assert_eq!(sink.frames().len(), 24);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{ReframeError, Result},
    pipeline::{CancelToken, FramePipeline, PipelineSession, ProgressEvent, RunOutcome},
    video::{CropKeyframes, CropRect, CropSpec, MediaProcessor, VideoJob, VideoOutcome},
};
