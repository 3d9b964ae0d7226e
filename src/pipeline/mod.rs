//! # Frame Pipeline
//!
//! Reader, worker pool and reordering writer that turn a frame-indexed
//! source into an ordered stream of composited frames.

pub mod engine;
pub mod permits;
pub mod plan;
pub mod progress;
pub mod reorder;
pub mod session;

pub use engine::{CropAndComposite, FramePipeline, FrameProcessor, RunOutcome, RunReport};
pub use permits::{Permit, Permits};
pub use plan::FramePlan;
pub use progress::{progress_channel, ProgressEvent, ProgressReceiver, ProgressSender, TimingInfo};
pub use reorder::ReorderBuffer;
pub use session::{CancelToken, PipelineSession, RunState, SessionStats};
