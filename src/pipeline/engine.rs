//! Ordered parallel frame pipeline.
//!
//! One reader thread decodes source frames into a bounded queue, the calling
//! thread dispatches them onto a rayon pool under a permit limit, and one
//! writer thread restores output order before handing frames to the sink.
//! Every blocking wait uses the configured queue timeout and re-checks the
//! session, so cancellation and failures are observed within one interval.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, ReframeError, Result, SourceError};
use crate::pipeline::permits::{Permit, Permits};
use crate::pipeline::plan::FramePlan;
use crate::pipeline::progress::{ProgressEvent, ProgressSender, TimingInfo};
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::session::{PipelineSession, RunState, SessionStats};
use crate::video::compositor::Compositor;
use crate::video::encoder::FrameSink;
use crate::video::loader::FrameSource;
use crate::video::types::{CropSpec, Frame, TimeRange};

/// Per-frame transform run on the worker pool
pub trait FrameProcessor: Send + Sync {
    /// Produce output for a frame decoded from source index `source_index`
    fn process(&self, source_index: usize, frame: Frame) -> Result<Frame>;
}

/// Crop to the resolved rectangle, then composite over the uncropped frame
pub struct CropAndComposite {
    crop: CropSpec,
    compositor: Compositor,
}

impl CropAndComposite {
    pub fn new(crop: CropSpec, compositor: Compositor) -> Self {
        Self { crop, compositor }
    }
}

impl FrameProcessor for CropAndComposite {
    fn process(&self, source_index: usize, frame: Frame) -> Result<Frame> {
        let output = match self.crop.resolve(source_index, frame.width(), frame.height()) {
            Some(rect) => {
                let cropped = frame.crop(&rect)?;
                self.compositor.composite(&cropped, &frame)?
            }
            None => self.compositor.composite(&frame, &frame)?,
        };
        Ok(output)
    }
}

/// Summary of a finished or cancelled run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: FramePlan,
    pub frames_written: usize,
    /// The source ran out before the plan did
    pub degraded: bool,
    pub elapsed: Duration,
    pub stats: SessionStats,
    pub timing: TimingInfo,
    pub peak_in_flight: usize,
    pub peak_reorder: usize,
}

/// How a run ended when it did not fail
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunReport),
    Cancelled(RunReport),
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Completed(report) | Self::Cancelled(report) => report,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Reader → dispatcher
enum ReadItem {
    Frame { index: usize, target: usize, frame: Frame },
    /// Sentinel: no more frames; `produced` frames were sent in total
    End { produced: usize },
}

/// Composited frame waiting for its turn at the writer
struct OutputTask {
    frame: Frame,
    // Released when the writer is done with the frame
    _permit: Permit,
}

/// Workers/dispatcher → writer
enum Completion {
    Done { index: usize, task: OutputTask },
    Failed { index: usize, reason: String },
    InputExhausted { produced: usize },
}

enum WriterExit {
    Finished,
    Stopped,
}

/// Send `item`, retrying on timeout until it fits or the session stops.
/// Returns `false` if the item was not delivered.
fn send_until_stopped<T>(
    tx: &Sender<T>,
    mut item: T,
    session: &PipelineSession,
    timeout: Duration,
) -> bool {
    loop {
        match tx.send_timeout(item, timeout) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if session.should_stop() {
                    return false;
                }
                item = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Bring the source to `target` and decode it; `None` when the source ends early
fn decode_at<S: FrameSource + ?Sized>(
    source: &mut S,
    target: usize,
    skip_threshold: usize,
    session: &PipelineSession,
) -> Result<Option<Frame>> {
    let position = source.position();
    if target > position && target - position < skip_threshold {
        // Short forward hop: decoding through is cheaper than a seek
        for _ in position..target {
            if !source.grab()? {
                return Ok(None);
            }
        }
        session.record_skipped(target - position);
    } else if target != position {
        source.seek(target)?;
        session.record_seek();
    }
    source.read()
}

/// Reader stage: decode planned frames in order and publish them
fn read_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    plan: &FramePlan,
    config: &PipelineConfig,
    session: &PipelineSession,
    tx: Sender<ReadItem>,
) -> usize {
    let timeout = config.queue_timeout();
    let mut cached: Option<(usize, Frame)> = None;
    let mut produced = 0;

    for index in 0..plan.frames_to_process {
        if session.should_stop() {
            debug!("Reader stopping at output frame {}", index);
            return produced;
        }

        let target = plan.source_index(index);
        let frame = match cached.take() {
            Some((cached_index, frame)) if cached_index == target => {
                session.record_reuse();
                frame
            }
            _ => {
                let started = Instant::now();
                match decode_at(source, target, config.seek_skip_threshold, session) {
                    Ok(Some(frame)) => {
                        session.record_read(started.elapsed());
                        frame
                    }
                    Ok(None) => {
                        warn!(
                            "Source ended at frame {} of {}; keeping {} output frames",
                            target, plan.total_frames, produced
                        );
                        break;
                    }
                    Err(e) => {
                        warn!("Read of frame {} failed ({}); keeping {} output frames", target, e, produced);
                        break;
                    }
                }
            }
        };

        // Keep a copy only when the next output frame shows the same source frame
        if index + 1 < plan.frames_to_process && plan.source_index(index + 1) == target {
            cached = Some((target, frame.clone()));
        }

        if !send_until_stopped(&tx, ReadItem::Frame { index, target, frame }, session, timeout) {
            return produced;
        }
        produced += 1;
        session.record_read_queue_depth(tx.len());
    }

    send_until_stopped(&tx, ReadItem::End { produced }, session, timeout);
    produced
}

/// Dispatch stage: move read frames onto the pool, bounded by `permits`
fn dispatch_frames<P: FrameProcessor + ?Sized>(
    pool: &rayon::ThreadPool,
    processor: &P,
    permits: &Permits,
    config: &PipelineConfig,
    session: &PipelineSession,
    rx: Receiver<ReadItem>,
    done_tx: Sender<Completion>,
) {
    let timeout = config.queue_timeout();

    pool.in_place_scope(|scope| {
        'frames: loop {
            if session.should_stop() {
                break;
            }

            let (index, target, frame) = match rx.recv_timeout(timeout) {
                Ok(ReadItem::Frame { index, target, frame }) => (index, target, frame),
                Ok(ReadItem::End { produced }) => {
                    let _ = done_tx.send(Completion::InputExhausted { produced });
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if !session.should_stop() {
                        error!("Reader exited without signalling the end of input");
                        session.abort();
                    }
                    break;
                }
            };

            let permit = loop {
                if session.should_stop() {
                    break 'frames;
                }
                if let Some(permit) = permits.acquire_timeout(timeout) {
                    break permit;
                }
            };

            let done_tx = done_tx.clone();
            scope.spawn(move |_| {
                if session.should_stop() {
                    return;
                }

                let started = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(|| processor.process(target, frame)));
                session.record_processed(started.elapsed());

                if session.should_stop() {
                    return;
                }

                let completion = match result {
                    Ok(Ok(frame)) => Completion::Done {
                        index,
                        task: OutputTask { frame, _permit: permit },
                    },
                    Ok(Err(e)) => Completion::Failed { index, reason: e.to_string() },
                    Err(payload) => Completion::Failed {
                        index,
                        reason: format!("panicked: {}", panic_message(payload)),
                    },
                };
                let _ = done_tx.send(completion);
            });
        }
    });
}

/// Writer stage: restore order and feed the sink
fn write_frames<K: FrameSink + ?Sized>(
    sink: &mut K,
    plan: &FramePlan,
    config: &PipelineConfig,
    session: &PipelineSession,
    rx: Receiver<Completion>,
    progress: Option<&ProgressSender>,
    started: Instant,
) -> Result<(WriterExit, usize)> {
    let timeout = config.queue_timeout();
    let mut reorder: ReorderBuffer<OutputTask> = ReorderBuffer::new(config.max_in_flight());
    let mut expected: Option<usize> = None;

    let exit = loop {
        if expected == Some(reorder.next_index()) {
            break WriterExit::Finished;
        }
        if session.should_stop() {
            break WriterExit::Stopped;
        }

        let completion = match rx.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                if session.should_stop() {
                    break WriterExit::Stopped;
                }
                session.abort();
                return Err(PipelineError::OutOfOrder {
                    index: reorder.next_index(),
                    reason: "completion stream ended before this frame arrived".to_string(),
                }
                .into());
            }
        };

        match completion {
            Completion::Done { index, task } => {
                if let Err(e) = reorder.insert(index, task) {
                    session.abort();
                    return Err(e.into());
                }
            }
            Completion::Failed { index, reason } => {
                error!("Frame {} failed: {}", index, reason);
                session.abort();
                return Err(PipelineError::FrameFailed { index, reason }.into());
            }
            Completion::InputExhausted { produced: 0 } => {
                if session.is_cancelled() {
                    break WriterExit::Stopped;
                }
                session.abort();
                return Err(SourceError::DecodingFailed {
                    reason: format!(
                        "no frames decoded from source frame {} onward",
                        plan.start_frame
                    ),
                }
                .into());
            }
            Completion::InputExhausted { produced } => {
                debug!("Input exhausted after {} frames", produced);
                expected = Some(produced);
            }
        }

        while let Some((index, task)) = reorder.pop_ready() {
            let write_started = Instant::now();
            if let Err(e) = sink.write_frame(&task.frame) {
                session.abort();
                return Err(PipelineError::WriteFailed {
                    index,
                    reason: e.to_string(),
                }
                .into());
            }
            session.record_written(write_started.elapsed());
            drop(task);

            let written = index + 1;
            let total = expected.unwrap_or(plan.frames_to_process);
            if written % config.progress_interval == 0 || written == total {
                if let Some(progress) = progress {
                    let timing = TimingInfo::compute(started.elapsed(), written, total, &session.stats());
                    let _ = progress.send(ProgressEvent::Frames { written, total, timing });
                }
            }
        }
    };

    Ok((exit, reorder.peak()))
}

/// Runs the read → process → reorder → write pipeline for one video
pub struct FramePipeline<'a> {
    config: PipelineConfig,
    session: &'a PipelineSession,
    progress: Option<ProgressSender>,
}

impl<'a> FramePipeline<'a> {
    pub fn new(config: PipelineConfig, session: &'a PipelineSession) -> Self {
        Self {
            config,
            session,
            progress: None,
        }
    }

    /// Report `ProgressEvent::Frames` on this channel
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process `source` into `sink`.
    ///
    /// Returns `Cancelled` when the session's cancel token was set; any
    /// stage failure is an error and leaves the sink aborted.
    pub fn run<S, K, P>(
        &self,
        source: &mut S,
        sink: &mut K,
        processor: &P,
        range: Option<TimeRange>,
        speed: f64,
    ) -> Result<RunOutcome>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        P: FrameProcessor + ?Sized,
    {
        let session = self.session;
        session.begin()?;

        let result = self.run_stages(source, sink, processor, range, speed);
        match &result {
            Ok(RunOutcome::Completed(report)) => {
                session.finish(RunState::Completed);
                info!(
                    "Pipeline completed: {} frames in {:.2}s ({:.1} ms/frame, {} seeks, {} skipped, {} reused)",
                    report.frames_written,
                    report.elapsed.as_secs_f64(),
                    report.timing.ms_per_frame,
                    report.stats.seeks,
                    report.stats.skipped,
                    report.stats.frames_reused
                );
            }
            Ok(RunOutcome::Cancelled(report)) => {
                session.finish(RunState::Cancelled);
                info!("Pipeline cancelled after {} frames", report.frames_written);
            }
            Err(e) => {
                session.finish(RunState::Failed);
                error!("Pipeline failed: {}", e);
            }
        }
        result
    }

    fn run_stages<S, K, P>(
        &self,
        source: &mut S,
        sink: &mut K,
        processor: &P,
        range: Option<TimeRange>,
        speed: f64,
    ) -> Result<RunOutcome>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        P: FrameProcessor + ?Sized,
    {
        let config = &self.config;
        let session = self.session;
        config.validate()?;
        let metadata = source.metadata();
        let plan = FramePlan::new(&metadata, range, speed)?;

        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("reframer-worker-{}", i))
            .build()
            .map_err(|e| ReframeError::generic(format!("failed to build worker pool: {}", e)))?;
        let permits = Permits::new(config.max_in_flight());

        info!(
            "Processing {} output frames from source frames {}..{} at {}x speed ({} workers, {} permits)",
            plan.frames_to_process,
            plan.start_frame,
            plan.end_frame,
            plan.speed,
            workers,
            permits.capacity()
        );

        let (read_tx, read_rx) = bounded::<ReadItem>(config.read_queue_capacity);
        let (done_tx, done_rx) = unbounded::<Completion>();
        let started = Instant::now();
        let progress = self.progress.as_ref();

        let (produced, writer_result) = thread::scope(|s| {
            let reader = s.spawn(|| read_frames(source, &plan, config, session, read_tx));

            let writer = s.spawn(|| {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    write_frames(&mut *sink, &plan, config, session, done_rx, progress, started)
                }));
                match result {
                    Ok(Ok((WriterExit::Finished, peak))) => {
                        sink.finish().map(|()| (WriterExit::Finished, peak))
                    }
                    Ok(other) => {
                        sink.abort();
                        other
                    }
                    Err(payload) => {
                        // Stop the reader and dispatcher before they decode the rest
                        session.abort();
                        sink.abort();
                        error!("Writer panicked: {}", panic_message(payload));
                        Err(PipelineError::StagePanicked { stage: "writer".to_string() }.into())
                    }
                }
            });

            dispatch_frames(&pool, processor, &permits, config, session, read_rx, done_tx);

            let produced = reader.join().map_err(|_| {
                session.abort();
                ReframeError::from(PipelineError::StagePanicked { stage: "reader".to_string() })
            });
            let written = writer.join().unwrap_or_else(|_| {
                Err(PipelineError::StagePanicked { stage: "writer".to_string() }.into())
            });
            (produced, written)
        });

        let (exit, peak_reorder) = writer_result?;
        let produced = produced?;

        let frames_written = session.frames_written();
        let stats = session.stats();
        let elapsed = started.elapsed();
        let report = RunReport {
            plan,
            frames_written,
            degraded: produced < plan.frames_to_process && !session.is_cancelled(),
            elapsed,
            stats,
            timing: TimingInfo::compute(elapsed, frames_written, plan.frames_to_process, &stats),
            peak_in_flight: permits.peak(),
            peak_reorder,
        };

        match exit {
            WriterExit::Finished => {
                if report.degraded {
                    warn!(
                        "Source delivered {} of {} planned frames",
                        produced, plan.frames_to_process
                    );
                }
                Ok(RunOutcome::Completed(report))
            }
            WriterExit::Stopped if session.is_cancelled() => Ok(RunOutcome::Cancelled(report)),
            WriterExit::Stopped => Err(ReframeError::generic(
                "pipeline stopped without a recorded failure",
            )),
        }
    }
}
