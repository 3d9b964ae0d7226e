use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Shared cancellation flag.
///
/// Cloning yields another handle to the same flag, so a signal handler or UI
/// thread can hold one while the pipeline stages poll another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Snapshot of the session counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub frames_read: usize,
    pub frames_reused: usize,
    pub frames_processed: usize,
    pub frames_written: usize,
    pub seeks: usize,
    pub skipped: usize,
    pub peak_read_queue: usize,
    pub read_time: Duration,
    pub process_time: Duration,
    pub write_time: Duration,
}

/// State shared by the stages of one video run.
///
/// Passed by reference into the reader, the workers and the writer; nothing
/// else is shared between them apart from the queues and the permits.
#[derive(Debug, Default)]
pub struct PipelineSession {
    cancel: CancelToken,
    aborted: AtomicBool,
    state: AtomicU8,

    frames_read: AtomicUsize,
    frames_reused: AtomicUsize,
    frames_processed: AtomicUsize,
    frames_written: AtomicUsize,
    seeks: AtomicUsize,
    skipped: AtomicUsize,
    peak_read_queue: AtomicUsize,

    read_nanos: AtomicU64,
    process_nanos: AtomicU64,
    write_nanos: AtomicU64,
}

impl PipelineSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session observing an externally owned cancellation flag
    pub fn with_cancel_token(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop all stages because one of them failed
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Cancelled by the user or aborted by a failing stage
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_aborted()
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Enter `Running`, resetting counters from any previous run.
    ///
    /// The cancellation flag is left alone: a cancel requested before the
    /// run starts still applies to it.
    pub fn begin(&self) -> Result<()> {
        let previous = self.state.swap(RunState::Running as u8, Ordering::SeqCst);
        if previous == RunState::Running as u8 {
            return Err(PipelineError::InvalidParameters {
                details: "session is already running".to_string(),
            }
            .into());
        }

        self.aborted.store(false, Ordering::SeqCst);
        for counter in [
            &self.frames_read,
            &self.frames_reused,
            &self.frames_processed,
            &self.frames_written,
            &self.seeks,
            &self.skipped,
            &self.peak_read_queue,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for nanos in [&self.read_nanos, &self.process_nanos, &self.write_nanos] {
            nanos.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    pub(crate) fn finish(&self, state: RunState) {
        debug_assert!(state.is_terminal());
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Back to `Idle` with a cleared cancellation flag
    pub fn reset(&self) {
        self.cancel.clear();
        self.aborted.store(false, Ordering::SeqCst);
        self.state.store(RunState::Idle as u8, Ordering::SeqCst);
    }

    pub(crate) fn record_read(&self, elapsed: Duration) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.read_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_reuse(&self) {
        self.frames_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self, frames: usize) {
        self.skipped.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_read_queue_depth(&self, depth: usize) {
        self.peak_read_queue.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, elapsed: Duration) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.process_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, elapsed: Duration) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.write_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_reused: self.frames_reused.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            peak_read_queue: self.peak_read_queue.load(Ordering::Relaxed),
            read_time: Duration::from_nanos(self.read_nanos.load(Ordering::Relaxed)),
            process_time: Duration::from_nanos(self.process_nanos.load(Ordering::Relaxed)),
            write_time: Duration::from_nanos(self.write_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let session = PipelineSession::with_cancel_token(token.clone());
        assert!(!session.should_stop());

        token.cancel();
        assert!(session.is_cancelled());
        assert!(session.should_stop());
        assert!(!session.is_aborted());
    }

    #[test]
    fn test_lifecycle() {
        let session = PipelineSession::new();
        assert_eq!(session.state(), RunState::Idle);

        session.begin().unwrap();
        assert_eq!(session.state(), RunState::Running);
        assert!(session.begin().is_err());

        session.finish(RunState::Completed);
        assert!(session.state().is_terminal());

        // A finished session can run again
        session.begin().unwrap();
        session.finish(RunState::Cancelled);
        assert_eq!(session.state(), RunState::Cancelled);
    }

    #[test]
    fn test_begin_resets_counters_but_keeps_cancel() {
        let session = PipelineSession::new();
        session.begin().unwrap();
        session.record_read(Duration::from_millis(3));
        session.record_read_queue_depth(7);
        session.abort();
        session.cancel();
        session.finish(RunState::Failed);

        session.begin().unwrap();
        assert_eq!(session.stats(), SessionStats::default());
        assert!(!session.is_aborted());
        assert!(session.is_cancelled());

        session.finish(RunState::Cancelled);
        session.reset();
        assert!(!session.is_cancelled());
        assert_eq!(session.state(), RunState::Idle);
    }

    #[test]
    fn test_stats_accumulate() {
        let session = PipelineSession::new();
        session.record_read(Duration::from_millis(2));
        session.record_read(Duration::from_millis(3));
        session.record_reuse();
        session.record_skipped(4);
        session.record_seek();
        session.record_read_queue_depth(3);
        session.record_read_queue_depth(1);
        session.record_written(Duration::from_millis(1));

        let stats = session.stats();
        assert_eq!(stats.frames_read, 2);
        assert_eq!(stats.frames_reused, 1);
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.seeks, 1);
        assert_eq!(stats.peak_read_queue, 3);
        assert_eq!(stats.read_time, Duration::from_millis(5));
        assert_eq!(session.frames_written(), 1);
    }
}
