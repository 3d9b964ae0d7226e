use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::pipeline::session::SessionStats;

/// Throughput and stage breakdown attached to frame progress
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingInfo {
    /// Average wall-clock milliseconds per written frame
    pub ms_per_frame: f64,
    /// Estimated seconds until the last frame is written
    pub eta_secs: f64,
    pub elapsed_secs: f64,
    /// Share of accumulated stage time spent decoding
    pub read_pct: f64,
    /// Share spent in crop and composite (summed over workers)
    pub process_pct: f64,
    /// Share spent handing frames to the sink
    pub write_pct: f64,
}

impl TimingInfo {
    pub fn compute(elapsed: Duration, written: usize, total: usize, stats: &SessionStats) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let (ms_per_frame, eta_secs) = if written > 0 {
            let per_frame = elapsed_secs / written as f64;
            (per_frame * 1000.0, per_frame * total.saturating_sub(written) as f64)
        } else {
            (0.0, 0.0)
        };

        let read = stats.read_time.as_secs_f64();
        let process = stats.process_time.as_secs_f64();
        let write = stats.write_time.as_secs_f64();
        let sum = read + process + write;
        let pct = |part: f64| if sum > 0.0 { part / sum * 100.0 } else { 0.0 };

        Self {
            ms_per_frame,
            eta_secs,
            elapsed_secs,
            read_pct: pct(read),
            process_pct: pct(process),
            write_pct: pct(write),
        }
    }
}

/// Message from a running job to whoever presents progress
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Frames {
        written: usize,
        total: usize,
        timing: TimingInfo,
    },
    /// Frame stream done, external encode started
    Encoding,
}

impl ProgressEvent {
    /// Completed fraction in `[0, 1]`, if meaningful
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Frames { written, total, .. } if *total > 0 => {
                Some((*written as f64 / *total as f64).min(1.0))
            }
            _ => None,
        }
    }
}

pub type ProgressSender = Sender<ProgressEvent>;
pub type ProgressReceiver = Receiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_extrapolates_from_average() {
        let stats = SessionStats::default();
        let timing = TimingInfo::compute(Duration::from_secs(2), 20, 100, &stats);
        assert!((timing.ms_per_frame - 100.0).abs() < 1e-9);
        assert!((timing.eta_secs - 8.0).abs() < 1e-9);
        assert_eq!(timing.read_pct, 0.0);
    }

    #[test]
    fn test_stage_breakdown() {
        let stats = SessionStats {
            read_time: Duration::from_millis(100),
            process_time: Duration::from_millis(300),
            write_time: Duration::from_millis(100),
            ..SessionStats::default()
        };
        let timing = TimingInfo::compute(Duration::from_secs(1), 0, 10, &stats);
        assert_eq!(timing.ms_per_frame, 0.0);
        assert!((timing.read_pct - 20.0).abs() < 1e-9);
        assert!((timing.process_pct - 60.0).abs() < 1e-9);
        assert!((timing.write_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_fraction() {
        let event = ProgressEvent::Frames {
            written: 30,
            total: 120,
            timing: TimingInfo::default(),
        };
        assert_eq!(event.fraction(), Some(0.25));
        assert_eq!(ProgressEvent::Encoding.fraction(), None);
    }
}
