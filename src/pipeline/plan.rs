use crate::error::PipelineError;
use crate::video::types::{TimeRange, VideoMetadata};

/// Mapping from output frame index to source frame index for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    /// First source frame, inclusive
    pub start_frame: usize,
    /// Last source frame, exclusive
    pub end_frame: usize,
    /// Number of output frames
    pub frames_to_process: usize,
    pub speed: f64,
    pub total_frames: usize,
    pub fps: f64,
}

impl FramePlan {
    pub fn new(
        metadata: &VideoMetadata,
        range: Option<TimeRange>,
        speed: f64,
    ) -> Result<Self, PipelineError> {
        let total_frames = metadata.total_frames;
        if total_frames == 0 {
            return Err(PipelineError::InvalidParameters {
                details: "source has no frames".to_string(),
            });
        }
        if !(metadata.fps.is_finite() && metadata.fps > 0.0) {
            return Err(PipelineError::InvalidParameters {
                details: format!("invalid frame rate {}", metadata.fps),
            });
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PipelineError::InvalidParameters {
                details: format!("speed must be positive, got {}", speed),
            });
        }

        let to_frame = |seconds: f64| (seconds * metadata.fps).floor().max(0.0) as usize;

        let start_frame = range
            .map(|r| to_frame(r.start))
            .unwrap_or(0)
            .min(total_frames - 1);
        let end_frame = range
            .map(|r| to_frame(r.end))
            .unwrap_or(total_frames)
            .min(total_frames)
            .max(start_frame + 1);

        let frames_to_process = ((end_frame - start_frame) as f64 / speed).floor() as usize;
        if frames_to_process == 0 {
            return Err(PipelineError::InvalidParameters {
                details: format!(
                    "{} source frame(s) at speed {} produce no output",
                    end_frame - start_frame,
                    speed
                ),
            });
        }

        Ok(Self {
            start_frame,
            end_frame,
            frames_to_process,
            speed,
            total_frames,
            fps: metadata.fps,
        })
    }

    /// Source frame shown at output frame `index`
    pub fn source_index(&self, index: usize) -> usize {
        let offset = (index as f64 * self.speed).floor() as usize;
        (self.start_frame + offset).min(self.total_frames - 1)
    }

    /// Number of source frames in the trimmed range
    pub fn input_frames(&self) -> usize {
        self.end_frame - self.start_frame
    }

    /// Source time of `start_frame`, in seconds
    pub fn start_time(&self) -> f64 {
        self.start_frame as f64 / self.fps
    }

    /// Length of the trimmed range in source seconds
    pub fn input_duration(&self) -> f64 {
        self.input_frames() as f64 / self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(total_frames: usize, fps: f64) -> VideoMetadata {
        VideoMetadata {
            total_frames,
            fps,
            width: 64,
            height: 36,
        }
    }

    #[test]
    fn test_frame_count_law() {
        let meta = metadata(300, 30.0);
        assert_eq!(FramePlan::new(&meta, None, 1.0).unwrap().frames_to_process, 300);
        assert_eq!(FramePlan::new(&meta, None, 2.0).unwrap().frames_to_process, 150);
        assert_eq!(FramePlan::new(&meta, None, 0.5).unwrap().frames_to_process, 600);
        assert_eq!(FramePlan::new(&meta, None, 4.0).unwrap().frames_to_process, 75);
        assert_eq!(FramePlan::new(&meta, None, 0.7).unwrap().frames_to_process, 428);
    }

    #[test]
    fn test_source_index_mapping() {
        let meta = metadata(300, 30.0);

        let fast = FramePlan::new(&meta, None, 2.0).unwrap();
        assert_eq!(fast.source_index(0), 0);
        assert_eq!(fast.source_index(1), 2);
        assert_eq!(fast.source_index(149), 298);

        let slow = FramePlan::new(&meta, None, 0.5).unwrap();
        let targets: Vec<usize> = (0..6).map(|i| slow.source_index(i)).collect();
        assert_eq!(targets, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(slow.source_index(599), 299);
    }

    #[test]
    fn test_time_range_is_converted_and_clamped() {
        let meta = metadata(300, 30.0);

        let plan = FramePlan::new(&meta, Some(TimeRange { start: 2.0, end: 4.5 }), 1.0).unwrap();
        assert_eq!((plan.start_frame, plan.end_frame), (60, 135));
        assert_eq!(plan.frames_to_process, 75);
        assert_eq!(plan.source_index(0), 60);
        assert!((plan.start_time() - 2.0).abs() < 1e-9);
        assert!((plan.input_duration() - 2.5).abs() < 1e-9);

        let past_end = FramePlan::new(&meta, Some(TimeRange { start: 5.0, end: 60.0 }), 1.0).unwrap();
        assert_eq!((past_end.start_frame, past_end.end_frame), (150, 300));

        let negative = FramePlan::new(&meta, Some(TimeRange { start: -3.0, end: 1.0 }), 1.0).unwrap();
        assert_eq!(negative.start_frame, 0);
    }

    #[test]
    fn test_at_least_one_frame() {
        let meta = metadata(300, 30.0);
        // Start beyond the end of the clip collapses onto the last frame
        let plan = FramePlan::new(&meta, Some(TimeRange { start: 50.0, end: 60.0 }), 1.0).unwrap();
        assert_eq!((plan.start_frame, plan.end_frame), (299, 300));
        assert_eq!(plan.frames_to_process, 1);

        // Range shorter than one frame
        let tiny = FramePlan::new(&meta, Some(TimeRange { start: 1.0, end: 1.01 }), 1.0).unwrap();
        assert_eq!(tiny.end_frame, tiny.start_frame + 1);
    }

    #[test]
    fn test_source_index_never_passes_last_frame() {
        let meta = metadata(10, 10.0);
        let plan = FramePlan::new(&meta, None, 3.0).unwrap();
        assert_eq!(plan.frames_to_process, 3);
        for i in 0..plan.frames_to_process + 5 {
            assert!(plan.source_index(i) < 10);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let meta = metadata(1, 30.0);
        assert!(matches!(
            FramePlan::new(&meta, None, 2.0),
            Err(PipelineError::InvalidParameters { .. })
        ));
        assert!(FramePlan::new(&meta, None, 0.0).is_err());
        assert!(FramePlan::new(&meta, None, f64::NAN).is_err());
        assert!(FramePlan::new(&metadata(0, 30.0), None, 1.0).is_err());
    }
}
