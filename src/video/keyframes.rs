//! Crop keyframe interpolation.
//!
//! Keyframes are anchors; frames between two anchors get a rectangle whose
//! four coordinates are linearly interpolated and truncated toward zero.
//! Frames outside the keyed span hold the nearest anchor.

use crate::video::types::{CropKeyframes, CropRect, CropSpec};

/// Resolve the crop rectangle for `frame`, or `None` when there are no keyframes.
pub fn interpolate(
    keyframes: &CropKeyframes,
    frame: usize,
    frame_width: u32,
    frame_height: u32,
) -> Option<CropRect> {
    let (first_key, first) = keyframes.iter().next()?;
    let (last_key, last) = keyframes.iter().next_back()?;

    if keyframes.len() == 1 || frame <= first_key {
        return Some(*first);
    }
    if frame >= last_key {
        return Some(*last);
    }

    let (prev_key, prev) = keyframes.at_or_before(frame)?;
    let (next_key, next) = keyframes.at_or_after(frame)?;
    if prev_key == next_key {
        return Some(*prev);
    }

    let t = (frame - prev_key) as f64 / (next_key - prev_key) as f64;
    let lerp = |a: i64, b: i64| (a as f64 + t * (b - a) as f64) as i64;

    let rect = CropRect::new(
        lerp(prev.x1, next.x1),
        lerp(prev.y1, next.y1),
        lerp(prev.x2, next.x2),
        lerp(prev.y2, next.y2),
    );
    Some(rect.clamped(frame_width, frame_height))
}

impl CropSpec {
    /// Rectangle to cut out of source frame `frame`; `None` keeps the whole frame.
    pub fn resolve(&self, frame: usize, frame_width: u32, frame_height: u32) -> Option<CropRect> {
        match self {
            CropSpec::NoCrop => None,
            CropSpec::Static(rect) => Some(*rect),
            CropSpec::Keyframed(keyframes) => interpolate(keyframes, frame, frame_width, frame_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_keys() -> CropKeyframes {
        [
            (5, CropRect::new(0, 0, 100, 100)),
            (15, CropRect::new(0, 0, 200, 200)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_midpoint_interpolates_linearly() {
        assert_eq!(
            interpolate(&two_keys(), 10, 1920, 1080),
            Some(CropRect::new(0, 0, 150, 150))
        );
    }

    #[test]
    fn test_holds_first_and_last() {
        let keys = two_keys();
        assert_eq!(interpolate(&keys, 0, 1920, 1080), Some(CropRect::new(0, 0, 100, 100)));
        assert_eq!(interpolate(&keys, 5, 1920, 1080), Some(CropRect::new(0, 0, 100, 100)));
        assert_eq!(interpolate(&keys, 15, 1920, 1080), Some(CropRect::new(0, 0, 200, 200)));
        assert_eq!(interpolate(&keys, 100, 1920, 1080), Some(CropRect::new(0, 0, 200, 200)));
    }

    #[test]
    fn test_single_keyframe_is_returned_unchanged() {
        // Not clamped either: a single keyframe is never recomputed
        let rect = CropRect::new(10, 20, 3000, 40);
        let keys: CropKeyframes = [(42, rect)].into_iter().collect();
        for frame in [0, 41, 42, 43, 10_000] {
            assert_eq!(interpolate(&keys, frame, 1920, 1080), Some(rect));
        }
    }

    #[test]
    fn test_empty_map_returns_none() {
        assert_eq!(interpolate(&CropKeyframes::new(), 3, 1920, 1080), None);
    }

    #[test]
    fn test_truncates_rather_than_rounds() {
        let keys: CropKeyframes = [
            (0, CropRect::new(0, 0, 10, 10)),
            (3, CropRect::new(0, 0, 12, 20)),
        ]
        .into_iter()
        .collect();
        // t = 1/3: 10 + 0.67 -> 10, 10 + 3.33 -> 13
        assert_eq!(interpolate(&keys, 1, 100, 100), Some(CropRect::new(0, 0, 10, 13)));
        // t = 2/3: 10 + 1.33 -> 11, 10 + 6.67 -> 16
        assert_eq!(interpolate(&keys, 2, 100, 100), Some(CropRect::new(0, 0, 11, 16)));
    }

    #[test]
    fn test_uses_tightest_bracketing_pair() {
        let keys: CropKeyframes = [
            (0, CropRect::new(0, 0, 100, 100)),
            (10, CropRect::new(100, 100, 200, 200)),
            (20, CropRect::new(0, 0, 100, 100)),
        ]
        .into_iter()
        .collect();
        assert_eq!(interpolate(&keys, 10, 1000, 1000), Some(CropRect::new(100, 100, 200, 200)));
        assert_eq!(interpolate(&keys, 15, 1000, 1000), Some(CropRect::new(50, 50, 150, 150)));
    }

    #[test]
    fn test_interpolated_rect_is_clamped() {
        let keys: CropKeyframes = [
            (0, CropRect::new(-100, -100, 500, 500)),
            (10, CropRect::new(-100, -100, 700, 700)),
        ]
        .into_iter()
        .collect();
        assert_eq!(interpolate(&keys, 5, 640, 480), Some(CropRect::new(0, 0, 600, 480)));
    }

    #[test]
    fn test_crop_spec_resolution() {
        assert_eq!(CropSpec::NoCrop.resolve(7, 100, 100), None);

        let rect = CropRect::new(1, 2, 30, 40);
        assert_eq!(CropSpec::Static(rect).resolve(7, 100, 100), Some(rect));

        let keyed = CropSpec::Keyframed(two_keys());
        assert_eq!(keyed.resolve(10, 1920, 1080), Some(CropRect::new(0, 0, 150, 150)));
        assert_eq!(CropSpec::Keyframed(CropKeyframes::new()).resolve(0, 10, 10), None);
    }
}
