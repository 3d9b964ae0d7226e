use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PipelineError, Result};

/// Smallest width/height (exclusive) of a user-drawn crop
pub const MIN_CROP_SIZE: i64 = 10;

/// Represents a single decoded frame
///
/// A thin wrapper around an RGB image buffer. Frames move between pipeline
/// stages by value; no two stages ever hold the same frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self { buffer }
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Get a pixel at the given coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Consume the frame, returning the image buffer
    pub fn into_image(self) -> RgbImage {
        self.buffer
    }

    /// Raw packed rgb24 bytes
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Create a frame from raw RGB bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    /// Copy out the region described by `rect`, clamped to the frame bounds
    pub fn crop(&self, rect: &CropRect) -> std::result::Result<Frame, PipelineError> {
        let clamped = rect.clamped(self.width(), self.height());
        if clamped.width() <= 0 || clamped.height() <= 0 {
            return Err(PipelineError::InvalidCrop {
                x1: rect.x1,
                y1: rect.y1,
                x2: rect.x2,
                y2: rect.y2,
                width: self.width(),
                height: self.height(),
            });
        }

        let view = imageops::crop_imm(
            &self.buffer,
            clamped.x1 as u32,
            clamped.y1 as u32,
            clamped.width() as u32,
            clamped.height() as u32,
        );
        Ok(Frame::new(view.to_image()))
    }

    /// Save the frame to disk, format chosen from the extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), image::ImageError> {
        self.buffer.save(path)
    }
}

/// Crop rectangle `(x1, y1, x2, y2)` in source-frame pixel space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct CropRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl CropRect {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a rectangle from two arbitrary corners
    pub fn normalized(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
    }

    pub fn width(&self) -> i64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i64 {
        self.y2 - self.y1
    }

    /// Clamp every coordinate into `[0, width] x [0, height]`
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (i64::from(width), i64::from(height));
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    /// Large enough to count as a deliberate selection
    pub fn is_valid_crop(&self, min_size: i64) -> bool {
        self.width() > min_size && self.height() > min_size
    }

    /// Parse `x1,y1,x2,y2`
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<i64> = value
            .split(',')
            .map(|p| p.trim().parse().ok())
            .collect::<Option<Vec<_>>>()?;
        match parts.as_slice() {
            [x1, y1, x2, y2] => Some(Self::normalized(*x1, *y1, *x2, *y2)),
            _ => None,
        }
    }
}

impl From<[i64; 4]> for CropRect {
    fn from([x1, y1, x2, y2]: [i64; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<CropRect> for [i64; 4] {
    fn from(rect: CropRect) -> Self {
        [rect.x1, rect.y1, rect.x2, rect.y2]
    }
}

/// Sparse map of source frame index → crop rectangle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CropKeyframes {
    frames: BTreeMap<usize, CropRect>,
}

#[derive(Serialize, Deserialize)]
struct KeyframesFile {
    keyframes: BTreeMap<String, CropRect>,
}

impl CropKeyframes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the keyframe at `frame`
    pub fn insert(&mut self, frame: usize, rect: CropRect) -> Option<CropRect> {
        self.frames.insert(frame, rect)
    }

    pub fn remove(&mut self, frame: usize) -> Option<CropRect> {
        self.frames.remove(&frame)
    }

    pub fn get(&self, frame: usize) -> Option<&CropRect> {
        self.frames.get(&frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Keyframes in ascending frame order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &CropRect)> {
        self.frames.iter().map(|(frame, rect)| (*frame, rect))
    }

    /// Last keyframe at or before `frame`
    pub fn at_or_before(&self, frame: usize) -> Option<(usize, &CropRect)> {
        self.frames.range(..=frame).next_back().map(|(k, v)| (*k, v))
    }

    /// First keyframe at or after `frame`
    pub fn at_or_after(&self, frame: usize) -> Option<(usize, &CropRect)> {
        self.frames.range(frame..).next().map(|(k, v)| (*k, v))
    }

    /// Parse a TOML document with a `[keyframes]` table of `"frame" = [x1, y1, x2, y2]`
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: KeyframesFile = toml::from_str(content).map_err(|e| ConfigError::InvalidValue {
            key: "keyframes".to_string(),
            value: e.to_string(),
        })?;

        let mut keyframes = Self::new();
        for (key, rect) in file.keyframes {
            let frame = key.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "keyframes".to_string(),
                value: key.clone(),
            })?;
            // Corners may be given in any order, like `CropRect::parse`
            keyframes.insert(frame, CropRect::normalized(rect.x1, rect.y1, rect.x2, rect.y2));
        }
        Ok(keyframes)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = KeyframesFile {
            keyframes: self
                .frames
                .iter()
                .map(|(frame, rect)| (frame.to_string(), *rect))
                .collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| {
            ConfigError::InvalidValue {
                key: "keyframes".to_string(),
                value: e.to_string(),
            }
            .into()
        })
    }
}

impl FromIterator<(usize, CropRect)> for CropKeyframes {
    fn from_iter<I: IntoIterator<Item = (usize, CropRect)>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

/// How each frame is cropped before compositing
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CropSpec {
    /// Use the whole frame
    #[default]
    NoCrop,
    /// Same rectangle for every frame
    Static(CropRect),
    /// Rectangle interpolated between keyframes
    Keyframed(CropKeyframes),
}

/// Optional trim range in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() || start >= end {
            return Err(ConfigError::InvalidTime {
                value: format!("{}-{}", start, end),
            }
            .into());
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Stream properties of a decode source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub total_frames: usize,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.total_frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Kind of media file recognised by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" | "webp" => Some(Self::Image),
            "mp4" | "avi" | "mov" | "mkv" | "webm" | "wmv" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A media file found in an input folder
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Parse `SS`, `SS.fff`, `MM:SS` or `HH:MM:SS` into seconds
pub fn parse_time(value: &str) -> Result<f64> {
    let value = value.trim();
    let bad = || ConfigError::InvalidTime { value: value.to_string() };

    if let Ok(seconds) = value.parse::<f64>() {
        return Ok(seconds);
    }

    let parts: Vec<&str> = value.split(':').collect();
    let seconds = match parts.as_slice() {
        [minutes, seconds] => {
            let minutes: u64 = minutes.parse().map_err(|_| bad())?;
            let seconds: f64 = seconds.parse().map_err(|_| bad())?;
            minutes as f64 * 60.0 + seconds
        }
        [hours, minutes, seconds] => {
            let hours: u64 = hours.parse().map_err(|_| bad())?;
            let minutes: u64 = minutes.parse().map_err(|_| bad())?;
            let seconds: f64 = seconds.parse().map_err(|_| bad())?;
            hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds
        }
        _ => return Err(bad().into()),
    };
    Ok(seconds)
}

/// Format seconds as `MM:SS.ss`
pub fn format_time_precise(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = seconds - minutes as f64 * 60.0;
    format!("{:02}:{:05.2}", minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_copies_region() {
        let mut image = RgbImage::new(4, 4);
        image.put_pixel(2, 1, Rgb([200, 10, 10]));
        let frame = Frame::new(image);

        let cropped = frame.crop(&CropRect::new(2, 1, 4, 3)).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (2, 2));
        assert_eq!(cropped.get_pixel(0, 0), [200, 10, 10]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let frame = Frame::new_filled(10, 8, [1, 2, 3]);
        let cropped = frame.crop(&CropRect::new(-5, -5, 50, 50)).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (10, 8));
    }

    #[test]
    fn test_degenerate_crop_is_rejected() {
        let frame = Frame::new_filled(10, 8, [0, 0, 0]);
        let result = frame.crop(&CropRect::new(12, 0, 20, 8));
        assert!(matches!(result, Err(PipelineError::InvalidCrop { .. })));
    }

    #[test]
    fn test_rect_helpers() {
        let rect = CropRect::normalized(100, 80, 20, 10);
        assert_eq!(rect, CropRect::new(20, 10, 100, 80));
        assert!(rect.is_valid_crop(MIN_CROP_SIZE));
        assert!(!CropRect::new(0, 0, 10, 50).is_valid_crop(MIN_CROP_SIZE));
        assert_eq!(CropRect::parse("10, 20,30,40"), Some(CropRect::new(10, 20, 30, 40)));
        assert_eq!(CropRect::parse("10,20,30"), None);
    }

    #[test]
    fn test_keyframes_toml_roundtrip() {
        let content = r#"
[keyframes]
"5" = [0, 0, 100, 100]
"15" = [0, 0, 200, 200]
"#;
        let keyframes = CropKeyframes::from_toml_str(content).unwrap();
        assert_eq!(keyframes.len(), 2);
        assert_eq!(keyframes.get(15), Some(&CropRect::new(0, 0, 200, 200)));

        let reparsed = CropKeyframes::from_toml_str(&keyframes.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed, keyframes);
    }

    #[test]
    fn test_keyframes_inverted_corners_are_normalized() {
        let content = "[keyframes]\n\"0\" = [120, 90, 20, 10]\n\"8\" = [0, 50, 40, 0]\n";
        let keyframes = CropKeyframes::from_toml_str(content).unwrap();
        assert_eq!(keyframes.get(0), Some(&CropRect::new(20, 10, 120, 90)));
        assert_eq!(keyframes.get(8), Some(&CropRect::new(0, 0, 40, 50)));
        assert!(keyframes.iter().all(|(_, rect)| rect.width() > 0 && rect.height() > 0));
    }

    #[test]
    fn test_keyframes_reject_bad_keys() {
        let content = "[keyframes]\n\"ten\" = [0, 0, 1, 1]\n";
        assert!(CropKeyframes::from_toml_str(content).is_err());
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(parse_time("30").unwrap(), 30.0);
        assert_eq!(parse_time("1.5").unwrap(), 1.5);
        assert_eq!(parse_time("1:30").unwrap(), 90.0);
        assert_eq!(parse_time("0:01:30").unwrap(), 90.0);
        assert_eq!(parse_time("1:00:00").unwrap(), 3600.0);
        assert!(parse_time("1:2:3:4").is_err());
        assert!(parse_time("abc").is_err());
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time_precise(0.0), "00:00.00");
        assert_eq!(format_time_precise(90.5), "01:30.50");
    }

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange::new(1.0, 2.0).is_ok());
        assert!(TimeRange::new(2.0, 2.0).is_err());
        assert!(TimeRange::new(f64::NAN, 2.0).is_err());
    }

    #[test]
    fn test_media_kind_detection() {
        assert_eq!(MediaKind::from_path("a/b/clip.MP4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path("photo.jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path("notes.txt"), None);
        assert_eq!(MediaKind::from_path("README"), None);
    }
}
