use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SourceError};
use crate::video::types::{Frame, VideoMetadata};

/// Frame-indexed decode source.
///
/// Owned and driven by exactly one pipeline stage (the reader), so methods
/// take `&mut self` and implementations need `Send` but not `Sync`.
pub trait FrameSource: Send {
    /// Stream properties
    fn metadata(&self) -> VideoMetadata;

    /// Index of the frame the next `read`/`grab` will produce
    fn position(&self) -> usize;

    /// Reposition so the next decoded frame is `index`
    fn seek(&mut self, index: usize) -> Result<()>;

    /// Decode and discard one frame; `false` at end of stream
    fn grab(&mut self) -> Result<bool>;

    /// Decode and return one frame; `None` at end of stream
    fn read(&mut self) -> Result<Option<Frame>>;
}

/// ffprobe JSON output format
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Parse an ffprobe rational like `30000/1001`
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_probe_output(path: &Path, json: &[u8]) -> Result<VideoMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(json).map_err(|e| SourceError::ProbeFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().unwrap_or("video") == "video")
        .ok_or_else(|| SourceError::NoVideoStream { path: path.display().to_string() })?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(SourceError::ProbeFailed {
                path: path.display().to_string(),
                reason: "video stream has no dimensions".to_string(),
            }
            .into())
        }
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(30.0);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as usize))
        .unwrap_or(0);

    Ok(VideoMetadata {
        total_frames,
        fps,
        width,
        height,
    })
}

/// Probe a video file with ffprobe
pub fn probe_video<P: AsRef<Path>>(ffprobe: &str, path: P) -> Result<VideoMetadata> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SourceError::OpenFailed { path: path.display().to_string() }.into());
    }

    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-print_format", "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SourceError::ProbeFailed {
            path: path.display().to_string(),
            reason: format!("could not run {}: {}", ffprobe, e),
        })?;

    if !output.status.success() {
        return Err(SourceError::ProbeFailed {
            path: path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    let metadata = parse_probe_output(path, &output.stdout)?;
    info!(
        "Video metadata: {}x{} @ {:.2}fps, {} frames ({:.2}s)",
        metadata.width,
        metadata.height,
        metadata.fps,
        metadata.total_frames,
        metadata.duration()
    );
    Ok(metadata)
}

struct Decoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Drop for Decoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes a video file to rgb24 frames through an ffmpeg child process
pub struct FfmpegFrameSource {
    path: PathBuf,
    ffmpeg: String,
    metadata: VideoMetadata,
    decoder: Option<Decoder>,
    position: usize,
    scratch: Vec<u8>,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding from frame 0
    pub fn open<P: AsRef<Path>>(ffmpeg: &str, ffprobe: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = probe_video(ffprobe, path)?;
        if metadata.total_frames == 0 {
            return Err(SourceError::OpenFailed { path: path.display().to_string() }.into());
        }

        let mut source = Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.to_string(),
            metadata,
            decoder: None,
            position: 0,
            scratch: vec![0u8; metadata.width as usize * metadata.height as usize * 3],
        };
        source.spawn_decoder(0)?;
        Ok(source)
    }

    fn spawn_decoder(&mut self, index: usize) -> Result<()> {
        // Drop (and kill) the previous process first
        self.decoder = None;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if index > 0 {
            let seconds = index as f64 / self.metadata.fps;
            cmd.args(["-ss", &format!("{:.6}", seconds)]);
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args([
                "-map", "0:v:0",
                "-vsync", "0",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| SourceError::SeekFailed {
            index,
            reason: format!("failed to spawn {}: {}", self.ffmpeg, e),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SourceError::SeekFailed {
            index,
            reason: "decoder stdout unavailable".to_string(),
        })?;

        debug!("Decoder started at frame {} for {}", index, self.path.display());
        self.decoder = Some(Decoder {
            child,
            stdout: BufReader::with_capacity(self.scratch.len().max(8192), stdout),
        });
        self.position = index;
        Ok(())
    }

    /// Fill `scratch` with the next frame; `false` at end of stream
    fn decode_next(&mut self) -> Result<bool> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(false);
        };

        match decoder.stdout.read_exact(&mut self.scratch) {
            Ok(()) => {
                self.position += 1;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("Decoder reached end of stream at frame {}", self.position);
                self.decoder = None;
                Ok(false)
            }
            Err(e) => Err(SourceError::DecodingFailed {
                reason: format!("frame {}: {}", self.position, e),
            }
            .into()),
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index >= self.metadata.total_frames {
            warn!("Seek past end: frame {} of {}", index, self.metadata.total_frames);
        }
        self.spawn_decoder(index)
    }

    fn grab(&mut self) -> Result<bool> {
        self.decode_next()
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let VideoMetadata { width, height, .. } = self.metadata;
        Frame::from_rgb_bytes(width, height, self.scratch.clone())
            .map(Some)
            .ok_or_else(|| {
                SourceError::DecodingFailed {
                    reason: format!("frame {} has the wrong size", self.position - 1),
                }
                .into()
            })
    }
}

/// Source operation, recorded by [`MemoryFrameSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOp {
    Seek(usize),
    Grab(usize),
    Read(usize),
}

/// In-memory decode source over pre-decoded frames (image sequences, tests)
pub struct MemoryFrameSource {
    frames: Vec<Frame>,
    fps: f64,
    reported_total: usize,
    position: usize,
    ops: Vec<SourceOp>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let reported_total = frames.len();
        Self {
            frames,
            fps,
            reported_total,
            position: 0,
            ops: Vec::new(),
        }
    }

    /// Claim more frames than are actually decodable, like a truncated file
    pub fn with_reported_total(mut self, total: usize) -> Self {
        self.reported_total = total;
        self
    }

    /// Every seek/grab/read issued so far
    pub fn ops(&self) -> &[SourceOp] {
        &self.ops
    }
}

impl FrameSource for MemoryFrameSource {
    fn metadata(&self) -> VideoMetadata {
        let (width, height) = self
            .frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        VideoMetadata {
            total_frames: self.reported_total,
            fps: self.fps,
            width,
            height,
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        self.ops.push(SourceOp::Seek(index));
        self.position = index;
        Ok(())
    }

    fn grab(&mut self) -> Result<bool> {
        self.ops.push(SourceOp::Grab(self.position));
        if self.position >= self.frames.len() {
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        self.ops.push(SourceOp::Read(self.position));
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "width": 1280,
                "height": 720,
                "avg_frame_rate": "30000/1001",
                "r_frame_rate": "30000/1001",
                "nb_frames": "300"
            }],
            "format": { "duration": "10.010000" }
        }"#;
        let metadata = parse_probe_output(Path::new("clip.mp4"), json).unwrap();
        assert_eq!((metadata.width, metadata.height), (1280, 720));
        assert_eq!(metadata.total_frames, 300);
    }

    #[test]
    fn test_probe_falls_back_to_duration() {
        let json = br#"{
            "streams": [{ "codec_type": "video", "width": 640, "height": 480, "avg_frame_rate": "0/0", "r_frame_rate": "25/1" }],
            "format": { "duration": "4.0" }
        }"#;
        let metadata = parse_probe_output(Path::new("clip.webm"), json).unwrap();
        assert_eq!(metadata.fps, 25.0);
        assert_eq!(metadata.total_frames, 100);
    }

    #[test]
    fn test_probe_without_video_stream() {
        let json = br#"{ "streams": [], "format": { "duration": "4.0" } }"#;
        assert!(parse_probe_output(Path::new("song.mp4"), json).is_err());
    }

    #[test]
    fn test_probe_missing_file() {
        let result = probe_video("ffprobe", "/no/such/video.mp4");
        assert!(matches!(
            result,
            Err(crate::error::ReframeError::Source(SourceError::OpenFailed { .. }))
        ));
    }

    #[test]
    fn test_memory_source_reads_and_seeks() {
        let frames: Vec<Frame> = (0..5).map(|i| Frame::new_filled(2, 2, [i, 0, 0])).collect();
        let mut source = MemoryFrameSource::new(frames, 30.0);

        assert_eq!(source.read().unwrap().unwrap().get_pixel(0, 0), [0, 0, 0]);
        assert!(source.grab().unwrap());
        assert_eq!(source.read().unwrap().unwrap().get_pixel(0, 0), [2, 0, 0]);
        source.seek(4).unwrap();
        assert_eq!(source.read().unwrap().unwrap().get_pixel(0, 0), [4, 0, 0]);
        assert_eq!(source.read().unwrap(), None);
        assert_eq!(
            source.ops(),
            &[
                SourceOp::Read(0),
                SourceOp::Grab(1),
                SourceOp::Read(2),
                SourceOp::Seek(4),
                SourceOp::Read(4),
                SourceOp::Read(5),
            ]
        );
    }
}
