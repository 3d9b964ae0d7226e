use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{EncoderError, PipelineError, Result};
use crate::pipeline::{
    CropAndComposite, FramePipeline, FrameProcessor, PipelineSession, ProgressEvent,
    ProgressSender, RunOutcome, RunReport,
};
use crate::video::compositor::Compositor;
use crate::video::encoder::{ffmpeg_available, AudioSource, EncodeRequest, EncodedVideo, FfmpegFrameSink};
use crate::video::loader::{FfmpegFrameSource, FrameSource};
use crate::video::types::{CropRect, CropSpec, Frame, MediaFile, MediaKind, TimeRange};

/// Which media kinds folder discovery returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MediaFilter {
    #[default]
    All,
    Images,
    Videos,
}

impl MediaFilter {
    fn accepts(self, kind: MediaKind) -> bool {
        match self {
            Self::All => true,
            Self::Images => kind == MediaKind::Image,
            Self::Videos => kind == MediaKind::Video,
        }
    }
}

/// One video to transform
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub crop: CropSpec,
    pub range: Option<TimeRange>,
    pub speed: f64,
}

impl VideoJob {
    pub fn new<P: Into<PathBuf>>(input: P, output: P) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            crop: CropSpec::NoCrop,
            range: None,
            speed: 1.0,
        }
    }
}

/// Result of a video job that did not fail
#[derive(Debug, Clone)]
pub enum VideoOutcome {
    Completed { report: RunReport, encoded: EncodedVideo },
    Cancelled(RunReport),
}

/// Drives image and video jobs with one configuration and session
pub struct MediaProcessor {
    config: Config,
    session: Arc<PipelineSession>,
    progress: Option<ProgressSender>,
}

impl MediaProcessor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session: Arc::new(PipelineSession::new()),
            progress: None,
        }
    }

    /// Share a session, e.g. one whose cancel token a signal handler holds
    pub fn with_session(mut self, session: Arc<PipelineSession>) -> Self {
        self.session = session;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<PipelineSession> {
        &self.session
    }

    /// Supported media files directly inside `folder`, sorted by path
    pub fn discover<P: AsRef<Path>>(folder: P, filter: MediaFilter) -> Result<Vec<MediaFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder.as_ref())? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(kind) = MediaKind::from_path(&path) {
                if filter.accepts(kind) {
                    files.push(MediaFile { path, kind });
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        debug!("Discovered {} media files in {}", files.len(), folder.as_ref().display());
        Ok(files)
    }

    /// `<stem>_processed.<extension>` in `output_dir`, or next to the input
    pub fn output_path(input: &Path, output_dir: Option<&Path>, extension: &str) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        dir.join(format!("{}_processed.{}", stem, extension))
    }

    /// Crop and composite a still image
    pub fn process_image<P: AsRef<Path>>(&self, input: P, crop: Option<CropRect>) -> Result<Frame> {
        let frame = Frame::new(image::open(input.as_ref())?.to_rgb8());
        let spec = crop.map(CropSpec::Static).unwrap_or_default();
        let processor = CropAndComposite::new(spec, Compositor::from_config(&self.config.output));
        processor.process(0, frame)
    }

    /// Process a still image and write the result.
    ///
    /// With `replace` the original file is overwritten through a temporary
    /// file in the same directory; otherwise the result goes to
    /// [`output_path`](Self::output_path).
    pub fn save_image<P: AsRef<Path>>(
        &self,
        input: P,
        output_dir: Option<&Path>,
        crop: Option<CropRect>,
        replace: bool,
    ) -> Result<PathBuf> {
        let input = input.as_ref();
        let frame = self.process_image(input, crop)?;
        let extension = input
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "png".to_string());

        if replace {
            let dir = input.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let temp = tempfile::Builder::new()
                .prefix(".reframer")
                .suffix(&format!(".{}", extension))
                .tempfile_in(dir)?;
            frame.save(temp.path())?;
            temp.persist(input).map_err(|e| e.error)?;
            info!("Replaced {}", input.display());
            return Ok(input.to_path_buf());
        }

        let output = Self::output_path(input, output_dir, &extension);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        frame.save(&output)?;
        info!("Saved {}", output.display());
        Ok(output)
    }

    /// Run the frame pipeline on a video, then mux the final output.
    ///
    /// A cancelled run returns [`VideoOutcome::Cancelled`] and skips the
    /// encode; the intermediate is discarded either way.
    pub async fn process_video(&self, job: &VideoJob) -> Result<VideoOutcome> {
        info!("Processing video {}", job.input.display());
        let encoder = &self.config.encoder;
        if !ffmpeg_available(&encoder.ffmpeg).await {
            return Err(EncoderError::NotFound { binary: encoder.ffmpeg.clone() }.into());
        }

        let work_dir = tempfile::Builder::new().prefix("reframer").tempdir()?;
        let intermediate = work_dir.path().join("frames.mkv");

        let outcome = {
            let config = self.config.clone();
            let session = Arc::clone(&self.session);
            let progress = self.progress.clone();
            let job = job.clone();
            let intermediate = intermediate.clone();

            task::spawn_blocking(move || -> Result<RunOutcome> {
                let mut source =
                    FfmpegFrameSource::open(&config.encoder.ffmpeg, &config.encoder.ffprobe, &job.input)?;
                let fps = source.metadata().fps;
                let mut sink = FfmpegFrameSink::create(
                    &config.encoder,
                    &intermediate,
                    config.output.width,
                    config.output.height,
                    fps,
                )?;
                let processor = CropAndComposite::new(job.crop, Compositor::from_config(&config.output));

                let mut pipeline = FramePipeline::new(config.pipeline.clone(), &session);
                if let Some(progress) = progress {
                    pipeline = pipeline.with_progress(progress);
                }
                pipeline.run(&mut source, &mut sink, &processor, job.range, job.speed)
            })
            .await
            .map_err(|e| PipelineError::StagePanicked { stage: format!("video job: {}", e) })??
        };

        let report = match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::Cancelled(report) => {
                warn!("Cancelled {} after {} frames", job.input.display(), report.frames_written);
                return Ok(VideoOutcome::Cancelled(report));
            }
        };

        if let Some(progress) = &self.progress {
            let _ = progress.send(ProgressEvent::Encoding);
        }

        // Audio follows the frame-aligned trim actually applied to the video
        let audio = encoder.include_audio.then(|| AudioSource {
            path: job.input.clone(),
            offset: report.plan.start_time(),
            duration: job.range.map(|_| report.plan.input_duration()),
        });
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let request = EncodeRequest {
            input: intermediate,
            output: job.output.clone(),
            audio,
            speed: job.speed,
        };
        let encoded = request.run(encoder).await?;

        Ok(VideoOutcome::Completed { report, encoded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReframeError;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.output.width = 64;
        config.output.height = 36;
        config.output.blur_radius = 8;
        config
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.png", "a.MP4", "c.txt", "d.jpeg", "e.mkv"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let all = MediaProcessor::discover(dir.path(), MediaFilter::All).unwrap();
        let names: Vec<String> = all
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MP4", "b.png", "d.jpeg", "e.mkv"]);

        let videos = MediaProcessor::discover(dir.path(), MediaFilter::Videos).unwrap();
        assert_eq!(videos.len(), 2);
        assert!(videos.iter().all(|f| f.kind == MediaKind::Video));

        let images = MediaProcessor::discover(dir.path(), MediaFilter::Images).unwrap();
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn test_output_path_naming() {
        let input = Path::new("/media/in/holiday.mov");
        assert_eq!(
            MediaProcessor::output_path(input, None, "mp4"),
            PathBuf::from("/media/in/holiday_processed.mp4")
        );
        assert_eq!(
            MediaProcessor::output_path(input, Some(Path::new("/out")), "mp4"),
            PathBuf::from("/out/holiday_processed.mp4")
        );
    }

    #[test]
    fn test_save_image_with_crop() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("portrait.png");
        let mut image = RgbImage::from_pixel(40, 80, Rgb([20, 20, 20]));
        for y in 20..60 {
            for x in 10..30 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        image.save(&input).unwrap();

        let processor = MediaProcessor::new(small_config());
        let output = processor
            .save_image(&input, None, Some(CropRect::new(10, 20, 30, 60)), false)
            .unwrap();

        assert_eq!(output, dir.path().join("portrait_processed.png"));
        let saved = image::open(&output).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (64, 36));
        // Centre shows the bright crop
        assert!(saved.get_pixel(32, 18).0.iter().all(|&c| c > 200));
        // Original is untouched
        assert_eq!(image::open(&input).unwrap().to_rgb8().dimensions(), (40, 80));
    }

    #[test]
    fn test_save_image_replace_mode() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("wide.png");
        RgbImage::from_pixel(120, 30, Rgb([0, 128, 255])).save(&input).unwrap();

        let processor = MediaProcessor::new(small_config());
        let output = processor.save_image(&input, None, None, true).unwrap();

        assert_eq!(output, input);
        assert_eq!(image::open(&input).unwrap().to_rgb8().dimensions(), (64, 36));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let processor = MediaProcessor::new(small_config());
        assert!(processor.process_image("/no/such/image.png", None).is_err());
    }

    #[tokio::test]
    async fn test_video_without_ffmpeg() {
        let mut config = small_config();
        config.encoder.ffmpeg = "/nonexistent/ffmpeg-binary".to_string();
        let processor = MediaProcessor::new(config);

        let result = processor
            .process_video(&VideoJob::new("clip.mp4", "clip_processed.mp4"))
            .await;
        assert!(matches!(
            result,
            Err(ReframeError::Encoder(EncoderError::NotFound { .. }))
        ));
    }
}
