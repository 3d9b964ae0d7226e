use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reframer::{
    config::Config,
    pipeline::{progress_channel, PipelineSession, ProgressEvent, ProgressReceiver},
    video::{
        types::{format_time_precise, parse_time, MIN_CROP_SIZE},
        CropKeyframes, CropRect, CropSpec, MediaFilter, MediaKind, MediaProcessor, TimeRange,
        VideoJob, VideoOutcome,
    },
};

#[derive(Parser)]
#[command(
    name = "reframer",
    version,
    about = "Crop and composite images and videos onto a blurred backdrop",
    long_about = "Reframer crops each image or video frame to a fixed or keyframed rectangle, scales it to fit the output canvas and fills the remaining space with a blurred copy of the source."
)]
struct Cli {
    /// Image, video, or folder of media files
    input: PathBuf,

    /// Output directory (defaults to next to each input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Backdrop blur radius
    #[arg(long)]
    blur: Option<u32>,

    /// Trim start (SS, MM:SS or HH:MM:SS)
    #[arg(long)]
    start: Option<String>,

    /// Trim end (SS, MM:SS or HH:MM:SS)
    #[arg(long)]
    end: Option<String>,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Static crop rectangle x1,y1,x2,y2
    #[arg(long, conflicts_with = "keyframes")]
    crop: Option<String>,

    /// TOML file with a [keyframes] table of frame = [x1, y1, x2, y2]
    #[arg(long)]
    keyframes: Option<PathBuf>,

    /// Drop the audio track
    #[arg(long)]
    no_audio: bool,

    /// Only process videos in a folder
    #[arg(long, conflicts_with = "images_only")]
    videos_only: bool,

    /// Only process images in a folder
    #[arg(long)]
    images_only: bool,

    /// Overwrite processed images in place
    #[arg(long)]
    replace: bool,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn filter(&self) -> MediaFilter {
        if self.videos_only {
            MediaFilter::Videos
        } else if self.images_only {
            MediaFilter::Images
        } else {
            MediaFilter::All
        }
    }

    fn time_range(&self) -> Result<Option<TimeRange>> {
        if self.start.is_none() && self.end.is_none() {
            return Ok(None);
        }
        let start = match &self.start {
            Some(value) => parse_time(value)?,
            None => 0.0,
        };
        let end = match &self.end {
            Some(value) => parse_time(value)?,
            // Clamped to the clip length by the frame plan
            None => f64::from(u32::MAX),
        };
        Ok(Some(TimeRange::new(start, end)?))
    }

    fn crop(&self) -> Result<CropSpec> {
        if let Some(value) = &self.crop {
            let rect = CropRect::parse(value)
                .with_context(|| format!("invalid crop '{}', expected x1,y1,x2,y2", value))?;
            if !rect.is_valid_crop(MIN_CROP_SIZE) {
                bail!("crop {:?} is smaller than {}px", rect, MIN_CROP_SIZE);
            }
            return Ok(CropSpec::Static(rect));
        }
        if let Some(path) = &self.keyframes {
            let keyframes = CropKeyframes::from_file(path)?;
            info!("Loaded {} crop keyframes from {:?}", keyframes.len(), path);
            return Ok(CropSpec::Keyframed(keyframes));
        }
        Ok(CropSpec::NoCrop)
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };

    if let Some(width) = cli.width {
        config.output.width = width;
    }
    if let Some(height) = cli.height {
        config.output.height = height;
    }
    if let Some(blur) = cli.blur {
        config.output.blur_radius = blur;
    }
    if cli.no_audio {
        config.encoder.include_audio = false;
    }
    config.validate()?;
    Ok(config)
}

fn collect_inputs(cli: &Cli) -> Result<Vec<(PathBuf, MediaKind)>> {
    if cli.input.is_dir() {
        let files = MediaProcessor::discover(&cli.input, cli.filter())?;
        return Ok(files.into_iter().map(|f| (f.path, f.kind)).collect());
    }
    let kind = MediaKind::from_path(&cli.input)
        .with_context(|| format!("unsupported file type: {:?}", cli.input))?;
    Ok(vec![(cli.input.clone(), kind)])
}

/// Log progress events until every sender is gone
fn spawn_progress_logger(rx: ProgressReceiver) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match event {
                ProgressEvent::Frames { written, total, timing } => {
                    info!(
                        "{}/{} frames ({:.0}%) {:.1} ms/frame, ETA {} [read {:.0}% / process {:.0}% / write {:.0}%]",
                        written,
                        total,
                        event_percent(written, total),
                        timing.ms_per_frame,
                        format_time_precise(timing.eta_secs),
                        timing.read_pct,
                        timing.process_pct,
                        timing.write_pct
                    );
                }
                ProgressEvent::Encoding => info!("Encoding final video..."),
            }
        }
    })
}

fn event_percent(written: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        written as f64 / total as f64 * 100.0
    }
}

fn image_crop(crop: &CropSpec) -> Option<CropRect> {
    match crop {
        CropSpec::NoCrop => None,
        CropSpec::Static(rect) => Some(*rect),
        // Stills have a single frame: use the earliest keyframe
        CropSpec::Keyframed(keyframes) => keyframes.iter().next().map(|(_, rect)| *rect),
    }
}

fn video_output(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    MediaProcessor::output_path(input, output_dir, "mp4")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Reframer v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    let crop = cli.crop()?;
    let range = cli.time_range()?;
    if !(cli.speed.is_finite() && cli.speed > 0.0) {
        bail!("speed must be a positive number, got {}", cli.speed);
    }
    if !(0.5..=4.0).contains(&cli.speed) {
        warn!("Speed {} is outside the usual 0.5-4.0 range", cli.speed);
    }
    if cli.replace {
        info!("Replace mode: images are overwritten, videos are written alongside");
    }

    let inputs = collect_inputs(&cli)?;
    if inputs.is_empty() {
        bail!("no supported media files found in {:?}", cli.input);
    }
    info!(
        "Output {}x{}, blur {}, {} file(s)",
        config.output.width,
        config.output.height,
        config.output.blur_radius,
        inputs.len()
    );

    let session = Arc::new(PipelineSession::new());
    let cancel = session.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            cancel.cancel();
        }
    });

    let (progress_tx, progress_rx) = progress_channel();
    let logger = spawn_progress_logger(progress_rx);
    let processor = MediaProcessor::new(config)
        .with_session(Arc::clone(&session))
        .with_progress(progress_tx);

    let output_dir = cli.output.as_deref();
    let mut processed = 0;
    let mut failed = 0;
    let mut cancelled = false;

    for (path, kind) in &inputs {
        if session.is_cancelled() {
            cancelled = true;
            break;
        }

        let result = match kind {
            MediaKind::Image => processor
                .save_image(path, output_dir, image_crop(&crop), cli.replace)
                .map(|_| true),
            MediaKind::Video => {
                let job = VideoJob {
                    input: path.clone(),
                    output: video_output(path, output_dir),
                    crop: crop.clone(),
                    range,
                    speed: cli.speed,
                };
                processor.process_video(&job).await.map(|outcome| match outcome {
                    VideoOutcome::Completed { report, encoded } => {
                        if report.degraded {
                            warn!(
                                "{:?}: source ended early, {} of {} frames written",
                                path, report.frames_written, report.plan.frames_to_process
                            );
                        }
                        info!(
                            "Wrote {:?} ({} frames, {:.1} MB)",
                            encoded.path,
                            report.frames_written,
                            encoded.file_size as f64 / 1024.0 / 1024.0
                        );
                        true
                    }
                    VideoOutcome::Cancelled(_) => false,
                })
            }
        };

        match result {
            Ok(true) => processed += 1,
            Ok(false) => {
                cancelled = true;
                break;
            }
            Err(e) => {
                error!("Failed to process {:?}: {}", path, e.user_message());
                failed += 1;
            }
        }
    }

    drop(processor);
    let _ = logger.join();

    if cancelled {
        warn!("Cancelled after {} of {} file(s)", processed, inputs.len());
        return Ok(());
    }

    info!("Done: {} processed, {} failed", processed, failed);
    if failed > 0 {
        bail!("{} file(s) failed", failed);
    }
    Ok(())
}
