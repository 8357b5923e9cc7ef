use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use crease::annotate;
use crease::detector::{DetectionsFile, Detector, NoDetector};
use crease::outcome::Outcome;
use crease::pipeline::{self, Pipeline, RunReport};
use crease::render::PngRenderer;
use crease::source::{FrameSource, ImageSequence};
use crease::{Config, Recovery, SavedTrack, Strategy};

#[derive(Parser, Debug)]
#[command(name = "crease", version, about = "Cricket delivery trajectory, heatmap and wagon wheel")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recover the ball track from a video and build every output
    Run {
        /// Video file, or a directory of frame images
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        strategy: Option<Strategy>,
        /// Precomputed detections, one `<frame>: <json>` line per frame
        #[arg(long)]
        detections: Option<PathBuf>,
        /// YOLOv8 ONNX model (needs the `opencv` feature)
        #[arg(long)]
        model: Option<PathBuf>,
        /// Frame rate of a frame directory
        #[arg(long, default_value_t = 25.0)]
        fps: f64,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        save_track: bool,
        /// Skip the annotated replay of the video
        #[arg(long)]
        no_annotate: bool,
    },

    /// Rebuild the outputs from a saved track
    Aggregate {
        track: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let report = match args.command {
        Command::Run {
            input,
            config,
            strategy,
            detections,
            model,
            fps,
            out_dir,
            save_track,
            no_annotate,
        } => {
            let mut config = load_config(config.as_deref(), out_dir)?;
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            config.save_track |= save_track;
            config.annotate &= !no_annotate;

            let detector = open_detector(&config, detections.as_deref(), model.as_deref())?;
            let mut source = open_source(&input, fps)?;
            let mut recoverer = pipeline::recoverer(&config, detector);

            let report = if config.annotate {
                let mut replay = open_source(&input, fps)?;
                let mut annotator = annotate::annotator(&config.output_dir, source.info());

                Pipeline::new(config, PngRenderer::default()).run_annotated(
                    source.as_mut(),
                    replay.as_mut(),
                    recoverer.as_mut(),
                    annotator.as_mut(),
                )
            } else {
                Pipeline::new(config, PngRenderer::default()).run(source.as_mut(), recoverer.as_mut())
            };

            report.with_context(|| format!("processing {}", input.display()))?
        }

        Command::Aggregate {
            track,
            config,
            out_dir,
        } => {
            let config = load_config(config.as_deref(), out_dir)?;
            let saved = SavedTrack::load(&track)
                .with_context(|| format!("loading {}", track.display()))?;

            let recovery = Recovery {
                track: saved.track,
                roi: saved.roi,
            };

            Pipeline::new(config, PngRenderer::default()).aggregate(recovery, saved.video)?
        }
    };

    print_summary(&report);
    Ok(())
}

fn load_config(path: Option<&Path>, out_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load(path).context("loading configuration")?;
    if let Some(dir) = out_dir {
        config.output_dir = dir;
    }

    Ok(config)
}

fn open_source(input: &Path, fps: f64) -> Result<Box<dyn FrameSource>> {
    if input.is_dir() {
        return Ok(Box::new(ImageSequence::open(input, fps)?));
    }

    open_video(input)
}

#[cfg(feature = "opencv")]
fn open_video(input: &Path) -> Result<Box<dyn FrameSource>> {
    let path = input
        .to_str()
        .ok_or_else(|| anyhow!("{}: path is not valid UTF-8", input.display()))?;

    Ok(Box::new(crease::source::VideoCaptureSource::open(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video(input: &Path) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{}: decoding video files needs the `opencv` feature, pass a directory of frames instead",
        input.display()
    ))
}

fn open_detector(
    config: &Config,
    detections: Option<&Path>,
    model: Option<&Path>,
) -> Result<Box<dyn Detector>> {
    match (detections, model) {
        (Some(_), Some(_)) => bail!("--detections and --model are mutually exclusive"),
        (Some(path), None) => Ok(Box::new(DetectionsFile::open(path)?)),
        (None, Some(path)) => open_model(config, path),
        (None, None) if config.strategy == Strategy::Detection => {
            bail!("detection strategy needs --detections or --model")
        }
        (None, None) => Ok(Box::new(NoDetector)),
    }
}

#[cfg(feature = "opencv")]
fn open_model(config: &Config, path: &Path) -> Result<Box<dyn Detector>> {
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("{}: path is not valid UTF-8", path.display()))?;

    Ok(Box::new(crease::detector::YoloDetector::new(
        path,
        config.detector.yolo_config(),
    )?))
}

#[cfg(not(feature = "opencv"))]
fn open_model(_config: &Config, path: &Path) -> Result<Box<dyn Detector>> {
    Err(anyhow!(
        "{}: running a model needs the `opencv` feature",
        path.display()
    ))
}

fn print_summary(report: &RunReport) {
    println!("=== Results ===");
    match &report.heatmap {
        Outcome::Ready(h) => println!("Heatmap: {}", h.path.display()),
        Outcome::InsufficientData(why) => println!("Heatmap: not produced ({})", why),
    }

    match &report.wagon_wheel {
        Outcome::Ready(w) => println!("Wagon wheel: {}", w.path.display()),
        Outcome::InsufficientData(why) => println!("Wagon wheel: not produced ({})", why),
    }

    if let Some(path) = &report.track_path {
        println!("Track: {}", path.display());
    }

    if let Some(path) = &report.annotated_video {
        println!("Annotated video: {}", path.display());
    }

    println!("Insights:");
    for line in &report.insights {
        println!("  - {}", line);
    }
}
