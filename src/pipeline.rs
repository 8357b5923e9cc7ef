use std::path::{Path, PathBuf};

use serde_derive::Serialize;

use crate::annotate::{self, Annotator};
use crate::ball::DetectionTracker;
use crate::config::{Config, Strategy};
use crate::detector::Detector;
use crate::error::Error;
use crate::flow::FlowEstimator;
use crate::frame::VideoInfo;
use crate::heatmap::SpatialAggregator;
use crate::motion::MotionTracker;
use crate::outcome::Outcome;
use crate::region::Region;
use crate::render::Renderer;
use crate::roi::RoiLocator;
use crate::source::FrameSource;
use crate::track::SavedTrack;
use crate::tracker::IouTracker;
use crate::trajectory::{Bounce, TrajectoryProcessor};
use crate::wagon::AngularAggregator;
use crate::{Recoverer, Recovery};

pub const HEATMAP_FILE: &str = "pitch_heatmap.png";
pub const WAGON_WHEEL_FILE: &str = "wagon_wheel.png";
pub const TRACK_FILE: &str = "track.json";
pub const REPORT_FILE: &str = "report.json";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HeatmapSummary {
    pub path: PathBuf,
    pub in_pitch: usize,
    /// Hottest cell as `(x, y)`.
    pub peak: Option<(usize, usize)>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WagonSummary {
    pub path: PathBuf,
    pub buckets: Vec<u32>,
    pub coincident: usize,
    pub dominant_angle: Option<f32>,
}

/// Everything a run produced, written as `report.json`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub video: VideoInfo,
    pub roi: Option<Region>,
    pub frames: usize,
    pub positions: usize,
    pub bounces: Outcome<Vec<Bounce>>,
    pub heatmap: Outcome<HeatmapSummary>,
    pub wagon_wheel: Outcome<WagonSummary>,
    pub track_path: Option<PathBuf>,
    pub annotated_video: Option<PathBuf>,
    pub insights: Vec<String>,
}

/// Builds the position recoverer selected by `config.strategy`.
///
/// The detector locks the region of interest for the motion strategy and
/// feeds the object tracker for the detection strategy.
pub fn recoverer<'a>(config: &Config, detector: Box<dyn Detector + 'a>) -> Box<dyn Recoverer + 'a> {
    match config.strategy {
        Strategy::Motion => {
            let locator = RoiLocator::new(config.roi_margin, config.detector.person_class);
            Box::new(MotionTracker::new(
                locator,
                detector,
                flow_estimator(config),
                config.flow_threshold,
            ))
        }
        Strategy::Detection => {
            let tracker = IouTracker::new(detector, config.detector.tracker_config());
            Box::new(DetectionTracker::with_class(tracker, config.detector.ball_class))
        }
    }
}

#[cfg(feature = "opencv")]
fn flow_estimator(config: &Config) -> Box<dyn FlowEstimator> {
    Box::new(crate::flow::FarnebackFlow {
        winsize: config.flow_window as i32,
        ..Default::default()
    })
}

#[cfg(not(feature = "opencv"))]
fn flow_estimator(config: &Config) -> Box<dyn FlowEstimator> {
    Box::new(crate::flow::LucasKanade::new(config.flow_window))
}

/// Recovery followed by trajectory analysis, aggregation and rendering.
pub struct Pipeline<R: Renderer> {
    config: Config,
    renderer: R,
}

impl<R: Renderer> Pipeline<R> {
    pub fn new(config: Config, renderer: R) -> Self {
        Self { config, renderer }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        recoverer: &mut dyn Recoverer,
    ) -> Result<RunReport, Error> {
        let (recovery, video) = self.recover(source, recoverer)?;
        self.finish(recovery, video, None)
    }

    /// Like [`Pipeline::run`], then replays `replay`, a fresh stream of the
    /// same video, through `annotator` with the recovered ball marked.
    pub fn run_annotated(
        &mut self,
        source: &mut dyn FrameSource,
        replay: &mut dyn FrameSource,
        recoverer: &mut dyn Recoverer,
        annotator: &mut dyn Annotator,
    ) -> Result<RunReport, Error> {
        let (recovery, video) = self.recover(source, recoverer)?;

        std::fs::create_dir_all(&self.config.output_dir)?;
        let annotated = annotate::replay(replay, &recovery, annotator)?;

        self.finish(recovery, video, Some(annotated))
    }

    fn recover(
        &self,
        source: &mut dyn FrameSource,
        recoverer: &mut dyn Recoverer,
    ) -> Result<(Recovery, VideoInfo), Error> {
        let video = source.info();
        log::info!(
            "processing {}x{} video at {} fps with {} strategy",
            video.width,
            video.height,
            video.fps,
            self.config.strategy
        );

        Ok((recoverer.recover(source)?, video))
    }

    /// Runs every stage after recovery and writes the outputs.
    #[inline]
    pub fn aggregate(&mut self, recovery: Recovery, video: VideoInfo) -> Result<RunReport, Error> {
        self.finish(recovery, video, None)
    }

    fn finish(
        &mut self,
        recovery: Recovery,
        video: VideoInfo,
        annotated_video: Option<PathBuf>,
    ) -> Result<RunReport, Error> {
        let Recovery { track, roi } = recovery;
        let out_dir = self.config.output_dir.clone();
        std::fs::create_dir_all(&out_dir)?;

        let processor =
            TrajectoryProcessor::new(self.config.smoothing_window, self.config.length_thresholds);
        let bounces = processor
            .process(&track, video.height)
            .map(|trajectory| trajectory.bounces);

        let spatial = SpatialAggregator::new(
            self.config.frame_shape,
            self.config.blur_kernel,
            self.config.pitch,
        );
        let heatmap = match spatial.aggregate(&track)? {
            Outcome::Ready(map) => {
                let path = out_dir.join(HEATMAP_FILE);
                self.renderer.render_raster(&map, &path)?;

                Outcome::Ready(HeatmapSummary {
                    path,
                    in_pitch: map.in_pitch,
                    peak: map.peak(),
                })
            }
            Outcome::InsufficientData(why) => {
                log::warn!("no heatmap: {}", why);
                Outcome::InsufficientData(why)
            }
        };

        let wagon_wheel = match AngularAggregator::new(self.config.bucket_count).aggregate(&track) {
            Outcome::Ready(wheel) => {
                let path = out_dir.join(WAGON_WHEEL_FILE);
                self.renderer.render_histogram(&wheel, &path)?;

                Outcome::Ready(WagonSummary {
                    path,
                    dominant_angle: wheel.dominant().map(|(i, _)| wheel.bucket_center(i)),
                    buckets: wheel.buckets,
                    coincident: wheel.coincident,
                })
            }
            Outcome::InsufficientData(why) => {
                log::warn!("no wagon wheel: {}", why);
                Outcome::InsufficientData(why)
            }
        };

        if let Some(why) = bounces.shortfall() {
            log::warn!("no trajectory: {}", why);
        }

        let frames = track.len();
        let positions = track.valid_count();

        let track_path = if self.config.save_track {
            let path = out_dir.join(TRACK_FILE);
            SavedTrack { video, roi, track }.save(&path)?;
            log::info!("written {}", path.display());

            Some(path)
        } else {
            None
        };

        let mut report = RunReport {
            video,
            roi,
            frames,
            positions,
            bounces,
            heatmap,
            wagon_wheel,
            track_path,
            annotated_video,
            insights: Vec::new(),
        };
        report.insights = insights(&report);

        write_report(&report, &out_dir.join(REPORT_FILE))?;

        Ok(report)
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<(), Error> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    log::info!("written {}", path.display());

    Ok(())
}

/// Short human-readable findings of a run.
pub fn insights(report: &RunReport) -> Vec<String> {
    let mut lines = vec![format!(
        "ball found in {} of {} frames",
        report.positions, report.frames
    )];

    match &report.bounces {
        Outcome::Ready(bounces) if bounces.is_empty() => lines.push("no bounce detected".into()),
        Outcome::Ready(bounces) => {
            for b in bounces {
                lines.push(format!(
                    "bounce at frame {} ({:.0}, {:.0}): {}",
                    b.frame_index, b.x, b.y, b.length
                ));
            }
        }
        Outcome::InsufficientData(why) => lines.push(format!("trajectory: {}", why)),
    }

    match &report.heatmap {
        Outcome::Ready(h) => lines.push(format!("{} positions on the pitch", h.in_pitch)),
        Outcome::InsufficientData(why) => lines.push(format!("heatmap: {}", why)),
    }

    match &report.wagon_wheel {
        Outcome::Ready(w) => {
            if let Some(angle) = w.dominant_angle {
                lines.push(format!("dominant shot direction {:.0} degrees", angle));
            }
        }
        Outcome::InsufficientData(why) => lines.push(format!("wagon wheel: {}", why)),
    }

    lines
}
