use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::detection::{BALL_CLASS, PERSON_CLASS};
use crate::detector::YoloDetectorConfig;
use crate::error::Error;
use crate::heatmap::FrameShape;
use crate::region::Region;
use crate::tracker::IouTrackerConfig;
use crate::trajectory::LengthThresholds;

const DEFAULT_PITCH: Region = Region {
    x1: 200,
    y1: 100,
    x2: 440,
    y2: 280,
};
const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// How ball positions are recovered from the video.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Motion,
    Detection,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Motion => "motion",
            Strategy::Detection => "detection",
        })
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "motion" => Ok(Strategy::Motion),
            "detection" => Ok(Strategy::Detection),
            other => Err(Error::ConfigError(format!(
                "unknown strategy `{}`, expected `motion` or `detection`",
                other
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub input_size: u32,
    pub nms_threshold: f32,
    pub iou_threshold: f32,
    pub max_age: usize,
    pub ball_class: i32,
    pub person_class: i32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            input_size: 640,
            nms_threshold: 0.45,
            iou_threshold: 0.3,
            max_age: 30,
            ball_class: BALL_CLASS,
            person_class: PERSON_CLASS,
        }
    }
}

impl DetectorSettings {
    pub fn tracker_config(&self) -> IouTrackerConfig {
        IouTrackerConfig {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_age: self.max_age,
        }
    }

    pub fn yolo_config(&self) -> YoloDetectorConfig {
        let mut config = YoloDetectorConfig::new(
            self.confidence_threshold,
            self.input_size,
            vec![self.person_class, self.ball_class],
        );
        config.nms_threshold = self.nms_threshold;

        config
    }
}

/// Run configuration, read from a JSON file; every key is optional.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub pitch: Region,
    pub roi_margin: u32,
    pub flow_threshold: f32,
    pub flow_window: usize,
    pub smoothing_window: usize,
    pub bucket_count: usize,
    pub length_thresholds: LengthThresholds,
    pub frame_shape: FrameShape,
    pub blur_kernel: usize,
    pub strategy: Strategy,
    pub detector: DetectorSettings,
    pub output_dir: PathBuf,
    pub save_track: bool,
    /// Replay the video with the ball marked after recovery.
    pub annotate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pitch: DEFAULT_PITCH,
            roi_margin: 50,
            flow_threshold: 5.0,
            flow_window: 15,
            smoothing_window: 5,
            bucket_count: 36,
            length_thresholds: LengthThresholds::default(),
            frame_shape: FrameShape::default(),
            blur_kernel: 51,
            strategy: Strategy::Motion,
            detector: DetectorSettings::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            save_track: false,
            annotate: true,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;

        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        log::debug!("config loaded from {}", path.display());

        Ok(config)
    }

    /// Configuration from `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.pitch
            .validate()
            .map_err(|e| Error::ConfigError(format!("pitch: {}", e)))?;

        odd_positive("blur_kernel", self.blur_kernel)?;
        odd_positive("smoothing_window", self.smoothing_window)?;
        odd_positive("flow_window", self.flow_window)?;

        if self.bucket_count == 0 {
            return Err(Error::ConfigError("bucket_count must be positive".into()));
        }

        let LengthThresholds { full, good } = self.length_thresholds;
        if !(0.0 < full && full < good && good < 1.0) {
            return Err(Error::ConfigError(format!(
                "length_thresholds must satisfy 0 < full < good < 1, got {} and {}",
                full, good
            )));
        }

        if !(self.flow_threshold > 0.0) {
            return Err(Error::ConfigError("flow_threshold must be positive".into()));
        }

        if self.frame_shape.height == 0 || self.frame_shape.width == 0 {
            return Err(Error::ConfigError("frame_shape must not be empty".into()));
        }

        let d = &self.detector;
        for (name, v) in [
            ("confidence_threshold", d.confidence_threshold),
            ("nms_threshold", d.nms_threshold),
            ("iou_threshold", d.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::ConfigError(format!("detector.{} must be within [0, 1]", name)));
            }
        }

        if d.input_size == 0 {
            return Err(Error::ConfigError("detector.input_size must be positive".into()));
        }

        Ok(())
    }
}

fn odd_positive(name: &str, v: usize) -> Result<(), Error> {
    if v == 0 || v % 2 == 0 {
        Err(Error::ConfigError(format!("{} must be odd and positive, got {}", name, v)))
    } else {
        Ok(())
    }
}
