pub mod annotate;
pub mod ball;
pub mod bbox;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod flow;
pub mod frame;
pub mod heatmap;
pub mod motion;
pub mod outcome;
pub mod pipeline;
pub mod region;
pub mod render;
pub mod roi;
pub mod source;
pub mod track;
pub mod tracker;
pub mod trajectory;
pub mod wagon;

pub use ball::DetectionTracker;
pub use config::{Config, Strategy};
pub use detection::Detection;
pub use error::Error;
pub use frame::{Frame, VideoInfo};
pub use motion::MotionTracker;
pub use outcome::{Outcome, Shortfall};
pub use pipeline::{Pipeline, RunReport};
pub use region::Region;
pub use track::{FramePosition, SavedTrack, Track};

use source::FrameSource;

/// Per-frame positions recovered from a video.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub track: Track,
    /// Region the positions were searched in, when one was locked.
    pub roi: Option<Region>,
}

/// Position recovery capability: turns a frame stream into a [`Track`].
///
/// Implementations consume the source once and report one entry per frame
/// they processed; frames without a ball become gaps.
pub trait Recoverer {
    fn recover(&mut self, source: &mut dyn FrameSource) -> Result<Recovery, Error>;
}

impl<R: Recoverer + ?Sized> Recoverer for Box<R> {
    #[inline]
    fn recover(&mut self, source: &mut dyn FrameSource) -> Result<Recovery, Error> {
        (**self).recover(source)
    }
}
