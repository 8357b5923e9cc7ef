use std::path::Path;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::frame::VideoInfo;
use crate::region::Region;

/// Ball position recovered for one frame; `position` is `None` for a gap.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FramePosition {
    pub frame_index: usize,
    pub position: Option<na::Point2<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

impl FramePosition {
    #[inline]
    pub fn at(frame_index: usize, x: f32, y: f32) -> Self {
        Self {
            frame_index,
            position: Some(na::Point2::new(x, y)),
            track_id: None,
        }
    }

    #[inline]
    pub fn gap(frame_index: usize) -> Self {
        Self {
            frame_index,
            position: None,
            track_id: None,
        }
    }
}

/// Per-frame ball positions of one run, strictly ordered by frame index.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Track {
    positions: Vec<FramePosition>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions<I: IntoIterator<Item = FramePosition>>(iter: I) -> Result<Self, Error> {
        let mut track = Self::new();
        for p in iter {
            track.push(p)?;
        }

        Ok(track)
    }

    /// Appends the next frame; its index has to be greater than the last one.
    pub fn push(&mut self, pos: FramePosition) -> Result<(), Error> {
        if let Some(last) = self.positions.last() {
            if pos.frame_index <= last.frame_index {
                return Err(Error::NonMonotonicFrame {
                    last: last.frame_index,
                    next: pos.frame_index,
                });
            }
        }

        self.positions.push(pos);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FramePosition> {
        self.positions.iter()
    }

    /// Frames with a recovered position, in frame order.
    #[inline]
    pub fn valid(&self) -> impl Iterator<Item = (usize, na::Point2<f32>)> + '_ {
        self.positions
            .iter()
            .filter_map(|p| p.position.map(|pt| (p.frame_index, pt)))
    }

    #[inline]
    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }
}

/// Track persisted together with the context needed to aggregate it later.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SavedTrack {
    pub video: VideoInfo,
    pub roi: Option<Region>,
    pub track: Track,
}

impl SavedTrack {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;

        Ok(())
    }

    /// Loads a saved track, re-checking frame ordering.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let saved: SavedTrack = serde_json::from_reader(std::io::BufReader::new(file))?;
        let track = Track::from_positions(saved.track.positions.iter().copied())?;

        Ok(Self { track, ..saved })
    }
}
