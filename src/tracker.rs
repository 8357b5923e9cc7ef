use munkres::{solve_assignment, WeightMatrix};

use crate::detection::Detection;
use crate::detector::Detector;
use crate::error::Error;
use crate::source::FrameSource;

/// Detections reported for one frame, ids assigned when the tracker keeps identities.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub frame_index: usize,
    pub detections: Vec<Detection>,
}

pub type DetectionStream<'a> = Box<dyn Iterator<Item = Result<FrameDetections, Error>> + 'a>;

/// Tracking capability: turns a frame stream into per-frame detections with persistent ids.
///
/// The returned stream is lazy and single-pass. A failure confined to one frame is
/// reported as [`Error::FrameDetectionError`] and the stream carries on with the
/// next frame; any other error ends the run.
pub trait Tracking {
    fn track<'a>(&'a mut self, source: &'a mut dyn FrameSource) -> DetectionStream<'a>;
}

#[derive(Debug, Clone)]
pub struct IouTrackerConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Frames a track survives without a matching detection.
    pub max_age: usize,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.3,
            max_age: 30,
        }
    }
}

/// Weight of padding cells in the square assignment matrix.
const UNMATCHED: f32 = 100_000.0;

#[derive(Debug, Clone)]
struct ActiveTrack {
    id: u32,
    last: Detection,
    last_frame: usize,
}

/// Runs a detector frame by frame and keeps identities by Hungarian IoU matching.
pub struct IouTracker<D: Detector> {
    detector: D,
    config: IouTrackerConfig,
    tracks: Vec<ActiveTrack>,
    next_id: u32,
}

impl<D: Detector> IouTracker<D> {
    pub fn new(detector: D, config: IouTrackerConfig) -> Self {
        Self {
            detector,
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Optimal track/detection pairing on `1 - IoU`, keeping only same-class
    /// pairs that overlap by more than the IoU threshold.
    fn matches(&self, dets: &[Detection]) -> Vec<(usize, usize)> {
        if self.tracks.is_empty() || dets.is_empty() {
            return Vec::new();
        }

        let (nt, nd) = (self.tracks.len(), dets.len());
        let iou = |ti: usize, di: usize| {
            let (t, d) = (&self.tracks[ti].last, &dets[di]);
            if t.class == d.class {
                t.iou(d)
            } else {
                0.0
            }
        };

        let mut weights = WeightMatrix::from_fn(nt.max(nd), |(r, c)| {
            if r < nt && c < nd {
                1.0 - iou(r, c)
            } else {
                UNMATCHED
            }
        });

        match solve_assignment(&mut weights) {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.row < nt && p.column < nd)
                .filter(|p| iou(p.row, p.column) > self.config.iou_threshold)
                .map(|p| (p.row, p.column))
                .collect(),
            Err(err) => {
                log::warn!("track assignment failed: {:?}", err);
                Vec::new()
            }
        }
    }

    fn assign(&mut self, frame_index: usize, mut dets: Vec<Detection>) -> Vec<Detection> {
        let max_age = self.config.max_age;
        self.tracks
            .retain(|t| frame_index.saturating_sub(t.last_frame) <= max_age);

        dets.retain(|d| d.confidence >= self.config.confidence_threshold);

        for (ti, di) in self.matches(&dets) {
            dets[di].track_id = Some(self.tracks[ti].id);
            self.tracks[ti].last = dets[di];
            self.tracks[ti].last_frame = frame_index;
        }

        for det in dets.iter_mut().filter(|d| d.track_id.is_none()) {
            let id = self.next_id;
            self.next_id += 1;
            det.track_id = Some(id);
            self.tracks.push(ActiveTrack {
                id,
                last: *det,
                last_frame: frame_index,
            });
        }

        dets
    }
}

impl<D: Detector> Tracking for IouTracker<D> {
    fn track<'a>(&'a mut self, source: &'a mut dyn FrameSource) -> DetectionStream<'a> {
        Box::new(TrackStream {
            tracker: self,
            source,
            done: false,
        })
    }
}

struct TrackStream<'a, D: Detector> {
    tracker: &'a mut IouTracker<D>,
    source: &'a mut dyn FrameSource,
    done: bool,
}

impl<'a, D: Detector> Iterator for TrackStream<'a, D> {
    type Item = Result<FrameDetections, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        match self.tracker.detector.detect(&frame) {
            Ok(dets) => {
                let detections = self.tracker.assign(frame.index, dets);
                log::debug!("frame {}: {} detections", frame.index, detections.len());

                Some(Ok(FrameDetections {
                    frame_index: frame.index,
                    detections,
                }))
            }
            Err(err) => Some(Err(Error::FrameDetectionError {
                frame_index: frame.index,
                reason: err.to_string(),
            })),
        }
    }
}
