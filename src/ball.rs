use nalgebra as na;

use crate::detection::{Detection, BALL_CLASS};
use crate::error::Error;
use crate::source::FrameSource;
use crate::track::{FramePosition, Track};
use crate::tracker::{FrameDetections, Tracking};
use crate::{Recoverer, Recovery};

/// Recovers ball positions from an object tracker's per-frame detections.
pub struct DetectionTracker<T: Tracking> {
    tracking: T,
    ball_class: i32,
}

impl<T: Tracking> DetectionTracker<T> {
    pub fn new(tracking: T) -> Self {
        Self::with_class(tracking, BALL_CLASS)
    }

    pub fn with_class(tracking: T, ball_class: i32) -> Self {
        Self {
            tracking,
            ball_class,
        }
    }
}

/// Most confident detection of `ball_class` in the frame; the first one wins a tie.
pub fn pick_ball(frame: &FrameDetections, ball_class: i32) -> Option<&Detection> {
    frame
        .detections
        .iter()
        .filter(|d| d.class == ball_class)
        .fold(None, |best: Option<&Detection>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}

impl<T: Tracking> Recoverer for DetectionTracker<T> {
    fn recover(&mut self, source: &mut dyn FrameSource) -> Result<Recovery, Error> {
        let ball_class = self.ball_class;
        let mut track = Track::new();
        let mut failed = 0;

        for item in self.tracking.track(source) {
            let entry = match item {
                Ok(frame) => match pick_ball(&frame, ball_class) {
                    Some(det) => FramePosition {
                        frame_index: frame.frame_index,
                        position: Some(na::Point2::new(det.x, det.y)),
                        track_id: det.track_id,
                    },
                    None => FramePosition::gap(frame.frame_index),
                },
                Err(Error::FrameDetectionError {
                    frame_index,
                    reason,
                }) => {
                    log::warn!("frame {}: detection failed, {}", frame_index, reason);
                    failed += 1;
                    FramePosition::gap(frame_index)
                }
                Err(err) => return Err(err),
            };

            track.push(entry)?;
        }

        if track.is_empty() {
            return Err(Error::SourceError("video has no frames".into()));
        }

        log::info!(
            "detection tracking done: {} frames, {} positions, {} failed",
            track.len(),
            track.valid_count(),
            failed
        );

        Ok(Recovery { track, roi: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PERSON_CLASS;
    use crate::frame::Frame;
    use crate::source::MemorySource;
    use crate::tracker::DetectionStream;

    /// Replays a fixed list of stream items, ignoring the frames.
    struct Replay(Vec<Result<FrameDetections, Error>>);

    impl Tracking for Replay {
        fn track<'a>(&'a mut self, _source: &'a mut dyn FrameSource) -> DetectionStream<'a> {
            Box::new(self.0.drain(..))
        }
    }

    fn source() -> MemorySource {
        let frame = Frame::from_rgb(0, 2, 2, vec![0; 12]).unwrap();
        MemorySource::new(vec![frame], 25.0).unwrap()
    }

    fn det(x: f32, conf: f32, class: i32, id: u32) -> Detection {
        let mut d = Detection::new(x, 10.0, 4.0, 4.0, conf, class);
        d.track_id = Some(id);
        d
    }

    fn frame(frame_index: usize, detections: Vec<Detection>) -> Result<FrameDetections, Error> {
        Ok(FrameDetections {
            frame_index,
            detections,
        })
    }

    #[test]
    fn most_confident_ball_wins() {
        let mut tracker = DetectionTracker::new(Replay(vec![
            frame(0, vec![det(1.0, 0.4, BALL_CLASS, 1), det(2.0, 0.9, BALL_CLASS, 2)]),
            frame(1, vec![det(3.0, 0.99, PERSON_CLASS, 3)]),
            frame(2, vec![]),
        ]));

        let recovery = tracker.recover(&mut source()).unwrap();
        let entries: Vec<_> = recovery.track.iter().copied().collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].position, Some(na::Point2::new(2.0, 10.0)));
        assert_eq!(entries[0].track_id, Some(2));
        assert!(entries[1].position.is_none());
        assert!(entries[2].position.is_none());
        assert!(recovery.roi.is_none());
    }

    #[test]
    fn frame_failure_becomes_gap() {
        let mut tracker = DetectionTracker::new(Replay(vec![
            frame(0, vec![det(1.0, 0.5, BALL_CLASS, 1)]),
            Err(Error::FrameDetectionError {
                frame_index: 1,
                reason: "timeout".into(),
            }),
            frame(2, vec![det(5.0, 0.5, BALL_CLASS, 1)]),
        ]));

        let recovery = tracker.recover(&mut source()).unwrap();
        let indices: Vec<_> = recovery.track.iter().map(|p| p.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(recovery.track.valid_count(), 2);
    }

    #[test]
    fn source_failure_is_fatal() {
        let mut tracker = DetectionTracker::new(Replay(vec![
            frame(0, vec![]),
            Err(Error::SourceError("decode".into())),
        ]));

        assert!(matches!(
            tracker.recover(&mut source()),
            Err(Error::SourceError(_))
        ));
    }

    #[test]
    fn empty_stream_is_a_source_error() {
        let mut tracker = DetectionTracker::new(Replay(Vec::new()));
        assert!(matches!(
            tracker.recover(&mut source()),
            Err(Error::SourceError(_))
        ));
    }

    #[test]
    fn non_monotonic_stream_is_rejected() {
        let mut tracker = DetectionTracker::new(Replay(vec![frame(3, vec![]), frame(3, vec![])]));

        assert!(matches!(
            tracker.recover(&mut source()),
            Err(Error::NonMonotonicFrame { last: 3, next: 3 })
        ));
    }
}
