use nalgebra as na;
use serde_derive::Serialize;

use crate::outcome::{Outcome, Shortfall};
use crate::track::Track;

/// Shot direction histogram around the first recovered position.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WagonWheel {
    pub origin: na::Point2<f32>,
    /// Direction of every non-degenerate vector, degrees in (-180, 180].
    pub angles: Vec<f32>,
    pub buckets: Vec<u32>,
    /// Positions that coincided with the origin and carry no direction.
    pub coincident: usize,
}

impl WagonWheel {
    #[inline]
    pub fn bucket_width(&self) -> f32 {
        360.0 / self.buckets.len() as f32
    }

    /// Index and count of the fullest bucket; the lowest index wins a tie.
    pub fn dominant(&self) -> Option<(usize, u32)> {
        self.buckets
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, u32)>, (i, &n)| match best {
                Some((_, b)) if b >= n => best,
                _ if n > 0 => Some((i, n)),
                _ => best,
            })
    }

    /// Center angle of bucket `index`, degrees.
    #[inline]
    pub fn bucket_center(&self, index: usize) -> f32 {
        -180.0 + (index as f32 + 0.5) * self.bucket_width()
    }
}

/// Angle of `(dx, dy)` in degrees, image coordinates with y pointing down.
#[inline]
pub fn angle_degrees(dx: f32, dy: f32) -> f32 {
    dy.atan2(dx).to_degrees()
}

/// Bucket of an angle over the full turn split into `count` equal sectors.
#[inline]
pub fn bucket_for(angle: f32, count: usize) -> usize {
    let width = 360.0 / count as f32;
    let idx = ((angle + 180.0) / width).floor().max(0.0) as usize;

    idx.min(count - 1)
}

#[derive(Debug, Clone)]
pub struct AngularAggregator {
    bucket_count: usize,
}

impl Default for AngularAggregator {
    fn default() -> Self {
        Self::new(36)
    }
}

impl AngularAggregator {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            bucket_count: bucket_count.max(1),
        }
    }

    pub fn aggregate(&self, track: &Track) -> Outcome<WagonWheel> {
        let mut valid = track.valid().map(|(_, p)| p);

        let origin = match valid.next() {
            Some(origin) => origin,
            None => {
                return Outcome::InsufficientData(Shortfall::TooFewPositions {
                    found: 0,
                    required: 2,
                })
            }
        };

        let mut angles = Vec::new();
        let mut coincident = 0;
        let mut seen = 1;

        for p in valid {
            seen += 1;
            let d = p - origin;
            if d.x == 0.0 && d.y == 0.0 {
                coincident += 1;
                continue;
            }

            angles.push(angle_degrees(d.x, d.y));
        }

        if seen < 2 {
            return Outcome::InsufficientData(Shortfall::TooFewPositions {
                found: seen,
                required: 2,
            });
        }

        if angles.is_empty() {
            return Outcome::InsufficientData(Shortfall::NoDirection);
        }

        let mut buckets = vec![0u32; self.bucket_count];
        for &a in &angles {
            buckets[bucket_for(a, self.bucket_count)] += 1;
        }

        Outcome::Ready(WagonWheel {
            origin,
            angles,
            buckets,
            coincident,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::FramePosition;

    fn track(points: &[(f32, f32)]) -> Track {
        Track::from_positions(
            points
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| FramePosition::at(i, x, y)),
        )
        .unwrap()
    }

    #[test]
    fn angle_convention() {
        assert_eq!(angle_degrees(10.0, 0.0), 0.0);
        assert_eq!(angle_degrees(0.0, 10.0), 90.0);
        assert_eq!(angle_degrees(-10.0, 0.0), 180.0);
        assert_eq!(angle_degrees(0.0, -10.0), -90.0);
    }

    #[test]
    fn buckets_cover_full_turn() {
        assert_eq!(bucket_for(-180.0, 36), 0);
        assert_eq!(bucket_for(0.0, 36), 18);
        assert_eq!(bucket_for(90.0, 36), 27);
        assert_eq!(bucket_for(180.0, 36), 35);
        assert_eq!(bucket_for(179.9, 36), 35);
    }

    #[test]
    fn counts_vectors_from_first_position() {
        let wheel = AngularAggregator::default()
            .aggregate(&track(&[(100.0, 100.0), (110.0, 100.0), (100.0, 110.0), (110.0, 100.0)]))
            .ready()
            .unwrap();

        assert_eq!(wheel.origin, na::Point2::new(100.0, 100.0));
        assert_eq!(wheel.angles, vec![0.0, 90.0, 0.0]);
        assert_eq!(wheel.buckets.iter().sum::<u32>(), 3);
        assert_eq!(wheel.buckets[18], 2);
        assert_eq!(wheel.buckets[27], 1);
        assert_eq!(wheel.dominant(), Some((18, 2)));
    }

    #[test]
    fn coincident_positions_are_counted_apart() {
        let wheel = AngularAggregator::new(12)
            .aggregate(&track(&[(5.0, 5.0), (5.0, 5.0), (6.0, 5.0)]))
            .ready()
            .unwrap();

        assert_eq!(wheel.coincident, 1);
        assert_eq!(wheel.buckets.iter().sum::<u32>() as usize + wheel.coincident, 2);
    }

    #[test]
    fn insufficient_cases() {
        let agg = AngularAggregator::default();
        assert_eq!(
            agg.aggregate(&Track::new()).shortfall(),
            Some(Shortfall::TooFewPositions { found: 0, required: 2 })
        );
        assert_eq!(
            agg.aggregate(&track(&[(1.0, 1.0)])).shortfall(),
            Some(Shortfall::TooFewPositions { found: 1, required: 2 })
        );
        assert_eq!(
            agg.aggregate(&track(&[(1.0, 1.0), (1.0, 1.0)])).shortfall(),
            Some(Shortfall::NoDirection)
        );
    }

    #[test]
    fn deterministic() {
        let agg = AngularAggregator::default();
        let t = track(&[(0.0, 0.0), (3.0, -4.0), (-2.0, 7.0), (-5.0, -1.0)]);
        assert_eq!(agg.aggregate(&t), agg.aggregate(&t));
    }
}
