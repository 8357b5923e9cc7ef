use std::fmt;

use num_traits::{Float, FromPrimitive};
use serde_derive::{Deserialize, Serialize};

use crate::outcome::{Outcome, Shortfall};
use crate::track::Track;

/// Delivery length tier of a bounce.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthClass {
    #[serde(rename = "full/yorker")]
    FullYorker,
    #[serde(rename = "good length")]
    GoodLength,
    #[serde(rename = "short")]
    Short,
}

impl fmt::Display for LengthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LengthClass::FullYorker => "full/yorker",
            LengthClass::GoodLength => "good length",
            LengthClass::Short => "short",
        })
    }
}

/// Tier boundaries as fractions of the frame height.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct LengthThresholds {
    pub full: f32,
    pub good: f32,
}

impl Default for LengthThresholds {
    fn default() -> Self {
        Self {
            full: 0.35,
            good: 0.55,
        }
    }
}

impl LengthThresholds {
    pub fn classify(&self, y: f32, frame_height: u32) -> LengthClass {
        let h = frame_height as f32;

        if y < h * self.full {
            LengthClass::FullYorker
        } else if y < h * self.good {
            LengthClass::GoodLength
        } else {
            LengthClass::Short
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SmoothedPoint {
    pub frame_index: usize,
    pub x: f32,
    pub y: f32,
    pub smoothed_y: f32,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounce {
    pub frame_index: usize,
    pub x: f32,
    pub y: f32,
    pub smoothed_y: f32,
    pub length: LengthClass,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub points: Vec<SmoothedPoint>,
    pub bounces: Vec<Bounce>,
}

/// Box filter of width `window`, output centered and as long as the input.
///
/// Samples past either end count as zero and the divisor is always `window`,
/// so the first and last `window / 2` values are pulled towards zero.
pub fn moving_average<T: Float + FromPrimitive>(values: &[T], window: usize) -> Vec<T> {
    let n = values.len();
    let window = window.max(1);
    let (before, after) = (window / 2, (window - 1) / 2);
    let width = T::from_usize(window).unwrap_or_else(T::one);

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(n.saturating_sub(1));
            let sum = values[lo..=hi].iter().fold(T::zero(), |acc, &v| acc + v);

            sum / width
        })
        .collect()
}

/// Smooths a raw track, finds bounces and classifies their length.
#[derive(Debug, Clone)]
pub struct TrajectoryProcessor {
    window: usize,
    thresholds: LengthThresholds,
}

impl Default for TrajectoryProcessor {
    fn default() -> Self {
        Self::new(5, LengthThresholds::default())
    }
}

impl TrajectoryProcessor {
    pub fn new(window: usize, thresholds: LengthThresholds) -> Self {
        Self {
            window: window.max(1),
            thresholds,
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn process(&self, track: &Track, frame_height: u32) -> Outcome<Trajectory> {
        let mut valid: Vec<_> = track.valid().collect();
        valid.sort_by_key(|(i, _)| *i);

        if valid.len() < self.window {
            return Outcome::InsufficientData(Shortfall::TooFewPositions {
                found: valid.len(),
                required: self.window,
            });
        }

        let ys: Vec<f64> = valid.iter().map(|(_, p)| p.y as f64).collect();
        let smoothed = moving_average(&ys, self.window);

        let points: Vec<SmoothedPoint> = valid
            .iter()
            .zip(&smoothed)
            .map(|(&(frame_index, p), &s)| SmoothedPoint {
                frame_index,
                x: p.x,
                y: p.y,
                smoothed_y: s as f32,
            })
            .collect();

        let half = self.window / 2;
        let n = points.len();
        let mut bounces = Vec::new();

        if n >= 3 && n > 2 * half {
            for i in half.max(1)..=(n - 1 - half).min(n - 2) {
                if smoothed[i] < smoothed[i - 1] && smoothed[i] < smoothed[i + 1] {
                    let p = points[i];
                    bounces.push(Bounce {
                        frame_index: p.frame_index,
                        x: p.x,
                        y: p.y,
                        smoothed_y: p.smoothed_y,
                        length: self.thresholds.classify(p.y, frame_height),
                    });
                }
            }
        }

        log::debug!("{} points, {} bounces", n, bounces.len());

        Outcome::Ready(Trajectory { points, bounces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::FramePosition;

    fn track(ys: &[f32]) -> Track {
        Track::from_positions(
            ys.iter()
                .enumerate()
                .map(|(i, &y)| FramePosition::at(i, 0.0, y)),
        )
        .unwrap()
    }

    fn assert_close(got: &[f64], want: &[f64]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-9, "{:?} != {:?}", got, want);
        }
    }

    #[test]
    fn zero_padded_at_edges() {
        let avg = moving_average(&[10.0f64, 20.0, 5.0, 20.0, 3.0, 25.0], 5);
        assert_close(&avg, &[7.0, 11.0, 11.6, 14.6, 10.6, 9.6]);
    }

    #[test]
    fn even_window_leans_backwards() {
        let avg = moving_average(&[4.0f64, 8.0, 12.0, 16.0], 4);
        assert_close(&avg, &[3.0, 6.0, 10.0, 9.0]);
        assert_close(&moving_average(&[2.0f64, 3.0], 1), &[2.0, 3.0]);
    }

    #[test]
    fn zigzag_with_edge_dips_has_no_bounce() {
        let proc = TrajectoryProcessor::default();
        let traj = proc.process(&track(&[10.0, 20.0, 5.0, 20.0, 3.0, 25.0]), 360).ready().unwrap();

        assert_eq!(traj.points.len(), 6);
        assert!((traj.points[2].smoothed_y - 11.6).abs() < 1e-5);
        assert!(traj.bounces.is_empty());
    }

    #[test]
    fn finds_single_interior_bounce() {
        let ys = [200.0, 150.0, 100.0, 80.0, 60.0, 80.0, 100.0, 150.0, 200.0, 220.0];
        let traj = TrajectoryProcessor::default().process(&track(&ys), 360).ready().unwrap();

        assert_eq!(traj.bounces.len(), 1);
        assert_eq!(traj.bounces[0].frame_index, 4);
        assert_eq!(traj.bounces[0].y, 60.0);
        assert_eq!(traj.bounces[0].length, LengthClass::FullYorker);
    }

    #[test]
    fn v_shape_bounces_at_the_bottom() {
        let ys = [50.0, 40.0, 30.0, 20.0, 10.0, 20.0, 30.0, 40.0, 50.0];
        let traj = TrajectoryProcessor::default().process(&track(&ys), 100).ready().unwrap();

        assert_eq!(traj.bounces.len(), 1);
        assert_eq!(traj.bounces[0].frame_index, 4);
    }

    #[test]
    fn edge_minima_are_never_bounces() {
        let ys = [1.0, 50.0, 60.0, 70.0, 60.0, 50.0, 1.0];
        let traj = TrajectoryProcessor::default().process(&track(&ys), 100).ready().unwrap();
        assert!(traj.bounces.is_empty());
    }

    #[test]
    fn short_tracks_are_insufficient() {
        let proc = TrajectoryProcessor::default();
        assert_eq!(
            proc.process(&Track::new(), 360),
            Outcome::InsufficientData(Shortfall::TooFewPositions { found: 0, required: 5 })
        );
        assert!(!proc.process(&track(&[1.0]), 360).is_ready());
        assert!(!proc.process(&track(&[1.0, 2.0, 3.0, 4.0]), 360).is_ready());
    }

    #[test]
    fn gaps_are_dropped() {
        let mut positions: Vec<_> = (0..5).map(|i| FramePosition::at(i * 2, 0.0, i as f32)).collect();
        positions.insert(1, FramePosition::gap(1));
        let traj = TrajectoryProcessor::default()
            .process(&Track::from_positions(positions).unwrap(), 360)
            .ready()
            .unwrap();

        let frames: Vec<_> = traj.points.iter().map(|p| p.frame_index).collect();
        assert_eq!(frames, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn length_tiers() {
        let t = LengthThresholds::default();
        assert_eq!(t.classify(34.0, 100), LengthClass::FullYorker);
        assert_eq!(t.classify(35.0, 100), LengthClass::GoodLength);
        assert_eq!(t.classify(54.9, 100), LengthClass::GoodLength);
        assert_eq!(t.classify(55.0, 100), LengthClass::Short);
        assert_eq!(LengthClass::GoodLength.to_string(), "good length");
    }
}
