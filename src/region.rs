use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

/// Axis-aligned integer rectangle in full-frame pixel coordinates.
///
/// Used both for the locked region of interest and for the configured pitch
/// rectangle. Right and bottom bounds are exclusive when cropping and
/// inclusive when testing whether a position lies on the pitch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, Error> {
        let region = Self { x1, y1, x2, y2 };
        region.validate()?;

        Ok(region)
    }

    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x1: 0,
            y1: 0,
            x2: width.max(1),
            y2: height.max(1),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.x1 < self.x2 && self.y1 < self.y2 {
            Ok(())
        } else {
            Err(Error::InvalidRegion {
                x1: self.x1,
                y1: self.y1,
                x2: self.x2,
                y2: self.y2,
            })
        }
    }

    /// Grows `bbox` by `margin` on every side and clips it to a `width`x`height` frame.
    ///
    /// Box corners are truncated to whole pixels before expansion. Returns `None`
    /// when nothing of the box is left inside the frame.
    pub fn around(bbox: &BBox<Ltrb>, margin: u32, width: u32, height: u32) -> Option<Self> {
        let margin = margin as i64;
        let x1 = (bbox.left() as i64 - margin).max(0);
        let y1 = (bbox.top() as i64 - margin).max(0);
        let x2 = (bbox.right() as i64 + margin).min(width as i64);
        let y2 = (bbox.bottom() as i64 + margin).min(height as i64);

        if x1 < x2 && y1 < y2 {
            Some(Self {
                x1: x1 as u32,
                y1: y1 as u32,
                x2: x2 as u32,
                y2: y2 as u32,
            })
        } else {
            None
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Inclusive bounds test.
    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x1 as f32 <= x && x <= self.x2 as f32 && self.y1 as f32 <= y && y <= self.y2 as f32
    }

    /// Shrinks the region so that it fits a `width`x`height` frame.
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let x2 = self.x2.min(width);
        let y2 = self.y2.min(height);

        if self.x1 < x2 && self.y1 < y2 {
            Some(Self {
                x1: self.x1,
                y1: self.y1,
                x2,
                y2,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_bounds() {
        assert!(Region::new(10, 10, 5, 20).is_err());
        assert!(Region::new(10, 10, 10, 20).is_err());
        assert!(Region::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn around_expands_and_clips() {
        let b = BBox::ltrb(30.7, 100.2, 200.9, 150.0);
        let r = Region::around(&b, 50, 220, 400).unwrap();
        assert_eq!(r, Region { x1: 0, y1: 50, x2: 220, y2: 200 });
    }

    #[test]
    fn contains_is_inclusive() {
        let r = Region::new(200, 100, 440, 280).unwrap();
        assert!(r.contains(200.0, 100.0));
        assert!(r.contains(440.0, 280.0));
        assert!(!r.contains(440.5, 280.0));
        assert!(!r.contains(199.0, 150.0));
    }
}
