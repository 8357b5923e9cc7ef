use crate::detection::PERSON_CLASS;
use crate::detector::Detector;
use crate::error::Error;
use crate::frame::Frame;
use crate::region::Region;

/// Locks the region of interest around the players visible on the first frame.
#[derive(Debug, Clone)]
pub struct RoiLocator {
    pub margin: u32,
    pub person_class: i32,
}

impl Default for RoiLocator {
    fn default() -> Self {
        Self {
            margin: 50,
            person_class: PERSON_CLASS,
        }
    }
}

impl RoiLocator {
    pub fn new(margin: u32, person_class: i32) -> Self {
        Self {
            margin,
            person_class,
        }
    }

    /// Runs the detector once on `frame` and returns the region enclosing every
    /// person, grown by the margin and clipped to the frame.
    ///
    /// Falls back to the full frame when nobody is detected.
    pub fn lock<D: Detector + ?Sized>(&self, frame: &Frame, detector: &mut D) -> Result<Region, Error> {
        let detections = detector.detect(frame).map_err(|err| match err {
            Error::DetectionError(_) => err,
            other => Error::DetectionError(other.to_string()),
        })?;

        let enclosing = detections
            .iter()
            .filter(|d| d.class == self.person_class)
            .map(|d| d.ltrb())
            .reduce(|acc, b| acc.union(&b));

        let (width, height) = (frame.width(), frame.height());
        let region = enclosing
            .and_then(|bbox| Region::around(&bbox, self.margin, width, height))
            .unwrap_or_else(|| frame.full_region());

        log::info!(
            "roi locked at ({}, {}, {}, {}) on frame {}",
            region.x1,
            region.y1,
            region.x2,
            region.y2,
            frame.index
        );

        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, BALL_CLASS};
    use crate::detector::NoDetector;

    struct Fixed(Result<Vec<Detection>, String>);

    impl Detector for Fixed {
        fn detect(&mut self, _: &Frame) -> Result<Vec<Detection>, Error> {
            self.0.clone().map_err(Error::DetectionError)
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(0, 640, 360, vec![0; 640 * 360 * 3]).unwrap()
    }

    #[test]
    fn encloses_people_with_margin() {
        let mut det = Fixed(Ok(vec![
            Detection::from_corners(100.0, 80.0, 150.0, 200.0, 0.9, PERSON_CLASS),
            Detection::from_corners(300.5, 90.0, 340.0, 210.9, 0.8, PERSON_CLASS),
            Detection::from_corners(0.0, 0.0, 640.0, 360.0, 0.9, BALL_CLASS),
        ]));
        let roi = RoiLocator::default().lock(&frame(), &mut det).unwrap();
        assert_eq!(roi, Region::new(50, 30, 390, 260).unwrap());
    }

    #[test]
    fn clips_to_frame() {
        let mut det = Fixed(Ok(vec![Detection::from_corners(
            10.0,
            20.0,
            620.0,
            350.0,
            0.9,
            PERSON_CLASS,
        )]));
        let roi = RoiLocator::default().lock(&frame(), &mut det).unwrap();
        assert_eq!(roi, Region::new(0, 0, 640, 360).unwrap());
    }

    #[test]
    fn nobody_means_full_frame() {
        let roi = RoiLocator::default().lock(&frame(), &mut NoDetector).unwrap();
        assert_eq!(roi, Region::full_frame(640, 360));
    }

    #[test]
    fn detector_failure_is_fatal() {
        let mut det = Fixed(Err("model missing".into()));
        assert!(matches!(
            RoiLocator::default().lock(&frame(), &mut det),
            Err(Error::DetectionError(_))
        ));
    }
}
