use nalgebra as na;
use ndarray::prelude::*;

use crate::detector::Detector;
use crate::error::Error;
use crate::flow::FlowEstimator;
use crate::frame::{resize_nearest, Frame, GrayCrop};
use crate::region::Region;
use crate::roi::RoiLocator;
use crate::source::FrameSource;
use crate::track::{FramePosition, Track};
use crate::{Recoverer, Recovery};

/// External contour of a group of moving pixels, bounding box in crop coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Area enclosed by the contour polygon.
    pub area: f64,
}

impl Blob {
    /// Bounding box center, rounded down to whole pixels.
    #[inline]
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }
}

/// Pixels whose flow magnitude is strictly above `threshold`.
pub fn motion_mask(magnitude: &Array2<f32>, threshold: f32) -> Array2<bool> {
    magnitude.mapv(|m| m > threshold)
}

/// Outermost contours of `mask`, one blob each.
#[cfg(not(feature = "opencv"))]
pub fn find_blobs(mask: &Array2<bool>) -> Result<Vec<Blob>, Error> {
    use imageproc::contours::{find_contours, BorderType};
    use imageproc::geometry::contour_area;

    let (rows, cols) = mask.dim();
    let img = image::GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        image::Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });

    let blobs = find_contours::<i32>(&img)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let first = c.points.first()?;
            let (x0, y0, x1, y1) = c.points.iter().fold(
                (first.x, first.y, first.x, first.y),
                |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
            );

            Some(Blob {
                x: x0 as u32,
                y: y0 as u32,
                w: (x1 - x0 + 1) as u32,
                h: (y1 - y0 + 1) as u32,
                area: contour_area(&c.points),
            })
        })
        .collect();

    Ok(blobs)
}

/// Outermost contours of `mask`, one blob each.
#[cfg(feature = "opencv")]
pub fn find_blobs(mask: &Array2<bool>) -> Result<Vec<Blob>, Error> {
    use opencv::{core, imgproc, prelude::*};

    let (rows, cols) = mask.dim();
    let mut mat = core::Mat::new_rows_cols_with_default(
        rows as i32,
        cols as i32,
        core::CV_8UC1,
        core::Scalar::all(0.0),
    )?;
    for (dst, &on) in mat.data_bytes_mut()?.iter_mut().zip(mask.iter()) {
        *dst = if on { 255 } else { 0 };
    }

    let mut contours = core::Vector::<core::Vector<core::Point>>::new();
    imgproc::find_contours(
        &mat,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        core::Point::new(0, 0),
    )?;

    let mut blobs = Vec::with_capacity(contours.len());
    for contour in contours.iter() {
        let rect = imgproc::bounding_rect(&contour)?;
        blobs.push(Blob {
            x: rect.x as u32,
            y: rect.y as u32,
            w: rect.width as u32,
            h: rect.height as u32,
            area: imgproc::contour_area(&contour, false)?,
        });
    }

    Ok(blobs)
}

/// Blob with the largest contour area; the first one found wins a tie.
pub fn largest_blob(mask: &Array2<bool>) -> Result<Option<Blob>, Error> {
    let best = find_blobs(mask)?
        .into_iter()
        .fold(None, |best: Option<Blob>, blob| match best {
            Some(b) if b.area >= blob.area => Some(b),
            _ => Some(blob),
        });

    Ok(best)
}

/// Recovers ball positions from dense optical flow inside a locked region.
///
/// The region is locked once, on the first frame, and never moves. Each later
/// frame is compared against the previous grayscale crop; the largest moving
/// blob is taken to be the ball.
pub struct MotionTracker<F: FlowEstimator, D: Detector> {
    locator: RoiLocator,
    detector: D,
    flow: F,
    threshold: f32,
}

impl<F: FlowEstimator, D: Detector> MotionTracker<F, D> {
    pub fn new(locator: RoiLocator, detector: D, flow: F, threshold: f32) -> Self {
        Self {
            locator,
            detector,
            flow,
            threshold,
        }
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Processes one frame against the previous crop.
    ///
    /// Returns the ball position in full-frame coordinates, if any, and the crop
    /// to carry into the next step.
    pub fn step(
        &mut self,
        roi: &Region,
        prev: &GrayCrop,
        frame: &Frame,
    ) -> Result<(Option<na::Point2<f32>>, GrayCrop), Error> {
        let mut curr = frame.gray_crop(roi);
        if curr.dim() != prev.dim() {
            let (rows, cols) = prev.dim();
            curr = resize_nearest(&curr, rows, cols);
        }

        let field = self.flow.flow(prev, &curr)?;
        let mask = motion_mask(&field.magnitude(), self.threshold);

        let position = largest_blob(&mask)?.map(|blob| {
            let (cx, cy) = blob.center();
            na::Point2::new((cx + roi.x1) as f32, (cy + roi.y1) as f32)
        });

        match position {
            Some(p) => log::debug!("frame {}: motion at ({}, {})", frame.index, p.x, p.y),
            None => log::debug!("frame {}: no motion", frame.index),
        }

        Ok((position, curr))
    }
}

impl<F: FlowEstimator, D: Detector> Recoverer for MotionTracker<F, D> {
    fn recover(&mut self, source: &mut dyn FrameSource) -> Result<Recovery, Error> {
        let first = source
            .next_frame()?
            .ok_or_else(|| Error::SourceError("video has no frames".into()))?;

        let roi = self.locator.lock(&first, &mut self.detector)?;
        let mut prev = first.gray_crop(&roi);

        let mut track = Track::new();
        track.push(FramePosition::gap(first.index))?;

        while let Some(frame) = source.next_frame()? {
            let (position, next) = self.step(&roi, &prev, &frame)?;
            track.push(FramePosition {
                frame_index: frame.index,
                position,
                track_id: None,
            })?;

            prev = next;
        }

        log::info!(
            "motion tracking done: {} frames, {} positions",
            track.len(),
            track.valid_count()
        );

        Ok(Recovery {
            track,
            roi: Some(roi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::NoDetector;
    use crate::flow::{FlowField, LucasKanade};
    use crate::source::MemorySource;

    /// Reports a fixed displacement wherever the current crop is bright.
    struct BrightMoves;

    impl FlowEstimator for BrightMoves {
        fn flow(&mut self, _prev: &GrayCrop, curr: &GrayCrop) -> Result<FlowField, Error> {
            let (rows, cols) = curr.dim();
            let mut field = FlowField::zeros(rows, cols);
            field.dx = curr.mapv(|v| if v > 128.0 { 10.0 } else { 0.0 });
            Ok(field)
        }
    }

    struct Broken;

    impl FlowEstimator for Broken {
        fn flow(&mut self, _: &GrayCrop, _: &GrayCrop) -> Result<FlowField, Error> {
            Err(Error::FlowError("broken".into()))
        }
    }

    fn square_frame(index: usize, x: usize, y: usize) -> Frame {
        let (w, h) = (64usize, 48usize);
        let mut data = vec![0u8; w * h * 3];
        for r in y..y + 6 {
            for c in x..x + 6 {
                let i = (r * w + c) * 3;
                data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }

        Frame::from_rgb(index, w as u32, h as u32, data).unwrap()
    }

    fn mask_with(rows: usize, cols: usize, blocks: &[(usize, usize, usize)]) -> Array2<bool> {
        let mut mask = Array2::from_elem((rows, cols), false);
        for &(x, y, side) in blocks {
            mask.slice_mut(s![y..y + side, x..x + side]).fill(true);
        }

        mask
    }

    #[test]
    fn largest_blob_prefers_area() {
        let mask = mask_with(20, 20, &[(1, 1, 2), (10, 8, 4)]);
        assert_eq!(find_blobs(&mask).unwrap().len(), 2);

        let best = largest_blob(&mask).unwrap().unwrap();
        assert_eq!((best.x, best.y, best.w, best.h), (10, 8, 4, 4));
        assert!((best.area - 9.0).abs() < 1e-9);
        assert_eq!(best.center(), (12, 10));
    }

    #[test]
    fn equal_areas_keep_the_first_blob() {
        let blobs = find_blobs(&mask_with(20, 20, &[(2, 2, 3), (12, 12, 3)])).unwrap();
        let best = largest_blob(&mask_with(20, 20, &[(2, 2, 3), (12, 12, 3)]))
            .unwrap()
            .unwrap();
        assert_eq!(best, blobs[0]);
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;
        mask[[2, 2]] = true;

        assert_eq!(find_blobs(&mask).unwrap().len(), 1);
        let blob = largest_blob(&mask).unwrap().unwrap();
        assert_eq!((blob.w, blob.h), (3, 3));
        assert_eq!(blob.center(), (1, 1));
    }

    #[test]
    fn hole_does_not_split_a_blob() {
        let mut mask = mask_with(12, 12, &[(2, 2, 7)]);
        mask[[5, 5]] = false;

        let blobs = find_blobs(&mask).unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!((blobs[0].x, blobs[0].y, blobs[0].w, blobs[0].h), (2, 2, 7, 7));
    }

    #[test]
    fn empty_mask_has_no_blob() {
        assert!(largest_blob(&Array2::from_elem((3, 3), false)).unwrap().is_none());
    }

    #[test]
    fn threshold_is_strict() {
        let mag = array![[5.0f32, 5.1]];
        assert_eq!(motion_mask(&mag, 5.0), array![[false, true]]);
    }

    #[test]
    fn step_reports_full_frame_coordinates() {
        let mut tracker = MotionTracker::new(RoiLocator::default(), NoDetector, BrightMoves, 5.0);
        let roi = Region::new(8, 4, 60, 44).unwrap();
        let frame = square_frame(1, 20, 10);
        let prev = Array2::zeros((40, 52));

        let (pos, next) = tracker.step(&roi, &prev, &frame).unwrap();
        assert_eq!(next.dim(), (40, 52));
        // square spans columns 12..18 and rows 6..12 of the crop
        assert_eq!(pos, Some(na::Point2::new(23.0, 13.0)));
    }

    #[test]
    fn step_resizes_to_previous_crop() {
        let mut tracker = MotionTracker::new(RoiLocator::default(), NoDetector, BrightMoves, 5.0);
        let roi = Region::full_frame(64, 48);
        let prev = Array2::zeros((24, 32));

        let (_, next) = tracker.step(&roi, &prev, &square_frame(1, 0, 0)).unwrap();
        assert_eq!(next.dim(), (24, 32));
    }

    #[test]
    fn recover_keeps_one_entry_per_frame() {
        let frames = (0..4).map(|i| square_frame(i, 10 + i * 8, 20)).collect();
        let mut source = MemorySource::new(frames, 25.0).unwrap();
        let mut tracker = MotionTracker::new(RoiLocator::default(), NoDetector, BrightMoves, 5.0);

        let recovery = tracker.recover(&mut source).unwrap();
        assert_eq!(recovery.roi, Some(Region::full_frame(64, 48)));
        assert_eq!(recovery.track.len(), 4);

        let first = recovery.track.iter().next().unwrap();
        assert!(first.position.is_none());
        assert_eq!(recovery.track.valid_count(), 3);
    }

    #[test]
    fn recover_with_lucas_kanade_follows_the_square() {
        let frames = (0..3).map(|i| square_frame(i, 20 + i * 2, 20)).collect();
        let mut source = MemorySource::new(frames, 25.0).unwrap();
        let mut tracker =
            MotionTracker::new(RoiLocator::default(), NoDetector, LucasKanade::new(5), 0.5);

        let recovery = tracker.recover(&mut source).unwrap();
        assert_eq!(recovery.track.len(), 3);
        for (_, p) in recovery.track.valid() {
            assert!((14.0..34.0).contains(&p.x), "x = {}", p.x);
            assert!((14.0..32.0).contains(&p.y), "y = {}", p.y);
        }
    }

    #[test]
    fn flow_failure_is_fatal() {
        let frames = (0..2).map(|i| square_frame(i, 10, 10)).collect();
        let mut source = MemorySource::new(frames, 25.0).unwrap();
        let mut tracker = MotionTracker::new(RoiLocator::default(), NoDetector, Broken, 5.0);

        assert!(matches!(
            tracker.recover(&mut source),
            Err(Error::FlowError(_))
        ));
    }
}
