use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::region::Region;

/// Single-channel intensity crop, row-major `(rows, cols)`.
pub type GrayCrop = Array2<f32>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Decoded RGB frame, laid out as `(rows, cols, 3)`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: Array3<u8>,
}

impl Frame {
    pub fn new(index: usize, image: Array3<u8>) -> Result<Self, Error> {
        if image.shape()[2] != 3 {
            return Err(Error::SourceError(format!(
                "frame {} has {} channels, expected 3",
                index,
                image.shape()[2]
            )));
        }

        Ok(Self { index, image })
    }

    pub fn from_rgb(index: usize, width: u32, height: u32, data: Vec<u8>) -> Result<Self, Error> {
        let image = Array3::from_shape_vec((height as usize, width as usize, 3), data)
            .map_err(|e| Error::SourceError(format!("frame {}: {}", index, e)))?;

        Self::new(index, image)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.shape()[1] as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.shape()[0] as u32
    }

    #[inline]
    pub fn full_region(&self) -> Region {
        Region::full_frame(self.width(), self.height())
    }

    /// Grayscale view of the part of the frame covered by `roi`.
    ///
    /// A region reaching past the frame is clipped; a region entirely outside
    /// yields an empty crop.
    pub fn gray_crop(&self, roi: &Region) -> GrayCrop {
        let region = match roi.clip(self.width(), self.height()) {
            Some(region) => region,
            None => return Array2::zeros((0, 0)),
        };

        let view = self.image.slice(s![
            region.y1 as usize..region.y2 as usize,
            region.x1 as usize..region.x2 as usize,
            ..
        ]);

        Array2::from_shape_fn((view.shape()[0], view.shape()[1]), |(r, c)| {
            luma(view[[r, c, 0]], view[[r, c, 1]], view[[r, c, 2]])
        })
    }
}

#[inline(always)]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Nearest-neighbour resize of a grayscale crop to `(rows, cols)`.
pub fn resize_nearest(src: &GrayCrop, rows: usize, cols: usize) -> GrayCrop {
    let (src_rows, src_cols) = src.dim();
    if (src_rows, src_cols) == (rows, cols) {
        return src.clone();
    }

    if src_rows == 0 || src_cols == 0 {
        return Array2::zeros((rows, cols));
    }

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let sr = ((r * src_rows) / rows).min(src_rows - 1);
        let sc = ((c * src_cols) / cols).min(src_cols - 1);

        src[[sr, sc]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        Frame::from_rgb(0, width, height, data).unwrap()
    }

    #[test]
    fn gray_crop_has_region_shape() {
        let frame = solid(64, 48, [255, 255, 255]);
        let crop = frame.gray_crop(&Region::new(10, 5, 30, 25).unwrap());
        assert_eq!(crop.dim(), (20, 20));
        assert!((crop[[0, 0]] - 255.0).abs() < 1e-3);
    }

    #[test]
    fn gray_crop_clips_to_frame() {
        let frame = solid(64, 48, [0, 0, 0]);
        let crop = frame.gray_crop(&Region::new(60, 40, 100, 100).unwrap());
        assert_eq!(crop.dim(), (8, 4));
        let outside = frame.gray_crop(&Region::new(70, 50, 100, 100).unwrap());
        assert_eq!(outside.len(), 0);
    }

    #[test]
    fn resize_keeps_values() {
        let src = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f32);
        let dst = resize_nearest(&src, 4, 4);
        assert_eq!(dst.dim(), (4, 4));
        assert_eq!(dst[[0, 0]], 0.0);
        assert_eq!(dst[[3, 3]], 3.0);
        assert_eq!(dst[[0, 3]], 1.0);
    }

    #[test]
    fn rejects_bad_buffer() {
        assert!(Frame::from_rgb(0, 4, 4, vec![0; 10]).is_err());
    }
}
