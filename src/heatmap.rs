use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::outcome::{Outcome, Shortfall};
use crate::region::Region;
use crate::track::Track;

/// Accumulation grid size in pixels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FrameShape {
    pub height: usize,
    pub width: usize,
}

impl Default for FrameShape {
    fn default() -> Self {
        Self {
            height: 360,
            width: 640,
        }
    }
}

/// Ball landing density over the pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    /// Raw hits per pixel, `(rows, cols)`.
    pub counts: Array2<u32>,
    pub density: Array2<f32>,
    /// `density` scaled so that its maximum is 255.
    pub intensity: Array2<u8>,
    pub pitch: Region,
    /// Valid positions that fell on the pitch.
    pub in_pitch: usize,
}

impl Heatmap {
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn total_density(&self) -> f64 {
        self.density.iter().map(|&d| d as f64).sum()
    }

    /// Grid cell with the highest intensity, as `(x, y)`.
    pub fn peak(&self) -> Option<(usize, usize)> {
        self.intensity
            .indexed_iter()
            .fold(None, |best: Option<((usize, usize), u8)>, ((r, c), &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some(((c, r), v)),
            })
            .map(|(at, _)| at)
    }
}

/// Gaussian sigma implied by an odd kernel size when no sigma is given:
/// `0.3 * ((ksize - 1) / 2 - 1) + 0.8`.
pub fn kernel_sigma(ksize: usize) -> f32 {
    0.3 * ((ksize as f32 - 1.0) / 2.0 - 1.0) + 0.8
}

/// Gaussian blur of a count grid with a `ksize` x `ksize` kernel, zero outside
/// the grid.
#[cfg(not(feature = "opencv"))]
pub fn gaussian_blur(src: &Array2<f32>, ksize: usize) -> Result<Array2<f32>, Error> {
    use image::{ImageBuffer, Luma};

    let (rows, cols) = src.dim();
    if rows == 0 || cols == 0 {
        return Ok(src.clone());
    }

    // imageproc clamps at the border, so pad with zeros past the kernel reach
    let sigma = kernel_sigma(ksize);
    let pad = (ksize / 2).max((3.0 * sigma).ceil() as usize) + 1;

    let img: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_fn(
        (cols + 2 * pad) as u32,
        (rows + 2 * pad) as u32,
        |x, y| {
            let (r, c) = ((y as usize).wrapping_sub(pad), (x as usize).wrapping_sub(pad));
            Luma([src.get((r, c)).copied().unwrap_or(0.0)])
        },
    );
    let blurred = imageproc::filter::gaussian_blur_f32(&img, sigma);

    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
        blurred.get_pixel((c + pad) as u32, (r + pad) as u32)[0]
    }))
}

/// Gaussian blur of a count grid with a `ksize` x `ksize` kernel, zero outside
/// the grid.
#[cfg(feature = "opencv")]
pub fn gaussian_blur(src: &Array2<f32>, ksize: usize) -> Result<Array2<f32>, Error> {
    use opencv::{core, imgproc, prelude::*};

    let (rows, cols) = src.dim();
    if rows == 0 || cols == 0 {
        return Ok(src.clone());
    }

    let mut mat = core::Mat::new_rows_cols_with_default(
        rows as i32,
        cols as i32,
        core::CV_32FC1,
        core::Scalar::all(0.0),
    )?;
    for (dst, &v) in mat.data_typed_mut::<f32>()?.iter_mut().zip(src.iter()) {
        *dst = v;
    }

    let mut blurred = core::Mat::default();
    imgproc::gaussian_blur(
        &mat,
        &mut blurred,
        core::Size::new(ksize as i32, ksize as i32),
        0.0,
        0.0,
        core::BORDER_CONSTANT,
    )?;

    let data = blurred.data_typed::<f32>()?;
    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| data[r * cols + c]))
}

/// Builds the pitch heatmap from a track.
#[derive(Debug, Clone)]
pub struct SpatialAggregator {
    pub frame_shape: FrameShape,
    pub kernel: usize,
    pub pitch: Region,
}

impl SpatialAggregator {
    /// An even `kernel` is widened to the next odd size, zero becomes one.
    pub fn new(frame_shape: FrameShape, kernel: usize, pitch: Region) -> Self {
        Self {
            frame_shape,
            kernel: kernel | 1,
            pitch,
        }
    }

    pub fn aggregate(&self, track: &Track) -> Result<Outcome<Heatmap>, Error> {
        let FrameShape { height, width } = self.frame_shape;
        let mut counts = Array2::<u32>::zeros((height, width));
        let mut in_pitch = 0;

        for (_, p) in track.valid() {
            if !self.pitch.contains(p.x, p.y) {
                continue;
            }

            in_pitch += 1;
            let (x, y) = (p.x as usize, p.y as usize);
            if x < width && y < height {
                counts[[y, x]] += 1;
            }
        }

        if in_pitch == 0 {
            return Ok(Outcome::InsufficientData(Shortfall::NoPositionsInPitch));
        }

        let density = gaussian_blur(&counts.mapv(|c| c as f32), self.kernel)?;
        let max = density.iter().cloned().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Ok(Outcome::InsufficientData(Shortfall::ZeroDensity));
        }

        let intensity = density.mapv(|v| (v / max * 255.0).clamp(0.0, 255.0) as u8);

        log::debug!("heatmap from {} in-pitch positions", in_pitch);

        Ok(Outcome::Ready(Heatmap {
            counts,
            density,
            intensity,
            pitch: self.pitch,
            in_pitch,
        }))
    }
}
