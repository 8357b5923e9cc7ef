use ndarray::prelude::*;
use ndarray::Zip;

use crate::error::Error;
use crate::frame::GrayCrop;

/// Dense per-pixel displacement between two grayscale images.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub dx: Array2<f32>,
    pub dy: Array2<f32>,
}

impl FlowField {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            dx: Array2::zeros((rows, cols)),
            dy: Array2::zeros((rows, cols)),
        }
    }

    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        self.dx.dim()
    }

    pub fn magnitude(&self) -> Array2<f32> {
        Zip::from(&self.dx)
            .and(&self.dy)
            .map_collect(|&x, &y| (x * x + y * y).sqrt())
    }
}

/// Optical-flow capability.
pub trait FlowEstimator {
    /// Flow taking `prev` onto `curr`; both inputs have the same shape.
    fn flow(&mut self, prev: &GrayCrop, curr: &GrayCrop) -> Result<FlowField, Error>;
}

impl<F: FlowEstimator + ?Sized> FlowEstimator for Box<F> {
    #[inline]
    fn flow(&mut self, prev: &GrayCrop, curr: &GrayCrop) -> Result<FlowField, Error> {
        (**self).flow(prev, curr)
    }
}

/// Dense pyramidal Lucas-Kanade flow over a square window.
///
/// Both images are halved `levels - 1` times. Flow is estimated on the coarsest
/// level first, doubled onto the next finer level and refined there by
/// warping the current image with the running estimate, so displacements far
/// larger than the window's linear range are still recovered.
///
/// Every refinement solves the 2x2 least-squares system built from the image
/// gradients inside the window; window sums come from integral images so the
/// cost does not depend on the window size. Pixels whose structure tensor is
/// singular (flat areas, straight edges) keep the estimate from the coarser
/// level.
#[derive(Debug, Clone)]
pub struct LucasKanade {
    pub window: usize,
    pub levels: usize,
    /// Warp-and-refine passes per pyramid level.
    pub iterations: usize,
    pub min_eigen: f64,
}

/// Levels stop being added once a side would fall below this.
const MIN_LEVEL_SIDE: usize = 16;

impl LucasKanade {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            levels: 4,
            iterations: 3,
            min_eigen: 1e-4,
        }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels.max(1);
        self
    }

    /// One Lucas-Kanade increment taking `prev` onto `curr`.
    ///
    /// `curr` was warped with each pixel's own estimate `(u, v)`; every
    /// window is re-linearised around its center pixel's estimate.
    fn increment(
        &self,
        prev: &Array2<f64>,
        curr: &Array2<f64>,
        u: &Array2<f64>,
        v: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let (rows, cols) = prev.dim();

        let gx = gradient(prev, curr, Axis(1));
        let gy = gradient(prev, curr, Axis(0));
        let gt = curr - prev;

        let sxx = Integral::new(&Zip::from(&gx).map_collect(|&x| x * x));
        let sxy = Integral::new(&Zip::from(&gx).and(&gy).map_collect(|&x, &y| x * y));
        let syy = Integral::new(&Zip::from(&gy).map_collect(|&y| y * y));
        let sxt = Integral::new(&Zip::from(&gx).and(&gt).map_collect(|&x, &t| x * t));
        let syt = Integral::new(&Zip::from(&gy).and(&gt).map_collect(|&y, &t| y * t));

        let sxxu = Integral::new(&Zip::from(&gx).and(u).map_collect(|&x, &w| x * x * w));
        let sxyu = Integral::new(&Zip::from(&gx).and(&gy).and(u).map_collect(|&x, &y, &w| x * y * w));
        let sxyv = Integral::new(&Zip::from(&gx).and(&gy).and(v).map_collect(|&x, &y, &w| x * y * w));
        let syyv = Integral::new(&Zip::from(&gy).and(v).map_collect(|&y, &w| y * y * w));

        let half = self.window / 2;
        let mut du = Array2::zeros((rows, cols));
        let mut dv = Array2::zeros((rows, cols));

        for r in 0..rows {
            let (r0, r1) = (r.saturating_sub(half), (r + half + 1).min(rows));
            for c in 0..cols {
                let (c0, c1) = (c.saturating_sub(half), (c + half + 1).min(cols));

                let a = sxx.sum(r0, c0, r1, c1);
                let b = sxy.sum(r0, c0, r1, c1);
                let d = syy.sum(r0, c0, r1, c1);
                let det = a * d - b * b;

                // smallest eigenvalue of [[a, b], [b, d]]
                let trace = a + d;
                let disc = ((a - d) * (a - d) + 4.0 * b * b).sqrt();
                let area = ((r1 - r0) * (c1 - c0)) as f64;
                if (trace - disc) / 2.0 < self.min_eigen * area || det.abs() < f64::EPSILON {
                    continue;
                }

                let (uc, vc) = (u[[r, c]], v[[r, c]]);
                let et = sxt.sum(r0, c0, r1, c1) + uc * a + vc * b
                    - sxxu.sum(r0, c0, r1, c1)
                    - sxyv.sum(r0, c0, r1, c1);
                let ft = syt.sum(r0, c0, r1, c1) + uc * b + vc * d
                    - sxyu.sum(r0, c0, r1, c1)
                    - syyv.sum(r0, c0, r1, c1);

                du[[r, c]] = (-d * et + b * ft) / det;
                dv[[r, c]] = (b * et - a * ft) / det;
            }
        }

        (du, dv)
    }
}

impl Default for LucasKanade {
    fn default() -> Self {
        Self::new(15)
    }
}

impl FlowEstimator for LucasKanade {
    fn flow(&mut self, prev: &GrayCrop, curr: &GrayCrop) -> Result<FlowField, Error> {
        if prev.dim() != curr.dim() {
            return Err(Error::FlowError(format!(
                "shape mismatch {:?} vs {:?}",
                prev.dim(),
                curr.dim()
            )));
        }

        let (rows, cols) = prev.dim();
        if rows == 0 || cols == 0 {
            return Ok(FlowField::zeros(rows, cols));
        }

        let prev_pyr = pyramid(prev.mapv(f64::from), self.levels);
        let curr_pyr = pyramid(curr.mapv(f64::from), prev_pyr.len());

        let mut u = Array2::zeros(prev_pyr[prev_pyr.len() - 1].dim());
        let mut v = u.clone();

        for (level, (p, c)) in prev_pyr.iter().zip(&curr_pyr).enumerate().rev() {
            if u.dim() != p.dim() {
                u = upscale(&u, p.dim());
                v = upscale(&v, p.dim());
            }

            for _ in 0..self.iterations {
                let warped = warp(c, &u, &v);
                let (du, dv) = self.increment(p, &warped, &u, &v);
                u += &du;
                v += &dv;
            }

            log::trace!("flow level {} refined at {:?}", level, p.dim());
        }

        Ok(FlowField {
            dx: u.mapv(|x| x as f32),
            dy: v.mapv(|y| y as f32),
        })
    }
}

/// Image pyramid, finest level first, each level half the size of the previous.
fn pyramid(base: Array2<f64>, levels: usize) -> Vec<Array2<f64>> {
    let mut out = vec![base];

    while out.len() < levels.max(1) {
        let last = &out[out.len() - 1];
        let (rows, cols) = last.dim();
        if rows / 2 < MIN_LEVEL_SIDE || cols / 2 < MIN_LEVEL_SIDE {
            break;
        }

        let next = downscale(last);
        out.push(next);
    }

    out
}

/// Halves each side, averaging the 2x2 block under every output pixel.
fn downscale(src: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = src.dim();

    Array2::from_shape_fn(((rows + 1) / 2, (cols + 1) / 2), |(r, c)| {
        let (r0, c0) = (2 * r, 2 * c);
        let block = src.slice(s![r0..(r0 + 2).min(rows), c0..(c0 + 2).min(cols)]);

        block.sum() / block.len() as f64
    })
}

/// Carries a coarse flow component onto a grid about twice as large.
fn upscale(flow: &Array2<f64>, dim: (usize, usize)) -> Array2<f64> {
    let (rows, cols) = flow.dim();

    Array2::from_shape_fn(dim, |(r, c)| {
        2.0 * flow[[(r / 2).min(rows - 1), (c / 2).min(cols - 1)]]
    })
}

/// Samples `img` at every pixel displaced by `(u, v)`, bilinear, clamped to the border.
fn warp(img: &Array2<f64>, u: &Array2<f64>, v: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = img.dim();
    let (max_r, max_c) = ((rows - 1) as f64, (cols - 1) as f64);

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let y = (r as f64 + v[[r, c]]).clamp(0.0, max_r);
        let x = (c as f64 + u[[r, c]]).clamp(0.0, max_c);

        let (y0, x0) = (y.floor() as usize, x.floor() as usize);
        let (y1, x1) = ((y0 + 1).min(rows - 1), (x0 + 1).min(cols - 1));
        let (fy, fx) = (y - y0 as f64, x - x0 as f64);

        let top = img[[y0, x0]] * (1.0 - fx) + img[[y0, x1]] * fx;
        let bottom = img[[y1, x0]] * (1.0 - fx) + img[[y1, x1]] * fx;

        top * (1.0 - fy) + bottom * fy
    })
}

/// Central-difference gradient along `axis`, averaged over both images.
fn gradient(prev: &Array2<f64>, curr: &Array2<f64>, axis: Axis) -> Array2<f64> {
    let (rows, cols) = prev.dim();
    let len = prev.len_of(axis);

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let i = if axis == Axis(0) { r } else { c };
        if len < 2 {
            return 0.0;
        }

        let (lo, hi) = (i.saturating_sub(1), (i + 1).min(len - 1));
        let at = |img: &Array2<f64>, k: usize| {
            if axis == Axis(0) {
                img[[k, c]]
            } else {
                img[[r, k]]
            }
        };

        let span = (hi - lo) as f64;
        let g_prev = (at(prev, hi) - at(prev, lo)) / span;
        let g_curr = (at(curr, hi) - at(curr, lo)) / span;

        (g_prev + g_curr) / 2.0
    })
}

/// Summed-area table with a zero first row and column.
struct Integral(Array2<f64>);

impl Integral {
    fn new(src: &Array2<f64>) -> Self {
        let (rows, cols) = src.dim();
        let mut acc = Array2::zeros((rows + 1, cols + 1));

        for r in 0..rows {
            let mut row_sum = 0.0;
            for c in 0..cols {
                row_sum += src[[r, c]];
                acc[[r + 1, c + 1]] = acc[[r, c + 1]] + row_sum;
            }
        }

        Self(acc)
    }

    /// Sum over rows `r0..r1` and columns `c0..c1`.
    #[inline]
    fn sum(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> f64 {
        self.0[[r1, c1]] - self.0[[r0, c1]] - self.0[[r1, c0]] + self.0[[r0, c0]]
    }
}

#[cfg(feature = "opencv")]
pub use self::farneback::FarnebackFlow;

#[cfg(feature = "opencv")]
mod farneback {
    use opencv::{core, prelude::*, video};

    use super::{FlowEstimator, FlowField};
    use crate::error::Error;
    use crate::frame::GrayCrop;

    /// Gunnar Farneback dense flow from OpenCV.
    #[derive(Debug, Clone)]
    pub struct FarnebackFlow {
        pub pyr_scale: f64,
        pub levels: i32,
        pub winsize: i32,
        pub iterations: i32,
        pub poly_n: i32,
        pub poly_sigma: f64,
    }

    impl Default for FarnebackFlow {
        fn default() -> Self {
            Self {
                pyr_scale: 0.5,
                levels: 3,
                winsize: 15,
                iterations: 3,
                poly_n: 5,
                poly_sigma: 1.2,
            }
        }
    }

    fn to_mat(img: &GrayCrop) -> Result<core::Mat, Error> {
        let (rows, cols) = img.dim();
        let mut mat = core::Mat::new_rows_cols_with_default(
            rows as i32,
            cols as i32,
            core::CV_8UC1,
            core::Scalar::all(0.0),
        )?;

        let bytes = mat.data_bytes_mut()?;
        for (dst, src) in bytes.iter_mut().zip(img.iter()) {
            *dst = src.round().clamp(0.0, 255.0) as u8;
        }

        Ok(mat)
    }

    impl FlowEstimator for FarnebackFlow {
        fn flow(&mut self, prev: &GrayCrop, curr: &GrayCrop) -> Result<FlowField, Error> {
            let (rows, cols) = prev.dim();
            if rows == 0 || cols == 0 {
                return Ok(FlowField::zeros(rows, cols));
            }

            let (p, c) = (to_mat(prev)?, to_mat(curr)?);
            let mut flow = core::Mat::default();
            video::calc_optical_flow_farneback(
                &p,
                &c,
                &mut flow,
                self.pyr_scale,
                self.levels,
                self.winsize,
                self.iterations,
                self.poly_n,
                self.poly_sigma,
                0,
            )?;

            let data = flow.data_typed::<core::Vec2f>()?;
            let mut field = FlowField::zeros(rows, cols);
            for (i, v) in data.iter().enumerate() {
                let (r, c) = (i / cols, i % cols);
                field.dx[[r, c]] = v[0];
                field.dy[[r, c]] = v[1];
            }

            Ok(field)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bowl(rows: usize, cols: usize, shift_x: f32, shift_y: f32) -> GrayCrop {
        let (cr, cc) = (rows as f32 / 2.0, cols as f32 / 2.0);
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let x = c as f32 - cc - shift_x;
            let y = r as f32 - cr - shift_y;
            0.05 * (x * x + y * y)
        })
    }

    #[test]
    fn recovers_translation_of_a_smooth_surface() {
        let prev = bowl(32, 32, 0.0, 0.0);
        let curr = bowl(32, 32, 1.0, 0.0);
        let field = LucasKanade::new(9).flow(&prev, &curr).unwrap();

        let (dx, dy) = (field.dx[[16, 16]], field.dy[[16, 16]]);
        assert!((dx - 1.0).abs() < 1e-2, "dx = {}", dx);
        assert!(dy.abs() < 1e-2, "dy = {}", dy);
    }

    fn square(rows: usize, cols: usize, x: usize, y: usize, side: usize) -> GrayCrop {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            if (y..y + side).contains(&r) && (x..x + side).contains(&c) {
                255.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn recovers_displacement_beyond_the_window() {
        let prev = square(96, 128, 40, 40, 16);
        let curr = square(96, 128, 52, 40, 16);
        let field = LucasKanade::default().flow(&prev, &curr).unwrap();

        let (dx, dy) = (field.dx[[48, 48]], field.dy[[48, 48]]);
        assert!((dx - 12.0).abs() < 0.5, "dx = {}", dx);
        assert!(dy.abs() < 0.5, "dy = {}", dy);

        let peak = field.magnitude().iter().cloned().fold(0.0f32, f32::max);
        assert!(peak > 5.0);
    }

    #[test]
    fn pyramid_stops_before_tiny_levels() {
        let levels = pyramid(Array2::zeros((40, 64)), 4);
        let dims: Vec<_> = levels.iter().map(|l| l.dim()).collect();
        assert_eq!(dims, vec![(40, 64), (20, 32)]);

        let single = LucasKanade::new(5).with_levels(0);
        assert_eq!(single.levels, 1);
    }

    #[test]
    fn downscale_averages_blocks() {
        let src = array![[1.0, 3.0, 5.0], [3.0, 5.0, 7.0]];
        assert_eq!(downscale(&src), array![[3.0, 6.0]]);
    }

    #[test]
    fn flat_images_have_no_flow() {
        let img = Array2::from_elem((10, 12), 7.0f32);
        let field = LucasKanade::default().flow(&img, &img).unwrap();
        assert_eq!(field.dim(), (10, 12));
        assert!(field.magnitude().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = Array2::zeros((4, 4));
        let b = Array2::zeros((4, 5));
        assert!(matches!(
            LucasKanade::default().flow(&a, &b),
            Err(Error::FlowError(_))
        ));
    }

    #[test]
    fn magnitude_is_euclidean() {
        let mut f = FlowField::zeros(1, 1);
        f.dx[[0, 0]] = 3.0;
        f.dy[[0, 0]] = 4.0;
        assert_eq!(f.magnitude()[[0, 0]], 5.0);
    }
}
