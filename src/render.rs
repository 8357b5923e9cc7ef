use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::error::Error;
use crate::heatmap::Heatmap;
use crate::region::Region;
use crate::wagon::WagonWheel;

/// Plotting capability for the aggregated outputs.
pub trait Renderer {
    fn render_raster(&mut self, heatmap: &Heatmap, path: &Path) -> Result<(), Error>;
    fn render_histogram(&mut self, wheel: &WagonWheel, path: &Path) -> Result<(), Error>;
}

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([70, 70, 70]);
const BACKGROUND: Rgb<u8> = Rgb([20, 20, 28]);
const BAR: Rgb<u8> = Rgb([255, 170, 40]);

/// JET colormap: dark blue through cyan, yellow and dark red.
pub fn jet(v: u8) -> Rgb<u8> {
    let t = v as f32 / 255.0;
    let channel = |center: f32| ((1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0) * 255.0) as u8;

    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Writes PNG files with the `image` crate.
#[derive(Debug, Clone)]
pub struct PngRenderer {
    /// Side of the square wagon wheel image.
    pub wheel_size: u32,
    pub outline: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self {
            wheel_size: 480,
            outline: 2,
        }
    }
}

impl PngRenderer {
    fn save(img: &RgbImage, path: &Path) -> Result<(), Error> {
        img.save(path)
            .map_err(|e| Error::RenderError(format!("{}: {}", path.display(), e)))?;

        log::info!("written {}", path.display());
        Ok(())
    }
}

/// Outline of `region`, `thickness` pixels wide, growing inwards.
fn draw_outline(img: &mut RgbImage, region: &Region, thickness: u32, color: Rgb<u8>) {
    for t in 0..thickness {
        let (w, h) = (region.width() + 1, region.height() + 1);
        if w <= 2 * t || h <= 2 * t {
            break;
        }

        let rect = Rect::at((region.x1 + t) as i32, (region.y1 + t) as i32)
            .of_size(w - 2 * t, h - 2 * t);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Filled circular sector from `from` to `to` degrees, clockwise on screen.
fn draw_sector(img: &mut RgbImage, c: (f32, f32), radius: f32, from: f32, to: f32, color: Rgb<u8>) {
    let steps = ((to - from).abs() * radius / 8.0).ceil().max(2.0) as usize;
    let at = |deg: f32| {
        let a = deg.to_radians();
        Point::new(
            (c.0 + radius * a.cos()).round() as i32,
            (c.1 + radius * a.sin()).round() as i32,
        )
    };

    let mut poly = vec![Point::new(c.0.round() as i32, c.1.round() as i32)];
    for k in 0..=steps {
        let p = at(from + (to - from) * k as f32 / steps as f32);
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }

    if poly.len() >= 3 && poly.first() != poly.last() {
        draw_polygon_mut(img, &poly, color);
    }
}

impl Renderer for PngRenderer {
    fn render_raster(&mut self, heatmap: &Heatmap, path: &Path) -> Result<(), Error> {
        let (rows, cols) = heatmap.intensity.dim();
        let mut img = RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
            jet(heatmap.intensity[[y as usize, x as usize]])
        });

        draw_outline(&mut img, &heatmap.pitch, self.outline, WHITE);

        Self::save(&img, path)
    }

    fn render_histogram(&mut self, wheel: &WagonWheel, path: &Path) -> Result<(), Error> {
        let size = self.wheel_size.max(16);
        let mut img = RgbImage::from_pixel(size, size, BACKGROUND);

        let c = (size as f32 / 2.0, size as f32 / 2.0);
        let radius = size as f32 / 2.0 - 8.0;

        let center = (c.0 as i32, c.1 as i32);
        for ring in 1..=4 {
            draw_hollow_circle_mut(&mut img, center, (radius * ring as f32 / 4.0) as i32, GRID);
        }

        for spoke in 0..8 {
            let a = (spoke as f32 * 45.0).to_radians();
            let end = (c.0 + radius * a.cos(), c.1 + radius * a.sin());
            draw_line_segment_mut(&mut img, c, end, GRID);
        }

        let max = wheel.buckets.iter().copied().max().unwrap_or(0).max(1) as f32;
        let width = wheel.bucket_width();

        for (i, &n) in wheel.buckets.iter().enumerate() {
            if n == 0 {
                continue;
            }

            let len = radius * n as f32 / max;
            let mid = wheel.bucket_center(i);

            // bar covers the middle 80% of its bucket
            draw_sector(&mut img, c, len, mid - width * 0.4, mid + width * 0.4, BAR);
        }

        Self::save(&img, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::{FrameShape, SpatialAggregator};
    use crate::track::{FramePosition, Track};
    use crate::wagon::AngularAggregator;

    #[test]
    fn jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 127]));
        assert_eq!(jet(255), Rgb([127, 0, 0]));
        let mid = jet(128);
        assert!(mid[1] > 250);
    }

    #[test]
    fn heatmap_png_has_frame_size_and_outline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pitch_heatmap.png");
        let pitch = Region::new(200, 100, 440, 280).unwrap();
        let track = Track::from_positions(vec![FramePosition::at(0, 320.0, 190.0)]).unwrap();
        let map = SpatialAggregator::new(FrameShape::default(), 51, pitch)
            .aggregate(&track)
            .unwrap()
            .ready()
            .unwrap();

        PngRenderer::default().render_raster(&map, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (640, 360));
        assert_eq!(*img.get_pixel(200, 100), WHITE);
        assert_eq!(*img.get_pixel(201, 150), WHITE);
        assert_eq!(*img.get_pixel(0, 0), jet(0));
    }

    #[test]
    fn wagon_png_draws_bars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wagon_wheel.png");
        let track = Track::from_positions(vec![
            FramePosition::at(0, 10.0, 10.0),
            FramePosition::at(1, 20.0, 10.0),
        ])
        .unwrap();
        let wheel = AngularAggregator::default().aggregate(&track).ready().unwrap();

        let mut renderer = PngRenderer::default();
        renderer.render_histogram(&wheel, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (480, 480));
        // bucket 18 spans 0..10 degrees, so the bar lies right of the center
        assert_eq!(*img.get_pixel(240 + 100, 240 + 8), BAR);
    }

    #[test]
    fn sectors_too_small_to_fill_are_skipped() {
        let mut img = RgbImage::from_pixel(20, 20, BACKGROUND);
        draw_sector(&mut img, (10.0, 10.0), 0.3, 0.0, 8.0, BAR);
        assert!(img.pixels().all(|&p| p == BACKGROUND));

        draw_sector(&mut img, (10.0, 10.0), 8.0, -20.0, 20.0, BAR);
        assert_eq!(*img.get_pixel(15, 10), BAR);
        assert_eq!(*img.get_pixel(5, 10), BACKGROUND);
    }

    #[test]
    fn unwritable_path_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.png");
        let track = Track::from_positions(vec![
            FramePosition::at(0, 0.0, 0.0),
            FramePosition::at(1, 1.0, 1.0),
        ])
        .unwrap();
        let wheel = AngularAggregator::default().aggregate(&track).ready().unwrap();

        assert!(matches!(
            PngRenderer::default().render_histogram(&wheel, &path),
            Err(Error::RenderError(_))
        ));
    }
}
