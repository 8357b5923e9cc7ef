//! Annotated replay of a run: every frame again, with the searched region
//! outlined and the recovered ball marked.

use std::path::{Path, PathBuf};

use nalgebra as na;

use crate::error::Error;
use crate::frame::{Frame, VideoInfo};
use crate::region::Region;
use crate::source::FrameSource;
use crate::Recovery;

pub const ANNOTATED_VIDEO_FILE: &str = "ball_tracking.mp4";
pub const ANNOTATED_FRAMES_DIR: &str = "ball_tracking";

pub const BALL_RADIUS: i32 = 8;

/// Sink for annotated frames.
pub trait Annotator {
    fn annotate(
        &mut self,
        frame: &Frame,
        ball: Option<na::Point2<f32>>,
        roi: Option<&Region>,
    ) -> Result<(), Error>;

    /// Flushes the output and returns where it was written.
    fn finish(&mut self) -> Result<PathBuf, Error>;
}

impl<A: Annotator + ?Sized> Annotator for Box<A> {
    #[inline]
    fn annotate(
        &mut self,
        frame: &Frame,
        ball: Option<na::Point2<f32>>,
        roi: Option<&Region>,
    ) -> Result<(), Error> {
        (**self).annotate(frame, ball, roi)
    }

    #[inline]
    fn finish(&mut self) -> Result<PathBuf, Error> {
        (**self).finish()
    }
}

/// Replays `source` through `annotator`, marking the positions of `recovery`
/// on the frames they were found in.
pub fn replay(
    source: &mut dyn FrameSource,
    recovery: &Recovery,
    annotator: &mut dyn Annotator,
) -> Result<PathBuf, Error> {
    let mut positions = recovery.track.valid().peekable();
    let mut frames = 0;

    while let Some(frame) = source.next_frame()? {
        while positions.next_if(|(i, _)| *i < frame.index).is_some() {}
        let ball = positions
            .next_if(|(i, _)| *i == frame.index)
            .map(|(_, pt)| pt);

        annotator.annotate(&frame, ball, recovery.roi.as_ref())?;
        frames += 1;
    }

    if frames == 0 {
        return Err(Error::SourceError("nothing to annotate, video has no frames".into()));
    }

    let path = annotator.finish()?;
    log::info!("annotated {} frames into {}", frames, path.display());

    Ok(path)
}

/// Annotator the build supports, writing under `out_dir`.
#[cfg(feature = "opencv")]
pub fn annotator(out_dir: &Path, video: VideoInfo) -> Box<dyn Annotator> {
    Box::new(VideoAnnotator::new(out_dir.join(ANNOTATED_VIDEO_FILE), video.fps))
}

#[cfg(not(feature = "opencv"))]
pub fn annotator(out_dir: &Path, _video: VideoInfo) -> Box<dyn Annotator> {
    Box::new(FrameDirAnnotator::new(out_dir.join(ANNOTATED_FRAMES_DIR)))
}

mod frames {
    use std::path::{Path, PathBuf};

    use image::{Rgb, RgbImage};
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;
    use nalgebra as na;

    use super::{Annotator, BALL_RADIUS};
    use crate::error::Error;
    use crate::frame::Frame;
    use crate::region::Region;

    const BALL: Rgb<u8> = Rgb([255, 0, 0]);
    const ROI: Rgb<u8> = Rgb([0, 255, 0]);

    /// Writes one PNG per annotated frame into a directory.
    #[derive(Debug, Clone)]
    pub struct FrameDirAnnotator {
        dir: PathBuf,
        written: usize,
    }

    impl FrameDirAnnotator {
        pub fn new<P: AsRef<Path>>(dir: P) -> Self {
            Self {
                dir: dir.as_ref().to_path_buf(),
                written: 0,
            }
        }

        pub fn frame_path(&self, index: usize) -> PathBuf {
            self.dir.join(format!("frame_{:06}.png", index))
        }
    }

    impl Annotator for FrameDirAnnotator {
        fn annotate(
            &mut self,
            frame: &Frame,
            ball: Option<na::Point2<f32>>,
            roi: Option<&Region>,
        ) -> Result<(), Error> {
            if self.written == 0 {
                std::fs::create_dir_all(&self.dir)?;
            }

            let data = frame.image.iter().copied().collect();
            let mut img = RgbImage::from_raw(frame.width(), frame.height(), data)
                .ok_or_else(|| Error::RenderError(format!("frame {}: bad buffer", frame.index)))?;

            if let Some(roi) = roi {
                if roi.width() > 0 && roi.height() > 0 {
                    let rect = Rect::at(roi.x1 as i32, roi.y1 as i32).of_size(roi.width(), roi.height());
                    draw_hollow_rect_mut(&mut img, rect, ROI);
                }
            }

            if let Some(pt) = ball {
                let center = (pt.x.round() as i32, pt.y.round() as i32);
                draw_filled_circle_mut(&mut img, center, BALL_RADIUS, BALL);
            }

            let path = self.frame_path(frame.index);
            img.save(&path)
                .map_err(|e| Error::RenderError(format!("{}: {}", path.display(), e)))?;
            self.written += 1;

            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, Error> {
            log::debug!("{} annotated frames in {}", self.written, self.dir.display());
            Ok(self.dir.clone())
        }
    }
}

pub use frames::FrameDirAnnotator;

#[cfg(feature = "opencv")]
mod video {
    use std::path::PathBuf;

    use nalgebra as na;
    use opencv::{core, imgproc, prelude::*, videoio};

    use super::{Annotator, BALL_RADIUS};
    use crate::error::Error;
    use crate::frame::Frame;
    use crate::region::Region;

    /// Encodes annotated frames into an mp4 file, sized after the first frame.
    pub struct VideoAnnotator {
        path: PathBuf,
        fps: f64,
        writer: Option<videoio::VideoWriter>,
    }

    impl VideoAnnotator {
        pub fn new(path: PathBuf, fps: f64) -> Self {
            Self {
                path,
                fps,
                writer: None,
            }
        }

        fn writer(&mut self, size: core::Size) -> Result<&mut videoio::VideoWriter, Error> {
            if self.writer.is_none() {
                let path = self
                    .path
                    .to_str()
                    .ok_or_else(|| Error::RenderError(format!("{}: path is not valid UTF-8", self.path.display())))?;

                let writer = videoio::VideoWriter::new(
                    path,
                    videoio::VideoWriter::fourcc(b'm' as _, b'p' as _, b'4' as _, b'v' as _)?,
                    self.fps,
                    size,
                    true,
                )?;

                if !writer.is_opened()? {
                    return Err(Error::RenderError(format!("{}: unable to open writer", path)));
                }

                self.writer = Some(writer);
            }

            self.writer
                .as_mut()
                .ok_or_else(|| Error::RenderError("video writer is closed".into()))
        }
    }

    impl Annotator for VideoAnnotator {
        fn annotate(
            &mut self,
            frame: &Frame,
            ball: Option<na::Point2<f32>>,
            roi: Option<&Region>,
        ) -> Result<(), Error> {
            let (rows, cols) = (frame.height() as i32, frame.width() as i32);
            let flat = core::Mat::from_slice(
                frame
                    .image
                    .as_slice()
                    .ok_or_else(|| Error::RenderError("frame is not contiguous".into()))?,
            )?;
            let rgb = flat.reshape(3, rows)?;

            let mut bgr = core::Mat::default();
            imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;

            if let Some(roi) = roi {
                let rect = core::Rect::new(
                    roi.x1 as i32,
                    roi.y1 as i32,
                    roi.width() as i32,
                    roi.height() as i32,
                );
                imgproc::rectangle(
                    &mut bgr,
                    rect,
                    core::Scalar::new(0.0, 255.0, 0.0, 0.0),
                    2,
                    imgproc::LINE_8,
                    0,
                )?;
            }

            if let Some(pt) = ball {
                imgproc::circle(
                    &mut bgr,
                    core::Point::new(pt.x.round() as i32, pt.y.round() as i32),
                    BALL_RADIUS,
                    core::Scalar::new(0.0, 0.0, 255.0, 0.0),
                    imgproc::FILLED,
                    imgproc::LINE_8,
                    0,
                )?;
            }

            self.writer(core::Size::new(cols, rows))?.write(&bgr)?;

            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, Error> {
            if let Some(mut writer) = self.writer.take() {
                writer.release()?;
            }

            Ok(self.path.clone())
        }
    }
}

#[cfg(feature = "opencv")]
pub use video::VideoAnnotator;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::track::{FramePosition, Track};

    fn frames(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame::from_rgb(i, 40, 30, vec![0; 40 * 30 * 3]).unwrap())
            .collect()
    }

    #[derive(Default)]
    struct Recording {
        marks: Vec<(usize, Option<(f32, f32)>, bool)>,
        finished: bool,
    }

    impl Annotator for Recording {
        fn annotate(
            &mut self,
            frame: &Frame,
            ball: Option<na::Point2<f32>>,
            roi: Option<&Region>,
        ) -> Result<(), Error> {
            self.marks
                .push((frame.index, ball.map(|p| (p.x, p.y)), roi.is_some()));
            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, Error> {
            self.finished = true;
            Ok(PathBuf::from("recorded"))
        }
    }

    #[test]
    fn marks_only_frames_with_a_position() {
        let track = Track::from_positions(vec![
            FramePosition::at(0, 5.0, 6.0),
            FramePosition::gap(1),
            FramePosition::at(2, 7.0, 8.0),
        ])
        .unwrap();
        let recovery = Recovery {
            track,
            roi: Some(Region::new(2, 2, 20, 20).unwrap()),
        };

        let mut source = MemorySource::new(frames(4), 25.0).unwrap();
        let mut rec = Recording::default();
        let path = replay(&mut source, &recovery, &mut rec).unwrap();

        assert_eq!(path, PathBuf::from("recorded"));
        assert!(rec.finished);
        assert_eq!(
            rec.marks,
            vec![
                (0, Some((5.0, 6.0)), true),
                (1, None, true),
                (2, Some((7.0, 8.0)), true),
                (3, None, true),
            ]
        );
    }

    #[test]
    fn frame_dir_marks_the_ball() {
        let dir = tempfile::tempdir().unwrap();
        let track = Track::from_positions(vec![FramePosition::gap(0), FramePosition::at(1, 20.0, 15.0)]).unwrap();
        let recovery = Recovery {
            track,
            roi: Some(Region::new(1, 1, 39, 29).unwrap()),
        };

        let mut source = MemorySource::new(frames(2), 25.0).unwrap();
        let mut annotator = FrameDirAnnotator::new(dir.path().join(ANNOTATED_FRAMES_DIR));
        let out = replay(&mut source, &recovery, &mut annotator).unwrap();
        assert_eq!(out, dir.path().join(ANNOTATED_FRAMES_DIR));

        let first = image::open(annotator.frame_path(0)).unwrap().to_rgb8();
        let second = image::open(annotator.frame_path(1)).unwrap().to_rgb8();
        assert_eq!(first.get_pixel(20, 15).0, [0, 0, 0]);
        assert_eq!(second.get_pixel(20, 15).0, [255, 0, 0]);
        assert_eq!(second.get_pixel(1, 10).0, [0, 255, 0]);
    }

    #[test]
    fn empty_replay_is_a_source_error() {
        struct Empty;

        impl FrameSource for Empty {
            fn info(&self) -> VideoInfo {
                VideoInfo {
                    width: 40,
                    height: 30,
                    fps: 25.0,
                }
            }

            fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
                Ok(None)
            }
        }

        let recovery = Recovery {
            track: Track::new(),
            roi: None,
        };
        let mut rec = Recording::default();
        assert!(matches!(
            replay(&mut Empty, &recovery, &mut rec),
            Err(Error::SourceError(_))
        ));
        assert!(!rec.finished);
    }
}
