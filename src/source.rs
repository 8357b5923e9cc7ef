use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::frame::{Frame, VideoInfo};

/// Ordered stream of decoded frames.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next frame in presentation order, `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

/// Frames already held in memory.
pub struct MemorySource {
    info: VideoInfo,
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Result<Self, Error> {
        let first = frames
            .first()
            .ok_or_else(|| Error::SourceError("no frames supplied".into()))?;

        let info = VideoInfo {
            width: first.width(),
            height: first.height(),
            fps,
        };

        Ok(Self {
            info,
            frames: frames.into(),
        })
    }
}

impl FrameSource for MemorySource {
    #[inline]
    fn info(&self) -> VideoInfo {
        self.info
    }

    #[inline]
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.frames.pop_front())
    }
}

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Directory of still images played back in file-name order.
pub struct ImageSequence {
    info: VideoInfo,
    files: VecDeque<PathBuf>,
    next_index: usize,
}

impl ImageSequence {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::SourceError(format!("{}: {}", dir.display(), e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);

            if is_frame {
                files.push(path);
            }
        }

        files.sort();

        let first = files
            .first()
            .ok_or_else(|| Error::SourceError(format!("{}: no frames found", dir.display())))?;

        let (width, height) = image::image_dimensions(first)?;

        log::debug!("{}: {} frames of {}x{}", dir.display(), files.len(), width, height);

        Ok(Self {
            info: VideoInfo { width, height, fps },
            files: files.into(),
            next_index: 0,
        })
    }
}

impl FrameSource for ImageSequence {
    #[inline]
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let path = match self.files.pop_front() {
            Some(path) => path,
            None => return Ok(None),
        };

        let img = image::open(&path)
            .map_err(|e| Error::SourceError(format!("{}: {}", path.display(), e)))?
            .into_rgb8();

        let (width, height) = img.dimensions();
        let frame = Frame::from_rgb(self.next_index, width, height, img.into_raw())?;
        self.next_index += 1;

        Ok(Some(frame))
    }
}

#[cfg(feature = "opencv")]
pub use self::capture::VideoCaptureSource;

#[cfg(feature = "opencv")]
mod capture {
    use ndarray::Array3;
    use opencv::{core, imgproc, prelude::*, videoio};

    use super::FrameSource;
    use crate::error::Error;
    use crate::frame::{Frame, VideoInfo};

    /// Video file decoded through OpenCV.
    pub struct VideoCaptureSource {
        cap: videoio::VideoCapture,
        info: VideoInfo,
        next_index: usize,
    }

    impl VideoCaptureSource {
        pub fn open(path: &str) -> Result<Self, Error> {
            if !std::path::Path::new(path).exists() {
                return Err(Error::SourceError(format!("{}: no such file", path)));
            }

            let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
            if !videoio::VideoCapture::is_opened(&cap)? {
                return Err(Error::SourceError(format!("{}: unable to open video", path)));
            }

            let info = VideoInfo {
                width: cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32,
                height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32,
                fps: cap.get(videoio::CAP_PROP_FPS)?,
            };

            log::debug!("{}: video {}x{} @ {:.2} fps", path, info.width, info.height, info.fps);

            Ok(Self {
                cap,
                info,
                next_index: 0,
            })
        }
    }

    impl FrameSource for VideoCaptureSource {
        #[inline]
        fn info(&self) -> VideoInfo {
            self.info
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
            let mut bgr = core::Mat::default();
            if !self.cap.read(&mut bgr)? {
                return Ok(None);
            }

            let (cols, rows) = (bgr.cols(), bgr.rows());
            if cols == 0 || rows == 0 {
                return Ok(None);
            }

            let mut rgb = core::Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

            let data = rgb.data_bytes()?.to_vec();
            let image = Array3::from_shape_vec((rows as usize, cols as usize, 3), data)
                .map_err(|e| Error::SourceError(e.to_string()))?;

            let frame = Frame::new(self.next_index, image)?;
            self.next_index += 1;

            Ok(Some(frame))
        }
    }
}
