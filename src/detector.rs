use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use ndarray::prelude::*;

use crate::detection::Detection;
use crate::error::Error;
use crate::frame::Frame;

/// Object detection capability: boxes, class and confidence for one image.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    #[inline]
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        (**self).detect(frame)
    }
}

/// Detector that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetector;

impl Detector for NoDetector {
    #[inline]
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Error> {
        Ok(Vec::new())
    }
}

/// Replays detections computed ahead of time.
///
/// The file holds one line per frame, `<frame_index>: <json array of detections>`.
/// Frames with no line have no detections.
#[derive(Debug, Default, Clone)]
pub struct DetectionsFile {
    frames: BTreeMap<usize, Vec<Detection>>,
}

impl DetectionsFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::DetectionError(format!("{}: {}", path.display(), e)))?;

        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut frames = BTreeMap::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let idx = line.find(':').ok_or_else(|| {
                Error::DetectionError(format!("line {}: expected `:`", line_no + 1))
            })?;

            let (frame, vector) = line.split_at(idx);
            let frame: usize = frame.trim().parse().map_err(|_| {
                Error::DetectionError(format!("line {}: bad frame index", line_no + 1))
            })?;

            let dets: Vec<Detection> = serde_json::from_str(&vector[1..])?;
            frames.insert(frame, dets);
        }

        Ok(Self { frames })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for DetectionsFile {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
    pub num_classes: usize,
    pub classes: Vec<i32>,
}

impl YoloDetectorConfig {
    pub fn new(confidence_threshold: f32, input_size: u32, classes: Vec<i32>) -> Self {
        Self {
            confidence_threshold,
            nms_threshold: 0.45,
            input_size,
            num_classes: 80,
            classes,
        }
    }
}

/// Decodes raw YOLOv8 output of shape `[batch, 4 + classes, predictions]`.
///
/// Box coordinates are center-size in model input pixels; they are scaled back to
/// a `frame_width`x`frame_height` frame. Only the first batch entry is used.
pub fn decode_predictions(
    view: ArrayView3<'_, f32>,
    config: &YoloDetectorConfig,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    let shape = view.shape();
    if shape[0] == 0 || shape[1] <= 4 {
        return Vec::new();
    }

    let preds = view.index_axis(Axis(0), 0);
    let nclasses = shape[1] - 4;
    let sx = frame_width as f32 / config.input_size as f32;
    let sy = frame_height as f32 / config.input_size as f32;

    // The bounding boxes grouped by class index.
    let mut bboxes: BTreeMap<i32, Vec<Detection>> = BTreeMap::new();

    for index in 0..shape[2] {
        let mut class_index = -1;
        let mut confidence = 0.0;

        for c in 0..nclasses {
            let val = preds[[4 + c, index]];
            if val > confidence {
                class_index = c as i32;
                confidence = val;
            }
        }

        if class_index < 0 || confidence <= config.confidence_threshold {
            continue;
        }

        if !config.classes.is_empty() && !config.classes.contains(&class_index) {
            continue;
        }

        bboxes.entry(class_index).or_default().push(Detection::new(
            preds[[0, index]] * sx,
            preds[[1, index]] * sy,
            preds[[2, index]] * sx,
            preds[[3, index]] * sy,
            confidence,
            class_index,
        ));
    }

    let mut results = Vec::new();
    for (_, mut dets) in bboxes {
        non_maximum_suppression(&mut dets, config.nms_threshold);
        results.append(&mut dets);
    }

    results
}

/// Keeps the most confident box of every group overlapping by more than `iou_threshold`.
pub fn non_maximum_suppression(dets: &mut Vec<Detection>, iou_threshold: f32) {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = vec![true; dets.len()];
    for idx in 0..dets.len() {
        if !keep[idx] {
            continue;
        }

        for other in idx + 1..dets.len() {
            if keep[other] && dets[idx].iou(&dets[other]) > iou_threshold {
                keep[other] = false;
            }
        }
    }

    let mut flags = keep.into_iter();
    dets.retain(|_| flags.next().unwrap_or(false));
}

#[cfg(feature = "opencv")]
pub use self::yolo::YoloDetector;

#[cfg(feature = "opencv")]
mod yolo {
    use ndarray::prelude::*;
    use opencv::{core, dnn, imgproc, prelude::*};

    use super::{decode_predictions, Detector, YoloDetectorConfig};
    use crate::detection::Detection;
    use crate::error::Error;
    use crate::frame::Frame;

    /// YOLOv8 ONNX model run through the OpenCV DNN module.
    pub struct YoloDetector {
        net: dnn::Net,
        config: YoloDetectorConfig,
    }

    impl YoloDetector {
        pub fn new(model_src: &str, config: YoloDetectorConfig) -> Result<Self, Error> {
            let net = dnn::read_net_from_onnx(model_src)
                .map_err(|e| Error::DetectionError(format!("{}: {}", model_src, e)))?;

            Ok(Self { net, config })
        }

        fn forward(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
            let (rows, cols) = (frame.height() as i32, frame.width() as i32);
            let flat = core::Mat::from_slice(
                frame
                    .image
                    .as_slice()
                    .ok_or_else(|| Error::DetectionError("frame is not contiguous".into()))?,
            )?;
            let rgb = flat.reshape(3, rows)?;

            let mut bgr = core::Mat::default();
            imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;

            let size = self.config.input_size as i32;
            let blob = dnn::blob_from_image(
                &bgr,
                1.0 / 255.0,
                core::Size::new(size, size),
                core::Scalar::new(0., 0., 0., 0.),
                true,
                false,
                core::CV_32F,
            )?;

            self.net
                .set_input(&blob, "", 1.0, core::Scalar::default())?;
            let out = self.net.forward_single("")?;

            let data = out.data_typed::<f32>()?;
            let channels = 4 + self.config.num_classes;
            let preds = data.len() / channels;
            let view = ArrayView3::from_shape((1, channels, preds), data)
                .map_err(|e| Error::DetectionError(e.to_string()))?;

            Ok(decode_predictions(
                view,
                &self.config,
                cols as u32,
                rows as u32,
            ))
        }
    }

    impl Detector for YoloDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
            self.forward(frame)
                .map_err(|e| Error::DetectionError(format!("frame {}: {}", frame.index, e)))
        }
    }
}
