use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Xywh};

/// COCO class id of "person".
pub const PERSON_CLASS: i32 = 0;

/// COCO class id of "sports ball".
pub const BALL_CLASS: i32 = 32;

/// Contains (x,y) of the center and (width,height) of bbox
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(x: f32, y: f32, w: f32, h: f32, confidence: f32, class: i32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            confidence,
            class,
            track_id: None,
        }
    }

    /// Builds a detection from corner coordinates, as detectors usually report them.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class: i32) -> Self {
        let b = BBox::ltrb(x1, y1, x2, y2).as_xywh();

        Self::new(b.cx(), b.cy(), b.width(), b.height(), confidence, class)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let a = self.ltrb();
        let b = other.ltrb();
        let inter = a.intersection_area(&b);
        let union = a.area() + b.area() - inter;

        if union <= f32::EPSILON {
            0.0
        } else {
            inter / union
        }
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Xywh> {
        BBox::xywh(self.x, self.y, self.w, self.h)
    }

    #[inline(always)]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox().as_ltrb()
    }
}
