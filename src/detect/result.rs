use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::labels::label_for;

/// Axis-aligned box in pixel coordinates of the frame it was detected in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union; 0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        )
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detector output: class, label, confidence and box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Build a detection whose label is resolved from the COCO label set.
    pub fn from_class(class_id: usize, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        let label = label_for(class_id)
            .ok_or_else(|| anyhow!("class index {} is outside the label set", class_id))?;
        Ok(Self {
            class_id,
            label: label.to_string(),
            confidence,
            bbox,
        })
    }
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
#[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
pub(crate) fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|kept| kept.class_id == det.class_id && kept.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}
