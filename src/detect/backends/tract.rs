#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::label_for;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Frames are stretched to the square model input; boxes are scaled back to
/// frame pixels. Output layout is `[1, 4 + classes, anchors]` with rows
/// `cx, cy, w, h` followed by per-class scores.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence floor and NMS overlap threshold.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.as_image(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode_output(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;
        let (_, rows, anchors) = view.dim();
        if rows <= 4 {
            return Err(anyhow!("model output has {} rows, expected more than 4", rows));
        }

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, anchor]];
            let cy = view[[0, 1, anchor]];
            let w = view[[0, 2, anchor]];
            let h = view[[0, 3, anchor]];
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
                ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
                ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
                ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
            );
            let Some(label) = label_for(class_id) else {
                log::debug!("tract: class {} is outside the label set, skipped", class_id);
                continue;
            };
            candidates.push(Detection {
                class_id,
                label: label.to_string(),
                confidence: score.min(1.0),
                bbox,
            });
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode_output(outputs, frame)?;
        log::debug!(
            "tract: frame {} produced {} detections",
            frame.index,
            detections.len()
        );
        Ok(DetectionResult::new(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = Frame::from_rgb(vec![0u8; side * side * 3], self.input_size, self.input_size, 0)?;
        self.detect(&blank).map(|_| ())
    }
}
