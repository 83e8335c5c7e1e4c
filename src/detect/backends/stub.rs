use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

/// Scripted backend for tests and model-less demo runs.
///
/// Each `detect` call returns the next entry of the script, wrapping around.
/// With an empty script every frame yields no detections.
#[derive(Default)]
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Same detections for every frame.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::with_script(vec![detections])
    }

    pub fn calls(&self) -> usize {
        self.cursor
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        let detections = if self.script.is_empty() {
            Vec::new()
        } else {
            self.script[self.cursor % self.script.len()].clone()
        };
        self.cursor += 1;
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn stub_backend_cycles_script() {
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        let cow = Detection::from_class(19, 0.9, BoundingBox::new(0.0, 0.0, 2.0, 2.0)).unwrap();
        let mut backend = StubBackend::with_script(vec![vec![cow], vec![]]);

        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn empty_stub_detects_nothing() {
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        let mut backend = StubBackend::new();
        assert!(backend.detect(&frame).unwrap().is_empty());
    }
}
