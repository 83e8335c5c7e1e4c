use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The detector is an external collaborator treated as a black box: a frame
/// goes in, boxes with class labels and confidences come out, in pixel
/// coordinates of the input frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
