use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Called synchronously from the router thread, one frame at a time;
/// implementations need not be safe for concurrent use.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// `Ok(None)` means the backend produced no usable result for this frame;
    /// the router skips it. An empty region list is a valid result.
    fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
