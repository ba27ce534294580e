use std::sync::Arc;

use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::DetectionResult;
use crate::frame::{BoundingBox, Frame, Region};
use crate::render::{draw_regions, TextRenderer};

/// Stub backend for demos and tests.
///
/// Reports one region covering the central quarter of every frame under a
/// fixed label, so the whole routing path can run without a model.
pub struct StubDetector {
    label: String,
    renderer: Arc<TextRenderer>,
}

impl StubDetector {
    pub fn new(label: impl Into<String>, renderer: Arc<TextRenderer>) -> Self {
        Self {
            label: label.into(),
            renderer,
        }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>> {
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let bbox = BoundingBox::new(w / 4, h / 4, w * 3 / 4, h * 3 / 4);
        if bbox.area() == 0 {
            return Ok(Some(DetectionResult::empty(frame.clone())));
        }
        let regions = vec![Region::new(self.label.clone(), bbox, 0.9)];
        let annotated = draw_regions(frame, &regions, &self.renderer);
        Ok(Some(DetectionResult::new(regions, annotated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reports_central_region() {
        let mut detector = StubDetector::new("digital-gauge", Arc::new(TextRenderer::disabled()));
        let frame = Frame::solid(100, 80, [0, 0, 0]);
        let result = detector.detect(&frame).unwrap().unwrap();
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].label, "digital-gauge");
        assert_eq!(result.regions[0].bbox, BoundingBox::new(25, 20, 75, 60));
        assert_eq!(result.annotated.width(), 100);
    }

    #[test]
    fn stub_on_tiny_frame_is_empty() {
        let mut detector = StubDetector::new("x", Arc::new(TextRenderer::disabled()));
        let result = detector.detect(&Frame::solid(1, 1, [0, 0, 0])).unwrap().unwrap();
        assert!(result.is_empty());
    }
}
