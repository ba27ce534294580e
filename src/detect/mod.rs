//! Detection capability.
//!
//! A detector is invoked once per inbound frame and yields labelled regions
//! plus its own annotated visualization of the frame.

mod backend;
mod backends;
mod result;

pub use backend::Detector;
#[cfg(feature = "backend-tract")]
pub use backends::OnnxDetector;
pub use backends::{non_max_suppression, StubDetector};
pub use result::DetectionResult;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{DetectionSettings, DetectorKind};
use crate::render::TextRenderer;

/// Build the configured detector. A missing model is fatal: without a
/// detector nothing can be routed.
pub fn build_detector(
    settings: &DetectionSettings,
    renderer: Arc<TextRenderer>,
) -> Result<Box<dyn Detector>> {
    match settings.backend {
        DetectorKind::Stub => {
            log::info!(
                "detect: using stub detector (label '{}')",
                settings.stub_label
            );
            Ok(Box::new(StubDetector::new(settings.stub_label.clone(), renderer)))
        }
        DetectorKind::Onnx => {
            #[cfg(feature = "backend-tract")]
            {
                use anyhow::anyhow;

                let model_path = settings
                    .model_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("detection.model_path is required for the onnx backend"))?;
                let mut detector = OnnxDetector::new(
                    model_path,
                    settings.input_size,
                    settings.labels.clone(),
                    renderer,
                )?
                .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
                detector.warm_up()?;
                Ok(Box::new(detector))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                let _ = renderer;
                anyhow::bail!("detection backend 'onnx' requires the backend-tract feature")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn default_config_builds_stub_detector() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        let detector = build_detector(&cfg.detection, Arc::new(TextRenderer::disabled())).unwrap();
        assert_eq!(detector.name(), "stub");
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn onnx_without_feature_names_it() {
        let cfg = PipelineConfig::from_toml_str(
            "[detection]\nbackend = \"onnx\"\nmodel_path = \"models/gauge.onnx\"\n",
        )
        .unwrap();
        let err = build_detector(&cfg.detection, Arc::new(TextRenderer::disabled()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("backend-tract"));
    }
}
