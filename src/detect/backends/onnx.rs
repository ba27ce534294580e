#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use super::nms::non_max_suppression;
use crate::detect::backend::Detector;
use crate::detect::result::DetectionResult;
use crate::frame::{BoundingBox, Frame, Region};
use crate::render::{draw_regions, TextRenderer};

const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 4 + classes, anchors]` output of centre/size boxes
/// followed by per-class scores, in letterboxed input coordinates.
pub struct OnnxDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
    renderer: Arc<TextRenderer>,
}

impl OnnxDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        labels: Vec<String>,
        renderer: Arc<TextRenderer>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(anyhow!(
                "detection model not found at {}",
                model_path.display()
            ));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "OnnxDetector: loaded {} ({} labels, input {}x{})",
            model_path.display(),
            labels.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            labels,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            renderer,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    /// Letterbox the frame into the model input. Returns the tensor and the
    /// scale applied to the frame.
    fn build_input(&self, frame: &Frame) -> Result<(Tensor, f32)> {
        if frame.is_empty() {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let size = self.input_size as f32;
        let ratio = (size / frame.width() as f32).min(size / frame.height() as f32);
        let w = ((frame.width() as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let h = ((frame.height() as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let scaled = imageops::resize(frame.image(), w, h, FilterType::Triangle);

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            if (x as u32) < w && (y as u32) < h {
                scaled.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
            } else {
                LETTERBOX_FILL
            }
        });
        Ok((input.into_tensor(), ratio))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32, frame: &Frame) -> Result<Vec<Region>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (rows, anchors) = (shape[1], shape[2]);

        let mut regions = Vec::new();
        for anchor in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for row in 4..rows {
                let score = view[[0, row, anchor]];
                if score > best.1 {
                    best = (row - 4, score);
                }
            }
            if best.1 < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, anchor]] / ratio;
            let cy = view[[0, 1, anchor]] / ratio;
            let w = view[[0, 2, anchor]] / ratio;
            let h = view[[0, 3, anchor]] / ratio;
            let bbox = BoundingBox::new(
                (cx - w / 2.0).round() as i32,
                (cy - h / 2.0).round() as i32,
                (cx + w / 2.0).round() as i32,
                (cy + h / 2.0).round() as i32,
            )
            .clamp(frame.width(), frame.height());
            let label = self
                .labels
                .get(best.0)
                .cloned()
                .unwrap_or_else(|| format!("class{}", best.0));
            regions.push(Region::new(label, bbox, best.1));
        }

        non_max_suppression(&mut regions, self.iou_threshold);
        Ok(regions)
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let regions = self.decode(outputs, ratio, frame)?;
        let annotated = draw_regions(frame, &regions, &self.renderer);
        Ok(Some(DetectionResult::new(regions, annotated)))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::solid(self.input_size, self.input_size, [0, 0, 0]);
        self.detect(&blank).map(|_| ())
    }
}
