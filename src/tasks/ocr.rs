//! Text recognition task.
//!
//! The model directory holds `config.json` (`vocab`, `INPUT_SIZE` as
//! `[height, width]`) and `model.onnx`, a CTC recognizer producing per-step
//! logits over `vocab` plus a trailing blank.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::backend::{OutputStyle, TaskBackend, TaskOutcome};
use super::ctc::greedy_decode;
use super::disabled::DisabledTask;
use crate::config::OcrSettings;
use crate::frame::Frame;

pub const OCR_TASK: &str = "ocr";
const MODEL_FILE: &str = "model.onnx";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Deserialize)]
pub struct OcrModelConfig {
    pub vocab: String,
    #[serde(rename = "INPUT_SIZE", default = "default_input_size")]
    pub input_size: [u32; 2],
}

fn default_input_size() -> [u32; 2] {
    [32, 128]
}

impl OcrModelConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw).context("parse OCR model config")?;
        if cfg.vocab.is_empty() {
            return Err(anyhow!("OCR model config has an empty vocab"));
        }
        if cfg.input_size.contains(&0) {
            return Err(anyhow!("OCR model INPUT_SIZE must be non-zero"));
        }
        Ok(cfg)
    }

    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read OCR model config {}", path.display()))?;
        Self::parse(&raw)
    }
}

/// Produces per-step logits for a crop.
pub trait SequenceModel: Send {
    fn logits(&mut self, crop: &Frame) -> Result<Vec<Vec<f32>>>;
}

/// CTC text recognizer, presented on a result canvas.
pub struct TextRecognizer<M: SequenceModel> {
    model: M,
    vocab: Vec<char>,
    confidence_threshold: f32,
}

impl<M: SequenceModel> TextRecognizer<M> {
    pub fn new(model: M, vocab: &str, confidence_threshold: f32) -> Self {
        Self {
            model,
            vocab: vocab.chars().collect(),
            confidence_threshold,
        }
    }
}

impl<M: SequenceModel> TaskBackend for TextRecognizer<M> {
    fn name(&self) -> &str {
        OCR_TASK
    }

    fn execute(&mut self, crop: &Frame) -> Result<TaskOutcome> {
        if crop.is_empty() {
            return Ok(TaskOutcome::absent());
        }
        let logits = self.model.logits(crop)?;
        let Some(decoded) = greedy_decode(&logits, &self.vocab) else {
            return Ok(TaskOutcome::absent());
        };
        if decoded.text.is_empty() {
            return Ok(TaskOutcome::absent());
        }
        Ok(TaskOutcome::new(decoded.text, decoded.confidence).flag_below(self.confidence_threshold))
    }

    fn output_style(&self) -> OutputStyle {
        OutputStyle::Canvas
    }
}

/// Build the OCR task, falling back to a disabled task when the model is
/// unavailable.
pub fn build_ocr_task(settings: &OcrSettings) -> Box<dyn TaskBackend> {
    let Some(model_dir) = settings.model_dir.as_deref() else {
        return Box::new(DisabledTask::new(OCR_TASK, "ocr.model_dir not configured"));
    };
    let config = match OcrModelConfig::load(model_dir) {
        Ok(config) => config,
        Err(e) => return Box::new(DisabledTask::new(OCR_TASK, format!("{:#}", e))),
    };
    let model_path = model_dir.join(MODEL_FILE);
    if !model_path.exists() {
        return Box::new(DisabledTask::new(
            OCR_TASK,
            format!("model weights missing at {}", model_path.display()),
        ));
    }

    #[cfg(feature = "backend-tract")]
    {
        match tract_model::OnnxSequenceModel::load(&model_path, config.input_size) {
            Ok(model) => {
                log::info!(
                    "TextRecognizer: loaded {} (vocab {} chars, input {}x{})",
                    model_path.display(),
                    config.vocab.chars().count(),
                    config.input_size[0],
                    config.input_size[1]
                );
                Box::new(TextRecognizer::new(
                    model,
                    &config.vocab,
                    settings.confidence_threshold,
                ))
            }
            Err(e) => Box::new(DisabledTask::new(OCR_TASK, format!("{:#}", e))),
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = config;
        Box::new(DisabledTask::new(
            OCR_TASK,
            "OCR inference requires the backend-tract feature",
        ))
    }
}

#[cfg(feature = "backend-tract")]
mod tract_model {
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use image::imageops::{self, FilterType};
    use tract_onnx::prelude::*;

    use super::SequenceModel;
    use crate::frame::Frame;

    pub struct OnnxSequenceModel {
        model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
        height: u32,
        width: u32,
    }

    impl OnnxSequenceModel {
        pub fn load(path: &Path, input_size: [u32; 2]) -> Result<Self> {
            let [height, width] = input_size;
            let model = tract_onnx::onnx()
                .model_for_path(path)
                .with_context(|| format!("failed to load OCR model from {}", path.display()))?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, height as usize, width as usize),
                    ),
                )
                .context("failed to set OCR input fact")?
                .into_optimized()
                .context("failed to optimize OCR model")?
                .into_runnable()
                .context("failed to build runnable OCR model")?;
            Ok(Self {
                model,
                height,
                width,
            })
        }
    }

    impl SequenceModel for OnnxSequenceModel {
        fn logits(&mut self, crop: &Frame) -> Result<Vec<Vec<f32>>> {
            let resized = imageops::resize(crop.image(), self.width, self.height, FilterType::Triangle);
            let input = tract_ndarray::Array4::from_shape_fn(
                (1, 3, self.height as usize, self.width as usize),
                |(_, c, y, x)| resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0,
            );
            let outputs = self
                .model
                .run(tvec!(input.into_tensor().into()))
                .context("OCR inference failed")?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow!("OCR model produced no outputs"))?;
            let view = output
                .to_array_view::<f32>()
                .context("OCR output tensor was not f32")?;
            let shape = view.shape().to_vec();
            if shape.len() != 3 || shape[0] != 1 {
                return Err(anyhow!("unexpected OCR output shape {:?}", shape));
            }
            Ok((0..shape[1])
                .map(|t| (0..shape[2]).map(|c| view[[0, t, c]]).collect())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Scripted(Vec<Vec<f32>>);

    impl SequenceModel for Scripted {
        fn logits(&mut self, _crop: &Frame) -> Result<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    fn step(index: usize, classes: usize, peak: f32) -> Vec<f32> {
        let mut logits = vec![0.0; classes];
        logits[index] = peak;
        logits
    }

    #[test]
    fn parses_model_config() {
        let cfg = OcrModelConfig::parse(r#"{"vocab": "0123456789.", "INPUT_SIZE": [32, 128], "MODEL_ARCH": "crnn"}"#)
            .unwrap();
        assert_eq!(cfg.vocab.len(), 11);
        assert_eq!(cfg.input_size, [32, 128]);
        assert!(OcrModelConfig::parse(r#"{"vocab": ""}"#).is_err());
    }

    #[test]
    fn recognizes_text_on_canvas() {
        let classes = 3;
        let model = Scripted(vec![step(0, classes, 20.0), step(2, classes, 20.0), step(1, classes, 20.0)]);
        let mut task = TextRecognizer::new(model, "42", 0.8);
        let outcome = task.execute(&Frame::solid(10, 4, [0, 0, 0])).unwrap();
        assert_eq!(outcome.value.as_deref(), Some("42"));
        assert!(!outcome.low_confidence);
        assert_eq!(task.output_style(), OutputStyle::Canvas);
    }

    #[test]
    fn weak_reading_is_flagged_not_dropped() {
        let model = Scripted(vec![vec![0.5, 0.0, 0.0]]);
        let mut task = TextRecognizer::new(model, "42", 0.8);
        let outcome = task.execute(&Frame::solid(10, 4, [0, 0, 0])).unwrap();
        assert_eq!(outcome.value.as_deref(), Some("4"));
        assert!(outcome.low_confidence);
    }

    #[test]
    fn all_blank_is_absent() {
        let model = Scripted(vec![step(2, 3, 20.0)]);
        let mut task = TextRecognizer::new(model, "42", 0.8);
        assert!(task.execute(&Frame::solid(4, 4, [0, 0, 0])).unwrap().is_absent());
    }

    #[test]
    fn missing_model_dir_disables_task() {
        let settings = OcrSettings {
            model_dir: Some(PathBuf::from("/nonexistent/ocr")),
            confidence_threshold: 0.8,
        };
        let mut task = build_ocr_task(&settings);
        assert_eq!(task.name(), OCR_TASK);
        assert!(task.execute(&Frame::solid(4, 4, [0, 0, 0])).unwrap().is_absent());
    }
}
