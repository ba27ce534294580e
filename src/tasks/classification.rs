//! Few-shot classification task.
//!
//! Each subdirectory of `dataset_root` is a class. Up to `shots` images per
//! class are embedded and averaged into a prototype; a crop is assigned to
//! the nearest prototype.

use std::path::Path;

use anyhow::{Context, Result};

use super::backend::{TaskBackend, TaskOutcome};
use super::disabled::DisabledTask;
use super::prototypes::{mean_embedding, nearest_prototype};
use crate::config::ClassificationSettings;
use crate::frame::Frame;

pub const CLASSIFICATION_TASK: &str = "classification";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Maps an image to a feature vector.
pub trait Embedder: Send {
    fn embed(&mut self, image: &Frame) -> Result<Vec<f32>>;
}

pub struct PrototypeClassifier<E: Embedder> {
    embedder: E,
    prototypes: Vec<(String, Vec<f32>)>,
}

impl<E: Embedder> PrototypeClassifier<E> {
    pub fn new(embedder: E, prototypes: Vec<(String, Vec<f32>)>) -> Self {
        Self {
            embedder,
            prototypes,
        }
    }

    /// Build prototypes from a class-per-directory dataset. Classes without
    /// a single readable image are skipped.
    pub fn from_dataset(mut embedder: E, dataset_root: &Path, shots: usize) -> Result<Self> {
        let mut class_dirs: Vec<_> = std::fs::read_dir(dataset_root)
            .with_context(|| format!("read dataset root {}", dataset_root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        class_dirs.sort();

        let mut prototypes = Vec::new();
        for class_dir in class_dirs {
            let Some(class_name) = class_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mut files: Vec<_> = std::fs::read_dir(&class_dir)
                .with_context(|| format!("read class directory {}", class_dir.display()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| has_image_extension(path))
                .collect();
            files.sort();
            files.truncate(shots);

            let mut embeddings = Vec::new();
            for file in &files {
                let image = match image::open(file) {
                    Ok(image) => Frame::new(image.into_rgb8()),
                    Err(e) => {
                        log::debug!(
                            "PrototypeClassifier: could not load {}: {}",
                            file.display(),
                            e
                        );
                        continue;
                    }
                };
                embeddings.push(embedder.embed(&image)?);
            }

            match mean_embedding(&embeddings) {
                Some(prototype) => {
                    log::info!(
                        "PrototypeClassifier: prototype for '{}' from {} images",
                        class_name,
                        embeddings.len()
                    );
                    prototypes.push((class_name.to_string(), prototype));
                }
                None => log::debug!("PrototypeClassifier: no usable images for '{}'", class_name),
            }
        }

        log::info!(
            "PrototypeClassifier: {} prototypes ready",
            prototypes.len()
        );
        Ok(Self::new(embedder, prototypes))
    }

    pub fn classes(&self) -> Vec<&str> {
        self.prototypes.iter().map(|(name, _)| name.as_str()).collect()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl<E: Embedder> TaskBackend for PrototypeClassifier<E> {
    fn name(&self) -> &str {
        CLASSIFICATION_TASK
    }

    fn execute(&mut self, crop: &Frame) -> Result<TaskOutcome> {
        if crop.is_empty() || self.prototypes.is_empty() {
            return Ok(TaskOutcome::absent());
        }
        let query = self.embedder.embed(crop)?;
        Ok(match nearest_prototype(&query, &self.prototypes) {
            Some((class, confidence)) => TaskOutcome::new(class, confidence),
            None => TaskOutcome::absent(),
        })
    }

    fn caption(&self, outcome: &TaskOutcome) -> String {
        match &outcome.value {
            Some(class) => format!("{} {:.1}%", class, outcome.confidence),
            None => "unknown".to_string(),
        }
    }
}

/// Build the classification task, falling back to a disabled task when the
/// backbone or dataset is unavailable.
pub fn build_classification_task(settings: &ClassificationSettings) -> Box<dyn TaskBackend> {
    let Some(model_path) = settings.model_path.as_deref() else {
        return Box::new(DisabledTask::new(
            CLASSIFICATION_TASK,
            "classification.model_path not configured",
        ));
    };
    if !model_path.exists() {
        return Box::new(DisabledTask::new(
            CLASSIFICATION_TASK,
            format!("model weights not found at {}", model_path.display()),
        ));
    }
    let Some(dataset_root) = settings.dataset_root.as_deref() else {
        return Box::new(DisabledTask::new(
            CLASSIFICATION_TASK,
            "classification.dataset_root not configured",
        ));
    };
    if !dataset_root.is_dir() {
        return Box::new(DisabledTask::new(
            CLASSIFICATION_TASK,
            format!("dataset root not found: {}", dataset_root.display()),
        ));
    }

    #[cfg(feature = "backend-tract")]
    {
        let built = tract_embedder::OnnxEmbedder::load(model_path, settings.img_size)
            .and_then(|embedder| {
                PrototypeClassifier::from_dataset(embedder, dataset_root, settings.shots)
            });
        match built {
            Ok(classifier) => Box::new(classifier),
            Err(e) => Box::new(DisabledTask::new(CLASSIFICATION_TASK, format!("{:#}", e))),
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Box::new(DisabledTask::new(
            CLASSIFICATION_TASK,
            "classification inference requires the backend-tract feature",
        ))
    }
}

#[cfg(feature = "backend-tract")]
mod tract_embedder {
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use image::imageops::{self, FilterType};
    use tract_onnx::prelude::*;

    use super::Embedder;
    use crate::frame::Frame;

    pub struct OnnxEmbedder {
        model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
        size: u32,
    }

    impl OnnxEmbedder {
        pub fn load(path: &Path, size: u32) -> Result<Self> {
            let side = size as usize;
            let model = tract_onnx::onnx()
                .model_for_path(path)
                .with_context(|| format!("failed to load backbone from {}", path.display()))?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
                )
                .context("failed to set backbone input fact")?
                .into_optimized()
                .context("failed to optimize backbone")?
                .into_runnable()
                .context("failed to build runnable backbone")?;
            log::info!("PrototypeClassifier: loaded backbone {}", path.display());
            Ok(Self { model, size })
        }
    }

    impl Embedder for OnnxEmbedder {
        fn embed(&mut self, image: &Frame) -> Result<Vec<f32>> {
            let resized = imageops::resize(image.image(), self.size, self.size, FilterType::Triangle);
            let side = self.size as usize;
            let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
                resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
            });
            let outputs = self
                .model
                .run(tvec!(input.into_tensor().into()))
                .context("backbone inference failed")?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow!("backbone produced no outputs"))?;
            let view = output
                .to_array_view::<f32>()
                .context("backbone output tensor was not f32")?;
            Ok(view.iter().copied().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Mean colour as a 3-d embedding.
    struct MeanColour;

    impl Embedder for MeanColour {
        fn embed(&mut self, image: &Frame) -> Result<Vec<f32>> {
            let mut sum = [0.0f32; 3];
            for pixel in image.image().pixels() {
                for c in 0..3 {
                    sum[c] += pixel.0[c] as f32;
                }
            }
            let n = (image.width() * image.height()) as f32;
            Ok(sum.iter().map(|s| s / n / 255.0).collect())
        }
    }

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn builds_prototypes_per_class_directory() {
        let dir = tempfile::tempdir().unwrap();
        let red = dir.path().join("red-valve");
        let blue = dir.path().join("blue-valve");
        let empty = dir.path().join("empty");
        for d in [&red, &blue, &empty] {
            std::fs::create_dir(d).unwrap();
        }
        write_image(&red.join("a.png"), [250, 0, 0]);
        write_image(&red.join("b.png"), [230, 10, 0]);
        write_image(&red.join("c.png"), [0, 0, 0]);
        write_image(&blue.join("a.png"), [0, 0, 240]);
        std::fs::write(blue.join("notes.txt"), "ignored").unwrap();

        let mut classifier = PrototypeClassifier::from_dataset(MeanColour, dir.path(), 2).unwrap();
        assert_eq!(classifier.classes(), vec!["blue-valve", "red-valve"]);

        let outcome = classifier.execute(&Frame::solid(4, 4, [240, 5, 0])).unwrap();
        assert_eq!(outcome.value.as_deref(), Some("red-valve"));
        assert!(outcome.confidence > 50.0 && outcome.confidence <= 100.0);
        assert!(classifier.caption(&outcome).ends_with('%'));
    }

    #[test]
    fn no_prototypes_is_absent() {
        let mut classifier = PrototypeClassifier::new(MeanColour, Vec::new());
        assert!(classifier.execute(&Frame::solid(2, 2, [1, 1, 1])).unwrap().is_absent());
    }

    #[test]
    fn missing_weights_disable_task() {
        let settings = ClassificationSettings {
            model_path: Some("/nonexistent/backbone.onnx".into()),
            dataset_root: None,
            img_size: 112,
            shots: 20,
        };
        let task = build_classification_task(&settings);
        assert_eq!(task.name(), CLASSIFICATION_TASK);
    }
}
