//! Task capabilities for detected regions.
//!
//! Each task owns one label family and publishes to the output channel that
//! carries its name. Tasks whose models cannot be loaded are replaced by a
//! `DisabledTask`, so unrelated channels keep working.

mod backend;
pub mod classification;
pub mod ctc;
mod disabled;
pub mod ocr;
pub mod prototypes;
mod registry;

pub use backend::{OutputStyle, TaskBackend, TaskOutcome};
pub use classification::{build_classification_task, Embedder, PrototypeClassifier};
pub use disabled::DisabledTask;
pub use ocr::{build_ocr_task, SequenceModel, TextRecognizer};
pub use registry::{Resolution, TaskRegistry};

use anyhow::Result;

use crate::config::PipelineConfig;

/// Build the registry from configuration: the built-in tasks, a disabled
/// task for every other routed channel, then routes and the default.
pub fn build_registry(config: &PipelineConfig) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register(build_classification_task(&config.classification));
    registry.register(build_ocr_task(&config.ocr));

    let mut targets: Vec<&str> = config
        .routing
        .routes
        .iter()
        .map(|(_, task)| task.as_str())
        .collect();
    targets.push(config.routing.default_task.as_str());
    for target in targets {
        if registry.get_mut(target).is_none() {
            registry.register(Box::new(DisabledTask::new(
                target,
                "no task implementation for this channel",
            )));
        }
    }

    for (label, task) in &config.routing.routes {
        registry.route(label, task)?;
    }
    registry.set_default(&config.routing.default_task)?;
    log::info!(
        "TaskRegistry: tasks {:?}, default '{}'",
        registry.list(),
        config.routing.default_task
    );
    Ok(registry)
}
