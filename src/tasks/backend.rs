use anyhow::Result;

use crate::frame::Frame;

/// How a task's result is presented on its output channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStyle {
    /// Caption drawn onto a copy of the crop.
    Overlay,
    /// Crop and caption laid out on a fixed-size canvas.
    Canvas,
}

/// Value returned by a task for one crop.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskOutcome {
    /// Recognised text or class name; `None` when the task had no answer.
    pub value: Option<String>,
    pub confidence: f32,
    /// Set when the value is reported but falls below the task's threshold.
    pub low_confidence: bool,
}

impl TaskOutcome {
    pub fn new(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: Some(value.into()),
            confidence,
            low_confidence: false,
        }
    }

    /// The `(absent, 0)` outcome.
    pub fn absent() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            low_confidence: false,
        }
    }

    pub fn flag_below(mut self, threshold: f32) -> Self {
        self.low_confidence = self.value.is_some() && self.confidence < threshold;
        self
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }
}

/// Task capability invoked by the router for one label family.
///
/// Called from the router thread only, one crop at a time.
pub trait TaskBackend: Send {
    /// Task name; also the name of the output channel it publishes to.
    fn name(&self) -> &str;

    fn execute(&mut self, crop: &Frame) -> Result<TaskOutcome>;

    fn output_style(&self) -> OutputStyle {
        OutputStyle::Overlay
    }

    /// Text rendered next to the result.
    fn caption(&self, outcome: &TaskOutcome) -> String {
        match &outcome.value {
            Some(value) if outcome.low_confidence => {
                format!("{} {:.2} (low)", value, outcome.confidence)
            }
            Some(value) => format!("{} {:.2}", value, outcome.confidence),
            None => "no result".to_string(),
        }
    }
}
