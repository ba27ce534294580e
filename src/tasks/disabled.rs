use anyhow::Result;

use super::backend::{TaskBackend, TaskOutcome};
use crate::frame::Frame;

/// Stand-in for a task whose model could not be loaded. Answers "absent"
/// for every crop so the rest of the pipeline keeps running.
pub struct DisabledTask {
    name: String,
    reason: String,
}

impl DisabledTask {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let task = Self {
            name: name.into(),
            reason: reason.into(),
        };
        log::error!("{}: task disabled: {}", task.name, task.reason);
        task
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl TaskBackend for DisabledTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, _crop: &Frame) -> Result<TaskOutcome> {
        Ok(TaskOutcome::absent())
    }

    fn caption(&self, _outcome: &TaskOutcome) -> String {
        format!("{} unavailable", self.name)
    }
}
