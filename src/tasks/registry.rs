use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::TaskBackend;

/// How a label was resolved to a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The label has an explicit route.
    Routed(&'a str),
    /// Unknown label; handled by the default task.
    Fallback(&'a str),
}

impl<'a> Resolution<'a> {
    pub fn task(&self) -> &'a str {
        match self {
            Resolution::Routed(name) | Resolution::Fallback(name) => name,
        }
    }
}

/// Label -> task table with an explicit default for unrecognised labels.
///
/// Owned by the router thread; tasks are borrowed mutably one at a time.
pub struct TaskRegistry {
    tasks: HashMap<String, Box<dyn TaskBackend>>,
    routes: HashMap<String, String>,
    default_name: Option<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            routes: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a task under its own name. The first registered task becomes
    /// the default.
    pub fn register(&mut self, task: Box<dyn TaskBackend>) {
        let name = task.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.tasks.insert(name, task);
    }

    /// Route `label` to the registered task `task`.
    pub fn route(&mut self, label: &str, task: &str) -> Result<()> {
        if !self.tasks.contains_key(task) {
            return Err(anyhow!("route '{}' -> '{}': task not registered", label, task));
        }
        self.routes.insert(label.to_string(), task.to_string());
        Ok(())
    }

    /// Set the fallback task by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.tasks.contains_key(name) {
            return Err(anyhow!("task '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_task(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Pick the task for a detected label.
    pub fn resolve(&self, label: &str) -> Option<Resolution<'_>> {
        match self.routes.get(label) {
            Some(task) => Some(Resolution::Routed(task.as_str())),
            None => self.default_name.as_deref().map(Resolution::Fallback),
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn TaskBackend + 'static)> {
        self.tasks.get_mut(name).map(|task| task.as_mut())
    }

    /// Registered task names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::DisabledTask;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(Box::new(DisabledTask::new("classification", "test")));
        registry.register(Box::new(DisabledTask::new("ocr", "test")));
        registry.route("digital-gauge", "ocr").unwrap();
        registry
    }

    #[test]
    fn first_registered_is_default() {
        assert_eq!(registry().default_task(), Some("classification"));
    }

    #[test]
    fn routed_and_fallback_labels() {
        let registry = registry();
        assert_eq!(
            registry.resolve("digital-gauge"),
            Some(Resolution::Routed("ocr"))
        );
        assert_eq!(
            registry.resolve("valve"),
            Some(Resolution::Fallback("classification"))
        );
        assert_eq!(registry.resolve("valve").unwrap().task(), "classification");
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let mut registry = registry();
        assert!(registry.route("analog-gauge", "analog").is_err());
        assert!(registry.set_default("analog").is_err());
        registry.set_default("ocr").unwrap();
        assert_eq!(registry.resolve("valve"), Some(Resolution::Fallback("ocr")));
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        assert_eq!(TaskRegistry::new().resolve("anything"), None);
    }
}
