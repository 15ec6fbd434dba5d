// src/core/step.rs

//! # Steps and Step Loaders
//!
//! A `Step` is one executable unit of a task. Concrete step kinds are supplied by
//! `StepLoader`s registered on an explicit `StepLoaderRegistry`; ingestion hands every
//! raw step description to the registry, which tries each loader in registration order
//! until one accepts it.

use crate::{
    core::{application::ResolutionError, interpolator::InterpolationError, task_executor::BoundTask},
    models::{ProvidedInputs, TaskKey},
    system::executor::ExecutionError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepLoadError {
    #[error("Loader '{loader}' does not handle step '{step}': {reason}")]
    NotApplicable {
        loader: &'static str,
        step: String,
        reason: String,
    },
    #[error("Step '{step}' has an invalid '{field}' field: {problem}")]
    InvalidField {
        step: String,
        field: &'static str,
        problem: String,
    },
    #[error("All loaders failed to load step '{step}'")]
    NoLoaderMatched {
        step: String,
        #[source]
        last: Box<StepLoadError>,
    },
    #[error("No step loaders are registered; cannot load step '{step}'.")]
    NoLoaders { step: String },
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error("Step '{step}' could not render its template")]
    Interpolation {
        step: String,
        #[source]
        source: InterpolationError,
    },
    #[error("Step '{step}' failed")]
    Execution {
        step: String,
        #[source]
        source: ExecutionError,
    },
    #[error("Step '{step}' failed running task '{task}'")]
    Task {
        step: String,
        task: String,
        #[source]
        source: Box<ResolutionError>,
    },
}

// --- STEP CONFIG ---

/// The raw, string-keyed description of a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig {
    name: String,
    fields: BTreeMap<String, serde_yaml::Value>,
}

impl StepConfig {
    /// Builds a step description. A non-empty string `name` field overrides `default_name`.
    pub fn new(fields: BTreeMap<String, serde_yaml::Value>, default_name: &str) -> Self {
        let name = match fields.get("name") {
            Some(serde_yaml::Value::String(s)) if !s.is_empty() => s.clone(),
            _ => default_name.to_string(),
        };
        Self { name, fields }
    }

    /// The synthetic single-step description created from an inline `script`.
    pub fn from_script(name: &str, script: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), serde_yaml::Value::String(name.to_string()));
        fields.insert(
            "script".to_string(),
            serde_yaml::Value::String(script.to_string()),
        );
        Self::new(fields, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&serde_yaml::Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(serde_yaml::Value::as_str)
    }
}

// --- STEP RUNTIME ---

/// What a running step can call back into: the engine's ability to run other tasks.
pub trait TaskRunner {
    /// Runs the task named `name` (relative to the application root) on behalf of `caller`.
    fn run_task(
        &mut self,
        name: &str,
        args: &[String],
        provided: &ProvidedInputs,
        caller: &TaskKey,
    ) -> Result<String, ResolutionError>;
}

/// Everything a step needs while it runs.
pub struct StepContext<'a> {
    pub task: &'a BoundTask,
    pub runner: &'a mut dyn TaskRunner,
    pub caller: Option<&'a TaskKey>,
}

impl fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("task", &self.task.key)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

/// One executable unit of a task.
pub trait Step: fmt::Debug {
    fn name(&self) -> &str;

    /// Runs the step and returns its textual output.
    fn run(&self, ctx: &mut StepContext<'_>) -> Result<String, StepError>;
}

/// Turns a raw step description into a `Step`, or reports that the description is not its kind.
pub trait StepLoader: fmt::Debug {
    fn load_step(
        &self,
        config: &StepConfig,
        registry: &StepLoaderRegistry,
    ) -> Result<Arc<dyn Step>, StepLoadError>;
}

// --- REGISTRY ---

/// An ordered, append-only chain of step loaders.
#[derive(Debug, Default)]
pub struct StepLoaderRegistry {
    loaders: Vec<Box<dyn StepLoader>>,
}

impl StepLoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `script` and `task` step kinds, in that order.
    pub fn with_builtin_loaders() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::core::builtin_steps::ScriptStepLoader));
        registry.register(Box::new(crate::core::builtin_steps::TaskStepLoader));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn StepLoader>) {
        log::debug!("Registering step loader {:?}", loader);
        self.loaders.push(loader);
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Tries every loader in registration order and returns the first success.
    pub fn load_step(&self, config: &StepConfig) -> Result<Arc<dyn Step>, StepLoadError> {
        let mut last_error = None;
        for loader in &self.loaders {
            match loader.load_step(config, self) {
                Ok(step) => {
                    log::debug!("Step '{}' loaded by {:?}", config.name(), loader);
                    return Ok(step);
                }
                Err(e) => {
                    log::trace!("Loader {:?} rejected step '{}': {}", loader, config.name(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(StepLoadError::NoLoaderMatched {
                step: config.name().to_string(),
                last: Box::new(last),
            }),
            None => Err(StepLoadError::NoLoaders {
                step: config.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedStep(String);

    impl Step for NamedStep {
        fn name(&self) -> &str {
            &self.0
        }

        fn run(&self, _ctx: &mut StepContext<'_>) -> Result<String, StepError> {
            Ok(self.0.clone())
        }
    }

    /// Accepts any step carrying `field`, tagging the loaded step with `tag`.
    #[derive(Debug)]
    struct FieldLoader {
        field: &'static str,
        tag: &'static str,
    }

    impl StepLoader for FieldLoader {
        fn load_step(
            &self,
            config: &StepConfig,
            _registry: &StepLoaderRegistry,
        ) -> Result<Arc<dyn Step>, StepLoadError> {
            if config.get(self.field).is_none() {
                return Err(StepLoadError::NotApplicable {
                    loader: self.tag,
                    step: config.name().to_string(),
                    reason: format!("no '{}' field", self.field),
                });
            }
            Ok(Arc::new(NamedStep(format!("{}:{}", self.tag, config.name()))))
        }
    }

    fn config_with(field: &str) -> StepConfig {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), serde_yaml::Value::String("x".into()));
        StepConfig::new(fields, "step-1")
    }

    #[test]
    fn registry_tries_loaders_in_registration_order() {
        let mut registry = StepLoaderRegistry::new();
        registry.register(Box::new(FieldLoader { field: "a", tag: "first" }));
        registry.register(Box::new(FieldLoader { field: "a", tag: "second" }));

        let step = registry.load_step(&config_with("a")).unwrap();
        assert_eq!(step.name(), "first:step-1");
    }

    #[test]
    fn registry_falls_through_to_later_loaders() {
        let mut registry = StepLoaderRegistry::new();
        registry.register(Box::new(FieldLoader { field: "a", tag: "first" }));
        registry.register(Box::new(FieldLoader { field: "b", tag: "second" }));

        let step = registry.load_step(&config_with("b")).unwrap();
        assert_eq!(step.name(), "second:step-1");
    }

    #[test]
    fn registry_wraps_the_last_failure() {
        let mut registry = StepLoaderRegistry::new();
        registry.register(Box::new(FieldLoader { field: "a", tag: "first" }));
        registry.register(Box::new(FieldLoader { field: "b", tag: "second" }));

        let err = registry.load_step(&config_with("c")).unwrap_err();
        match err {
            StepLoadError::NoLoaderMatched { step, last } => {
                assert_eq!(step, "step-1");
                assert!(matches!(
                    *last,
                    StepLoadError::NotApplicable { loader: "second", .. }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_registry_reports_no_loaders() {
        let registry = StepLoaderRegistry::new();
        assert!(matches!(
            registry.load_step(&config_with("a")),
            Err(StepLoadError::NoLoaders { .. })
        ));
    }

    #[test]
    fn step_config_name_defaults_unless_given() {
        let unnamed = config_with("script");
        assert_eq!(unnamed.name(), "step-1");

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), serde_yaml::Value::String("build".into()));
        assert_eq!(StepConfig::new(fields, "step-2").name(), "build");

        let script = StepConfig::from_script("script", "echo hi");
        assert_eq!(script.get_str("script"), Some("echo hi"));
    }
}
