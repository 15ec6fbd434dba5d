// src/core/application.rs

//! # Resolution Engine
//!
//! `Application` runs tasks by key. Before a task's steps execute, each declared
//! input is resolved by trying, in order:
//!
//! 1. the positional argument at the input's `argument-index`,
//! 2. a value provided explicitly by the caller,
//! 3. configuration at `<caller>.<input>`,
//! 4. configuration at `<task>.<input>`,
//! 5. configuration at the bare `<input>`,
//! 6. the cached output of a task already run for the same input path,
//! 7. running the task named after the input and caching its output.
//!
//! Inputs declared by ancestor tasks are resolved the same way (without positional
//! arguments) and merged underneath, so a child's own values win.

use crate::{
    constants::{FLAGS_SECTION, PATH_DELIMITER, VAR_ARGS, VAR_CMD, VAR_ENV},
    core::{
        config_source::ConfigSource,
        registry::TaskRegistry,
        step::{StepError, TaskRunner},
        task_executor::{BoundTask, TaskExecutor},
        value::{Value, ValueKind},
    },
    models::{Input, KeyError, ProvidedInputs, TaskConfig, TaskKey, TaskNamer},
};
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Task '{key}' not found.")]
    TaskNotFound { key: String },

    #[error(
        "Missing value for input '{input}'. Provide a positional argument, a flag, a configuration value or a task named after it."
    )]
    MissingInput {
        input: String,
        #[source]
        source: Box<ResolutionError>,
    },

    #[error("Cyclic resolution detected: {cycle}")]
    CyclicResolution { cycle: String },

    #[error("Configuration value at '{key}' is a {kind}; expected a string.")]
    UnexpectedValueShape { key: String, kind: ValueKind },

    #[error("Task '{task}' failed{}", called_by(.caller))]
    Task {
        task: String,
        caller: Option<String>,
        #[source]
        source: Box<ResolutionError>,
    },

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

fn called_by(caller: &Option<String>) -> String {
    caller
        .as_ref()
        .map(|c| format!(" (called by '{c}')"))
        .unwrap_or_default()
}

impl ResolutionError {
    /// The next resolution error down the annotation chain, if any.
    fn inner(&self) -> Option<&ResolutionError> {
        match self {
            Self::Task { source, .. } | Self::MissingInput { source, .. } => Some(source.as_ref()),
            Self::Step(StepError::Task { source, .. }) => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Walks from this error down through every annotated resolution error.
    pub fn chain(&self) -> impl Iterator<Item = &ResolutionError> {
        std::iter::successors(Some(self), |e| e.inner())
    }

    /// The innermost resolution error.
    pub fn root_cause(&self) -> &ResolutionError {
        self.chain().last().unwrap_or(self)
    }

    pub fn is_cyclic(&self) -> bool {
        self.chain()
            .any(|e| matches!(e, Self::CyclicResolution { .. }))
    }
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// The task resolution engine for one application and one run.
#[derive(Debug)]
pub struct Application {
    name: String,
    namer: TaskNamer,
    registry: TaskRegistry,
    config: Box<dyn ConfigSource>,
    executor: Arc<dyn TaskExecutor>,
    env: String,
    cmd: String,
    base_dir: Option<PathBuf>,
    /// Outputs of tasks run as input fallbacks, by input path. Scoped to this run.
    cached_task_outputs: Value,
    /// Tasks currently being resolved, outermost first.
    in_flight: Vec<TaskKey>,
}

impl Application {
    pub fn new(
        name: impl Into<String>,
        registry: TaskRegistry,
        config: Box<dyn ConfigSource>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let name = name.into();
        Self {
            namer: TaskNamer::new(name.clone()),
            name,
            registry,
            config,
            executor,
            env: String::new(),
            cmd: String::new(),
            base_dir: None,
            cached_task_outputs: Value::new_map(),
            in_flight: Vec::new(),
        }
    }

    /// Sets the run environment name exposed to tasks as `env`.
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// Sets the invoking command path exposed to tasks as `cmd`.
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = cmd.into();
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every registered task keyed by its full dotted name.
    pub fn tasks(&self) -> &BTreeMap<String, Arc<TaskConfig>> {
        self.registry.tasks()
    }

    /// Runs `<app>.<suffix>`; an empty suffix runs the root task.
    pub fn run_task_for_key_string(
        &mut self,
        suffix: &str,
        args: &[String],
        provided: &ProvidedInputs,
    ) -> ResolutionResult<String> {
        let key = self.namer.from_string(suffix)?;
        self.run_task_for_key(&key, args, provided, None)
    }

    pub fn run_task_for_key(
        &mut self,
        key: &TaskKey,
        args: &[String],
        provided: &ProvidedInputs,
        caller: Option<&TaskKey>,
    ) -> ResolutionResult<String> {
        match caller {
            Some(c) => log::debug!("Starting task={} caller={}", key, c),
            None => log::debug!("Starting task={}", key),
        }

        let overridden = self
            .override_for_task(key)
            .map_err(|e| annotate(e, key, caller))?;
        if let Some(output) = overridden {
            log::info!(
                "{} {} {}",
                "Skipped".yellow(),
                key,
                format!("(value provided by configuration: {output})").dimmed()
            );
            return Ok(output);
        }

        if let Some(start) = self.in_flight.iter().position(|k| k == key) {
            let cycle = self
                .in_flight
                .iter()
                .skip(start)
                .chain(std::iter::once(key))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ResolutionError::CyclicResolution { cycle });
        }

        let config = self.registry.find_task(key)?;

        self.in_flight.push(key.clone());
        let mut this = scopeguard::guard(self, |app| {
            app.in_flight.pop();
        });
        let result = this.bind_and_execute(key, config, args, provided, caller);
        drop(this);

        match &result {
            Ok(output) => log::debug!("Finished task={} output={}", key, output),
            Err(_) => log::debug!("Task {} failed.", key),
        }
        result.map_err(|e| annotate(e, key, caller))
    }

    fn bind_and_execute(
        &mut self,
        key: &TaskKey,
        config: Arc<TaskConfig>,
        args: &[String],
        provided: &ProvidedInputs,
        caller: Option<&TaskKey>,
    ) -> ResolutionResult<String> {
        let inputs = self.inherited_input_values_for_task_key(key, args, provided, caller)?;

        let mut vars = Value::new_map();
        vars.set_path(&[VAR_ARGS], Value::from(args.to_vec()));
        vars.set_path(&[VAR_ENV], Value::from(self.env.as_str()));
        vars.set_path(&[VAR_CMD], Value::from(self.cmd.as_str()));
        vars.deep_override(inputs);
        log::debug!("Bound variables for task={}: {:?}", key, vars.flatten());

        let task = BoundTask {
            key: key.clone(),
            config,
            vars,
            base_dir: self.base_dir.clone(),
        };
        let executor = Arc::clone(&self.executor);
        Ok(executor.execute(&task, self, caller)?)
    }

    /// A configured value at the task's own key replaces running it. A mapping at
    /// that path is a settings section for the task, not an output.
    fn override_for_task(&self, key: &TaskKey) -> ResolutionResult<Option<String>> {
        if key.is_root() {
            return Ok(None);
        }
        match self.get_value_for_config_key(&key.short_string()) {
            Err(ResolutionError::UnexpectedValueShape {
                kind: ValueKind::Map,
                ..
            }) => Ok(None),
            other => other,
        }
    }

    /// Resolves the inputs of `key` and of all its ancestors. Values resolved for a
    /// task win over those inherited from its ancestors. Positional arguments only
    /// apply to `key` itself.
    pub fn inherited_input_values_for_task_key(
        &mut self,
        key: &TaskKey,
        args: &[String],
        provided: &ProvidedInputs,
        caller: Option<&TaskKey>,
    ) -> ResolutionResult<Value> {
        let mut values = self.direct_input_values_for_task_key(key, args, provided, caller)?;

        if let Ok(parent) = key.parent() {
            let inherited =
                self.inherited_input_values_for_task_key(&parent, &[], provided, caller)?;
            values.deep_merge(inherited);
        }
        Ok(values)
    }

    /// Resolves the inputs declared by the task at `key` alone.
    pub fn direct_input_values_for_task_key(
        &mut self,
        key: &TaskKey,
        args: &[String],
        provided: &ProvidedInputs,
        caller: Option<&TaskKey>,
    ) -> ResolutionResult<Value> {
        let config = self.registry.find_task(key)?;
        let mut values = Value::new_map();

        for input in &config.inputs {
            let value = self.resolve_input(key, input, args, provided, caller)?;
            values.set_path(&input.path(), value);
        }

        if !config.inputs.is_empty() {
            log::debug!("Collected inputs for task={}: {:?}", key, values.flatten());
        }
        Ok(values)
    }

    fn resolve_input(
        &mut self,
        key: &TaskKey,
        input: &Input,
        args: &[String],
        provided: &ProvidedInputs,
        caller: Option<&TaskKey>,
    ) -> ResolutionResult<Value> {
        let short_name = input.short_name();

        if let Some(arg) = input.argument_index.and_then(|i| args.get(i)) {
            log::debug!("Input '{}' of {} taken from positional argument.", input.name, key);
            return Ok(Value::from(arg.as_str()));
        }

        if let Some(value) = provided.get(&input.name) {
            return Ok(Value::from(value));
        }

        if let Some(caller) = caller.filter(|c| !c.is_root()) {
            let path = format!("{}{PATH_DELIMITER}{short_name}", caller.short_string());
            if let Some(value) = self.get_value_for_config_key(&path)? {
                return Ok(Value::from(value));
            }
        }

        // `<task>.<input>` is skipped when the input names the task itself.
        if !key.is_root() && key.last_segment() != short_name {
            let path = format!("{}{PATH_DELIMITER}{short_name}", key.short_string());
            if let Some(value) = self.get_value_for_config_key(&path)? {
                return Ok(Value::from(value));
            }
        }

        if let Some(value) = self.get_value_for_config_key(short_name)? {
            return Ok(Value::from(value));
        }

        let path = input.path();
        if let Some(cached) = self.cached_task_outputs.get_path(&path) {
            log::debug!("Input '{}' of {} served from cache.", input.name, key);
            return Ok(cached.clone());
        }

        let fallback = self.namer.from_resolved_input(input)?;
        log::debug!(
            "Input '{}' of {} has no value; running task {}.",
            input.name,
            key,
            fallback
        );
        match self.run_task_for_key(&fallback, &[], &ProvidedInputs::new(), Some(key)) {
            Ok(output) => {
                self.cached_task_outputs
                    .set_path(&path, Value::from(output.as_str()));
                Ok(Value::from(output))
            }
            Err(e) if e.is_cyclic() => Err(e),
            Err(e) => Err(ResolutionError::MissingInput {
                input: input.name.clone(),
                source: Box::new(e),
            }),
        }
    }

    /// Looks up a configuration value for `path`.
    ///
    /// `flags.<path>` is consulted first. Otherwise a dotted path is split at its
    /// last delimiter into a section and a leaf, and the leaf is read from that
    /// section; a bare path is read directly. A value that is not a string fails
    /// with `UnexpectedValueShape`.
    pub fn get_value_for_config_key(&self, path: &str) -> ResolutionResult<Option<String>> {
        let flag_path = format!("{FLAGS_SECTION}{PATH_DELIMITER}{path}");
        if let Some(flag) = self.config.get_string(&flag_path).filter(|s| !s.is_empty()) {
            return Ok(Some(flag.to_string()));
        }

        let value = match path.rsplit_once(PATH_DELIMITER) {
            Some((section, leaf)) => match self.config.sub(section) {
                Some(section) => section.get(leaf).cloned(),
                None => None,
            },
            None => self.config.get(path).cloned(),
        };

        match value {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ResolutionError::UnexpectedValueShape {
                key: path.to_string(),
                kind: other.kind(),
            }),
        }
    }
}

/// Adds the task and caller to an error raised while running `key`. Errors that
/// already name `key` are returned untouched.
fn annotate(err: ResolutionError, key: &TaskKey, caller: Option<&TaskKey>) -> ResolutionError {
    if matches!(&err, ResolutionError::TaskNotFound { key: k } if *k == key.to_string()) {
        return err;
    }
    ResolutionError::Task {
        task: key.to_string(),
        caller: caller.map(ToString::to_string),
        source: Box::new(err),
    }
}

impl TaskRunner for Application {
    fn run_task(
        &mut self,
        name: &str,
        args: &[String],
        provided: &ProvidedInputs,
        caller: &TaskKey,
    ) -> ResolutionResult<String> {
        let key = self.namer.from_string(name)?;
        self.run_task_for_key(&key, args, provided, Some(caller))
    }
}
