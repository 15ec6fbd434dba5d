// src/models.rs

use crate::constants::PATH_DELIMITER;
use crate::core::step::Step;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Task '{key}' has no parent.")]
    NoParent { key: String },
    #[error("Malformed task key '{key}': segments must be non-empty.")]
    MalformedKey { key: String },
}

// --- TASK KEYS ---

/// The hierarchical, immutable name of a task. The first segment is the application name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    segments: Vec<String>,
}

impl TaskKey {
    /// Parses a dotted key such as `app.db.migrate`.
    pub fn from_string(s: &str) -> Result<Self, KeyError> {
        let segments: Vec<String> = s.split(PATH_DELIMITER).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(KeyError::MalformedKey { key: s.to_string() });
        }
        Ok(Self { segments })
    }

    /// A single-segment key for the root task of an application.
    pub fn root(name: &str) -> Result<Self, KeyError> {
        if name.is_empty() || name.contains(PATH_DELIMITER) {
            return Err(KeyError::MalformedKey {
                key: name.to_string(),
            });
        }
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    /// Returns this key extended by one segment.
    pub fn child(&self, name: &str) -> Result<Self, KeyError> {
        if name.is_empty() || name.contains(PATH_DELIMITER) {
            return Err(KeyError::MalformedKey {
                key: format!("{self}{PATH_DELIMITER}{name}"),
            });
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Returns the key with the trailing segment removed.
    pub fn parent(&self) -> Result<Self, KeyError> {
        match self.segments.split_last() {
            Some((_, rest)) if !rest.is_empty() => Ok(Self {
                segments: rest.to_vec(),
            }),
            _ => Err(KeyError::NoParent {
                key: self.to_string(),
            }),
        }
    }

    /// The key without its application segment, e.g. `db.migrate` for `app.db.migrate`.
    /// Empty for the root key. This is the form used for configuration lookups.
    pub fn short_string(&self) -> String {
        self.segments
            .iter()
            .skip(1)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(&PATH_DELIMITER.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// The trailing segment: the task's own name, or the application name for the root.
    pub fn last_segment(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(&PATH_DELIMITER.to_string()))
    }
}

/// Builds task keys relative to an application root.
#[derive(Debug, Clone)]
pub struct TaskNamer {
    root: String,
}

impl TaskNamer {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>.<suffix>`; an empty suffix names the root task itself.
    pub fn from_string(&self, suffix: &str) -> Result<TaskKey, KeyError> {
        if suffix.is_empty() {
            return TaskKey::root(&self.root);
        }
        TaskKey::from_string(&format!("{}{PATH_DELIMITER}{suffix}", self.root))
    }

    /// The key of the task implicitly named after an input: `<root>.<input.name>`.
    pub fn from_resolved_input(&self, input: &Input) -> Result<TaskKey, KeyError> {
        self.from_string(&input.name)
    }
}

// --- INPUTS ---

/// A named dependency declared by a task.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Dotted name; also the path of the resolved value in the variable tree.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Zero-based position in the CLI argument list.
    #[serde(default, rename = "argument-index", alias = "argument_index")]
    pub argument_index: Option<usize>,
}

impl Input {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            argument_index: None,
        }
    }

    /// The last segment of the name.
    pub fn short_name(&self) -> &str {
        self.name
            .rsplit(PATH_DELIMITER)
            .next()
            .unwrap_or(&self.name)
    }

    pub fn path(&self) -> Vec<&str> {
        self.name.split(PATH_DELIMITER).collect()
    }
}

// --- TASK CONFIGURATION ---

/// A node of the task tree, as produced by ingestion.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub name: String,
    pub description: String,
    pub inputs: Vec<Input>,
    /// The inline script this task was declared with, if any.
    pub script: Option<String>,
    pub steps: Vec<Arc<dyn Step>>,
    pub tasks: Vec<Arc<TaskConfig>>,
    /// Export bound variables to the environment of script steps.
    pub autoenv: bool,
    /// Run script steps in the directory holding the task document.
    pub autodir: bool,
    /// Attach script steps to the terminal instead of capturing their output.
    pub interactive: bool,
}

impl TaskConfig {
    /// True for a pure grouping task: no script and no steps.
    pub fn is_namespace(&self) -> bool {
        self.script.is_none() && self.steps.is_empty()
    }

    pub fn find_child(&self, name: &str) -> Option<&Arc<TaskConfig>> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

// --- RUN-SCOPED INPUTS ---

/// Values for inputs supplied explicitly by a caller, consulted before any configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvidedInputs {
    values: HashMap<String, String>,
}

impl ProvidedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}
