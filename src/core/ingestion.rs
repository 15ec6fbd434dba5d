// src/core/ingestion.rs

//! # Task Document Ingestion
//!
//! Turns a YAML task document into a `TaskConfig` tree. Three historical document
//! shapes are accepted without a version tag; each is tried as a strict decode, in order:
//!
//! 1. **Generation 1**: `tasks` is a list of task definitions. Accepted when `name`
//!    or `tasks` is non-empty.
//! 2. **Generation 2**: `tasks` is a mapping from child name to definition. Accepted
//!    when `tasks`, `script` or `steps` is non-empty. The mapping key names the child.
//! 3. **Generation 3**: `tasks` is a free-form tree; an entry carrying a `script` field is
//!    a leaf task, any other entry is a group whose entries are tasks again.
//!
//! A shape mismatch falls through to the next generation. Ambiguous step declarations,
//! non-string keys in generation 3 and step loading failures stop ingestion immediately.

use crate::{
    constants::{DEFAULT_STEP_NAME_PREFIX, SCRIPT_STEP_NAME},
    core::step::{Step, StepConfig, StepLoadError, StepLoaderRegistry},
    models::{Input, TaskConfig},
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read task document '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode task document")]
    Decode(#[from] serde_yaml::Error),
    #[error("Task '{task}' declares both `script` and `steps`; use one or the other.")]
    AmbiguousStepDeclaration { task: String },
    #[error("Task document matches no supported schema: {reason}")]
    UnsupportedSchema { reason: String },
    #[error("Non-string key {key} found in {context}; keys must be strings.")]
    MalformedKey { context: String, key: String },
    #[error("Task '{task}': failed to load step[{index}]")]
    Step {
        task: String,
        index: usize,
        #[source]
        source: StepLoadError,
    },
}

impl IngestionError {
    /// Errors that only mean "this document is not of the shape being tried".
    fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::UnsupportedSchema { .. } | Self::Decode(_))
    }
}

type IngestionResult<T> = Result<T, IngestionError>;

/// The outcome of trying one generation against a document.
enum Attempt {
    Accepted(TaskConfig),
    Rejected(String),
}

// --- CANDIDATE SHAPES ---

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct TaskConfigV1 {
    name: String,
    description: String,
    inputs: Vec<Input>,
    tasks: Vec<serde_yaml::Value>,
    script: String,
    steps: Vec<serde_yaml::Mapping>,
    autoenv: bool,
    autodir: bool,
    interactive: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct TaskConfigV2 {
    description: String,
    inputs: Vec<Input>,
    tasks: serde_yaml::Mapping,
    script: String,
    steps: Vec<serde_yaml::Mapping>,
    autoenv: bool,
    autodir: bool,
    interactive: bool,
}

/// A generation 3 leaf: a task definition without children.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct LeafTaskConfig {
    description: String,
    inputs: Vec<Input>,
    script: String,
    steps: Vec<serde_yaml::Mapping>,
    autoenv: bool,
    autodir: bool,
    interactive: bool,
}

// --- PUBLIC API ---

/// Reads and ingests a task document from disk.
pub fn ingest_file(path: &Path, registry: &StepLoaderRegistry) -> IngestionResult<TaskConfig> {
    log::debug!("Ingesting task document '{}'", path.display());
    let content = fs::read_to_string(path).map_err(|source| IngestionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    ingest_str(&content, registry)
}

/// Parses YAML text and ingests it.
pub fn ingest_str(content: &str, registry: &StepLoaderRegistry) -> IngestionResult<TaskConfig> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
    ingest_value(doc, registry)
}

/// Ingests an already-decoded document.
pub fn ingest_value(
    doc: serde_yaml::Value,
    registry: &StepLoaderRegistry,
) -> IngestionResult<TaskConfig> {
    ingest_node(&doc, "<root>", registry)
}

// --- GENERATION SNIFFING ---

/// Ingests one task definition. `hint` names the node in error messages until its
/// real name is known.
fn ingest_node(
    doc: &serde_yaml::Value,
    hint: &str,
    registry: &StepLoaderRegistry,
) -> IngestionResult<TaskConfig> {
    if !doc.is_mapping() {
        return Err(IngestionError::UnsupportedSchema {
            reason: format!("task definition '{hint}' is not a mapping"),
        });
    }

    log::trace!("Trying to parse '{}' as generation 1", hint);
    let v1_reason = match try_generation_1(doc, hint, registry)? {
        Attempt::Accepted(config) => return Ok(config),
        Attempt::Rejected(reason) => reason,
    };
    log::trace!("Not generation 1 ({}); trying generation 2", v1_reason);

    let v2_reason = match try_generation_2(doc, hint, registry)? {
        Attempt::Accepted(config) => return Ok(config),
        Attempt::Rejected(reason) => reason,
    };
    log::trace!("Not generation 2 ({}); trying generation 3", v2_reason);

    try_generation_3(doc, registry).map_err(|e| match e {
        IngestionError::UnsupportedSchema { reason } => IngestionError::UnsupportedSchema {
            reason: format!("'{hint}': {v1_reason}; {v2_reason}; {reason}"),
        },
        other => other,
    })
}

/// Turns a child-ingestion failure into a rejection of the enclosing generation, unless
/// it is a hard error.
fn child_outcome(
    result: IngestionResult<TaskConfig>,
    generation: u8,
) -> IngestionResult<Result<TaskConfig, String>> {
    match result {
        Ok(config) => Ok(Ok(config)),
        Err(e) if e.is_schema_mismatch() => {
            Ok(Err(format!("not generation {generation}: child task rejected ({e})")))
        }
        Err(e) => Err(e),
    }
}

fn try_generation_1(
    doc: &serde_yaml::Value,
    hint: &str,
    registry: &StepLoaderRegistry,
) -> IngestionResult<Attempt> {
    let v1: TaskConfigV1 = match serde_yaml::from_value(doc.clone()) {
        Ok(v1) => v1,
        Err(e) => return Ok(Attempt::Rejected(format!("not generation 1: {e}"))),
    };
    if v1.name.is_empty() && v1.tasks.is_empty() {
        return Ok(Attempt::Rejected(
            "not generation 1: both `name` and `tasks` are empty".to_string(),
        ));
    }

    let label = if v1.name.is_empty() { hint } else { v1.name.as_str() };
    let mut children = Vec::with_capacity(v1.tasks.len());
    for (i, child) in v1.tasks.iter().enumerate() {
        let child_hint = format!("{label}.tasks[{i}]");
        match child_outcome(ingest_node(child, &child_hint, registry), 1)? {
            Ok(config) => children.push(Arc::new(config)),
            Err(reason) => return Ok(Attempt::Rejected(reason)),
        }
    }

    let steps = read_steps(label, &v1.script, v1.steps, registry)?;
    Ok(Attempt::Accepted(TaskConfig {
        name: v1.name,
        description: v1.description,
        inputs: v1.inputs,
        script: non_empty(v1.script),
        steps,
        tasks: children,
        autoenv: v1.autoenv,
        autodir: v1.autodir,
        interactive: v1.interactive,
    }))
}

fn try_generation_2(
    doc: &serde_yaml::Value,
    hint: &str,
    registry: &StepLoaderRegistry,
) -> IngestionResult<Attempt> {
    let v2: TaskConfigV2 = match serde_yaml::from_value(doc.clone()) {
        Ok(v2) => v2,
        Err(e) => return Ok(Attempt::Rejected(format!("not generation 2: {e}"))),
    };
    if v2.tasks.is_empty() && v2.script.is_empty() && v2.steps.is_empty() {
        return Ok(Attempt::Rejected(
            "not generation 2: `tasks`, `script` and `steps` are all missing".to_string(),
        ));
    }

    let mut children = Vec::with_capacity(v2.tasks.len());
    for (key, child) in &v2.tasks {
        let Some(name) = key.as_str() else {
            return Ok(Attempt::Rejected(format!(
                "not generation 2: task name {key:?} is not a string"
            )));
        };
        match child_outcome(ingest_node(child, name, registry), 2)? {
            Ok(mut config) => {
                // The mapping key names the child, whatever its body says.
                config.name = name.to_string();
                children.push(Arc::new(config));
            }
            Err(reason) => return Ok(Attempt::Rejected(reason)),
        }
    }

    let steps = read_steps(hint, &v2.script, v2.steps, registry)?;
    Ok(Attempt::Accepted(TaskConfig {
        name: String::new(),
        description: v2.description,
        inputs: v2.inputs,
        script: non_empty(v2.script),
        steps,
        tasks: children,
        autoenv: v2.autoenv,
        autodir: v2.autodir,
        interactive: v2.interactive,
    }))
}

fn try_generation_3(
    doc: &serde_yaml::Value,
    registry: &StepLoaderRegistry,
) -> IngestionResult<TaskConfig> {
    let root = cast_keys_to_strings(doc, "the task document")?;
    let Some((_, tasks)) = root.iter().find(|(key, _)| key == "tasks") else {
        return Err(IngestionError::UnsupportedSchema {
            reason: "not generation 3: no `tasks` key".to_string(),
        });
    };

    Ok(TaskConfig {
        tasks: transform_generation_3(tasks, "tasks", registry)?,
        ..Default::default()
    })
}

/// Walks a generation 3 `tasks` tree. An entry with a `script` field is a leaf; any
/// other entry is a group of further tasks.
fn transform_generation_3(
    tasks: &serde_yaml::Value,
    context: &str,
    registry: &StepLoaderRegistry,
) -> IngestionResult<Vec<Arc<TaskConfig>>> {
    let entries = cast_keys_to_strings(tasks, context)?;
    let mut result = Vec::with_capacity(entries.len());

    for (name, body) in entries {
        let fields = cast_keys_to_strings(body, &name)?;
        let config = if is_leaf(&fields) {
            log::trace!("Decoding leaf task '{}'", name);
            let leaf: LeafTaskConfig = serde_yaml::from_value(body.clone())?;
            let steps = read_steps(&name, &leaf.script, leaf.steps, registry)?;
            TaskConfig {
                name,
                description: leaf.description,
                inputs: leaf.inputs,
                script: non_empty(leaf.script),
                steps,
                tasks: Vec::new(),
                autoenv: leaf.autoenv,
                autodir: leaf.autodir,
                interactive: leaf.interactive,
            }
        } else {
            log::trace!("Descending into task group '{}'", name);
            let children = transform_generation_3(body, &name, registry)?;
            TaskConfig {
                name,
                tasks: children,
                ..Default::default()
            }
        };
        result.push(Arc::new(config));
    }

    Ok(result)
}

/// The single leaf/group discriminator of generation 3 documents.
fn is_leaf(fields: &[(String, &serde_yaml::Value)]) -> bool {
    fields
        .iter()
        .any(|(key, value)| key == "script" && !value.is_null())
}

/// Views a mapping as string-keyed entries, in document order. Fails on the first
/// non-string key instead of coercing it.
pub(crate) fn cast_keys_to_strings<'a>(
    value: &'a serde_yaml::Value,
    context: &str,
) -> IngestionResult<Vec<(String, &'a serde_yaml::Value)>> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| IngestionError::UnsupportedSchema {
            reason: format!("{context} is not a mapping"),
        })?;

    mapping
        .iter()
        .map(|(key, value)| match key {
            serde_yaml::Value::String(s) => Ok((s.clone(), value)),
            other => Err(IngestionError::MalformedKey {
                context: context.to_string(),
                key: format!("{other:?}"),
            }),
        })
        .collect()
}

// --- STEP READING ---

/// Reads a task body's steps: an inline `script` becomes one step named `script`,
/// otherwise each entry of `steps` is loaded, unnamed ones as `step-<n>`.
fn read_steps(
    task: &str,
    script: &str,
    step_configs: Vec<serde_yaml::Mapping>,
    registry: &StepLoaderRegistry,
) -> IngestionResult<Vec<Arc<dyn Step>>> {
    if !script.is_empty() {
        if !step_configs.is_empty() {
            return Err(IngestionError::AmbiguousStepDeclaration {
                task: task.to_string(),
            });
        }
        let step = registry
            .load_step(&StepConfig::from_script(SCRIPT_STEP_NAME, script))
            .map_err(|source| IngestionError::Step {
                task: task.to_string(),
                index: 0,
                source,
            })?;
        return Ok(vec![step]);
    }

    let mut steps = Vec::with_capacity(step_configs.len());
    for (i, mapping) in step_configs.into_iter().enumerate() {
        let context = format!("{task}.steps[{i}]");
        let fields = cast_keys_to_strings(&serde_yaml::Value::Mapping(mapping), &context)?
            .into_iter()
            .map(|(key, value)| (key, value.clone()))
            .collect();
        let default_name = format!("{DEFAULT_STEP_NAME_PREFIX}{}", i + 1);
        let step = registry
            .load_step(&StepConfig::new(fields, &default_name))
            .map_err(|source| IngestionError::Step {
                task: task.to_string(),
                index: i,
                source,
            })?;
        steps.push(step);
    }
    Ok(steps)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A comparable outline of a task tree: name, input names, step names, children.
    #[derive(Debug, PartialEq)]
    struct Outline {
        name: String,
        inputs: Vec<String>,
        steps: Vec<String>,
        children: Vec<Outline>,
    }

    fn outline(config: &TaskConfig) -> Outline {
        Outline {
            name: config.name.clone(),
            inputs: config.inputs.iter().map(|i| i.name.clone()).collect(),
            steps: config.steps.iter().map(|s| s.name().to_string()).collect(),
            children: config.tasks.iter().map(|c| outline(c)).collect(),
        }
    }

    fn ingest(yaml: &str) -> IngestionResult<TaskConfig> {
        ingest_str(yaml, &StepLoaderRegistry::with_builtin_loaders())
    }

    const GEN1: &str = r#"
name: app
description: demo
tasks:
  - name: greet
    inputs:
      - name: name
        argument-index: 0
    script: echo hello {{ .name }}
  - name: db
    tasks:
      - name: migrate
        inputs:
          - name: db.host
        steps:
          - script: echo one
          - name: second
            script: echo two
"#;

    const GEN3: &str = r#"
tasks:
  greet:
    inputs:
      - name: name
        argument-index: 0
    script: echo hello {{ .name }}
  db:
    migrate:
      inputs:
        - name: db.host
      script: echo migrate
"#;

    #[test]
    fn ingests_generation_1_documents() {
        let root = ingest(GEN1).unwrap();
        assert_eq!(root.name, "app");
        assert_eq!(root.description, "demo");
        assert!(root.is_namespace());

        let greet = root.find_child("greet").unwrap();
        assert_eq!(greet.script.as_deref(), Some("echo hello {{ .name }}"));
        assert_eq!(greet.inputs[0].argument_index, Some(0));
        assert_eq!(greet.steps.len(), 1);
        assert_eq!(greet.steps[0].name(), "script");

        let migrate = root.find_child("db").unwrap().find_child("migrate").unwrap();
        let names: Vec<_> = migrate.steps.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["step-1", "second"]);
    }

    #[test]
    fn ingests_generation_2_documents_in_order() {
        let root = ingest(
            r#"
description: v2
tasks:
  zeta:
    name: ignored
    script: echo z
  alpha:
    autoenv: true
    steps:
      - script: echo a
"#,
        )
        .unwrap();
        assert_eq!(root.name, "");
        assert_eq!(root.description, "v2");
        let names: Vec<_> = root.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(root.tasks[1].autoenv);
    }

    #[test]
    fn falls_back_to_generation_3_for_nested_groups() {
        let root = ingest(GEN3).unwrap();
        let migrate = root.find_child("db").unwrap().find_child("migrate").unwrap();
        assert_eq!(migrate.inputs[0].name, "db.host");
        assert_eq!(migrate.steps.len(), 1);
        assert!(root.find_child("db").unwrap().is_namespace());
    }

    #[test]
    fn generation_1_and_3_documents_ingest_to_the_same_tree() {
        let gen1 = ingest(
            r#"
name: app
tasks:
  - name: greet
    inputs:
      - name: name
    script: echo hi
  - name: db
    tasks:
      - name: migrate
        script: echo migrate
"#,
        )
        .unwrap();
        let gen3 = ingest(
            r#"
tasks:
  greet:
    inputs:
      - name: name
    script: echo hi
  db:
    migrate:
      script: echo migrate
"#,
        )
        .unwrap();

        let children = |c: &TaskConfig| c.tasks.iter().map(|t| outline(t)).collect::<Vec<_>>();
        assert_eq!(children(&gen1), children(&gen3));
    }

    #[test]
    fn rejects_script_and_steps_in_every_generation() {
        let gen1 = "name: app\nscript: echo a\nsteps:\n  - script: echo b\n";
        let gen2 = "tasks:\n  a:\n    script: echo a\n    steps:\n      - script: echo b\n";
        let gen3 = "tasks:\n  grp:\n    leaf:\n      script: echo a\n      steps:\n        - script: echo b\n";

        for doc in [gen1, gen2, gen3] {
            let err = ingest(doc).unwrap_err();
            assert!(
                matches!(err, IngestionError::AmbiguousStepDeclaration { .. }),
                "unexpected error for {doc:?}: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_documents_of_no_known_shape() {
        assert!(matches!(
            ingest("foo: bar\n"),
            Err(IngestionError::UnsupportedSchema { .. })
        ));
        assert!(matches!(
            ingest("- 1\n- 2\n"),
            Err(IngestionError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn rejects_non_string_task_names_in_generation_3() {
        let err = ingest("tasks:\n  1:\n    x:\n      script: echo\n").unwrap_err();
        assert!(matches!(err, IngestionError::MalformedKey { .. }), "{err:?}");
    }

    #[test]
    fn reports_malformed_yaml_as_decode_errors() {
        assert!(matches!(
            ingest("tasks: [unclosed"),
            Err(IngestionError::Decode(_))
        ));
    }

    #[test]
    fn reports_steps_no_loader_accepts() {
        let err = ingest("name: app\nsteps:\n  - unknown: 1\n").unwrap_err();
        assert!(matches!(err, IngestionError::Step { index: 0, .. }), "{err:?}");
    }

    #[test]
    fn reads_documents_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        fs::write(&path, GEN1).unwrap();
        let root = ingest_file(&path, &StepLoaderRegistry::with_builtin_loaders()).unwrap();
        assert_eq!(root.tasks.len(), 2);

        let missing = ingest_file(&dir.path().join("nope.yaml"), &StepLoaderRegistry::new());
        assert!(matches!(missing, Err(IngestionError::Io { .. })));
    }
}
