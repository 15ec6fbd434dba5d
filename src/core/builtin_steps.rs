// src/core/builtin_steps.rs

//! # Built-in Step Kinds
//!
//! - **script**: `script: <text>` runs the interpolated text through the platform shell.
//! - **task**: `task: <name>` runs another task, optionally with `inputs` and `args`.

use crate::{
    core::{
        interpolator,
        step::{Step, StepConfig, StepContext, StepError, StepLoadError, StepLoader, StepLoaderRegistry},
        value::{Value, yaml_scalar_to_string},
    },
    models::ProvidedInputs,
    system::executor,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// --- SCRIPT STEP ---

#[derive(Debug, Clone)]
pub struct ScriptStep {
    name: String,
    script: String,
}

/// Converts bound variables to `UPPER_SNAKE` environment variables, e.g. `db.host` -> `DB_HOST`.
pub fn env_from_vars(vars: &Value) -> HashMap<String, String> {
    vars.flatten()
        .into_iter()
        .map(|(key, value)| {
            let name = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            (name, value)
        })
        .collect()
}

impl Step for ScriptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> Result<String, StepError> {
        let task = ctx.task;
        let rendered = interpolator::interpolate(&self.script, &task.vars).map_err(|source| {
            StepError::Interpolation {
                step: self.name.clone(),
                source,
            }
        })?;

        let env = if task.config.autoenv {
            env_from_vars(&task.vars)
        } else {
            HashMap::new()
        };
        let cwd = if task.config.autodir {
            task.base_dir.as_deref()
        } else {
            None
        };

        executor::execute_script(&rendered, cwd, &env, task.config.interactive).map_err(|source| {
            StepError::Execution {
                step: self.name.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptStepLoader;

impl StepLoader for ScriptStepLoader {
    fn load_step(
        &self,
        config: &StepConfig,
        _registry: &StepLoaderRegistry,
    ) -> Result<Arc<dyn Step>, StepLoadError> {
        let script = match config.get("script") {
            Some(serde_yaml::Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(StepLoadError::InvalidField {
                    step: config.name().to_string(),
                    field: "script",
                    problem: "expected a string".to_string(),
                });
            }
            None => {
                return Err(StepLoadError::NotApplicable {
                    loader: "script",
                    step: config.name().to_string(),
                    reason: "no 'script' field".to_string(),
                });
            }
        };

        Ok(Arc::new(ScriptStep {
            name: config.name().to_string(),
            script,
        }))
    }
}

// --- TASK STEP ---

#[derive(Debug, Clone)]
pub struct TaskStep {
    name: String,
    task: String,
    inputs: BTreeMap<String, String>,
    args: Vec<String>,
}

impl Step for TaskStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> Result<String, StepError> {
        let task = ctx.task;
        let render = |template: &str| {
            interpolator::interpolate(template, &task.vars).map_err(|source| {
                StepError::Interpolation {
                    step: self.name.clone(),
                    source,
                }
            })
        };

        let mut provided = ProvidedInputs::new();
        for (name, template) in &self.inputs {
            provided.insert(name.clone(), render(template)?);
        }
        let args = self
            .args
            .iter()
            .map(|arg| render(arg))
            .collect::<Result<Vec<_>, _>>()?;

        ctx.runner
            .run_task(&self.task, &args, &provided, &task.key)
            .map_err(|source| StepError::Task {
                step: self.name.clone(),
                task: self.task.clone(),
                source: Box::new(source),
            })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskStepLoader;

impl TaskStepLoader {
    fn invalid(config: &StepConfig, field: &'static str, problem: &str) -> StepLoadError {
        StepLoadError::InvalidField {
            step: config.name().to_string(),
            field,
            problem: problem.to_string(),
        }
    }

    fn read_inputs(config: &StepConfig) -> Result<BTreeMap<String, String>, StepLoadError> {
        let Some(raw) = config.get("inputs") else {
            return Ok(BTreeMap::new());
        };
        let mapping = raw
            .as_mapping()
            .ok_or_else(|| Self::invalid(config, "inputs", "expected a mapping"))?;

        mapping
            .iter()
            .map(|(key, value)| {
                let key = key
                    .as_str()
                    .ok_or_else(|| Self::invalid(config, "inputs", "input names must be strings"))?;
                let value = yaml_scalar_to_string(value)
                    .ok_or_else(|| Self::invalid(config, "inputs", "input values must be scalars"))?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    fn read_args(config: &StepConfig) -> Result<Vec<String>, StepLoadError> {
        match config.get("args") {
            None => Ok(Vec::new()),
            Some(serde_yaml::Value::String(line)) => shlex::split(line)
                .ok_or_else(|| Self::invalid(config, "args", "unbalanced quotes")),
            Some(serde_yaml::Value::Sequence(items)) => items
                .iter()
                .map(|item| {
                    yaml_scalar_to_string(item)
                        .ok_or_else(|| Self::invalid(config, "args", "arguments must be scalars"))
                })
                .collect(),
            Some(_) => Err(Self::invalid(config, "args", "expected a string or a list")),
        }
    }
}

impl StepLoader for TaskStepLoader {
    fn load_step(
        &self,
        config: &StepConfig,
        _registry: &StepLoaderRegistry,
    ) -> Result<Arc<dyn Step>, StepLoadError> {
        let task = match config.get("task") {
            Some(serde_yaml::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => return Err(Self::invalid(config, "task", "expected a task name")),
            None => {
                return Err(StepLoadError::NotApplicable {
                    loader: "task",
                    step: config.name().to_string(),
                    reason: "no 'task' field".to_string(),
                });
            }
        };

        Ok(Arc::new(TaskStep {
            name: config.name().to_string(),
            task,
            inputs: Self::read_inputs(config)?,
            args: Self::read_args(config)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::ResolutionError;
    use crate::core::step::TaskRunner;
    use crate::core::task_executor::BoundTask;
    use crate::models::{TaskConfig, TaskKey};

    fn step_config(yaml: &str) -> StepConfig {
        let fields: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml).unwrap();
        StepConfig::new(fields, "step-1")
    }

    #[derive(Debug, Default)]
    struct RecordingRunner {
        calls: Vec<(String, Vec<String>, Option<String>, String)>,
    }

    impl TaskRunner for RecordingRunner {
        fn run_task(
            &mut self,
            name: &str,
            args: &[String],
            provided: &ProvidedInputs,
            caller: &TaskKey,
        ) -> Result<String, ResolutionError> {
            self.calls.push((
                name.to_string(),
                args.to_vec(),
                provided.get("target").map(str::to_string),
                caller.to_string(),
            ));
            Ok("called".to_string())
        }
    }

    fn bound_task(config: TaskConfig) -> BoundTask {
        let mut vars = Value::new_map();
        vars.set_path(&["env"], "prod".into());
        vars.set_path(&["db", "host"], "db.local".into());
        BoundTask {
            key: TaskKey::from_string("app.deploy").unwrap(),
            config: Arc::new(config),
            vars,
            base_dir: None,
        }
    }

    #[test]
    fn builtin_registry_loads_script_and_task_steps() {
        let registry = StepLoaderRegistry::with_builtin_loaders();
        assert_eq!(registry.len(), 2);

        let script = registry.load_step(&step_config("script: echo hi")).unwrap();
        assert_eq!(script.name(), "step-1");

        let task = registry
            .load_step(&step_config("name: call\ntask: build\nargs: \"a 'b c'\""))
            .unwrap();
        assert_eq!(task.name(), "call");

        assert!(registry.load_step(&step_config("other: 1")).is_err());
    }

    #[test]
    fn task_loader_rejects_bad_args() {
        let err = TaskStepLoader
            .load_step(
                &step_config("task: build\nargs: {a: 1}"),
                &StepLoaderRegistry::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StepLoadError::InvalidField { field: "args", .. }));
    }

    #[test]
    fn task_step_calls_the_runner_with_rendered_inputs() {
        let step = TaskStepLoader
            .load_step(
                &step_config("task: db.migrate\ninputs:\n  target: '{{ .env }}'\nargs: ['{{ .db.host }}', '2']"),
                &StepLoaderRegistry::new(),
            )
            .unwrap();
        let task = bound_task(TaskConfig::default());
        let mut runner = RecordingRunner::default();
        let mut ctx = StepContext {
            task: &task,
            runner: &mut runner,
            caller: None,
        };

        assert_eq!(step.run(&mut ctx).unwrap(), "called");
        assert_eq!(
            runner.calls,
            vec![(
                "db.migrate".to_string(),
                vec!["db.local".to_string(), "2".to_string()],
                Some("prod".to_string()),
                "app.deploy".to_string()
            )]
        );
    }

    #[test]
    fn env_names_are_upper_snake_case() {
        let task = bound_task(TaskConfig::default());
        let env = env_from_vars(&task.vars);
        assert_eq!(env.get("DB_HOST").map(String::as_str), Some("db.local"));
        assert_eq!(env.get("ENV").map(String::as_str), Some("prod"));
    }

    #[cfg(unix)]
    #[test]
    fn script_step_renders_and_runs() {
        let step = ScriptStepLoader
            .load_step(
                &StepConfig::from_script("script", "echo {{ .env }}-$DB_HOST"),
                &StepLoaderRegistry::new(),
            )
            .unwrap();
        let task = bound_task(TaskConfig {
            autoenv: true,
            ..Default::default()
        });
        let mut runner = RecordingRunner::default();
        let mut ctx = StepContext {
            task: &task,
            runner: &mut runner,
            caller: None,
        };
        assert_eq!(step.run(&mut ctx).unwrap(), "prod-db.local");
    }
}
