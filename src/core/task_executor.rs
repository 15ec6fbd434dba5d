// src/core/task_executor.rs

use crate::{
    core::{
        step::{StepContext, StepError, TaskRunner},
        value::Value,
    },
    models::{TaskConfig, TaskKey},
};
use colored::*;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A task definition paired with its fully resolved variables, built right before execution.
#[derive(Debug, Clone)]
pub struct BoundTask {
    pub key: TaskKey,
    pub config: Arc<TaskConfig>,
    pub vars: Value,
    /// Directory holding the task document; used by `autodir` tasks.
    pub base_dir: Option<PathBuf>,
}

/// Executes the steps of a bound task.
pub trait TaskExecutor: fmt::Debug {
    fn execute(
        &self,
        task: &BoundTask,
        runner: &mut dyn TaskRunner,
        caller: Option<&TaskKey>,
    ) -> Result<String, StepError>;
}

/// Runs steps one after the other and returns the output of the last one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialExecutor;

impl TaskExecutor for SequentialExecutor {
    fn execute(
        &self,
        task: &BoundTask,
        runner: &mut dyn TaskRunner,
        caller: Option<&TaskKey>,
    ) -> Result<String, StepError> {
        if task.config.steps.is_empty() {
            log::debug!("Task {} has no steps. Nothing to execute.", task.key);
            return Ok(String::new());
        }

        let mut ctx = StepContext {
            task,
            runner,
            caller,
        };
        let mut output = String::new();
        for step in &task.config.steps {
            if log::log_enabled!(log::Level::Info) {
                log::info!("{} {} {}", "→".blue(), task.key, step.name().green());
            }
            output = step.run(&mut ctx)?;
            log::debug!("Step '{}' of {} produced: {}", step.name(), task.key, output);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::ResolutionError;
    use crate::core::step::Step;
    use crate::models::ProvidedInputs;

    #[derive(Debug)]
    struct EchoVar(&'static str);

    impl Step for EchoVar {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, ctx: &mut StepContext<'_>) -> Result<String, StepError> {
            Ok(ctx
                .task
                .vars
                .get_dotted(self.0)
                .map(Value::render)
                .unwrap_or_default())
        }
    }

    #[derive(Debug)]
    struct NoRunner;

    impl TaskRunner for NoRunner {
        fn run_task(
            &mut self,
            name: &str,
            _args: &[String],
            _provided: &ProvidedInputs,
            _caller: &TaskKey,
        ) -> Result<String, ResolutionError> {
            Err(ResolutionError::TaskNotFound {
                key: name.to_string(),
            })
        }
    }

    fn bound(steps: Vec<Arc<dyn Step>>) -> BoundTask {
        let mut vars = Value::new_map();
        vars.set_path(&["first"], "one".into());
        vars.set_path(&["second"], "two".into());
        BoundTask {
            key: TaskKey::from_string("app.t").unwrap(),
            config: Arc::new(TaskConfig {
                name: "t".into(),
                steps,
                ..Default::default()
            }),
            vars,
            base_dir: None,
        }
    }

    #[test]
    fn returns_output_of_the_last_step() {
        let task = bound(vec![Arc::new(EchoVar("first")), Arc::new(EchoVar("second"))]);
        let out = SequentialExecutor.execute(&task, &mut NoRunner, None).unwrap();
        assert_eq!(out, "two");
    }

    #[test]
    fn stepless_tasks_produce_empty_output() {
        let task = bound(Vec::new());
        assert_eq!(SequentialExecutor.execute(&task, &mut NoRunner, None).unwrap(), "");
    }
}
