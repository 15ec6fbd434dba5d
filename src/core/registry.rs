// src/core/registry.rs

use crate::constants::PATH_DELIMITER;
use crate::core::application::ResolutionError;
use crate::models::{KeyError, TaskConfig, TaskKey};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Flat index of an ingested task tree, keyed by full dotted task name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<TaskConfig>>,
}

impl TaskRegistry {
    /// Indexes `root` under the key `app_name` and every descendant under its
    /// parent's key extended by its own name.
    pub fn new(app_name: &str, root: Arc<TaskConfig>) -> Result<Self, KeyError> {
        let mut registry = Self::default();
        let root_key = TaskKey::root(app_name)?;
        registry.index(root_key, root)?;
        log::debug!("Task registry holds {} task(s).", registry.tasks.len());
        Ok(registry)
    }

    fn index(&mut self, key: TaskKey, config: Arc<TaskConfig>) -> Result<(), KeyError> {
        let name = key.to_string();
        if self.tasks.insert(name.clone(), Arc::clone(&config)).is_some() {
            log::warn!("Task '{}' is defined more than once; the last definition wins.", name);
            let prefix = format!("{name}{PATH_DELIMITER}");
            self.tasks.retain(|k, _| !k.starts_with(&prefix));
        }

        for child in &config.tasks {
            let child_key = key.child(&child.name)?;
            self.index(child_key, Arc::clone(child))?;
        }
        Ok(())
    }

    pub fn find_task(&self, key: &TaskKey) -> Result<Arc<TaskConfig>, ResolutionError> {
        self.tasks
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| ResolutionError::TaskNotFound {
                key: key.to_string(),
            })
    }

    /// Every task keyed by its full dotted name.
    pub fn tasks(&self) -> &BTreeMap<String, Arc<TaskConfig>> {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, description: &str, tasks: Vec<TaskConfig>) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            description: description.to_string(),
            tasks: tasks.into_iter().map(Arc::new).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn indexes_the_tree_by_full_name() {
        let root = task(
            "",
            "",
            vec![
                task("greet", "", vec![]),
                task("db", "", vec![task("migrate", "", vec![])]),
            ],
        );
        let registry = TaskRegistry::new("app", Arc::new(root)).unwrap();

        let names: Vec<_> = registry.tasks().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["app", "app.db", "app.db.migrate", "app.greet"]);

        let migrate = registry
            .find_task(&TaskKey::from_string("app.db.migrate").unwrap())
            .unwrap();
        assert_eq!(migrate.name, "migrate");
    }

    #[test]
    fn unknown_keys_are_not_found() {
        let registry = TaskRegistry::new("app", Arc::new(task("", "", vec![]))).unwrap();
        let err = registry
            .find_task(&TaskKey::from_string("app.nope").unwrap())
            .unwrap_err();
        assert!(matches!(err, ResolutionError::TaskNotFound { key } if key == "app.nope"));
    }

    #[test]
    fn duplicate_names_keep_the_last_definition() {
        let root = task(
            "",
            "",
            vec![task("build", "first", vec![]), task("build", "second", vec![])],
        );
        let registry = TaskRegistry::new("app", Arc::new(root)).unwrap();
        assert_eq!(registry.len(), 2);
        let build = registry
            .find_task(&TaskKey::from_string("app.build").unwrap())
            .unwrap();
        assert_eq!(build.description, "second");
    }

    #[test]
    fn rejects_child_names_with_delimiters() {
        let root = task("", "", vec![task("a.b", "", vec![])]);
        assert!(matches!(
            TaskRegistry::new("app", Arc::new(root)),
            Err(KeyError::MalformedKey { .. })
        ));
    }

    #[test]
    fn replaced_definitions_take_their_children_with_them() {
        let root = task(
            "",
            "",
            vec![
                task("builder", "", vec![task("step", "", vec![])]),
                task("build", "first", vec![task("old", "", vec![])]),
                task("build", "second", vec![task("new", "", vec![])]),
            ],
        );
        let registry = TaskRegistry::new("app", Arc::new(root)).unwrap();

        let names: Vec<_> = registry.tasks().keys().map(String::as_str).collect();
        assert_eq!(names, vec![
                "app",
                "app.build",
                "app.build.new",
                "app.builder",
                "app.builder.step"
            ]);
        assert!(matches!(
            registry.find_task(&TaskKey::from_string("app.build.old").unwrap()),
            Err(ResolutionError::TaskNotFound { .. })
        ));
    }
}
