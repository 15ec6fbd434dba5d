// src/core/config_source.rs

use crate::constants::{
    ENVIRONMENTS_DIR, FLAGS_SECTION, PATH_DELIMITER, USER_CONFIG_BASENAME, USER_CONFIG_DIR,
};
use crate::core::value::{Value, split_path};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in settings file '{path}'")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid TOML in settings file '{path}'")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Could not expand settings path '{path}': {reason}")]
    Expand { path: String, reason: String },
    #[error("Settings file '{path}' must contain a mapping at its top level.")]
    NotAMapping { path: String },
    #[error("Invalid flag '{flag}': expected KEY=VALUE with a non-empty key.")]
    InvalidFlag { flag: String },
}

/// Read access to configuration values addressed by dotted paths.
///
/// Absence (`None`) is distinct from an empty string.
pub trait ConfigSource: fmt::Debug {
    /// The raw value at `path`, if any.
    fn get(&self, path: &str) -> Option<&Value>;

    /// The value at `path` if it is a string.
    fn get_string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// A scoped view of the mapping at `path`.
    fn sub(&self, path: &str) -> Option<Section<'_>> {
        self.get(path).and_then(Value::as_map).map(Section)
    }
}

/// A borrowed view over one mapping of a configuration source.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a>(&'a BTreeMap<String, Value>);

impl ConfigSource for Section<'_> {
    fn get(&self, path: &str) -> Option<&Value> {
        let segments = split_path(path);
        let (first, rest) = segments.split_first()?;
        self.0.get(*first)?.get_path(rest)
    }
}

/// The merged settings tree the engine reads configuration from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    root: Value,
    /// Command-line flags keyed by their literal dotted key, so that `greet` and
    /// `greet.name` can both be set.
    flags: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(root: Value) -> Self {
        let mut settings = Self::new();
        settings.merge_layer(root);
        settings
    }

    /// Parses a YAML settings document.
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
        Ok(Self::from_value(Value::from_yaml(doc).unwrap_or_default()))
    }

    /// Layers `layer` on top of the current settings; its values win on conflicts.
    pub fn merge_layer(&mut self, layer: Value) {
        if !matches!(layer, Value::Map(_)) {
            log::warn!("Ignoring settings layer that is not a mapping.");
            return;
        }
        self.root.deep_override(layer);
    }

    /// Stores a single value at a dotted path, replacing whatever was there.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        self.root.set_path(&split_path(path), value.into());
    }

    /// Records a `--set KEY=VALUE` flag, readable as `flags.<KEY>`. Flags win over
    /// any `flags` section read from settings files.
    pub fn set_flag(&mut self, key: &str, value: &str) {
        if self.flags.insert(key.to_string(), Value::from(value)).is_some() {
            log::warn!("Flag '{}' was given more than once; the last value wins.", key);
        }
    }
}

impl ConfigSource for Settings {
    fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let flag = path
            .strip_prefix(FLAGS_SECTION)
            .and_then(|rest| rest.strip_prefix(PATH_DELIMITER))
            .and_then(|key| self.flags.get(key));
        flag.or_else(|| self.root.get_dotted(path))
    }
}

// --- LAYERED LOADING ---

/// Where the settings layers come from, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct SettingsOptions {
    /// Read `<config_dir>/strata/config.{yaml,yml,toml}` when present.
    pub user_config: bool,
    /// Name of the run environment; selects `environments/<env>.yaml`.
    pub env: Option<String>,
    /// Directory holding the task document.
    pub task_dir: Option<PathBuf>,
    /// Explicit settings files, applied in order.
    pub config_files: Vec<String>,
    /// `KEY=VALUE` overrides, stored under `flags.<KEY>`.
    pub flags: Vec<(String, String)>,
}

/// Splits a `KEY=VALUE` flag at the first `=`.
pub fn parse_flag(flag: &str) -> Result<(String, String), SettingsError> {
    match flag.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(SettingsError::InvalidFlag {
            flag: flag.to_string(),
        }),
    }
}

/// Builds the merged settings from every configured layer.
pub fn load_settings(options: &SettingsOptions) -> Result<Settings, SettingsError> {
    let mut settings = Settings::new();

    if let Some(path) = options.user_config.then(user_config_file).flatten() {
        log::debug!("Loading user settings from {}", path.display());
        settings.merge_layer(read_settings_file(&path)?);
    }

    if let (Some(env), Some(dir)) = (&options.env, &options.task_dir) {
        let path = dir.join(ENVIRONMENTS_DIR).join(format!("{env}.yaml"));
        if path.is_file() {
            log::debug!("Loading environment '{}' from {}", env, path.display());
            settings.merge_layer(read_settings_file(&path)?);
        } else {
            log::warn!(
                "Environment '{}' has no settings file at {}.",
                env,
                path.display()
            );
        }
    }

    for raw in &options.config_files {
        let path = expand_path(raw)?;
        log::debug!("Loading settings from {}", path.display());
        settings.merge_layer(read_settings_file(&path)?);
    }

    for (key, value) in &options.flags {
        settings.set_flag(key, value);
    }

    Ok(settings)
}

fn user_config_file() -> Option<PathBuf> {
    let dir = dirs::config_dir()?.join(USER_CONFIG_DIR);
    ["yaml", "yml", "toml"]
        .iter()
        .map(|ext| dir.join(format!("{USER_CONFIG_BASENAME}.{ext}")))
        .find(|path| path.is_file())
}

/// Expands `~` and environment variables in a settings path.
fn expand_path(raw: &str) -> Result<PathBuf, SettingsError> {
    let expanded = shellexpand::full(raw).map_err(|e| SettingsError::Expand {
        path: raw.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Reads a YAML or TOML settings file, chosen by extension. Anything that is not
/// `.toml` is read as YAML.
pub fn read_settings_file(path: &Path) -> Result<Value, SettingsError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: display.clone(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let value = if is_toml {
        let table: toml::Table = toml::from_str(&content).map_err(|source| SettingsError::Toml {
            path: display.clone(),
            source,
        })?;
        Value::from_toml(toml::Value::Table(table))
    } else {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|source| SettingsError::Yaml {
                path: display.clone(),
                source,
            })?;
        // An empty file is an empty layer.
        Value::from_yaml(doc).unwrap_or_default()
    };

    match value {
        Value::Map(_) => Ok(value),
        _ => Err(SettingsError::NotAMapping { path: display }),
    }
}
