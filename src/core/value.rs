// src/core/value.rs

//! # Variable Tree
//!
//! `Value` is the typed replacement for an untyped nested map: resolved inputs,
//! bound task variables, cached task outputs and merged settings are all trees
//! of strings, lists and string-keyed maps addressed by dotted paths.

use crate::constants::PATH_DELIMITER;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A node of a variable tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// The shape of a `Value`, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::List => "list",
            Self::Map => "mapping",
        };
        f.write_str(name)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Self::List(values.into_iter().map(Self::String).collect())
    }
}

/// Splits a dotted path into its segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_DELIMITER).collect()
}

impl Value {
    /// Creates an empty map node.
    pub fn new_map() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up the node at `path` (a slice of segments). An empty path returns `self`.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            current = current.as_map()?.get(*segment)?;
        }
        Some(current)
    }

    /// Looks up the node at a dotted path such as `db.host`.
    pub fn get_dotted(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        self.get_path(&split_path(path))
    }

    /// Stores `value` at `path`, creating intermediate maps as needed.
    ///
    /// Any non-map node found along the way is replaced by a map, so this
    /// operation never fails. Setting an empty path replaces `self`.
    pub fn set_path(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return;
        };

        let mut current = self;
        for segment in parents {
            current = current.ensure_map().entry((*segment).to_string()).or_default();
        }
        current.ensure_map().insert((*last).to_string(), value);
    }

    /// Merges `other` into `self`. Values already present in `self` win; when both
    /// sides hold a map at the same path the merge recurses instead of replacing.
    pub fn deep_merge(&mut self, other: Value) {
        // Conflicting leaves keep ours.
        if let (Self::Map(mine), Self::Map(theirs)) = (self, other) {
            for (key, their_value) in theirs {
                match mine.get_mut(&key) {
                    Some(my_value) => my_value.deep_merge(their_value),
                    None => {
                        mine.insert(key, their_value);
                    }
                }
            }
        }
    }

    /// Like [`Value::deep_merge`], but `other` wins on conflicts. Used for settings layering.
    pub fn deep_override(&mut self, other: Value) {
        match (self, other) {
            (Self::Map(mine), Self::Map(theirs)) => {
                for (key, their_value) in theirs {
                    match mine.get_mut(&key) {
                        Some(my_value) => my_value.deep_override(their_value),
                        None => {
                            mine.insert(key, their_value);
                        }
                    }
                }
            }
            (mine, theirs) => *mine = theirs,
        }
    }

    /// Flattens the tree into dotted keys. List items are addressed by index.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into(&self, prefix: String, out: &mut BTreeMap<String, String>) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}{PATH_DELIMITER}{key}")
            }
        };
        match self {
            Self::String(s) => {
                out.insert(prefix, s.clone());
            }
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.flatten_into(join(&i.to_string()), out);
                }
            }
            Self::Map(map) => {
                for (key, value) in map {
                    value.flatten_into(join(key), out);
                }
            }
        }
    }

    /// Renders the node for substitution into a script: strings verbatim,
    /// lists space-joined, maps as compact JSON.
    pub fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::render)
                .collect::<Vec<_>>()
                .join(" "),
            Self::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    fn ensure_map(&mut self) -> &mut BTreeMap<String, Value> {
        if !matches!(self, Self::Map(_)) {
            *self = Self::new_map();
        }
        match self {
            Self::Map(map) => map,
            _ => unreachable!("node was just turned into a map"),
        }
    }
}

// --- Conversions from decoded documents ---

/// Renders a scalar YAML key or value as a string. Returns `None` for null and collections.
pub(crate) fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Value {
    /// Converts a decoded YAML value. Scalars become strings, nulls are dropped
    /// (returns `None`) and scalar map keys are stringified.
    pub fn from_yaml(value: serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::Sequence(items) => {
                Some(Self::List(items.into_iter().filter_map(Self::from_yaml).collect()))
            }
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (key, value) in mapping {
                    let Some(key) = yaml_scalar_to_string(&key) else {
                        log::warn!("Ignoring settings entry with a non-scalar key: {:?}", key);
                        continue;
                    };
                    if let Some(value) = Self::from_yaml(value) {
                        map.insert(key, value);
                    }
                }
                Some(Self::Map(map))
            }
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(tagged.value),
            scalar => yaml_scalar_to_string(&scalar).map(Self::String),
        }
    }

    /// Converts a decoded TOML value. Scalars (including datetimes) become strings.
    pub fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Self::String(s),
            toml::Value::Integer(i) => Self::String(i.to_string()),
            toml::Value::Float(f) => Self::String(f.to_string()),
            toml::Value::Boolean(b) => Self::String(b.to_string()),
            toml::Value::Datetime(d) => Self::String(d.to_string()),
            toml::Value::Array(items) => Self::List(items.into_iter().map(Self::from_toml).collect()),
            toml::Value::Table(table) => Self::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_toml(v)))
                    .collect(),
            ),
        }
    }
}
