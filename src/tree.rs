//! Immutable configuration tree.
//!
//! [`ConfigTree`] wraps a `serde_json::Value` whose root is always an
//! object. Trees are never mutated in place: merging and transforming
//! produce new trees. Two trees are compared with structural equality to
//! decide whether observers must be notified.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{shared, ConfigError};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigTree {
    root: Map<String, Value>,
}

impl ConfigTree {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a tree from a JSON value. Non-object roots are rejected.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::empty()),
            other => Err(ConfigError::ConfigParse {
                path: "(root)".into(),
                source: shared(format!(
                    "configuration root must be an object, found {}",
                    kind_of(&other)
                )),
            }),
        }
    }

    /// Parse a document based on its file extension.
    pub fn parse(ext: &str, content: &str, path_display: &str) -> Result<Self, ConfigError> {
        let value = parse_value(ext, content, path_display)?;
        Self::from_value(value).map_err(|e| match e {
            ConfigError::ConfigParse { source, .. } => ConfigError::ConfigParse {
                path: path_display.to_string(),
                source,
            },
            other => other,
        })
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up a dotted path. A numeric segment indexes into an array.
    /// The empty path is not addressable; use [`ConfigTree::as_map`].
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path_segments(path);
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether `path` exists, including when it holds an explicit `null`.
    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Deserialize the value at `path`, coercing string scalars.
    ///
    /// Returns `Ok(None)` when the path is missing.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        self.get(path)
            .map(|value| coerce_into(value.clone(), path))
            .transpose()
    }

    /// The object at `path` as a tree of its own. The empty path is the root.
    #[must_use]
    pub fn subtree(&self, path: &str) -> Option<Self> {
        if path.trim().is_empty() {
            return Some(self.clone());
        }
        match self.get(path)? {
            Value::Object(map) => Some(Self { root: map.clone() }),
            _ => None,
        }
    }

    /// Return a new tree where `overlay` wins on every conflicting key.
    ///
    /// Objects merge recursively; any other overlay value replaces the
    /// base value, arrays included.
    #[must_use]
    pub fn merged_with(&self, overlay: &Self) -> Self {
        let mut root = self.root.clone();
        merge_maps(&mut root, &overlay.root);
        Self { root }
    }

    /// Rebuild the tree with `f` applied to every string leaf.
    pub fn map_strings<F>(&self, mut f: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str, &str) -> Result<Option<String>, ConfigError>,
    {
        let mut root = Map::with_capacity(self.root.len());
        for (key, value) in &self.root {
            root.insert(key.clone(), map_strings_in(value, key, &mut f)?);
        }
        Ok(Self { root })
    }

    /// Lowercase hex SHA-256 of the canonical JSON serialization.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.root).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical))
    }
}

impl From<Map<String, Value>> for ConfigTree {
    fn from(root: Map<String, Value>) -> Self {
        Self { root }
    }
}

impl TryFrom<Value> for ConfigTree {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl std::fmt::Display for ConfigTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.root) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').map(str::trim).filter(|s| !s.is_empty())
}

fn merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn map_strings_in<F>(value: &Value, path: &str, f: &mut F) -> Result<Value, ConfigError>
where
    F: FnMut(&str, &str) -> Result<Option<String>, ConfigError>,
{
    Ok(match value {
        Value::String(s) => match f(path, s)? {
            Some(replaced) => Value::String(replaced),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| map_strings_in(item, &format!("{path}.{i}"), &mut *f))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), map_strings_in(item, &format!("{path}.{key}"), &mut *f)?);
            }
            Value::Object(out)
        }
        _ => value.clone(),
    })
}

/// Deserialize `value`, re-reading a string as a JSON scalar when the
/// direct attempt fails (`"8080"` → `8080`, `"true"` → `true`).
pub(crate) fn coerce_into<T: DeserializeOwned>(value: Value, path: &str) -> Result<T, ConfigError> {
    let fallback = match &value {
        Value::String(s) => serde_json::from_str::<Value>(s.trim())
            .ok()
            .filter(|v| !v.is_object() && !v.is_array()),
        _ => None,
    };
    match serde_json::from_value::<T>(value) {
        Ok(v) => Ok(v),
        Err(first) => match fallback {
            Some(scalar) => serde_json::from_value::<T>(scalar).map_err(|_| ConfigError::Extract {
                path: path.to_string(),
                message: first.to_string(),
            }),
            None => Err(ConfigError::Extract {
                path: path.to_string(),
                message: first.to_string(),
            }),
        },
    }
}

pub(crate) fn scalar_from_str(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a document into a JSON value based on file extension.
pub fn parse_value(ext: &str, content: &str, path_display: &str) -> Result<Value, ConfigError> {
    let parse_err = |e: Box<dyn std::error::Error + Send + Sync>| ConfigError::ConfigParse {
        path: path_display.to_string(),
        source: Arc::from(e),
    };

    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| parse_err(Box::new(e))),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| parse_err(Box::new(e))),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| parse_err(Box::new(e))),

        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
