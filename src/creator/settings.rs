//! Typed access to an implementation's configuration node.
//!
//! [`Settings`] is the node handed to [`InstanceBuilder::configure`](super::InstanceBuilder::configure)
//! with the `impl`/`type`/`enabled` selector keys removed. Keys are looked
//! up exactly first, then with `-` and `_` swapped, so `allow-errors` and
//! `allow_errors` are equivalent.
//!
//! [`CacheSettings`] and [`SourceSettings`] are small capability structs
//! that builders compose instead of inheriting shared parsing code.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

pub(crate) const SELECTOR_KEYS: [&str; 3] = ["impl", "type", "enabled"];

#[derive(Debug, Clone, Default)]
pub struct Settings {
    implementation: String,
    values: Map<String, Value>,
}

impl Settings {
    /// Settings for `implementation` from a configuration node.
    #[must_use]
    pub fn new(implementation: impl Into<String>, node: &Map<String, Value>) -> Self {
        let values = node
            .iter()
            .filter(|(k, _)| !SELECTOR_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            implementation: implementation.into(),
            values,
        }
    }

    /// Build from a JSON object literal, mostly for tests.
    #[must_use]
    pub fn from_value(implementation: impl Into<String>, value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::new(implementation, map),
            _ => Self::new(implementation, &Map::new()),
        }
    }

    #[must_use]
    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).or_else(|| {
            let alternate = if key.contains('-') {
                key.replace('-', "_")
            } else {
                key.replace('_', "-")
            };
            self.values.get(&alternate)
        })
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(key, "must be a string")),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.str(key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.invalid(key, "is required"))
    }

    pub fn string_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.str(key)?.unwrap_or(default).to_string())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(true),
                "false" | "no" | "off" => Ok(false),
                _ => Err(self.invalid(key, "must be a boolean")),
            },
            Some(_) => Err(self.invalid(key, "must be a boolean")),
        }
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "must be an integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.invalid(key, "must be an integer")),
            Some(_) => Err(self.invalid(key, "must be an integer")),
        }
    }

    /// A non-negative millisecond duration.
    pub fn duration_ms(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match self.i64(key)? {
            None => Ok(None),
            Some(ms) => u64::try_from(ms)
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|_| self.invalid(key, "cannot be negative")),
        }
    }

    /// Deserialize the value under `key`.
    pub fn deserialize<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .filter(|v| !v.is_null())
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| self.invalid(key, &e.to_string()))
            })
            .transpose()
    }

    fn invalid(&self, key: &str, problem: &str) -> ConfigError {
        ConfigError::InvalidSettings(format!("{}: '{key}' {problem}", self.implementation))
    }
}

/// `cache-ttl-ms`: how long fetched content may be reused. Zero or
/// negative disables caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheSettings {
    pub ttl_ms: i64,
}

impl CacheSettings {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            ttl_ms: settings.i64("cache-ttl-ms")?.unwrap_or(0),
        })
    }
}

/// Options shared by every config source: a display `name` override and
/// `allow-errors`, which turns fetch failures into a logged warning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSettings {
    pub name: Option<String>,
    pub allow_errors: bool,
}

impl SourceSettings {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            name: settings.str("name")?.map(ToString::to_string),
            allow_errors: settings.bool_or("allow-errors", false)?,
        })
    }

    #[must_use]
    pub fn name_or(&self, default: &str) -> String {
        self.name.clone().unwrap_or_else(|| default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selector_keys_are_stripped() {
        let s = Settings::from_value("file", &json!({"impl": "file", "enabled": true, "dir": "x"}));
        assert_eq!(s.keys().collect::<Vec<_>>(), vec!["dir"]);
        assert_eq!(s.implementation(), "file");
    }

    #[test]
    fn dash_and_underscore_keys_are_equivalent() {
        let s = Settings::from_value("env", &json!({"allow_errors": "yes", "cache-ttl-ms": "250"}));
        assert!(s.bool_or("allow-errors", false).unwrap());
        assert_eq!(s.i64("cache_ttl_ms").unwrap(), Some(250));
    }

    #[test]
    fn wrong_types_name_the_key() {
        let s = Settings::from_value("file", &json!({"directory": 5, "flag": "maybe"}));
        let err = s.str("directory").unwrap_err();
        assert!(err.to_string().contains("'directory'"));
        assert!(s.bool_or("flag", false).is_err());
        assert!(s.required_str("missing").is_err());
    }

    #[test]
    fn negative_duration_is_rejected() {
        let s = Settings::from_value("x", &json!({"timeout-ms": -1, "ok-ms": 1500}));
        assert!(s.duration_ms("timeout-ms").is_err());
        assert_eq!(s.duration_ms("ok-ms").unwrap(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn capability_structs_parse_defaults() {
        let s = Settings::from_value("x", &json!({}));
        assert_eq!(CacheSettings::from_settings(&s).unwrap().ttl_ms, 0);
        let source = SourceSettings::from_settings(&s).unwrap();
        assert!(!source.allow_errors);
        assert_eq!(source.name_or("file"), "file");
    }
}
