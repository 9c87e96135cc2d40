//! Environment-variable source.
//!
//! Variables starting with a prefix (default `APP_`) become nested keys:
//! the remainder is lowercased and split on the separator (default `__`),
//! so `APP_DB__MAX_POOL=8` yields `{"db": {"max_pool": 8}}`. Numbers and
//! booleans are coerced; everything else stays a string.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ConfigSource;
use crate::creator::{InstanceBuilder, Settings, SourceSettings};
use crate::env::Environment;
use crate::error::{BoxError, ConfigError};
use crate::query::ConfigQuery;
use crate::tree::{scalar_from_str, ConfigTree};

pub const DEFAULT_PREFIX: &str = "APP_";
pub const DEFAULT_SEPARATOR: &str = "__";

pub struct EnvSource {
    name: String,
    prefix: String,
    separator: String,
    allow_errors: bool,
    env: Arc<dyn Environment>,
}

impl EnvSource {
    #[must_use]
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            name: "env".into(),
            prefix: DEFAULT_PREFIX.into(),
            separator: DEFAULT_SEPARATOR.into(),
            allow_errors: false,
            env,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn allowing_errors(mut self, allow: bool) -> Self {
        self.allow_errors = allow;
        self
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut root = Map::new();
        for (key, raw) in self.env.vars() {
            let Some(rest) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            let segments: Vec<String> = rest
                .split(self.separator.as_str())
                .map(str::to_ascii_lowercase)
                .filter(|s| !s.is_empty())
                .collect();
            if segments.is_empty() {
                continue;
            }
            insert_path(&mut root, &segments, scalar_from_str(&raw));
        }
        root
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    match current.get(last) {
        // A more specific variable already created an object here.
        Some(Value::Object(_)) => {}
        _ => {
            current.insert(last.clone(), value);
        }
    }
}

#[async_trait]
impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _query: &ConfigQuery) -> Result<ConfigTree, ConfigError> {
        Ok(ConfigTree::from(self.snapshot()))
    }

    fn allow_errors(&self) -> bool {
        self.allow_errors
    }
}

/// Builds an [`EnvSource`] from `prefix`, `separator`, `name` and `allow-errors`.
pub struct EnvSourceBuilder {
    env: Arc<dyn Environment>,
    prefix: String,
    separator: String,
    source: SourceSettings,
}

impl EnvSourceBuilder {
    #[must_use]
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            prefix: DEFAULT_PREFIX.into(),
            separator: DEFAULT_SEPARATOR.into(),
            source: SourceSettings::default(),
        }
    }
}

impl InstanceBuilder<Box<dyn ConfigSource>> for EnvSourceBuilder {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        self.prefix = settings.string_or("prefix", DEFAULT_PREFIX)?;
        self.separator = settings.string_or("separator", DEFAULT_SEPARATOR)?;
        if self.separator.is_empty() {
            return Err("env source separator cannot be empty".into());
        }
        self.source = SourceSettings::from_settings(settings)?;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Box<dyn ConfigSource>, BoxError> {
        Ok(Box::new(
            EnvSource::new(self.env)
                .with_prefix(self.prefix)
                .with_separator(self.separator)
                .named(self.source.name_or("env"))
                .allowing_errors(self.source.allow_errors),
        ))
    }
}
