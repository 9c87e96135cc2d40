//! `${NAME}` / `${NAME:-default}` substitution in string values.
//!
//! As in the shell, `:-` falls back to the default when the variable is
//! unset or empty. A plain `${NAME}` set to the empty string resolves to it.

use std::sync::Arc;

use async_trait::async_trait;

use super::ConfigTransformer;
use crate::creator::{InstanceBuilder, Settings};
use crate::env::Environment;
use crate::error::{BoxError, ConfigError};
use crate::tree::ConfigTree;

pub struct PlaceholderTransformer {
    env: Arc<dyn Environment>,
    allow_missing: bool,
}

impl PlaceholderTransformer {
    #[must_use]
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            allow_missing: false,
        }
    }

    /// Leave unresolved placeholders in place instead of failing.
    #[must_use]
    pub const fn allowing_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    fn resolve(&self, path: &str, input: &str) -> Result<Option<String>, ConfigError> {
        if !input.contains("${") {
            return Ok(None);
        }

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(ConfigError::Placeholder {
                    path: path.to_string(),
                    message: format!("unterminated placeholder in '{input}'"),
                });
            };
            let expr = &after[..end];
            let (name, default) = match expr.split_once(":-") {
                Some((name, default)) => (name.trim(), Some(default)),
                None => (expr.trim(), None),
            };
            let value = self
                .env
                .var(name)
                .filter(|v| default.is_none() || !v.is_empty())
                .or_else(|| default.map(ToString::to_string));
            match value {
                Some(value) => out.push_str(&value),
                None if self.allow_missing => out.push_str(&rest[start..start + 2 + end + 1]),
                None => {
                    return Err(ConfigError::Placeholder {
                        path: path.to_string(),
                        message: format!("placeholder '{name}' is not set"),
                    })
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(Some(out))
    }
}

#[async_trait]
impl ConfigTransformer for PlaceholderTransformer {
    fn name(&self) -> &str {
        "placeholders"
    }

    async fn transform(&self, tree: ConfigTree) -> Result<ConfigTree, ConfigError> {
        tree.map_strings(|path, value| self.resolve(path, value))
    }
}

pub struct PlaceholderTransformerBuilder {
    env: Arc<dyn Environment>,
    allow_missing: bool,
}

impl PlaceholderTransformerBuilder {
    #[must_use]
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            allow_missing: false,
        }
    }
}

impl InstanceBuilder<Box<dyn ConfigTransformer>> for PlaceholderTransformerBuilder {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        self.allow_missing = settings.bool_or("allow-missing", false)?;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Box<dyn ConfigTransformer>, BoxError> {
        Ok(Box::new(
            PlaceholderTransformer::new(self.env).allowing_missing(self.allow_missing),
        ))
    }
}
