//! Bean mapping: turning a configuration subtree into a typed value.
//!
//! A [`BeanMapper`] prepares the JSON subtree (key normalization and the
//! like); the caller then deserializes it with serde. The default
//! [`RelaxedMapper`] accepts `kebab-case` and `camelCase` keys for
//! `snake_case` fields.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

pub trait BeanMapper: Send + Sync {
    fn name(&self) -> &'static str;

    fn prepare(&self, value: Value, path: &str) -> Result<Value, ConfigError>;
}

/// Prepare `value` with `mapper` and deserialize it into `T`.
pub fn map_bean<T: DeserializeOwned>(
    mapper: &dyn BeanMapper,
    value: Value,
    path: &str,
) -> Result<T, ConfigError> {
    let prepared = mapper.prepare(value, path)?;
    serde_json::from_value(prepared).map_err(|e| ConfigError::Extract {
        path: display_path(path),
        message: format!("{} mapper: {e}", mapper.name()),
    })
}

/// Rewrites object keys to `snake_case`, recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaxedMapper;

impl BeanMapper for RelaxedMapper {
    fn name(&self) -> &'static str {
        "relaxed"
    }

    fn prepare(&self, value: Value, _path: &str) -> Result<Value, ConfigError> {
        Ok(normalize_keys(value))
    }
}

/// Passes the subtree through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictMapper;

impl BeanMapper for StrictMapper {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn prepare(&self, value: Value, _path: &str) -> Result<Value, ConfigError> {
        Ok(value)
    }
}

fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(snake_case(&key), normalize_keys(item));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "(root)".into()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pool {
        max_size: u32,
        idle_timeout_ms: u64,
    }

    #[test]
    fn snake_case_handles_kebab_and_camel() {
        assert_eq!(snake_case("max-size"), "max_size");
        assert_eq!(snake_case("idleTimeoutMs"), "idle_timeout_ms");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("HTTPPort"), "httpport");
    }

    #[test]
    fn relaxed_mapper_accepts_kebab_case() {
        let pool: Pool = map_bean(
            &RelaxedMapper,
            json!({"max-size": 10, "idleTimeoutMs": 500}),
            "db.pool",
        )
        .unwrap();
        assert_eq!(
            pool,
            Pool {
                max_size: 10,
                idle_timeout_ms: 500
            }
        );
    }

    #[test]
    fn strict_mapper_reports_path() {
        let err = map_bean::<Pool>(&StrictMapper, json!({"max-size": 10}), "db.pool").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("db.pool"));
        assert!(message.contains("strict"));
    }
}
