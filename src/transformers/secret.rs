//! Secret references resolved through a cached value provider.
//!
//! String values of the form `secret:<key>` are replaced with whatever the
//! [`ValueProvider`] returns for `<key>`. Fetched values are kept in a
//! [`TtlCache`] so a refresh does not hit the provider for every secret
//! every time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::ConfigTransformer;
use crate::cache::{SystemClock, TtlCache};
use crate::creator::{CacheSettings, InstanceBuilder, Settings};
use crate::error::{BoxError, ConfigError};
use crate::tree::ConfigTree;

pub const DEFAULT_PREFIX: &str = "secret:";

#[async_trait]
pub trait ValueProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, key: &str) -> Result<String, ConfigError>;
}

/// Reads `<directory>/<key>`, trimming surrounding whitespace, the way
/// mounted secret volumes are laid out.
pub struct FileValueProvider {
    directory: PathBuf,
}

impl FileValueProvider {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl ValueProvider for FileValueProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, key: &str) -> Result<String, ConfigError> {
        if key.is_empty() || key.contains(['/', '\\']) || key == ".." || key == "." {
            return Err(ConfigError::InvalidSettings(format!(
                "secret key '{key}' is not a plain file name"
            )));
        }
        let path = self.directory.join(key);
        tokio::fs::read_to_string(&path)
            .await
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::io(&path, e))
    }
}

pub struct SecretTransformer {
    prefix: String,
    provider: Arc<dyn ValueProvider>,
    cache: TtlCache<String, String>,
}

impl SecretTransformer {
    #[must_use]
    pub fn new(provider: Arc<dyn ValueProvider>, cache: TtlCache<String, String>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.into(),
            provider,
            cache,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key_of<'a>(&self, value: &'a str) -> Option<&'a str> {
        value.strip_prefix(self.prefix.as_str()).map(str::trim)
    }

    async fn lookup(&self, key: &str) -> Result<String, ConfigError> {
        if let Some(hit) = self.cache.get(&key.to_string()) {
            return Ok(hit);
        }
        tracing::debug!(provider = self.provider.name(), key, "fetching secret");
        let value = self.provider.fetch(key).await?;
        Ok(self.cache.put(key.to_string(), value))
    }
}

#[async_trait]
impl ConfigTransformer for SecretTransformer {
    fn name(&self) -> &str {
        "secrets"
    }

    async fn transform(&self, tree: ConfigTree) -> Result<ConfigTree, ConfigError> {
        let mut keys = Vec::new();
        collect_keys(&tree.to_value(), &mut |s| {
            if let Some(key) = self.key_of(s) {
                keys.push(key.to_string());
            }
        });
        if keys.is_empty() {
            return Ok(tree);
        }

        let mut resolved = BTreeMap::new();
        for key in keys {
            if !resolved.contains_key(&key) {
                let value = self.lookup(&key).await?;
                resolved.insert(key, value);
            }
        }

        tree.map_strings(|_, value| {
            Ok(self
                .key_of(value)
                .and_then(|key| resolved.get(key))
                .cloned())
        })
    }
}

fn collect_keys(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| collect_keys(v, f)),
        Value::Object(map) => map.values().for_each(|v| collect_keys(v, f)),
        _ => {}
    }
}

/// Builds a [`SecretTransformer`] over a [`FileValueProvider`] from
/// `directory`, `prefix` and `cache-ttl-ms`.
#[derive(Default)]
pub struct SecretTransformerBuilder {
    directory: Option<PathBuf>,
    prefix: Option<String>,
    cache: CacheSettings,
}

impl InstanceBuilder<Box<dyn ConfigTransformer>> for SecretTransformerBuilder {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        self.directory = Some(PathBuf::from(settings.required_str("directory")?));
        self.prefix = settings.str("prefix")?.map(ToString::to_string);
        self.cache = CacheSettings::from_settings(settings)?;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Box<dyn ConfigTransformer>, BoxError> {
        let directory = self.directory.ok_or("secrets transformer needs a directory")?;
        let cache = TtlCache::from_millis(self.cache.ttl_ms, Arc::new(SystemClock));
        let transformer = SecretTransformer::new(Arc::new(FileValueProvider::new(directory)), cache)
            .with_prefix(self.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()));
        Ok(Box::new(transformer))
    }
}
