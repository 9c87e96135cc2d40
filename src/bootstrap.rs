//! Building a [`ReloadableConfig`] from a bootstrap document.
//!
//! The bootstrap document names the sources and transformers by their
//! registered implementation and carries their settings inline:
//!
//! ```yaml
//! sources:
//!   - impl: file
//!     directory: /etc/billing
//!     format: yaml
//!   - impl: env
//!     prefix: BILLING_
//! transformers:
//!   - impl: placeholders
//! refresh-interval-ms: 30000
//! get-timeout-ms: 10000
//! reverse-update-order: false
//! mapper: relaxed
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::env::{Environment, ProcessEnvironment};
use crate::error::ConfigError;
use crate::mapper::{BeanMapper, RelaxedMapper, StrictMapper};
use crate::query::ConfigQuery;
use crate::reloadable::NotifyOrder;
use crate::reloadable_config::{ReloadableConfig, DEFAULT_GET_TIMEOUT};
use crate::sources::{self, SourceRegistry};
use crate::transformers::{self, TransformerRegistry};
use crate::tree::ConfigTree;

/// The source and transformer registries, fixed after construction.
#[derive(Debug, Clone)]
pub struct Registries {
    pub sources: Arc<SourceRegistry>,
    pub transformers: Arc<TransformerRegistry>,
}

impl Registries {
    /// Built-in implementations reading the process environment.
    #[must_use]
    pub fn builtin() -> Self {
        Self::with_environment(Arc::new(ProcessEnvironment))
    }

    /// Built-in implementations reading `env`.
    #[must_use]
    pub fn with_environment(env: Arc<dyn Environment>) -> Self {
        let mut source_registry = SourceRegistry::new("config source");
        sources::register_builtin(&mut source_registry, env.clone());
        let mut transformer_registry = TransformerRegistry::new("config transformer");
        transformers::register_builtin(&mut transformer_registry, env);
        Self::new(source_registry, transformer_registry)
    }

    #[must_use]
    pub fn new(sources: SourceRegistry, transformers: TransformerRegistry) -> Self {
        Self {
            sources: Arc::new(sources),
            transformers: Arc::new(transformers),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapperKind {
    #[default]
    Relaxed,
    Strict,
}

impl MapperKind {
    fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "relaxed" => Ok(Self::Relaxed),
            "strict" => Ok(Self::Strict),
            other => Err(ConfigError::InvalidSettings(format!(
                "bootstrap: unknown mapper '{other}' (expected relaxed or strict)"
            ))),
        }
    }

    fn mapper(self) -> Arc<dyn BeanMapper> {
        match self {
            Self::Relaxed => Arc::new(RelaxedMapper),
            Self::Strict => Arc::new(StrictMapper),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap {
    sources: Vec<Value>,
    transformers: Vec<Value>,
    refresh_interval: Option<Duration>,
    get_timeout: Duration,
    reverse_update_order: bool,
    mapper: MapperKind,
}

impl Bootstrap {
    pub fn from_tree(tree: &ConfigTree) -> Result<Self, ConfigError> {
        let refresh_interval = millis(tree, "refresh-interval-ms")?.filter(|d| !d.is_zero());
        let get_timeout = millis(tree, "get-timeout-ms")?.unwrap_or(DEFAULT_GET_TIMEOUT);
        let reverse_update_order = tree
            .get_as::<bool>("reverse-update-order")?
            .unwrap_or(false);
        let mapper = tree
            .get_as::<String>("mapper")?
            .map(|name| MapperKind::parse(&name))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            sources: list(tree, "sources")?,
            transformers: list(tree, "transformers")?,
            refresh_interval,
            get_timeout,
            reverse_update_order,
            mapper,
        })
    }

    #[must_use]
    pub fn source_nodes(&self) -> &[Value] {
        &self.sources
    }

    #[must_use]
    pub fn transformer_nodes(&self) -> &[Value] {
        &self.transformers
    }

    #[must_use]
    pub const fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    /// Override the refresh interval; zero disables periodic refresh.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    #[must_use]
    pub const fn get_timeout(&self) -> Duration {
        self.get_timeout
    }

    #[must_use]
    pub const fn mapper(&self) -> MapperKind {
        self.mapper
    }

    /// Create every enabled source and transformer and assemble the config.
    pub fn build(
        &self,
        registries: &Registries,
        query: ConfigQuery,
    ) -> Result<ReloadableConfig, ConfigError> {
        let sources = registries.sources.create_all(&self.sources)?;
        let transformers = registries.transformers.create_all(&self.transformers)?;
        if sources.is_empty() {
            tracing::warn!(query = %query, "bootstrap defines no enabled config source");
        }
        tracing::debug!(
            query = %query,
            sources = sources.len(),
            transformers = transformers.len(),
            mapper = ?self.mapper,
            "building reloadable config"
        );

        let order = if self.reverse_update_order {
            NotifyOrder::Reverse
        } else {
            NotifyOrder::Registration
        };
        let mut builder = ReloadableConfig::builder(query)
            .sources(sources)
            .transformers(transformers)
            .mapper(self.mapper.mapper())
            .update_order(order)
            .get_timeout(self.get_timeout);
        if let Some(interval) = self.refresh_interval {
            builder = builder.refresh_interval(interval);
        }
        Ok(builder.build())
    }
}

fn millis(tree: &ConfigTree, key: &str) -> Result<Option<Duration>, ConfigError> {
    match tree.get_as::<i64>(key)? {
        Some(ms) if ms < 0 => Err(ConfigError::InvalidSettings(format!(
            "bootstrap: '{key}' must not be negative"
        ))),
        Some(ms) => Ok(Some(Duration::from_millis(ms.unsigned_abs()))),
        None => Ok(None),
    }
}

fn list(tree: &ConfigTree, key: &str) -> Result<Vec<Value>, ConfigError> {
    match tree.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ConfigError::InvalidSettings(format!(
            "bootstrap: '{key}' must be a list"
        ))),
    }
}

/// Read and parse a bootstrap file; the format follows its extension.
pub async fn load_bootstrap_file(path: &Path) -> Result<Bootstrap, ConfigError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::io(path, e)
        }
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let tree = ConfigTree::parse(ext, &content, &path.display().to_string())?;
    Bootstrap::from_tree(&tree)
}
