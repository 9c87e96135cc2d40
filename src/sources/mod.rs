//! Pluggable configuration backends.
//!
//! Defines the [`ConfigSource`] trait and the built-in implementations:
//! layered files ([`file_source`]), prefixed environment variables
//! ([`env_source`]) and fixed in-memory trees ([`inline`]). File formats
//! are gated by the `yaml`, `json` and `toml` features.

pub mod env_source;
pub mod file_source;
pub mod inline;

use std::sync::Arc;

use async_trait::async_trait;

use crate::creator::{CreatorEntry, InstanceCreatorRegistry};
use crate::env::Environment;
use crate::error::ConfigError;
use crate::query::ConfigQuery;
use crate::tree::ConfigTree;

pub use env_source::EnvSource;
pub use file_source::{FileFormat, FileSource};
pub use inline::InlineSource;

// Boxed as `dyn ConfigSource`, so native async fn in traits is not an option.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, query: &ConfigQuery) -> Result<ConfigTree, ConfigError>;

    /// Whether a failed fetch is logged and skipped instead of failing the refresh.
    fn allow_errors(&self) -> bool {
        false
    }

    fn close(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

pub type SourceRegistry = InstanceCreatorRegistry<Box<dyn ConfigSource>>;

/// Register the built-in sources. `env` backs the environment source.
pub fn register_builtin(registry: &mut SourceRegistry, env: Arc<dyn Environment>) {
    registry
        .register(
            CreatorEntry::new("file", file_source::FileSourceBuilder::default)
                .alias("filesystem")
                .alias("fs")
                .qualified_name("reloadable_config::sources::FileSource"),
        )
        .register(
            CreatorEntry::new("env", move || env_source::EnvSourceBuilder::new(env.clone()))
                .alias("environment")
                .qualified_name("reloadable_config::sources::EnvSource"),
        )
        .register(
            CreatorEntry::new("inline", inline::InlineSourceBuilder::default)
                .alias("static")
                .qualified_name("reloadable_config::sources::InlineSource"),
        );
}
