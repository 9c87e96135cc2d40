//! Post-fetch processing of the merged tree.
//!
//! A [`ConfigTransformer`] receives the merged tree and returns a new
//! one; transformers run in the order they were configured.
//! [`placeholder`] substitutes `${VAR}` references from the environment
//! and [`secret`] swaps `secret:` references for values fetched through
//! a cached [`ValueProvider`](secret::ValueProvider).

pub mod placeholder;
pub mod secret;

use std::sync::Arc;

use async_trait::async_trait;

use crate::creator::{CreatorEntry, InstanceCreatorRegistry};
use crate::env::Environment;
use crate::error::ConfigError;
use crate::tree::ConfigTree;

pub use placeholder::PlaceholderTransformer;
pub use secret::{FileValueProvider, SecretTransformer, ValueProvider};

#[async_trait]
pub trait ConfigTransformer: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(&self, tree: ConfigTree) -> Result<ConfigTree, ConfigError>;
}

pub type TransformerRegistry = InstanceCreatorRegistry<Box<dyn ConfigTransformer>>;

/// Register the built-in transformers. `env` backs placeholder lookups.
pub fn register_builtin(registry: &mut TransformerRegistry, env: Arc<dyn Environment>) {
    registry
        .register(
            CreatorEntry::new("placeholders", move || {
                placeholder::PlaceholderTransformerBuilder::new(env.clone())
            })
            .alias("env-substitution")
            .qualified_name("reloadable_config::transformers::PlaceholderTransformer"),
        )
        .register(
            CreatorEntry::new("secrets", secret::SecretTransformerBuilder::default)
                .alias("decrypt")
                .qualified_name("reloadable_config::transformers::SecretTransformer"),
        );
}
