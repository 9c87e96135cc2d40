//! Fixed in-memory source.

use async_trait::async_trait;

use super::ConfigSource;
use crate::creator::{InstanceBuilder, Settings, SourceSettings};
use crate::error::{BoxError, ConfigError};
use crate::query::ConfigQuery;
use crate::tree::ConfigTree;

pub struct InlineSource {
    name: String,
    tree: ConfigTree,
}

impl InlineSource {
    #[must_use]
    pub fn new(tree: ConfigTree) -> Self {
        Self {
            name: "inline".into(),
            tree,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl ConfigSource for InlineSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, _query: &ConfigQuery) -> Result<ConfigTree, ConfigError> {
        Ok(self.tree.clone())
    }
}

/// Builds an [`InlineSource`] from its `value` object.
#[derive(Default)]
pub struct InlineSourceBuilder {
    tree: ConfigTree,
    source: SourceSettings,
}

impl InstanceBuilder<Box<dyn ConfigSource>> for InlineSourceBuilder {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        if let Some(value) = settings.get("value") {
            self.tree = ConfigTree::from_value(value.clone())?;
        }
        self.source = SourceSettings::from_settings(settings)?;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Box<dyn ConfigSource>, BoxError> {
        Ok(Box::new(
            InlineSource::new(self.tree).named(self.source.name_or("inline")),
        ))
    }
}
