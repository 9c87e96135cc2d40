//! Layered file source.
//!
//! [`FileSource`] reads a directory of documents named after the
//! application and merges them from least to most specific:
//!
//! ```text
//! {app}.{ext}
//! {env}/{app}.{ext}                  for each env, in query order
//! {env}/{dc}/{app}.{ext}
//! {env}/{dc}/{zone}/{app}.{ext}
//! ```
//!
//! Missing layers are skipped; a fetch that finds no layer at all fails.
//! Files are read asynchronously via Tokio. Parsed layers can be kept in
//! a [`TtlCache`] to avoid re-reading unchanged content on every refresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::ConfigSource;
use crate::cache::{SystemClock, TtlCache};
use crate::creator::{CacheSettings, InstanceBuilder, Settings, SourceSettings};
use crate::error::{BoxError, ConfigError};
use crate::query::ConfigQuery;
use crate::tree::ConfigTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let format = match name.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Self::Yaml,
            "json" => Self::Json,
            "toml" => Self::Toml,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        if format.is_enabled() {
            Ok(format)
        } else {
            Err(ConfigError::UnsupportedFormat(format!(
                "{} (enable the '{}' feature)",
                format.extension(),
                format.extension()
            )))
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    #[must_use]
    pub const fn is_enabled(self) -> bool {
        match self {
            Self::Yaml => cfg!(feature = "yaml"),
            Self::Json => cfg!(feature = "json"),
            Self::Toml => cfg!(feature = "toml"),
        }
    }

    /// The first enabled format, preferring YAML.
    #[must_use]
    pub const fn default_enabled() -> Self {
        if cfg!(feature = "yaml") {
            Self::Yaml
        } else if cfg!(feature = "json") {
            Self::Json
        } else {
            Self::Toml
        }
    }
}

pub struct FileSource {
    name: String,
    directory: PathBuf,
    format: FileFormat,
    allow_errors: bool,
    cache: TtlCache<PathBuf, Option<ConfigTree>>,
}

impl FileSource {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            name: "file".into(),
            directory: directory.into(),
            format,
            allow_errors: false,
            cache: TtlCache::new(std::time::Duration::ZERO),
        }
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

    #[must_use]
    pub fn with_cache(mut self, cache: TtlCache<PathBuf, Option<ConfigTree>>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Candidate files for `query`, least specific first.
    #[must_use]
    pub fn layers(&self, query: &ConfigQuery) -> Vec<PathBuf> {
        let file = format!("{}.{}", query.app_name(), self.format.extension());
        let mut layers = vec![self.directory.join(&file)];
        for env in query.envs() {
            let env_dir = self.directory.join(env);
            layers.push(env_dir.join(&file));
            if let Some(dc) = query.datacenter() {
                let dc_dir = env_dir.join(dc);
                layers.push(dc_dir.join(&file));
                if let Some(zone) = query.zone() {
                    layers.push(dc_dir.join(zone).join(&file));
                }
            }
        }
        layers
    }

    async fn read_layer(&self, path: &Path) -> Result<Option<ConfigTree>, ConfigError> {
        if let Some(cached) = self.cache.get(&path.to_path_buf()) {
            return Ok(cached);
        }
        let layer = match tokio::fs::read_to_string(path).await {
            Ok(content) => Some(ConfigTree::parse(
                self.format.extension(),
                &content,
                &path.display().to_string(),
            )?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ConfigError::io(path, e)),
        };
        Ok(self.cache.put(path.to_path_buf(), layer))
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, query: &ConfigQuery) -> Result<ConfigTree, ConfigError> {
        let mut merged = ConfigTree::empty();
        let mut found = 0usize;
        for path in self.layers(query) {
            if let Some(layer) = self.read_layer(&path).await? {
                tracing::trace!(source = %self.name, path = %path.display(), "read layer");
                merged = merged.merged_with(&layer);
                found += 1;
            }
        }
        if found == 0 {
            return Err(ConfigError::ConfigFileNotFound {
                path: self.layers(query).swap_remove(0),
            });
        }
        Ok(merged)
    }

    fn allow_errors(&self) -> bool {
        self.allow_errors
    }

    fn close(&self) -> Result<(), ConfigError> {
        self.cache.clear();
        Ok(())
    }
}

/// Builds a [`FileSource`] from `directory`, `format`, `cache-ttl-ms`,
/// `name` and `allow-errors`.
#[derive(Default)]
pub struct FileSourceBuilder {
    directory: Option<PathBuf>,
    format: Option<FileFormat>,
    cache: CacheSettings,
    source: SourceSettings,
}

impl InstanceBuilder<Box<dyn ConfigSource>> for FileSourceBuilder {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        self.directory = Some(PathBuf::from(settings.required_str("directory")?));
        self.format = settings.str("format")?.map(FileFormat::from_name).transpose()?;
        self.cache = CacheSettings::from_settings(settings)?;
        self.source = SourceSettings::from_settings(settings)?;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Box<dyn ConfigSource>, BoxError> {
        let directory = self.directory.ok_or("file source needs a directory")?;
        let format = self.format.unwrap_or_else(FileFormat::default_enabled);
        if !format.is_enabled() {
            return Err(Box::new(ConfigError::UnsupportedFormat(
                format.extension().to_string(),
            )));
        }
        let cache = TtlCache::from_millis(self.cache.ttl_ms, Arc::new(SystemClock));
        Ok(Box::new(
            FileSource::new(directory, format)
                .named(self.source.name_or("file"))
                .allowing_errors(self.source.allow_errors)
                .with_cache(cache),
        ))
    }
}
