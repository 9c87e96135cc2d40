//! Alias-resolving registry of implementation builders.
//!
//! An [`InstanceCreatorRegistry`] maps implementation names to builder
//! factories. It is populated once at bootstrap (see
//! [`Registries::builtin`](crate::bootstrap::Registries::builtin)) and
//! then shared read-only. Configuration nodes select an implementation
//! with their `impl` (or `type`) key; the rest of the node is handed to
//! the builder as [`Settings`].
//!
//! Name resolution trims and lowercases the requested name and compares
//! it to each entry's canonical name, aliases, qualified Rust path and
//! the last segment of that path. When several entries match, the lowest
//! [`CreatorEntry::order`] wins and ties go to the entry registered first.

pub mod settings;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{BoxError, ConfigError};
pub use settings::{CacheSettings, Settings, SourceSettings};

/// Two-phase construction: configure from settings, then build.
pub trait InstanceBuilder<T>: Send {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError>;
    fn build(self: Box<Self>) -> Result<T, BoxError>;
}

pub type BuilderFactory<T> = Arc<dyn Fn() -> Box<dyn InstanceBuilder<T>> + Send + Sync>;

pub struct CreatorEntry<T> {
    name: String,
    aliases: Vec<String>,
    qualified_name: Option<String>,
    order: i32,
    factory: BuilderFactory<T>,
}

impl<T: 'static> CreatorEntry<T> {
    pub fn new<F, B>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: InstanceBuilder<T> + 'static,
    {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            qualified_name: None,
            order: 0,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn InstanceBuilder<T>>),
        }
    }

    /// Entry whose builder keeps the settings and calls `build` with them.
    pub fn from_fn<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Settings) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let build = Arc::new(build);
        Self::new(name, move || FnBuilder {
            settings: Settings::default(),
            build: build.clone(),
        })
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// The Rust path of the built type, e.g. `reloadable_config::sources::FileSource`.
    #[must_use]
    pub fn qualified_name(mut self, qualified_name: impl Into<String>) -> Self {
        self.qualified_name = Some(qualified_name.into());
        self
    }

    /// Lower values win when several entries claim the same name.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl<T> CreatorEntry<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub const fn order(&self) -> i32 {
        self.order
    }

    #[must_use]
    pub fn simple_name(&self) -> Option<&str> {
        self.qualified_name
            .as_deref()
            .and_then(|q| q.rsplit("::").next())
    }

    #[must_use]
    pub fn builder(&self) -> Box<dyn InstanceBuilder<T>> {
        (self.factory)()
    }

    fn matches(&self, needle: &str) -> bool {
        std::iter::once(self.name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .chain(self.qualified_name.as_deref())
            .chain(self.simple_name())
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(needle))
    }
}

impl<T> fmt::Debug for CreatorEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatorEntry")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("qualified_name", &self.qualified_name)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

struct FnBuilder<T> {
    settings: Settings,
    build: Arc<dyn Fn(&Settings) -> Result<T, BoxError> + Send + Sync>,
}

impl<T> InstanceBuilder<T> for FnBuilder<T> {
    fn configure(&mut self, settings: &Settings) -> Result<(), BoxError> {
        self.settings = settings.clone();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<T, BoxError> {
        (self.build)(&self.settings)
    }
}

pub struct InstanceCreatorRegistry<T> {
    kind: &'static str,
    entries: Vec<CreatorEntry<T>>,
}

impl<T: 'static> InstanceCreatorRegistry<T> {
    /// An empty registry; `kind` names the product in errors and logs.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, entry: CreatorEntry<T>) -> &mut Self {
        self.entries.push(entry);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn entries(&self) -> impl Iterator<Item = &CreatorEntry<T>> {
        self.entries.iter()
    }

    /// `(name, aliases, order)` of every entry, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<(&str, &[String], i32)> {
        self.entries
            .iter()
            .map(|e| (e.name(), e.aliases(), e.order()))
            .collect()
    }

    /// Resolve `name` to a builder entry.
    #[must_use]
    pub fn instance_creator(&self, name: &str) -> Option<&CreatorEntry<T>> {
        let needle = name.trim();
        if needle.is_empty() {
            return None;
        }
        let mut best: Option<&CreatorEntry<T>> = None;
        for entry in self.entries.iter().filter(|e| e.matches(needle)) {
            if best.map_or(true, |b| entry.order < b.order) {
                best = Some(entry);
            }
        }
        best
    }

    /// Build the implementation selected by `node`.
    ///
    /// Returns `Ok(None)` when the node has `enabled: false` or a blank
    /// `impl`; these are expected outcomes, not errors.
    pub fn create(&self, node: &Value) -> Result<Option<T>, ConfigError> {
        let Value::Object(map) = node else {
            return Err(self.creation_error("(none)", node, "configuration must be an object".into()));
        };

        if is_disabled(map.get("enabled")) {
            tracing::debug!(kind = self.kind, config = %node, "skipping disabled entry");
            return Ok(None);
        }

        let implementation = match map.get("impl").or_else(|| map.get("type")) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim()),
            Some(other) => {
                return Err(self.creation_error(
                    &other.to_string(),
                    node,
                    "'impl' must be a string".into(),
                ))
            }
        };
        let Some(implementation) = implementation.filter(|s| !s.is_empty()) else {
            tracing::debug!(kind = self.kind, config = %node, "skipping entry without implementation");
            return Ok(None);
        };

        let entry = self.instance_creator(implementation).ok_or_else(|| {
            let known: Vec<&str> = self.entries.iter().map(CreatorEntry::name).collect();
            self.creation_error(
                implementation,
                node,
                format!("no {} named '{implementation}' (known: {})", self.kind, known.join(", ")).into(),
            )
        })?;

        let settings = Settings::new(entry.name(), map);
        let mut builder = entry.builder();
        builder
            .configure(&settings)
            .map_err(|e| self.creation_error(implementation, node, e))?;
        let instance = builder
            .build()
            .map_err(|e| self.creation_error(implementation, node, e))?;

        tracing::debug!(kind = self.kind, implementation = entry.name(), "created");
        Ok(Some(instance))
    }

    /// Build every enabled node in order. The first failure aborts the batch.
    pub fn create_all(&self, nodes: &[Value]) -> Result<Vec<T>, ConfigError> {
        let mut created = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            match self.create(node) {
                Ok(Some(instance)) => created.push(instance),
                Ok(None) => {}
                Err(e) => {
                    return Err(ConfigError::BatchCreation {
                        kind: self.kind,
                        index,
                        implementation: implementation_of(node),
                        source: Arc::new(e),
                    })
                }
            }
        }
        Ok(created)
    }

    fn creation_error(&self, implementation: &str, node: &Value, cause: BoxError) -> ConfigError {
        ConfigError::Creation {
            kind: self.kind,
            implementation: implementation.to_string(),
            config: node.to_string(),
            cause: Arc::from(cause),
        }
    }
}

impl<T> fmt::Debug for InstanceCreatorRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCreatorRegistry")
            .field("kind", &self.kind)
            .field("entries", &self.entries)
            .finish()
    }
}

fn is_disabled(enabled: Option<&Value>) -> bool {
    match enabled {
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("false"),
        _ => false,
    }
}

fn implementation_of(node: &Value) -> String {
    node.get("impl")
        .or_else(|| node.get("type"))
        .map(|v| v.as_str().map_or_else(|| v.to_string(), |s| s.trim().to_string()))
        .unwrap_or_default()
}
