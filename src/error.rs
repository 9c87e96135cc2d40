//! Unified error type for reloadable-config.
//!
//! Defines [`ConfigError`], the single error enum returned by every
//! fallible operation in the crate. It uses `thiserror` for `Display`
//! and `Error` derives. Causes are held behind `Arc` so the error is
//! `Clone`: a coalesced refresh hands the same failure to every waiter.
//! Messages name the source, implementation or path involved so a
//! failure can be diagnosed without turning up the log level.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Boxed cause used by builders, sources and providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared cause carried inside [`ConfigError`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Convert anything error-like (including plain messages) into a [`SharedError`].
pub fn shared(cause: impl Into<BoxError>) -> SharedError {
    Arc::from(cause.into())
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Invalid config query: {0}")]
    InvalidQuery(String),

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: SharedError,
    },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Config source '{source_name}' failed for {query}: {cause}")]
    SourceFetch {
        source_name: String,
        query: String,
        #[source]
        cause: SharedError,
    },

    #[error("Transformer '{transformer}' failed: {cause}")]
    Transform {
        transformer: String,
        #[source]
        cause: SharedError,
    },

    #[error("Cannot extract value at '{path}': {message}")]
    Extract { path: String, message: String },

    #[error("Cannot resolve placeholder at '{path}': {message}")]
    Placeholder { path: String, message: String },

    #[error("Cannot create {kind} '{implementation}' from {config}: {cause}")]
    Creation {
        kind: &'static str,
        implementation: String,
        config: String,
        #[source]
        cause: SharedError,
    },

    #[error("Cannot create {kind} #{index} ('{implementation}'): {source}")]
    BatchCreation {
        kind: &'static str,
        index: usize,
        implementation: String,
        #[source]
        source: Arc<ConfigError>,
    },

    #[error("Timed out after {}ms waiting for the first configuration", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Refresh was abandoned before it completed")]
    RefreshAborted,

    #[error("No value present")]
    NoValue,

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("Re-entrant {0} during update dispatch")]
    Reentrant(&'static str),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl ConfigError {
    /// Wrap an I/O error with the path it occurred on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Whether this is a blocking-wait timeout rather than a fetch failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
