//! Layered, hot-reloadable configuration.
//!
//! Configuration documents are fetched from an ordered list of pluggable
//! sources, merged along environment / datacenter / zone dimensions, run
//! through a transformer pipeline and published to observers that only
//! hear about values that actually changed.
//!
//! # Architecture
//!
//! - [`tree`] -- Immutable JSON configuration tree with dotted-path lookup,
//!   deep merge and SHA-256 fingerprints.
//! - [`query`] -- The (app, envs, datacenter, zone) a configuration is for.
//! - [`reloadable`] -- Observable single-value cells with change-only
//!   notification.
//! - [`reloadable_config`] -- Refresh orchestration: coalesced fetches,
//!   derived reloadables, periodic refresh and close.
//! - [`sources`] -- The [`ConfigSource`](sources::ConfigSource) trait and
//!   the file, environment and inline backends.
//! - [`transformers`] -- Post-merge processing: placeholders and secrets.
//! - [`mapper`] -- Subtree to typed value mapping.
//! - [`cache`] -- TTL cache with an injectable clock.
//! - [`env`] -- Injectable environment variables.
//! - [`creator`] -- Alias-resolving registry that builds implementations
//!   from configuration nodes.
//! - [`bootstrap`] -- Assembles a [`ReloadableConfig`] from a bootstrap
//!   document.
//! - [`cli`] / [`cmd`] -- The `reloadable-config` binary.
//! - [`error`] -- Unified error type using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML documents _(enabled by default)_ |
//! | `json` | JSON documents _(enabled by default)_ |
//! | `toml` | TOML documents |
//! | `file-backends` | All file formats |
//! | `full` | All features |

#![allow(clippy::missing_errors_doc)]

pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod cmd;
pub mod creator;
pub mod env;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod query;
pub mod reloadable;
pub mod reloadable_config;
pub mod sources;
pub mod transformers;
pub mod tree;

pub use error::ConfigError;
pub use query::ConfigQuery;
pub use reloadable::{Publisher, Reloadable};
pub use reloadable_config::ReloadableConfig;
pub use tree::ConfigTree;
