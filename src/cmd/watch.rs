//! `reloadable-config watch`: refresh periodically and print every change.
//!
//! Each change is written to stdout as one compact JSON line. Runs until
//! Ctrl+C or SIGTERM, then closes the config and waits for the refresh
//! loop to stop.

use std::time::Duration;

use serde_json::Value;

use crate::bootstrap::Registries;
use crate::cli::WatchArgs;
use crate::error::ConfigError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn execute(args: &WatchArgs) -> Result<(), ConfigError> {
    let mut bootstrap = super::prepare(&args.query).await?;
    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .or_else(|| bootstrap.refresh_interval())
        .unwrap_or(DEFAULT_INTERVAL);
    bootstrap = bootstrap.with_refresh_interval(interval);

    let query = args.query.query()?;
    let config = bootstrap.build(&Registries::builtin(), query)?;

    let path = args.query.path.clone().unwrap_or_default();
    let watched = if path.trim().is_empty() {
        config.register_with(|tree| Ok(Some(tree.to_value())))?
    } else {
        config.register_path::<Value>(&path)?
    };
    watched.register(move |value: Option<&Value>| {
        tracing::info!(path = %path, present = value.is_some(), "configuration changed");
        println!("{}", value.unwrap_or(&Value::Null));
    });

    let Some(handle) = config.start() else {
        config.close();
        return Err(ConfigError::InvalidSettings(
            "watch needs a non-zero refresh interval".into(),
        ));
    };
    tracing::info!(
        query = %config.query(),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "watching configuration"
    );

    shutdown_signal().await;
    config.close();
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "config refresh task failed");
    }
    tracing::info!("watch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
