//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`print`], [`watch`] or [`implementations`].
//! Each handler lives in its own submodule.

pub mod implementations;
pub mod print;
pub mod watch;

use crate::bootstrap::{load_bootstrap_file, Bootstrap};
use crate::cli::{Cli, Commands, QueryArgs};
use crate::error::ConfigError;
use crate::logging;

pub async fn dispatch(cli: Cli) -> Result<(), ConfigError> {
    match cli.command {
        Some(Commands::Print(ref args)) => print::execute(args).await,
        Some(Commands::Watch(ref args)) => watch::execute(args).await,
        Some(Commands::Implementations) => {
            implementations::execute();
            Ok(())
        }
        None => {
            print_welcome();
            Ok(())
        }
    }
}

/// Install logging and read the bootstrap file named by `args`.
async fn prepare(args: &QueryArgs) -> Result<Bootstrap, ConfigError> {
    logging::init(
        &args.log_level,
        logging::resolve_format(args.pretty, args.json),
    );
    let bootstrap = load_bootstrap_file(&args.bootstrap).await?;
    tracing::debug!(
        bootstrap = %args.bootstrap.display(),
        sources = bootstrap.source_nodes().len(),
        transformers = bootstrap.transformer_nodes().len(),
        "loaded bootstrap"
    );
    Ok(bootstrap)
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  reloadable-config v{version}: layered, hot-reloadable configuration\n\n  \
         No command provided. To get started:\n\n    \
         reloadable-config print -b bootstrap.yaml -a <app>    Print the merged configuration\n    \
         reloadable-config watch -b bootstrap.yaml -a <app>    Report changes until interrupted\n    \
         reloadable-config implementations                      List available sources and transformers\n    \
         reloadable-config --help                               See all commands and options\n"
    );
}
