use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = reloadable_config::cli::Cli::parse();
    if let Err(e) = reloadable_config::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
