mod cmd;
mod config;
mod error;

use clap::Parser;
use config::{Cli, Effective};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let eff = match Effective::new(&cli.args) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        config = %cli.args.config,
        api_addr = %eff.api_addr,
        store = ?eff.store,
        "loaded config"
    );

    if let Err(e) = cmd::serve::run(eff).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
