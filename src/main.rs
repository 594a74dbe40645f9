//! cache-warmer CLI entrypoint

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache_warmer::cli::Cli;
use cache_warmer::config::ConfigError;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    if let Err(e) = cli.execute().await {
        eprintln!("Error: {:#}", e);
        // Configuration problems exit 2, everything else 1
        let code = if e.downcast_ref::<ConfigError>().is_some() { 2 } else { 1 };
        std::process::exit(code);
    }
}
