use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qproxy::{Config, QProxy};

#[derive(Parser)]
#[command(name = "qproxy")]
#[command(about = "Queueing reverse proxy that bounds concurrent sessions per backend")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config-file", default_value = "qproxy.yaml")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qproxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config_file) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "unable to start qproxy");
            return ExitCode::FAILURE;
        }
    };

    let proxy = match QProxy::new(config) {
        Ok(proxy) => proxy,
        Err(error) => {
            tracing::error!(%error, "unable to start qproxy");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = proxy.run().await {
        tracing::error!(%error, "proxy server error");
        return ExitCode::FAILURE;
    }

    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}
