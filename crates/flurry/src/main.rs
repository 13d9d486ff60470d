//! Flurry CLI: loads notified market-data files from S3 into ClickHouse.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::info;

use flurry::{init_tracing, shutdown_signal, Config, LoaderProcess};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "flurry.yaml".to_string());

    info!(path = %config_path, "Loading config");

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut process = LoaderProcess::from_config(&config).await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    match process.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Loader process failed: {e}");
            ExitCode::FAILURE
        }
    }
}
