/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use p1_gateway::pipeline::Supervisor;

// ── CLI argument definition ───────────────────────────────────────────────────

/// P1 smart-meter gateway.
///
/// Example:
///   p1-gateway --config /etc/p1-gateway/gateway.yaml
#[derive(Debug, Parser)]
#[command(
    name = "p1-gateway",
    about = "Decode P1 smart-meter telegrams and dispatch scheduled readings",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML gateway configuration.
    #[arg(short = 'c', long = "config", default_value = "config/gateway.yaml")]
    config: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(config = %cli.config.display(), "P1 gateway starting up...");

    let stop_program = CancellationToken::new();
    spawn_signal_handlers(&stop_program);

    let runs = Supervisor::new(cli.config, stop_program).run().await;
    info!(runs, "P1 gateway exiting");
}

/// SIGINT and SIGTERM both request a final, graceful stop.
fn spawn_signal_handlers(stop_program: &CancellationToken) {
    let token = stop_program.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, stopping");
                token.cancel();
            }
            Err(e) => error!("Error setting up SIGINT handler: {}", e),
        }
    });

    #[cfg(unix)]
    {
        let token = stop_program.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, stopping");
                    token.cancel();
                }
                Err(e) => error!("Error setting up SIGTERM handler: {}", e),
            }
        });
    }
}
