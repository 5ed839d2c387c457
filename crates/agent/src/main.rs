// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "telemetry-agent", version, about = "Node telemetry agent.")]
struct Cli {
    /// Path to the agent YAML config.
    #[arg(long, default_value = "configs/agent.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match telemetry_api::config::load_agent_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };
    telemetry_api::logging::init(&cfg.log);
    info!(config_path = %cli.config.display(), "agent starting");

    if let Err(e) = telemetry_agent::run(cfg).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
