// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry agent: periodic hardware collectors, a duplex stream session to
//! the server, and per-command-type serialized control execution.

pub mod basic;
pub mod dispatch;
pub mod modules;
pub mod scheduler;
pub mod session;

use tokio_util::sync::CancellationToken;
use tracing::info;

use telemetry_api::config::AgentConfig;
use telemetry_api::tls;

use crate::session::Agent;

/// Run the agent until shutdown. SIGINT/SIGTERM cancel the root token; a
/// second signal forces exit.
pub async fn run(cfg: AgentConfig) -> anyhow::Result<()> {
    // Missing TLS material is a startup error, not a reconnect loop.
    tls::load_client_tls(&cfg.tls)?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let agent = Agent::new(cfg)?;
    agent.run(shutdown).await?;
    info!("agent stopped");
    Ok(())
}

pub(crate) fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        // First signal: graceful shutdown
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        // Second signal: force exit
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
