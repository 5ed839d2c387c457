// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry server: accepts agent streams over mutual-TLS gRPC, keeps
//! per-node snapshots, correlates command results, and fans out realtime
//! samples to WebSocket subscribers behind a REST surface.

pub mod rest;
pub mod server;
pub mod store;
pub mod ws;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use telemetry_api::config::ServerConfig;
use telemetry_api::proto;
use telemetry_api::tls;

use crate::server::{Server, TelemetryGrpc};

/// Run the server until shutdown. SIGINT/SIGTERM cancel the root token; a
/// second signal forces exit.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let server_tls = tls::load_server_tls(&cfg.tls)?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let server = Server::new(cfg.clone());
    server.spawn_background(shutdown.clone());

    let grpc_addr: std::net::SocketAddr =
        cfg.grpc_listen.parse().context("parse grpc_listen")?;
    let grpc = tonic::transport::Server::builder()
        .tls_config(server_tls)
        .context("server tls config")?
        .add_service(proto::telemetry_service_server::TelemetryServiceServer::new(
            TelemetryGrpc::new(Arc::clone(&server)),
        ))
        .serve_with_shutdown(grpc_addr, shutdown.clone().cancelled_owned());
    info!(addr = %cfg.grpc_listen, "grpc server listening");

    let http_listener =
        TcpListener::bind(&cfg.http_listen).await.context("listen http")?;
    let router = rest::build_router(Arc::clone(&server));
    let http = axum::serve(
        http_listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    info!(addr = %cfg.http_listen, "http server listening");

    tokio::try_join!(
        async { grpc.await.context("grpc server") },
        async { http.await.context("http server") },
    )?;
    info!("server stopped");
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
