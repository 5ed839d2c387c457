// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent session runtime: one live duplex stream to the server.
//!
//! Each connection attempt sends the registration first, then runs the
//! collector scheduler, drop-stats reporter, sender, and receiver under a
//! session token. Any fatal task error cancels the session, waits for the
//! others to drain, and reconnects after the configured backoff.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use telemetry_api::config::AgentConfig;
use telemetry_api::model::{
    now_unix_nano, AgentMessage, Command, CommandResult, Heartbeat, MetricSample, MetricsBatch,
    Registration, ServerMessage,
};
use telemetry_api::proto;
use telemetry_api::proto_bridge::{from_pb_server_message, to_pb_agent_message};
use telemetry_api::tls;

use crate::basic::collect_basic_info;
use crate::dispatch::CommandDispatcher;
use crate::modules::{default_modules, Registry};
use crate::scheduler::{spawn_collectors, spawn_drop_reporter};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Agent {
    cfg: AgentConfig,
    node_id: String,
    registration: Registration,
    registry: Arc<Registry>,

    metrics_tx: mpsc::Sender<MetricSample>,
    metrics_rx: mpsc::Receiver<MetricSample>,
    result_tx: mpsc::Sender<CommandResult>,
    result_rx: mpsc::Receiver<CommandResult>,
    dropped: Arc<AtomicU64>,
}

impl Agent {
    pub fn new(cfg: AgentConfig) -> anyhow::Result<Self> {
        let basic = collect_basic_info();
        let node_id = if !cfg.node_id.is_empty() {
            cfg.node_id.clone()
        } else {
            basic.hostname.clone()
        };
        if node_id.is_empty() {
            anyhow::bail!("node id is empty and hostname is unavailable");
        }

        let registry = Arc::new(Registry::new(default_modules(&cfg.report))
            .context("init module registry")?);

        let registration = Registration {
            node_id: node_id.clone(),
            basic,
            modules: registry.module_metadata(),
            issued_at: now_unix_nano(),
        };

        let (metrics_tx, metrics_rx) = mpsc::channel(cfg.send_queue_size);
        let (result_tx, result_rx) = mpsc::channel(cfg.send_queue_size);

        Ok(Self {
            cfg,
            node_id,
            registration,
            registry,
            metrics_tx,
            metrics_rx,
            result_tx,
            result_rx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Connect-and-serve loop with reconnect backoff, until shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            if let Err(e) = self.run_once(&shutdown).await {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                error!(node_id = %self.node_id, err = %e, "agent stream disconnected");
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.cfg.reconnect_backoff) => {}
            }
        }
    }

    async fn run_once(&mut self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let tls_cfg = tls::load_client_tls(&self.cfg.tls)?;
        let endpoint =
            tonic::transport::Endpoint::from_shared(format!("https://{}", self.cfg.server_address))
                .context("server address")?
                .tls_config(tls_cfg)
                .context("client tls config")?
                .connect_timeout(DIAL_TIMEOUT);
        let channel = endpoint.connect().await.context("dial grpc server")?;
        let mut client = proto::telemetry_service_client::TelemetryServiceClient::new(channel);

        // Registration must be the first stream message; queue it before the
        // stream is handed to tonic.
        let (wire_tx, wire_rx) = mpsc::channel::<proto::AgentMessage>(16);
        wire_tx
            .send(to_pb_agent_message(&AgentMessage::Register(self.registration.clone())))
            .await
            .ok();
        let inbound = client
            .stream_telemetry(tonic::Request::new(ReceiverStream::new(wire_rx)))
            .await
            .context("open stream")?
            .into_inner();
        info!(node_id = %self.node_id, "registration sent");

        let session = shutdown.child_token();
        let collectors = spawn_collectors(
            &self.registry,
            session.clone(),
            self.metrics_tx.clone(),
            Arc::clone(&self.dropped),
        );
        let reporter = spawn_drop_reporter(session.clone(), Arc::clone(&self.dropped));
        let dispatcher = CommandDispatcher::new(
            self.node_id.clone(),
            Arc::clone(&self.registry),
            self.cfg.control_timeout,
            self.result_tx.clone(),
            session.clone(),
        );

        let result = {
            let sender = sender_loop(
                &self.node_id,
                &self.cfg,
                &mut self.metrics_rx,
                &mut self.result_rx,
                &wire_tx,
                &session,
            );
            let receiver = receiver_loop(inbound, &dispatcher, &self.result_tx, &session);
            tokio::pin!(sender, receiver);
            // First loop to finish decides the session outcome; the other is
            // drained under the cancelled token (final flush included).
            tokio::select! {
                r = &mut sender => {
                    session.cancel();
                    let _ = receiver.await;
                    r
                }
                r = &mut receiver => {
                    session.cancel();
                    let _ = sender.await;
                    r
                }
            }
        };

        session.cancel();
        dispatcher.close().await;
        let _ = collectors.await;
        let _ = reporter.await;
        result
    }
}

/// Batch outgoing samples and interleave heartbeats and command results.
///
/// Results are never batched with metrics: the current batch is flushed
/// first, then the result goes out in its own message. Heartbeats likewise
/// flush first, so samples buffered before the tick precede it on the wire.
async fn sender_loop(
    node_id: &str,
    cfg: &AgentConfig,
    metrics_rx: &mut mpsc::Receiver<MetricSample>,
    result_rx: &mut mpsc::Receiver<CommandResult>,
    wire_tx: &mpsc::Sender<proto::AgentMessage>,
    session: &CancellationToken,
) -> anyhow::Result<()> {
    let max_per_batch = cfg.report.max_per_batch;
    let mut batch: Vec<MetricSample> = Vec::with_capacity(max_per_batch);
    let mut flush_ticker =
        interval_at(Instant::now() + cfg.report.batch_flush, cfg.report.batch_flush);
    let mut heartbeat_ticker =
        interval_at(Instant::now() + cfg.report.heartbeat, cfg.report.heartbeat);

    async fn flush(
        node_id: &str,
        batch: &mut Vec<MetricSample>,
        wire_tx: &mpsc::Sender<proto::AgentMessage>,
    ) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let msg = AgentMessage::Metrics(MetricsBatch {
            node_id: node_id.to_owned(),
            samples: batch.clone(),
            sent_at: now_unix_nano(),
        });
        batch.clear();
        wire_tx
            .send(to_pb_agent_message(&msg))
            .await
            .map_err(|_| anyhow::anyhow!("stream send queue closed"))
    }

    loop {
        tokio::select! {
            _ = session.cancelled() => {
                let _ = flush(node_id, &mut batch, wire_tx).await;
                return Ok(());
            }
            Some(sample) = metrics_rx.recv() => {
                batch.push(sample);
                if batch.len() >= max_per_batch {
                    flush(node_id, &mut batch, wire_tx).await?;
                }
            }
            Some(result) = result_rx.recv() => {
                flush(node_id, &mut batch, wire_tx).await?;
                wire_tx
                    .send(to_pb_agent_message(&AgentMessage::CommandResult(result)))
                    .await
                    .map_err(|_| anyhow::anyhow!("stream send queue closed"))?;
            }
            _ = flush_ticker.tick() => {
                flush(node_id, &mut batch, wire_tx).await?;
            }
            _ = heartbeat_ticker.tick() => {
                flush(node_id, &mut batch, wire_tx).await?;
                wire_tx
                    .send(to_pb_agent_message(&AgentMessage::Heartbeat(Heartbeat::now(node_id))))
                    .await
                    .map_err(|_| anyhow::anyhow!("stream send queue closed"))?;
            }
        }
    }
}

/// Read server messages; submit commands to the dispatcher. Non-command
/// kinds (the ack included) are ignored. A submission failure synthesizes an
/// immediate failed result.
async fn receiver_loop(
    mut inbound: tonic::Streaming<proto::ServerMessage>,
    dispatcher: &CommandDispatcher,
    result_tx: &mpsc::Sender<CommandResult>,
    session: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let msg = tokio::select! {
            _ = session.cancelled() => return Ok(()),
            msg = inbound.message() => msg,
        };
        let cmd: Command = match msg {
            Ok(Some(pb)) => match from_pb_server_message(pb) {
                Some(ServerMessage::Command(cmd)) => cmd,
                _ => continue,
            },
            Ok(None) => anyhow::bail!("stream closed by server"),
            Err(status) => anyhow::bail!("stream receive: {status}"),
        };

        if let Err(e) = dispatcher.submit(cmd.clone()).await {
            let result = CommandResult::failure(&cmd, e.to_string());
            tokio::select! {
                _ = session.cancelled() => return Ok(()),
                _ = result_tx.send(result) => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
