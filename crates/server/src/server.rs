// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server core: agent stream sessions, the pending-command correlator, and
//! the ingest pipeline.
//!
//! A stream must open with a registration. Its session owns a bounded
//! command queue; a newer session for the same node replaces the older one
//! and the older one's pending commands fail immediately. Disconnect fails
//! every outstanding command for that node.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use telemetry_api::config::ServerConfig;
use telemetry_api::model::{
    now_unix_nano, AgentMessage, Command, CommandResult, MetricSample, Registration, ServerAck,
    ServerMessage,
};
use telemetry_api::proto;
use telemetry_api::proto_bridge::{from_pb_agent_message, to_pb_server_message};

use crate::store::Store;
use crate::ws::WsHub;

pub const ERR_NODE_DISCONNECTED: &str = "node disconnected before command completion";

#[derive(Debug)]
pub enum DispatchError {
    /// No live session for the node.
    Offline(String),
    /// The caller-side command timeout expired; the agent may still execute
    /// and its late result will be discarded.
    Timeout,
    /// The pending entry was torn down without a result.
    Canceled,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline(node_id) => write!(f, "node {node_id} is offline"),
            Self::Timeout => write!(f, "command dispatch timed out"),
            Self::Canceled => write!(f, "command dispatch canceled"),
        }
    }
}

impl std::error::Error for DispatchError {}

struct NodeSession {
    node_id: String,
    /// Distinguishes this session from a replacement for the same node.
    seq: u64,
    cmd_tx: mpsc::Sender<Command>,
}

struct PendingEntry {
    node_id: String,
    tx: oneshot::Sender<CommandResult>,
}

struct IngestItem {
    node_id: String,
    samples: Vec<MetricSample>,
}

pub struct Server {
    cfg: ServerConfig,
    pub store: Store,
    pub hub: WsHub,

    sessions: RwLock<HashMap<String, Arc<NodeSession>>>,
    session_seq: AtomicU64,
    pending: Mutex<HashMap<String, PendingEntry>>,

    ingest_tx: mpsc::Sender<IngestItem>,
    ingest_rx: Mutex<Option<mpsc::Receiver<IngestItem>>>,
    ingest_dropped: AtomicU64,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Arc<Self> {
        let (ingest_tx, ingest_rx) = mpsc::channel(cfg.ingest_queue_size);
        Arc::new(Self {
            cfg,
            store: Store::new(),
            hub: WsHub::new(),
            sessions: RwLock::new(HashMap::new()),
            session_seq: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            ingest_dropped: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn ingest_dropped(&self) -> u64 {
        self.ingest_dropped.load(Ordering::Relaxed)
    }

    /// Spawn the hub and ingest tasks under the root token.
    pub fn spawn_background(self: &Arc<Self>, token: CancellationToken) {
        let hub_server = Arc::clone(self);
        let hub_token = token.clone();
        tokio::spawn(async move { hub_server.hub.run(hub_token).await });

        let ingest_server = Arc::clone(self);
        tokio::spawn(async move { ingest_server.ingest_loop(token).await });
    }

    /// Single consumer of the ingest queue: update the store, then fan out
    /// to subscribers in wire-arrival order.
    async fn ingest_loop(self: Arc<Self>, token: CancellationToken) {
        let Some(mut rx) = self.ingest_rx.lock().take() else {
            return;
        };
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return,
                item = rx.recv() => item,
            };
            let Some(item) = item else { return };
            self.store.ingest(&item.node_id, &item.samples);
            self.hub.publish_metrics(&item.node_id, &item.samples);
        }
    }

    // -- sessions -----------------------------------------------------------

    fn register_session(&self, session: Arc<NodeSession>) {
        let replaced = self
            .sessions
            .write()
            .insert(session.node_id.clone(), Arc::clone(&session));
        if let Some(old) = replaced {
            // The old stream terminates on its own; its queued commands can
            // no longer reach the agent.
            warn!(node_id = %old.node_id, "session replaced by newer registration");
            self.fail_pending_by_node(&old.node_id);
        }
        self.store.set_connected(&session.node_id, true);
    }

    /// Remove the session if it is still current. A session that was already
    /// replaced must not tear down its replacement.
    fn unregister_session(&self, session: &NodeSession) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(&session.node_id) {
            Some(current) if current.seq == session.seq => {
                sessions.remove(&session.node_id);
                true
            }
            _ => false,
        }
    }

    fn get_session(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        self.sessions.read().get(node_id).cloned()
    }

    // -- pending-command correlator ----------------------------------------

    fn register_pending(&self, command_id: &str, node_id: &str) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(command_id.to_owned(), PendingEntry { node_id: node_id.to_owned(), tx });
        rx
    }

    /// Remove-and-deliver in one step so a result is never delivered twice.
    /// Late results for unknown ids are silently discarded.
    pub fn resolve_pending(&self, result: CommandResult) {
        let entry = self.pending.lock().remove(&result.command_id);
        if let Some(entry) = entry {
            let _ = entry.tx.send(result);
        }
    }

    fn clear_pending(&self, command_id: &str) {
        self.pending.lock().remove(command_id);
    }

    /// Fail every outstanding command for a node with a synthesized result.
    pub fn fail_pending_by_node(&self, node_id: &str) {
        let failed: Vec<(String, PendingEntry)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.node_id == node_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let finished_at = now_unix_nano();
        for (command_id, entry) in failed {
            let _ = entry.tx.send(CommandResult {
                command_id,
                node_id: node_id.to_owned(),
                command_type: String::new(),
                success: false,
                error: ERR_NODE_DISCONNECTED.to_owned(),
                finished_at,
            });
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    // -- dispatch -----------------------------------------------------------

    /// Send a command to a node's session and wait for its correlated
    /// result, bounded by the configured command timeout. A full per-node
    /// queue blocks until the deadline; that back-pressure is deliberate.
    pub async fn dispatch_command(
        &self,
        node_id: &str,
        mut cmd: Command,
    ) -> Result<CommandResult, DispatchError> {
        let deadline = tokio::time::Instant::now() + self.cfg.command_timeout;
        let Some(session) = self.get_session(node_id) else {
            return Err(DispatchError::Offline(node_id.to_owned()));
        };

        if cmd.id.is_empty() {
            cmd.id = uuid::Uuid::new_v4().to_string();
        }
        cmd.node_id = node_id.to_owned();
        cmd.issued_at = now_unix_nano();
        let command_id = cmd.id.clone();

        let result_rx = self.register_pending(&command_id, node_id);

        tokio::select! {
            sent = session.cmd_tx.send(cmd) => {
                if sent.is_err() {
                    self.clear_pending(&command_id);
                    return Err(DispatchError::Offline(node_id.to_owned()));
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                self.clear_pending(&command_id);
                return Err(DispatchError::Timeout);
            }
        }

        tokio::select! {
            result = result_rx => result.map_err(|_| DispatchError::Canceled),
            _ = tokio::time::sleep_until(deadline) => {
                self.clear_pending(&command_id);
                Err(DispatchError::Timeout)
            }
        }
    }

    // -- inbound ------------------------------------------------------------

    pub fn handle_agent_message(&self, node_id: &str, msg: AgentMessage) {
        match msg {
            AgentMessage::Metrics(batch) => {
                if let Some(last) = batch.samples.last() {
                    self.store.touch_node(node_id, last.at);
                }
                let item = IngestItem { node_id: node_id.to_owned(), samples: batch.samples };
                if self.ingest_tx.try_send(item).is_err() {
                    self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(node_id, "ingest queue full, sample batch dropped");
                }
            }
            AgentMessage::Heartbeat(hb) => {
                self.store.touch_node(node_id, hb.at);
                self.publish_node_snapshot(node_id);
            }
            AgentMessage::CommandResult(result) => {
                self.resolve_pending(result);
            }
            // Re-registration mid-stream is not part of the protocol.
            AgentMessage::Register(_) => {}
        }
    }

    pub fn publish_node_snapshot(&self, node_id: &str) {
        if let Ok(snapshot) = self.store.get_snapshot(node_id) {
            self.hub.publish_node(&snapshot);
        }
    }

    /// Accept a validated registration and build its session. Used by the
    /// stream handler; exposed for tests.
    fn open_session(
        self: &Arc<Self>,
        registration: Registration,
    ) -> (Arc<NodeSession>, mpsc::Receiver<Command>) {
        let node_id = registration.node_id.clone();
        let (cmd_tx, cmd_rx) = mpsc::channel(self.cfg.per_node_queue_size);
        let session = Arc::new(NodeSession {
            node_id: node_id.clone(),
            seq: self.session_seq.fetch_add(1, Ordering::Relaxed),
            cmd_tx,
        });
        self.store.set_registration(registration);
        self.register_session(Arc::clone(&session));
        (session, cmd_rx)
    }
}

// ---------------------------------------------------------------------------
// gRPC service
// ---------------------------------------------------------------------------

pub struct TelemetryGrpc {
    server: Arc<Server>,
}

impl TelemetryGrpc {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

type GrpcStream<T> = Pin<Box<dyn tokio_stream::Stream<Item = Result<T, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl proto::telemetry_service_server::TelemetryService for TelemetryGrpc {
    type StreamTelemetryStream = GrpcStream<proto::ServerMessage>;

    async fn stream_telemetry(
        &self,
        request: Request<Streaming<proto::AgentMessage>>,
    ) -> Result<Response<Self::StreamTelemetryStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("first stream message is missing"))?;
        let registration = match from_pb_agent_message(first) {
            Some(AgentMessage::Register(reg)) => reg,
            _ => {
                return Err(Status::invalid_argument("first stream message must be registration"))
            }
        };
        if registration.node_id.is_empty() {
            return Err(Status::invalid_argument("registration node_id is empty"));
        }

        let node_id = registration.node_id.clone();
        let (session, cmd_rx) = self.server.open_session(registration);

        let (out_tx, out_rx) = mpsc::channel::<Result<proto::ServerMessage, Status>>(64);
        let ack = ServerMessage::Ack(ServerAck { node_id: node_id.clone(), at: now_unix_nano() });
        let _ = out_tx.send(Ok(to_pb_server_message(&ack))).await;

        info!(node_id = %node_id, "node connected");
        self.server.publish_node_snapshot(&node_id);

        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            let result = run_session(&server, &session.node_id, inbound, cmd_rx, &out_tx).await;
            match result {
                Ok(()) => info!(node_id = %session.node_id, "node disconnected"),
                Err(e) => {
                    warn!(node_id = %session.node_id, err = %e, "node stream closed with error")
                }
            }
            if server.unregister_session(&session) {
                server.fail_pending_by_node(&session.node_id);
                server.store.set_connected(&session.node_id, false);
                server.publish_node_snapshot(&session.node_id);
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }
}

/// Per-session writer+reader loop. Commands from the per-node queue go out
/// in acceptance order; inbound messages are dispatched by kind.
async fn run_session(
    server: &Arc<Server>,
    node_id: &str,
    mut inbound: Streaming<proto::AgentMessage>,
    mut cmd_rx: mpsc::Receiver<Command>,
    out_tx: &mpsc::Sender<Result<proto::ServerMessage, Status>>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                let msg = to_pb_server_message(&ServerMessage::Command(cmd));
                if out_tx.send(Ok(msg)).await.is_err() {
                    anyhow::bail!("stream send queue closed");
                }
            }
            msg = inbound.message() => {
                match msg {
                    Ok(Some(pb)) => {
                        match from_pb_agent_message(pb) {
                            Some(msg) => server.handle_agent_message(node_id, msg),
                            None => debug!(node_id, "ignoring malformed agent message"),
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(status) => anyhow::bail!("stream receive: {status}"),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
