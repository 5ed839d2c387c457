// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime broadcast hub.
//!
//! A single task owns the client set; registration, unregistration, and
//! broadcasts all flow through its channels. Each client has a bounded send
//! queue and a subscription filter. A client whose queue is full at publish
//! time is evicted; that is the only back-pressure toward subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telemetry_api::model::{now_unix_nano, CommandResult, MetricSample, NodeSnapshot};
use telemetry_api::proto;
use telemetry_api::proto_bridge::{
    to_pb_command_result, to_pb_metric_sample, to_pb_node_snapshot,
};

pub const DEFAULT_CLIENT_QUEUE: usize = 1024;
pub const MIN_CLIENT_QUEUE: usize = 64;
pub const MAX_CLIENT_QUEUE: usize = 65536;

const REGISTER_QUEUE: usize = 256;
const BROADCAST_QUEUE: usize = 8192;

/// Subscription filter; an empty set is a wildcard for that axis.
#[derive(Debug, Default, Clone)]
pub struct WsFilter {
    pub nodes: HashSet<String>,
    pub categories: HashSet<String>,
}

impl WsFilter {
    pub fn matches(&self, node_id: &str, category: &str) -> bool {
        if !self.nodes.is_empty() && !self.nodes.contains(node_id) {
            return false;
        }
        if !category.is_empty()
            && !self.categories.is_empty()
            && !self.categories.contains(category)
        {
            return false;
        }
        true
    }
}

/// Hub-side handle to a connected subscriber.
#[derive(Clone)]
pub struct WsClient {
    pub id: u64,
    pub remote_addr: String,
    send: mpsc::Sender<Bytes>,
    filter: Arc<RwLock<WsFilter>>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Replace the subscription filter atomically.
    pub fn set_filter(&self, filter: WsFilter) {
        *self.filter.write() = filter;
    }

    pub fn filter(&self) -> WsFilter {
        self.filter.read().clone()
    }

    /// Non-blocking direct delivery (welcome, preload, command results).
    pub fn try_send(&self, frame: Bytes) -> bool {
        self.send.try_send(frame).is_ok()
    }

    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }
}

struct Broadcast {
    node_id: String,
    category: String,
    payload: Bytes,
}

struct HubChannels {
    register_rx: mpsc::Receiver<WsClient>,
    unregister_rx: mpsc::Receiver<u64>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
}

pub struct WsHub {
    register_tx: mpsc::Sender<WsClient>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    channels: Mutex<Option<HubChannels>>,
    next_client_id: AtomicU64,
    slow_clients: AtomicU64,
    broadcast_dropped: AtomicU64,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTER_QUEUE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE);
        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            channels: Mutex::new(Some(HubChannels { register_rx, unregister_rx, broadcast_rx })),
            next_client_id: AtomicU64::new(1),
            slow_clients: AtomicU64::new(0),
            broadcast_dropped: AtomicU64::new(0),
        }
    }

    /// Build a client handle with a bounded queue, clamped to the allowed
    /// range. Returns the handle and the queue consumer for the write pump.
    pub fn new_client(&self, remote_addr: String, queue: usize, filter: WsFilter) -> (WsClient, mpsc::Receiver<Bytes>) {
        let queue = queue.clamp(MIN_CLIENT_QUEUE, MAX_CLIENT_QUEUE);
        let (send, recv) = mpsc::channel(queue);
        let client = WsClient {
            id: self.next_client_id.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            send,
            filter: Arc::new(RwLock::new(filter)),
            cancel: CancellationToken::new(),
        };
        (client, recv)
    }

    pub async fn register(&self, client: WsClient) {
        let _ = self.register_tx.send(client).await;
    }

    pub async fn unregister(&self, client_id: u64) {
        let _ = self.unregister_tx.send(client_id).await;
    }

    /// One broadcast event per sample. A full hub queue drops the event and
    /// counts it; producers are never blocked.
    pub fn publish_metrics(&self, node_id: &str, samples: &[MetricSample]) {
        for sample in samples {
            let frame = proto::WsOutgoing {
                r#type: "metric".to_owned(),
                metric: Some(proto::TimedSample {
                    node_id: node_id.to_owned(),
                    sample: Some(to_pb_metric_sample(sample)),
                }),
                ..proto::WsOutgoing::default()
            };
            self.broadcast(node_id, &sample.category, Bytes::from(frame.encode_to_vec()));
        }
    }

    /// Node-state events carry no category and pass every category filter.
    pub fn publish_node(&self, snapshot: &NodeSnapshot) {
        let frame = proto::WsOutgoing {
            r#type: "node".to_owned(),
            node: Some(to_pb_node_snapshot(snapshot)),
            ..proto::WsOutgoing::default()
        };
        self.broadcast(&snapshot.node_id, "", Bytes::from(frame.encode_to_vec()));
    }

    fn broadcast(&self, node_id: &str, category: &str, payload: Bytes) {
        let event = Broadcast {
            node_id: node_id.to_owned(),
            category: category.to_owned(),
            payload,
        };
        if self.broadcast_tx.try_send(event).is_err() {
            self.broadcast_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(node_id, "ws broadcast queue full, dropping realtime event");
        }
    }

    pub fn slow_clients(&self) -> u64 {
        self.slow_clients.load(Ordering::Relaxed)
    }

    pub fn broadcast_dropped(&self) -> u64 {
        self.broadcast_dropped.load(Ordering::Relaxed)
    }

    /// Hub event loop. Owns the client set; all mutations flow through the
    /// hub channels. Runs until the token is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let Some(mut ch) = self.channels.lock().take() else {
            return;
        };
        let mut clients: HashMap<u64, WsClient> = HashMap::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    for (_, client) in clients.drain() {
                        client.cancel.cancel();
                    }
                    return;
                }
                Some(client) = ch.register_rx.recv() => {
                    clients.insert(client.id, client);
                }
                Some(client_id) = ch.unregister_rx.recv() => {
                    if let Some(client) = clients.remove(&client_id) {
                        client.cancel.cancel();
                    }
                }
                Some(event) = ch.broadcast_rx.recv() => {
                    let mut evicted: Vec<u64> = Vec::new();
                    for (id, client) in &clients {
                        if !client.filter.read().matches(&event.node_id, &event.category) {
                            continue;
                        }
                        if client.send.try_send(event.payload.clone()).is_err() {
                            evicted.push(*id);
                        }
                    }
                    for id in evicted {
                        if let Some(client) = clients.remove(&id) {
                            client.cancel.cancel();
                            self.slow_clients.fetch_add(1, Ordering::Relaxed);
                            warn!(remote_addr = %client.remote_addr, "ws client is too slow, dropped");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------------

pub fn welcome_frame(filter: &WsFilter) -> Bytes {
    let mut nodes: Vec<String> = filter.nodes.iter().cloned().collect();
    nodes.sort();
    let mut categories: Vec<String> = filter.categories.iter().cloned().collect();
    categories.sort();
    let frame = proto::WsOutgoing {
        r#type: "welcome".to_owned(),
        welcome: Some(proto::WsWelcome {
            server_time_unix_nano: now_unix_nano(),
            nodes,
            categories,
        }),
        ..proto::WsOutgoing::default()
    };
    Bytes::from(frame.encode_to_vec())
}

pub fn node_frame(snapshot: &NodeSnapshot) -> Bytes {
    let frame = proto::WsOutgoing {
        r#type: "node".to_owned(),
        node: Some(to_pb_node_snapshot(snapshot)),
        ..proto::WsOutgoing::default()
    };
    Bytes::from(frame.encode_to_vec())
}

pub fn command_result_frame(result: &CommandResult) -> Bytes {
    let frame = proto::WsOutgoing {
        r#type: "command_result".to_owned(),
        command_result: Some(to_pb_command_result(result)),
        ..proto::WsOutgoing::default()
    };
    Bytes::from(frame.encode_to_vec())
}

/// Parse comma-separated filter values; empty input is a wildcard.
pub fn csv_to_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Log-only delivery for command results on the control channel; unlike
/// samples, a full queue here does not evict the client.
pub fn deliver_command_result(client: &WsClient, result: &CommandResult) {
    if !client.try_send(command_result_frame(result)) {
        debug!(
            remote_addr = %client.remote_addr,
            command_id = %result.command_id,
            "ws client queue full, command result dropped"
        );
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
