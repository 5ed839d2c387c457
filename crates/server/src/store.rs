// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory node snapshot store: registration, connection state, last-seen
//! timestamp, and the latest sample per category. Nodes are created on first
//! registration and never deleted; only the newest sample per category is
//! retained, so the footprint is bounded by nodes x categories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use telemetry_api::model::{now_unix_nano, MetricSample, NodeSnapshot, Registration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(node_id) => write!(f, "node {node_id} not found"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Default)]
struct NodeState {
    registration: Option<Registration>,
    connected: bool,
    last_seen: i64,
    latest: std::collections::BTreeMap<String, MetricSample>,
}

#[derive(Default)]
struct NodeBuffer {
    state: RwLock<NodeState>,
}

/// The outer map lock covers insert-or-lookup only; per-node state has its
/// own lock so nodes never contend with each other.
#[derive(Default)]
pub struct Store {
    nodes: RwLock<HashMap<String, Arc<NodeBuffer>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_node(&self, node_id: &str) -> Arc<NodeBuffer> {
        if let Some(node) = self.nodes.read().get(node_id) {
            return Arc::clone(node);
        }
        let mut nodes = self.nodes.write();
        Arc::clone(nodes.entry(node_id.to_owned()).or_default())
    }

    pub fn set_registration(&self, registration: Registration) {
        let node = self.ensure_node(&registration.node_id);
        let mut state = node.state.write();
        state.registration = Some(registration);
        state.connected = true;
        state.last_seen = state.last_seen.max(now_unix_nano());
    }

    pub fn set_connected(&self, node_id: &str, connected: bool) {
        let node = self.ensure_node(node_id);
        let mut state = node.state.write();
        state.connected = connected;
        state.last_seen = state.last_seen.max(now_unix_nano());
    }

    /// Advance last_seen; it never moves backwards.
    pub fn touch_node(&self, node_id: &str, at: i64) {
        let node = self.ensure_node(node_id);
        let mut state = node.state.write();
        state.last_seen = state.last_seen.max(at);
    }

    pub fn ingest(&self, node_id: &str, samples: &[MetricSample]) {
        if samples.is_empty() {
            return;
        }
        let node = self.ensure_node(node_id);
        let mut state = node.state.write();
        for sample in samples {
            state.latest.insert(sample.category.clone(), sample.clone());
        }
        state.last_seen = state.last_seen.max(now_unix_nano());
    }

    fn snapshot_locked(node_id: &str, state: &NodeState) -> NodeSnapshot {
        NodeSnapshot {
            node_id: node_id.to_owned(),
            connected: state.connected,
            last_seen: state.last_seen,
            registration: state.registration.clone(),
            latest: state.latest.clone(),
        }
    }

    /// Value-copy snapshots of all nodes, sorted by node id.
    pub fn list_snapshots(&self) -> Vec<NodeSnapshot> {
        let mut ids: Vec<(String, Arc<NodeBuffer>)> = self
            .nodes
            .read()
            .iter()
            .map(|(id, node)| (id.clone(), Arc::clone(node)))
            .collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));

        ids.into_iter()
            .map(|(id, node)| {
                let state = node.state.read();
                Self::snapshot_locked(&id, &state)
            })
            .collect()
    }

    pub fn get_snapshot(&self, node_id: &str) -> Result<NodeSnapshot, StoreError> {
        let node = self
            .nodes
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(node_id.to_owned()))?;
        let state = node.state.read();
        Ok(Self::snapshot_locked(node_id, &state))
    }

    /// Serve the samples query from the latest-per-category map. With no
    /// history retention this returns at most one sample per category.
    pub fn query_latest(
        &self,
        node_id: &str,
        since: i64,
        category: &str,
        limit: usize,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let snapshot = self.get_snapshot(node_id)?;
        Ok(snapshot
            .latest
            .into_values()
            .filter(|s| s.at >= since)
            .filter(|s| category.is_empty() || s.category == category)
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
