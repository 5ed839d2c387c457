// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! YAML configuration for the agent and server binaries.
//!
//! Unset or non-positive values fall back to the documented defaults after
//! parsing, so a partial config file is always valid.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub server_name_override: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn, error.
    pub level: String,
    /// console or json.
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub grpc_listen: String,
    pub http_listen: String,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    pub max_samples_per_node: usize,
    pub ingest_queue_size: usize,
    pub per_node_queue_size: usize,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub http_read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub http_write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub http_idle_timeout: Duration,
    pub log: LogConfig,
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub node_id: String,
    pub server_address: String,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    pub send_queue_size: usize,
    #[serde(with = "humantime_serde")]
    pub control_timeout: Duration,
    pub report: ReportConfig,
    pub log: LogConfig,
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(deserialize_with = "interval_map::deserialize")]
    pub intervals: HashMap<String, Duration>,
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,
    #[serde(with = "humantime_serde")]
    pub batch_flush: Duration,
    pub max_per_batch: usize,
}

mod interval_map {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, humantime_serde::Serde<Duration>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.into_inner())).collect())
    }
}

impl ReportConfig {
    /// Configured interval for a category, or the given fallback when the
    /// key is absent or non-positive.
    pub fn interval(&self, key: &str, fallback: Duration) -> Duration {
        match self.intervals.get(key) {
            Some(v) if !v.is_zero() => *v,
            _ => fallback,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_listen: "0.0.0.0:9443".to_owned(),
            http_listen: "0.0.0.0:9080".to_owned(),
            retention: Duration::from_secs(24 * 60 * 60),
            max_samples_per_node: 500_000,
            ingest_queue_size: 16384,
            per_node_queue_size: 4096,
            command_timeout: Duration::from_secs(15),
            http_read_timeout: Duration::from_secs(10),
            http_write_timeout: Duration::from_secs(15),
            http_idle_timeout: Duration::from_secs(30),
            log: LogConfig { level: "info".to_owned(), format: "console".to_owned() },
            tls: TlsConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            server_address: "127.0.0.1:9443".to_owned(),
            reconnect_backoff: Duration::from_secs(3),
            send_queue_size: 4096,
            control_timeout: Duration::from_secs(10),
            report: ReportConfig::default(),
            log: LogConfig { level: "info".to_owned(), format: "console".to_owned() },
            tls: TlsConfig::default(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        let intervals: HashMap<String, Duration> = [
            ("cpu_ultra_fast", Duration::from_millis(100)),
            ("cpu_medium", Duration::from_secs(1)),
            ("gpu_fast", Duration::from_millis(100)),
            ("memory", Duration::from_secs(1)),
            ("storage", Duration::from_secs(5)),
            ("network", Duration::from_secs(5)),
            ("process", Duration::from_secs(5)),
            ("infiniband", Duration::from_secs(5)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
        Self {
            intervals,
            heartbeat: Duration::from_secs(2),
            batch_flush: Duration::from_millis(100),
            max_per_batch: 64,
        }
    }
}

pub fn load_server_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read server config {}: {e}", path.display()))?;
    let mut cfg: ServerConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parse server config {}: {e}", path.display()))?;
    apply_server_defaults(&mut cfg);
    Ok(cfg)
}

pub fn load_agent_config(path: &Path) -> anyhow::Result<AgentConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read agent config {}: {e}", path.display()))?;
    let mut cfg: AgentConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parse agent config {}: {e}", path.display()))?;
    apply_agent_defaults(&mut cfg);
    Ok(cfg)
}

fn apply_server_defaults(cfg: &mut ServerConfig) {
    let d = ServerConfig::default();
    if cfg.grpc_listen.is_empty() {
        cfg.grpc_listen = d.grpc_listen;
    }
    if cfg.http_listen.is_empty() {
        cfg.http_listen = d.http_listen;
    }
    if cfg.retention.is_zero() {
        cfg.retention = d.retention;
    }
    if cfg.max_samples_per_node == 0 {
        cfg.max_samples_per_node = d.max_samples_per_node;
    }
    if cfg.ingest_queue_size == 0 {
        cfg.ingest_queue_size = d.ingest_queue_size;
    }
    if cfg.per_node_queue_size == 0 {
        cfg.per_node_queue_size = d.per_node_queue_size;
    }
    if cfg.command_timeout.is_zero() {
        cfg.command_timeout = d.command_timeout;
    }
    if cfg.http_read_timeout.is_zero() {
        cfg.http_read_timeout = d.http_read_timeout;
    }
    if cfg.http_write_timeout.is_zero() {
        cfg.http_write_timeout = d.http_write_timeout;
    }
    if cfg.http_idle_timeout.is_zero() {
        cfg.http_idle_timeout = d.http_idle_timeout;
    }
    if cfg.log.level.is_empty() {
        cfg.log.level = d.log.level;
    }
    if cfg.log.format.is_empty() {
        cfg.log.format = d.log.format;
    }
}

fn apply_agent_defaults(cfg: &mut AgentConfig) {
    let d = AgentConfig::default();
    if cfg.server_address.is_empty() {
        cfg.server_address = d.server_address;
    }
    if cfg.reconnect_backoff.is_zero() {
        cfg.reconnect_backoff = d.reconnect_backoff;
    }
    if cfg.send_queue_size == 0 {
        cfg.send_queue_size = d.send_queue_size;
    }
    if cfg.control_timeout.is_zero() {
        cfg.control_timeout = d.control_timeout;
    }
    for (key, value) in d.report.intervals {
        let entry = cfg.report.intervals.entry(key).or_insert(value);
        if entry.is_zero() {
            *entry = value;
        }
    }
    if cfg.report.heartbeat.is_zero() {
        cfg.report.heartbeat = d.report.heartbeat;
    }
    if cfg.report.batch_flush.is_zero() {
        cfg.report.batch_flush = d.report.batch_flush;
    }
    if cfg.report.max_per_batch == 0 {
        cfg.report.max_per_batch = d.report.max_per_batch;
    }
    if cfg.log.level.is_empty() {
        cfg.log.level = d.log.level;
    }
    if cfg.log.format.is_empty() {
        cfg.log.format = d.log.format;
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
