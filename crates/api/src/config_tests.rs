// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::time::Duration;

use crate::config::{load_agent_config, load_server_config, AgentConfig, ServerConfig};

fn write_temp(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn server_defaults() {
    let cfg = ServerConfig::default();
    assert_eq!(cfg.grpc_listen, "0.0.0.0:9443");
    assert_eq!(cfg.http_listen, "0.0.0.0:9080");
    assert_eq!(cfg.per_node_queue_size, 4096);
    assert_eq!(cfg.command_timeout, Duration::from_secs(15));
    assert_eq!(cfg.log.level, "info");
}

#[test]
fn agent_defaults() {
    let cfg = AgentConfig::default();
    assert_eq!(cfg.server_address, "127.0.0.1:9443");
    assert_eq!(cfg.reconnect_backoff, Duration::from_secs(3));
    assert_eq!(cfg.control_timeout, Duration::from_secs(10));
    assert_eq!(cfg.report.max_per_batch, 64);
    assert_eq!(cfg.report.heartbeat, Duration::from_secs(2));
    assert_eq!(
        cfg.report.interval("cpu_medium", Duration::from_secs(9)),
        Duration::from_secs(1)
    );
}

#[test]
fn partial_server_config_falls_back_to_defaults() -> anyhow::Result<()> {
    let file = write_temp(
        r#"
grpc_listen: "127.0.0.1:7443"
command_timeout: 5s
log:
  level: debug
"#,
    )?;
    let cfg = load_server_config(file.path())?;
    assert_eq!(cfg.grpc_listen, "127.0.0.1:7443");
    assert_eq!(cfg.command_timeout, Duration::from_secs(5));
    assert_eq!(cfg.log.level, "debug");
    // Untouched keys keep their defaults.
    assert_eq!(cfg.http_listen, "0.0.0.0:9080");
    assert_eq!(cfg.ingest_queue_size, 16384);
    assert_eq!(cfg.log.format, "console");
    Ok(())
}

#[test]
fn partial_agent_config_merges_intervals() -> anyhow::Result<()> {
    let file = write_temp(
        r#"
node_id: bench-17
reconnect_backoff: 500ms
report:
  intervals:
    cpu_medium: 250ms
  heartbeat: 1s
"#,
    )?;
    let cfg = load_agent_config(file.path())?;
    assert_eq!(cfg.node_id, "bench-17");
    assert_eq!(cfg.reconnect_backoff, Duration::from_millis(500));
    assert_eq!(cfg.report.heartbeat, Duration::from_secs(1));
    // Overridden key wins, absent keys get defaults.
    assert_eq!(
        cfg.report.interval("cpu_medium", Duration::ZERO),
        Duration::from_millis(250)
    );
    assert_eq!(
        cfg.report.interval("storage", Duration::ZERO),
        Duration::from_secs(5)
    );
    Ok(())
}

#[test]
fn interval_falls_back_on_zero_value() -> anyhow::Result<()> {
    let file = write_temp(
        r#"
report:
  intervals:
    memory: 0s
"#,
    )?;
    let cfg = load_agent_config(file.path())?;
    assert_eq!(
        cfg.report.interval("memory", Duration::ZERO),
        Duration::from_secs(1)
    );
    Ok(())
}

#[test]
fn missing_config_file_is_an_error() {
    assert!(load_server_config(std::path::Path::new("/nonexistent/server.yaml")).is_err());
    assert!(load_agent_config(std::path::Path::new("/nonexistent/agent.yaml")).is_err());
}
