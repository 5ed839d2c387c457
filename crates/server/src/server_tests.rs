// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use telemetry_api::config::ServerConfig;
use telemetry_api::model::{
    AgentMessage, Command, CommandPayload, CommandResult, Heartbeat, MemoryMetrics, MetricSample,
    MetricsBatch, Registration, SamplePayload,
};

use super::{DispatchError, Server, ERR_NODE_DISCONNECTED};

fn test_server(command_timeout: Duration) -> Arc<Server> {
    let mut cfg = ServerConfig::default();
    cfg.command_timeout = command_timeout;
    cfg.per_node_queue_size = 16;
    cfg.ingest_queue_size = 16;
    Server::new(cfg)
}

fn registration(node_id: &str) -> Registration {
    Registration { node_id: node_id.to_owned(), ..Registration::default() }
}

fn governor_cmd() -> Command {
    Command::new(CommandPayload::CpuGovernor {
        package_id: Some(0),
        governor: "powersave".to_owned(),
    })
}

fn success_result(cmd: &Command) -> CommandResult {
    CommandResult {
        command_id: cmd.id.clone(),
        node_id: cmd.node_id.clone(),
        command_type: cmd.command_type().to_owned(),
        success: true,
        error: String::new(),
        finished_at: 42,
    }
}

#[tokio::test]
async fn dispatch_to_offline_node_fails_without_pending_entry() {
    let server = test_server(Duration::from_secs(1));
    let err = server
        .dispatch_command("missing", governor_cmd())
        .await
        .err()
        .map(|e| e.to_string());
    assert_eq!(err, Some("node missing is offline".to_owned()));
    assert_eq!(server.pending_len(), 0);
}

#[tokio::test]
async fn dispatch_assigns_id_and_correlates_result() -> anyhow::Result<()> {
    let server = test_server(Duration::from_secs(5));
    let (_session, mut cmd_rx) = server.open_session(registration("node-a"));

    // Simulate the agent: receive the command, report success.
    let agent = Arc::clone(&server);
    let responder = tokio::spawn(async move {
        let cmd = cmd_rx.recv().await?;
        agent.resolve_pending(success_result(&cmd));
        Some(cmd)
    });

    let result = server.dispatch_command("node-a", governor_cmd()).await?;
    assert!(result.success);
    assert_eq!(result.command_type, "cpu_governor");

    let sent = responder.await?.ok_or_else(|| anyhow::anyhow!("no command delivered"))?;
    assert!(!sent.id.is_empty(), "server must assign a command id");
    assert_eq!(sent.node_id, "node-a");
    assert!(sent.issued_at > 0);
    assert_eq!(server.pending_len(), 0);
    Ok(())
}

#[tokio::test]
async fn dispatch_times_out_when_agent_never_replies() {
    let server = test_server(Duration::from_millis(100));
    let (_session, _cmd_rx) = server.open_session(registration("node-a"));

    let result = server.dispatch_command("node-a", governor_cmd()).await;
    assert!(matches!(result, Err(DispatchError::Timeout)), "{result:?}");
    assert_eq!(server.pending_len(), 0, "timeout must clear the pending entry");
}

#[tokio::test]
async fn late_results_for_unknown_ids_are_discarded() {
    let server = test_server(Duration::from_secs(1));
    server.resolve_pending(CommandResult {
        command_id: "never-registered".to_owned(),
        ..CommandResult::default()
    });
    assert_eq!(server.pending_len(), 0);
}

#[tokio::test]
async fn disconnect_fails_all_pending_for_node() -> anyhow::Result<()> {
    let server = test_server(Duration::from_secs(5));
    let (_session, _cmd_rx) = server.open_session(registration("node-a"));

    let dispatcher = Arc::clone(&server);
    let pending = tokio::spawn(async move {
        dispatcher.dispatch_command("node-a", governor_cmd()).await
    });
    // Wait until the command is registered as pending.
    for _ in 0..100 {
        if server.pending_len() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.pending_len(), 1);

    server.fail_pending_by_node("node-a");

    let result = pending.await??;
    assert!(!result.success);
    assert!(result.error.contains("disconnected"), "{}", result.error);
    assert_eq!(server.pending_len(), 0);
    Ok(())
}

#[tokio::test]
async fn replacement_session_fails_old_pending_and_survives_old_unregister() -> anyhow::Result<()> {
    let server = test_server(Duration::from_secs(5));
    let (old_session, _old_cmd_rx) = server.open_session(registration("node-a"));

    let dispatcher = Arc::clone(&server);
    let pending = tokio::spawn(async move {
        dispatcher.dispatch_command("node-a", governor_cmd()).await
    });
    for _ in 0..100 {
        if server.pending_len() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A new stream registers for the same node: old pending fails now.
    let (new_session, mut new_cmd_rx) = server.open_session(registration("node-a"));
    let result = pending.await??;
    assert!(!result.success);
    assert_eq!(result.error, ERR_NODE_DISCONNECTED);

    // The old stream terminates afterwards; it must not tear down the
    // replacement session.
    assert!(!server.unregister_session(&old_session));
    let alive = server.get_session("node-a");
    assert!(alive.is_some());

    // Commands now flow to the new session.
    let agent = Arc::clone(&server);
    let responder = tokio::spawn(async move {
        if let Some(cmd) = new_cmd_rx.recv().await {
            agent.resolve_pending(success_result(&cmd));
        }
    });
    let result = server.dispatch_command("node-a", governor_cmd()).await?;
    assert!(result.success);
    responder.await?;

    assert!(server.unregister_session(&new_session));
    Ok(())
}

#[tokio::test]
async fn metrics_update_last_seen_and_feed_ingest() -> anyhow::Result<()> {
    let server = test_server(Duration::from_secs(1));
    server.store.set_registration(registration("node-a"));

    let batch = MetricsBatch {
        node_id: "node-a".to_owned(),
        samples: vec![MetricSample {
            category: "memory".to_owned(),
            at: i64::MAX - 1,
            payload: SamplePayload::Memory(MemoryMetrics::default()),
        }],
        sent_at: 1,
    };
    server.handle_agent_message("node-a", AgentMessage::Metrics(batch));

    let snapshot = server.store.get_snapshot("node-a")?;
    assert_eq!(snapshot.last_seen, i64::MAX - 1);
    Ok(())
}

#[tokio::test]
async fn ingest_queue_overflow_is_counted_not_blocking() {
    let mut cfg = ServerConfig::default();
    cfg.ingest_queue_size = 1;
    let server = Server::new(cfg);

    // No ingest task is draining; the second batch must drop.
    for _ in 0..3 {
        let batch = MetricsBatch {
            node_id: "node-a".to_owned(),
            samples: vec![MetricSample::new(
                1,
                SamplePayload::Memory(MemoryMetrics::default()),
            )],
            sent_at: 1,
        };
        server.handle_agent_message("node-a", AgentMessage::Metrics(batch));
    }
    assert!(server.ingest_dropped() >= 2);
}

#[tokio::test]
async fn heartbeat_touches_last_seen_monotonically() -> anyhow::Result<()> {
    let server = test_server(Duration::from_secs(1));
    server.handle_agent_message(
        "node-a",
        AgentMessage::Heartbeat(Heartbeat { node_id: "node-a".to_owned(), at: 2_000 }),
    );
    server.handle_agent_message(
        "node-a",
        AgentMessage::Heartbeat(Heartbeat { node_id: "node-a".to_owned(), at: 1_000 }),
    );
    assert_eq!(server.store.get_snapshot("node-a")?.last_seen, 2_000);
    Ok(())
}
