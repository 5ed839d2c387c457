// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use telemetry_api::config::AgentConfig;
use telemetry_api::model::{CommandResult, MemoryMetrics, MetricSample, SamplePayload};
use telemetry_api::proto;

use crate::session::sender_loop;

fn test_config(max_per_batch: usize, heartbeat: Duration, batch_flush: Duration) -> AgentConfig {
    let mut cfg = AgentConfig::default();
    cfg.report.max_per_batch = max_per_batch;
    cfg.report.heartbeat = heartbeat;
    cfg.report.batch_flush = batch_flush;
    cfg
}

fn memory_sample(at: i64) -> MetricSample {
    MetricSample::new(at, SamplePayload::Memory(MemoryMetrics::default()))
}

async fn recv_wire(
    rx: &mut mpsc::Receiver<proto::AgentMessage>,
) -> anyhow::Result<proto::agent_message::Kind> {
    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no wire message within deadline"))?
        .ok_or_else(|| anyhow::anyhow!("wire channel closed"))?;
    msg.kind.ok_or_else(|| anyhow::anyhow!("empty wire message"))
}

#[tokio::test]
async fn heartbeat_flushes_buffered_samples_first() -> anyhow::Result<()> {
    // Batch flush far in the future so only the heartbeat can flush.
    let cfg = test_config(64, Duration::from_millis(100), Duration::from_secs(3600));
    let (metrics_tx, mut metrics_rx) = mpsc::channel(64);
    let (_result_tx, mut result_rx) = mpsc::channel::<CommandResult>(8);
    let (wire_tx, mut wire_rx) = mpsc::channel(64);
    let session = CancellationToken::new();

    for at in 1..=3 {
        metrics_tx.send(memory_sample(at)).await?;
    }

    let loop_session = session.clone();
    let handle = tokio::spawn(async move {
        sender_loop(
            "node-a",
            &cfg,
            &mut metrics_rx,
            &mut result_rx,
            &wire_tx,
            &loop_session,
        )
        .await
    });

    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::Metrics(batch) => {
            assert_eq!(batch.node_id, "node-a");
            assert_eq!(batch.samples.len(), 3);
        }
        other => anyhow::bail!("expected metrics before heartbeat, got {other:?}"),
    }
    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::Heartbeat(hb) => assert_eq!(hb.node_id, "node-a"),
        other => anyhow::bail!("expected heartbeat, got {other:?}"),
    }

    session.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn full_batch_flushes_immediately() -> anyhow::Result<()> {
    let cfg = test_config(2, Duration::from_secs(3600), Duration::from_secs(3600));
    let (metrics_tx, mut metrics_rx) = mpsc::channel(64);
    let (_result_tx, mut result_rx) = mpsc::channel::<CommandResult>(8);
    let (wire_tx, mut wire_rx) = mpsc::channel(64);
    let session = CancellationToken::new();

    metrics_tx.send(memory_sample(1)).await?;
    metrics_tx.send(memory_sample(2)).await?;

    let loop_session = session.clone();
    let handle = tokio::spawn(async move {
        sender_loop(
            "node-a",
            &cfg,
            &mut metrics_rx,
            &mut result_rx,
            &wire_tx,
            &loop_session,
        )
        .await
    });

    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::Metrics(batch) => {
            assert_eq!(batch.samples.len(), 2);
            // Samples keep generation order within the batch.
            assert_eq!(batch.samples[0].at_unix_nano, 1);
            assert_eq!(batch.samples[1].at_unix_nano, 2);
        }
        other => anyhow::bail!("expected metrics, got {other:?}"),
    }

    session.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn results_flush_batch_and_are_never_batched() -> anyhow::Result<()> {
    let cfg = test_config(64, Duration::from_secs(3600), Duration::from_secs(3600));
    let (metrics_tx, mut metrics_rx) = mpsc::channel(64);
    let (result_tx, mut result_rx) = mpsc::channel::<CommandResult>(8);
    let (wire_tx, mut wire_rx) = mpsc::channel(64);
    let session = CancellationToken::new();

    metrics_tx.send(memory_sample(1)).await?;
    // Give the loop time to buffer the sample before the result arrives.
    let loop_session = session.clone();
    let handle = tokio::spawn(async move {
        sender_loop(
            "node-a",
            &cfg,
            &mut metrics_rx,
            &mut result_rx,
            &wire_tx,
            &loop_session,
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    result_tx
        .send(CommandResult {
            command_id: "c1".to_owned(),
            node_id: "node-a".to_owned(),
            command_type: "cpu_governor".to_owned(),
            success: true,
            error: String::new(),
            finished_at: 5,
        })
        .await?;

    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::Metrics(batch) => assert_eq!(batch.samples.len(), 1),
        other => anyhow::bail!("expected metrics flush before result, got {other:?}"),
    }
    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::CommandResult(res) => assert_eq!(res.command_id, "c1"),
        other => anyhow::bail!("expected command result, got {other:?}"),
    }

    session.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn cancellation_force_flushes_remaining_batch() -> anyhow::Result<()> {
    let cfg = test_config(64, Duration::from_secs(3600), Duration::from_secs(3600));
    let (metrics_tx, mut metrics_rx) = mpsc::channel(64);
    let (_result_tx, mut result_rx) = mpsc::channel::<CommandResult>(8);
    let (wire_tx, mut wire_rx) = mpsc::channel(64);
    let session = CancellationToken::new();

    metrics_tx.send(memory_sample(1)).await?;

    let loop_session = session.clone();
    let handle = tokio::spawn(async move {
        sender_loop(
            "node-a",
            &cfg,
            &mut metrics_rx,
            &mut result_rx,
            &wire_tx,
            &loop_session,
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel();
    handle.await??;

    match recv_wire(&mut wire_rx).await? {
        proto::agent_message::Kind::Metrics(batch) => assert_eq!(batch.samples.len(), 1),
        other => anyhow::bail!("expected final flush, got {other:?}"),
    }
    Ok(())
}
