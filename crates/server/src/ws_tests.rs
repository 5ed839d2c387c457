// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio_util::sync::CancellationToken;

use telemetry_api::model::{
    CommandResult, MemoryMetrics, MetricSample, NodeSnapshot, SamplePayload,
};
use telemetry_api::proto;

use super::{csv_to_set, deliver_command_result, welcome_frame, WsFilter, WsHub};

fn set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

fn memory_sample(at: i64) -> MetricSample {
    MetricSample::new(at, SamplePayload::Memory(MemoryMetrics::default()))
}

#[test]
fn empty_filter_is_wildcard() {
    let filter = WsFilter::default();
    assert!(filter.matches("any-node", "memory"));
    assert!(filter.matches("other", ""));
}

#[test]
fn node_and_category_filters_are_conjunctive() {
    let filter = WsFilter { nodes: set(&["node-a"]), categories: set(&["memory"]) };
    assert!(filter.matches("node-a", "memory"));
    assert!(!filter.matches("node-b", "memory"));
    assert!(!filter.matches("node-a", "storage"));
}

#[test]
fn node_events_pass_category_filters() {
    // Node-state events carry no category; only the node axis applies.
    let filter = WsFilter { nodes: set(&["node-a"]), categories: set(&["memory"]) };
    assert!(filter.matches("node-a", ""));
    assert!(!filter.matches("node-b", ""));
}

#[test]
fn csv_parsing_trims_and_skips_empty() {
    assert!(csv_to_set("").is_empty());
    assert_eq!(csv_to_set("a, b ,,c"), set(&["a", "b", "c"]));
}

#[test]
fn client_queue_clamped() {
    let hub = WsHub::new();
    let (client, _rx) = hub.new_client("test".to_owned(), 1, WsFilter::default());
    assert_eq!(client.send.max_capacity(), super::MIN_CLIENT_QUEUE);
    let (client, _rx) = hub.new_client("test".to_owned(), 1 << 30, WsFilter::default());
    assert_eq!(client.send.max_capacity(), super::MAX_CLIENT_QUEUE);
}

#[test]
fn welcome_frame_carries_sorted_filters() -> anyhow::Result<()> {
    let filter = WsFilter { nodes: set(&["b", "a"]), categories: set(&["memory"]) };
    let frame = proto::WsOutgoing::decode(welcome_frame(&filter).as_ref())?;
    assert_eq!(frame.r#type, "welcome");
    let welcome = frame.welcome.ok_or_else(|| anyhow::anyhow!("missing welcome"))?;
    assert_eq!(welcome.nodes, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(welcome.categories, vec!["memory".to_owned()]);
    assert!(welcome.server_time_unix_nano > 0);
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_matching_clients() -> anyhow::Result<()> {
    let hub = Arc::new(WsHub::new());
    let token = CancellationToken::new();
    let run_hub = Arc::clone(&hub);
    let run_token = token.clone();
    let hub_task = tokio::spawn(async move { run_hub.run(run_token).await });

    let (client, mut rx) = hub.new_client("a".to_owned(), 128, WsFilter::default());
    let (filtered, mut filtered_rx) = hub.new_client(
        "b".to_owned(),
        128,
        WsFilter { nodes: set(&["other-node"]), categories: HashSet::new() },
    );
    hub.register(client).await;
    hub.register(filtered).await;
    // Let the hub drain the registrations before broadcasting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    hub.publish_metrics("node-a", &[memory_sample(1)]);

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no frame within deadline"))?
        .ok_or_else(|| anyhow::anyhow!("client queue closed"))?;
    let event = proto::WsOutgoing::decode(frame.as_ref())?;
    assert_eq!(event.r#type, "metric");

    // The filtered client must see nothing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(filtered_rx.try_recv().is_err());

    token.cancel();
    hub_task.await?;
    Ok(())
}

#[tokio::test]
async fn slow_client_is_evicted_others_unaffected() -> anyhow::Result<()> {
    let hub = Arc::new(WsHub::new());
    let token = CancellationToken::new();
    let run_hub = Arc::clone(&hub);
    let run_token = token.clone();
    let hub_task = tokio::spawn(async move { run_hub.run(run_token).await });

    // The slow client never reads; its queue holds 64 frames.
    let (slow, _slow_rx) = hub.new_client("slow".to_owned(), 64, WsFilter::default());
    let (healthy, mut healthy_rx) = hub.new_client("fast".to_owned(), 1024, WsFilter::default());
    hub.register(slow.clone()).await;
    hub.register(healthy).await;
    // Let the hub drain the registrations before broadcasting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let samples: Vec<MetricSample> = (0..100).map(memory_sample).collect();
    hub.publish_metrics("node-a", &samples);

    // The hub evicts the slow client once its queue overflows.
    tokio::time::timeout(Duration::from_secs(5), slow.cancelled().cancelled())
        .await
        .map_err(|_| anyhow::anyhow!("slow client was not evicted"))?;
    assert!(hub.slow_clients() >= 1);

    // The healthy client keeps receiving without loss.
    for _ in 0..100 {
        tokio::time::timeout(Duration::from_secs(5), healthy_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("healthy client missed a frame"))?
            .ok_or_else(|| anyhow::anyhow!("healthy client queue closed"))?;
    }

    token.cancel();
    hub_task.await?;
    Ok(())
}

#[tokio::test]
async fn command_result_drop_does_not_evict() -> anyhow::Result<()> {
    let hub = WsHub::new();
    let (client, _rx) = hub.new_client("c".to_owned(), 64, WsFilter::default());

    // Fill the queue, then deliver one more result: dropped, not evicted.
    for _ in 0..64 {
        assert!(client.try_send(bytes::Bytes::from_static(b"x")));
    }
    deliver_command_result(
        &client,
        &CommandResult { command_id: "cmd-1".to_owned(), ..CommandResult::default() },
    );
    assert!(!client.cancelled().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn full_broadcast_queue_drops_and_counts() {
    // No hub task consuming, so the bounded broadcast queue fills up.
    let hub = WsHub::new();
    let samples: Vec<MetricSample> = (0..10_000).map(memory_sample).collect();
    hub.publish_metrics("node-a", &samples);
    assert!(hub.broadcast_dropped() > 0);
}
