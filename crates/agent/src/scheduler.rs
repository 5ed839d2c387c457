// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collector scheduler: one periodic tick task per collector entry, feeding
//! the session's bounded outbound queue. A full queue drops the sample and
//! counts it; a reporter task logs and resets the counter every 5 seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telemetry_api::model::{now_unix_nano, MetricSample};

use crate::modules::Registry;

const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn one tick task per enabled collector. Entries with a non-positive
/// interval are disabled with a one-time warning. The returned handle
/// resolves once all tick tasks have stopped after cancellation.
pub fn spawn_collectors(
    registry: &Arc<Registry>,
    token: CancellationToken,
    metrics_tx: mpsc::Sender<MetricSample>,
    dropped: Arc<AtomicU64>,
) -> JoinHandle<()> {
    let mut tasks = Vec::with_capacity(registry.collector_entries().len());
    for entry in registry.collector_entries() {
        if entry.interval.is_zero() {
            warn!(
                module = %entry.module,
                category = %entry.category,
                "collector disabled due to non-positive interval"
            );
            continue;
        }

        let module = entry.module.clone();
        let category = entry.category.clone();
        let interval = entry.interval;
        let collect = Arc::clone(&entry.collect);
        let token = token.clone();
        let metrics_tx = metrics_tx.clone();
        let dropped = Arc::clone(&dropped);

        tasks.push(tokio::spawn(async move {
            // First tick after one full interval, matching a plain ticker.
            let mut ticker = interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let sample = match collect(now_unix_nano()) {
                    Ok(sample) => sample,
                    Err(e) => {
                        debug!(module = %module, category = %category, err = %e, "collect failed");
                        continue;
                    }
                };
                let sample = normalize(sample, &category);
                if metrics_tx.try_send(sample).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    tokio::spawn(async move {
        for task in tasks {
            let _ = task.await;
        }
    })
}

/// Attach the category and timestamp when the producer omitted them.
fn normalize(mut sample: MetricSample, category: &str) -> MetricSample {
    if sample.category.is_empty() {
        sample.category = category.to_owned();
    }
    if sample.at == 0 {
        sample.at = now_unix_nano();
    }
    sample
}

/// Periodically log and reset the dropped-sample counter.
pub fn spawn_drop_reporter(token: CancellationToken, dropped: Arc<AtomicU64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(
            Instant::now() + DROP_REPORT_INTERVAL,
            DROP_REPORT_INTERVAL,
        );
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let count = dropped.swap(0, Ordering::Relaxed);
            if count > 0 {
                warn!(dropped = count, "metrics queue full, samples dropped");
            }
        }
    })
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
