// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-command-type single-slot dispatcher.
//!
//! Each command type gets a lazily-spawned worker with a one-element pending
//! slot. A newer command of the same type replaces a queued-but-unstarted
//! older one, which is failed as superseded. Execution runs the registry
//! handler on the blocking pool under ControlTimeout; a timed-out handler is
//! abandoned and its eventual outcome dropped. This guarantees at most one
//! in-flight execution per command type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use telemetry_api::model::{now_unix_nano, Command, CommandResult};

use crate::modules::Registry;

pub const ERR_SUPERSEDED: &str = "superseded by newer command of same type";
pub const ERR_EXECUTION_TIMEOUT: &str = "command execution timeout";

pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    node_id: String,
    registry: Arc<Registry>,
    timeout: Duration,
    results: mpsc::Sender<CommandResult>,
    session: CancellationToken,
    workers: Mutex<WorkerMap>,
}

struct WorkerMap {
    by_type: HashMap<String, Arc<CommandWorker>>,
    closed: bool,
}

struct CommandWorker {
    slot: Mutex<WorkerSlot>,
    notify: Notify,
}

#[derive(Default)]
struct WorkerSlot {
    pending: Option<Command>,
    closed: bool,
}

impl CommandDispatcher {
    pub fn new(
        node_id: String,
        registry: Arc<Registry>,
        timeout: Duration,
        results: mpsc::Sender<CommandResult>,
        session: CancellationToken,
    ) -> Self {
        let timeout = if timeout.is_zero() { Duration::from_secs(10) } else { timeout };
        Self {
            inner: Arc::new(DispatcherInner {
                node_id,
                registry,
                timeout,
                results,
                session,
                workers: Mutex::new(WorkerMap { by_type: HashMap::with_capacity(8), closed: false }),
            }),
        }
    }

    /// Queue a command on its per-type worker. Errors only when the
    /// dispatcher has been closed; the caller then synthesizes a failure.
    pub async fn submit(&self, cmd: Command) -> anyhow::Result<()> {
        let worker = {
            let mut workers = self.inner.workers.lock();
            if workers.closed {
                anyhow::bail!("command dispatcher is closed");
            }
            let cmd_type = cmd.command_type();
            match workers.by_type.get(cmd_type) {
                Some(worker) => Arc::clone(worker),
                None => {
                    let worker = Arc::new(CommandWorker {
                        slot: Mutex::new(WorkerSlot::default()),
                        notify: Notify::new(),
                    });
                    workers.by_type.insert(cmd_type.to_owned(), Arc::clone(&worker));
                    tokio::spawn(run_worker(Arc::clone(&worker), Arc::clone(&self.inner)));
                    worker
                }
            }
        };

        let superseded = {
            let mut slot = worker.slot.lock();
            if slot.closed {
                anyhow::bail!("command dispatcher is closed");
            }
            slot.pending.replace(cmd)
        };
        worker.notify.notify_one();

        if let Some(old) = superseded {
            self.inner.emit(CommandResult::failure(&old, ERR_SUPERSEDED)).await;
        }
        Ok(())
    }

    /// Close all workers; any still-pending command is failed as superseded.
    pub async fn close(&self) {
        let workers: Vec<Arc<CommandWorker>> = {
            let mut map = self.inner.workers.lock();
            map.closed = true;
            map.by_type.values().cloned().collect()
        };
        for worker in workers {
            let remaining = {
                let mut slot = worker.slot.lock();
                slot.closed = true;
                slot.pending.take()
            };
            worker.notify.notify_one();
            if let Some(cmd) = remaining {
                self.inner.emit(CommandResult::failure(&cmd, ERR_SUPERSEDED)).await;
            }
        }
    }
}

impl DispatcherInner {
    async fn emit(&self, result: CommandResult) {
        tokio::select! {
            _ = self.session.cancelled() => {}
            _ = self.results.send(result) => {}
        }
    }

    async fn execute_with_timeout(&self, cmd: Command) -> CommandResult {
        let registry = Arc::clone(&self.registry);
        let node_id = self.node_id.clone();
        let command_id = cmd.id.clone();
        let command_type = cmd.command_type().to_owned();

        let failure = |error: String| CommandResult {
            command_id: command_id.clone(),
            node_id: self.node_id.clone(),
            command_type: command_type.clone(),
            success: false,
            error,
            finished_at: now_unix_nano(),
        };

        let handle = tokio::task::spawn_blocking(move || {
            let mut result = CommandResult {
                command_id: cmd.id.clone(),
                node_id,
                command_type: cmd.command_type().to_owned(),
                success: false,
                error: String::new(),
                finished_at: 0,
            };
            match registry.execute(&cmd) {
                Ok(()) => result.success = true,
                Err(e) => result.error = e.to_string(),
            }
            result.finished_at = now_unix_nano();
            result
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => failure(format!("command execution failed: {join_err}")),
            // The blocking task keeps running; its eventual result is dropped.
            Err(_) => failure(ERR_EXECUTION_TIMEOUT.to_owned()),
        }
    }
}

async fn run_worker(worker: Arc<CommandWorker>, inner: Arc<DispatcherInner>) {
    loop {
        let cmd = loop {
            {
                let mut slot = worker.slot.lock();
                if let Some(cmd) = slot.pending.take() {
                    break cmd;
                }
                if slot.closed {
                    return;
                }
            }
            worker.notify.notified().await;
        };
        let result = inner.execute_with_timeout(cmd).await;
        inner.emit(result).await;
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
