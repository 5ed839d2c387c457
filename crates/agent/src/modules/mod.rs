// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Module contract and registry.
//!
//! A module couples periodic sample collectors with command controllers for
//! one hardware subsystem. The registry is built once at startup, rejects
//! duplicate command types, and exposes a flat stable-sorted collector list
//! plus command resolution by type.

pub mod cpu;
pub mod gpu;
pub mod infiniband;
pub mod memory;
pub mod network;
pub mod process;
pub mod storage;
pub(crate) mod util;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{Command, MetricSample, ModuleRegistration};

/// Produce one sample at the given timestamp (Unix nanoseconds).
pub type CollectorFn = Arc<dyn Fn(i64) -> anyhow::Result<MetricSample> + Send + Sync>;

/// Apply a command to the hardware. Errors become CommandResult failures.
pub type ControllerFn = Arc<dyn Fn(&Command) -> anyhow::Result<()> + Send + Sync>;

pub struct CollectorEntry {
    pub category: String,
    pub interval: Duration,
    pub collect: CollectorFn,
}

pub struct ControllerEntry {
    pub command_type: String,
    pub handle: ControllerFn,
}

/// One pluggable hardware subsystem. A module whose underlying resource is
/// absent registers zero devices and an empty collector set; that is not a
/// startup failure.
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn registration(&self) -> ModuleRegistration;
    fn collector_entries(&self) -> Vec<CollectorEntry>;
    fn controller_entries(&self) -> Vec<ControllerEntry>;
}

pub struct RegisteredCollector {
    pub module: String,
    pub category: String,
    pub interval: Duration,
    pub collect: CollectorFn,
}

pub struct Registry {
    metadata: Vec<ModuleRegistration>,
    collectors: Vec<RegisteredCollector>,
    controllers: HashMap<String, ControllerFn>,
}

impl Registry {
    pub fn new(modules: Vec<Box<dyn Module>>) -> anyhow::Result<Self> {
        let mut metadata = Vec::with_capacity(modules.len());
        let mut collectors = Vec::with_capacity(16);
        let mut controllers: HashMap<String, ControllerFn> = HashMap::with_capacity(16);
        let mut owners: HashMap<String, String> = HashMap::with_capacity(16);

        for module in &modules {
            let name = module.name();
            if name.is_empty() {
                bail!("module name is empty");
            }
            metadata.push(module.registration());

            for entry in module.collector_entries() {
                collectors.push(RegisteredCollector {
                    module: name.to_owned(),
                    category: entry.category,
                    interval: entry.interval,
                    collect: entry.collect,
                });
            }

            for entry in module.controller_entries() {
                if let Some(owner) = owners.get(&entry.command_type) {
                    bail!(
                        "command type {} registered by both {} and {}",
                        entry.command_type,
                        owner,
                        name
                    );
                }
                owners.insert(entry.command_type.clone(), name.to_owned());
                controllers.insert(entry.command_type, entry.handle);
            }
        }

        collectors.sort_by(|a, b| {
            a.interval
                .cmp(&b.interval)
                .then_with(|| a.module.cmp(&b.module))
                .then_with(|| a.category.cmp(&b.category))
        });

        Ok(Self { metadata, collectors, controllers })
    }

    /// Flat collector list, sorted by (interval, module, category).
    pub fn collector_entries(&self) -> &[RegisteredCollector] {
        &self.collectors
    }

    /// Aggregated per-module metadata for the registration message.
    pub fn module_metadata(&self) -> Vec<ModuleRegistration> {
        self.metadata.clone()
    }

    /// Resolve and run the handler for a command.
    pub fn execute(&self, cmd: &Command) -> anyhow::Result<()> {
        let Some(handler) = self.controllers.get(cmd.command_type()) else {
            bail!("unsupported command type: {}", cmd.command_type());
        };
        handler(cmd)
    }
}

/// Build the default module set from the report config.
pub fn default_modules(report: &ReportConfig) -> Vec<Box<dyn Module>> {
    vec![
        Box::new(cpu::CpuModule::new(report.clone())),
        Box::new(gpu::GpuModule::new(report.clone())),
        Box::new(memory::MemoryModule::new(report.clone())),
        Box::new(storage::StorageModule::new(report.clone())),
        Box::new(network::NetworkModule::new(report.clone())),
        Box::new(infiniband::InfinibandModule::new(report.clone())),
        Box::new(process::ProcessModule::new(report.clone())),
    ]
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
