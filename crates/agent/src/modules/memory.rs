// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Memory module: `/proc/meminfo` collector.

use std::sync::Arc;
use std::time::Duration;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, CollectorSpec, MemoryMetrics, MetricSample, ModuleRegistration, SamplePayload,
};

use super::{CollectorEntry, ControllerEntry, Module};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub struct MemoryModule {
    intervals: ReportConfig,
}

impl MemoryModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { intervals }
    }

    fn interval(&self) -> Duration {
        self.intervals.interval(category::MEMORY, DEFAULT_INTERVAL)
    }
}

impl Module for MemoryModule {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "memory".to_owned(),
            collectors: vec![CollectorSpec {
                category: category::MEMORY.to_owned(),
                interval: humantime::format_duration(self.interval()).to_string(),
            }],
            ..ModuleRegistration::default()
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        vec![CollectorEntry {
            category: category::MEMORY.to_owned(),
            interval: self.interval(),
            collect: Arc::new(|at| {
                let contents = std::fs::read_to_string("/proc/meminfo")?;
                Ok(MetricSample::new(at, SamplePayload::Memory(parse_meminfo(&contents))))
            }),
        }]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        Vec::new()
    }
}

pub(crate) fn parse_meminfo(contents: &str) -> MemoryMetrics {
    let mut out = MemoryMetrics::default();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else { continue };
        let Ok(kib) = value.parse::<u64>() else { continue };
        let bytes = kib * 1024;
        match key {
            "MemTotal:" => out.total_bytes = bytes,
            "MemFree:" => out.free_bytes = bytes,
            "MemAvailable:" => out.available_bytes = bytes,
            "Cached:" => out.cached_bytes = bytes,
            "Buffers:" => out.buffers_bytes = bytes,
            _ => {}
        }
    }
    out.used_bytes = out.total_bytes.saturating_sub(out.available_bytes);
    out
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
