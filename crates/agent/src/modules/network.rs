// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network module: interface addresses plus `/proc/net/dev` counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, CollectorSpec, InterfaceMetrics, MetricSample, ModuleRegistration, NetworkMetrics,
    SamplePayload,
};

use super::util::interface_ipv4s;
use super::{CollectorEntry, ControllerEntry, Module};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct NetworkModule {
    intervals: ReportConfig,
}

impl NetworkModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { intervals }
    }

    fn interval(&self) -> Duration {
        self.intervals.interval(category::NETWORK, DEFAULT_INTERVAL)
    }
}

impl Module for NetworkModule {
    fn name(&self) -> &'static str {
        "network"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "network".to_owned(),
            collectors: vec![CollectorSpec {
                category: category::NETWORK.to_owned(),
                interval: humantime::format_duration(self.interval()).to_string(),
            }],
            ..ModuleRegistration::default()
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        vec![CollectorEntry {
            category: category::NETWORK.to_owned(),
            interval: self.interval(),
            collect: Arc::new(|at| {
                let dev = std::fs::read_to_string("/proc/net/dev")?;
                let mut interfaces = parse_net_dev(&dev, &interface_ipv4s());
                interfaces.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(MetricSample::new(
                    at,
                    SamplePayload::Network(NetworkMetrics { interfaces }),
                ))
            }),
        }]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        Vec::new()
    }
}

/// Parse `/proc/net/dev` counters, keeping only interfaces that are up
/// (present in `ips`, which is built from the live interface table).
pub(crate) fn parse_net_dev(
    contents: &str,
    ips: &HashMap<String, Vec<String>>,
) -> Vec<InterfaceMetrics> {
    let mut out = Vec::with_capacity(ips.len());
    for line in contents.lines().skip(2) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 17 {
            continue;
        }
        let name = fields[0].trim_end_matches(':');
        let Some(addrs) = ips.get(name) else { continue };
        let parse = |i: usize| fields[i].parse::<u64>().unwrap_or_default();
        out.push(InterfaceMetrics {
            name: name.to_owned(),
            ips: addrs.clone(),
            rx_bytes: parse(1),
            rx_packets: parse(2),
            tx_bytes: parse(9),
            tx_packets: parse(10),
        });
    }
    out
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod tests;
