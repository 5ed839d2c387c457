// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! InfiniBand module: per-port counters and link state from
//! `/sys/class/infiniband`. Hosts without IB hardware report zero ports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, CollectorSpec, IbPortMetrics, InfinibandMetrics, MetricSample, ModuleRegistration,
    SamplePayload,
};

use super::util::read_trimmed;
use super::{CollectorEntry, ControllerEntry, Module};

const SYS_CLASS_NET: &str = "/sys/class/net";
const SYS_CLASS_INFINIBAND: &str = "/sys/class/infiniband";
// ARPHRD_INFINIBAND in the interface `type` file.
const INFINIBAND_IF_TYPE: &str = "32";
// port_{rcv,xmit}_data are reported as 32-bit words in IB sysfs.
const IB_DATA_WORD_BYTES: u64 = 4;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct InfinibandModule {
    intervals: ReportConfig,
}

impl InfinibandModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { intervals }
    }

    fn interval(&self) -> Duration {
        self.intervals.interval(category::INFINIBAND, DEFAULT_INTERVAL)
    }
}

impl Module for InfinibandModule {
    fn name(&self) -> &'static str {
        "infiniband"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "infiniband".to_owned(),
            collectors: vec![CollectorSpec {
                category: category::INFINIBAND.to_owned(),
                interval: humantime::format_duration(self.interval()).to_string(),
            }],
            ..ModuleRegistration::default()
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        vec![CollectorEntry {
            category: category::INFINIBAND.to_owned(),
            interval: self.interval(),
            collect: Arc::new(|at| {
                Ok(MetricSample::new(at, SamplePayload::Infiniband(collect()?)))
            }),
        }]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default)]
struct IpoibMeta {
    name: String,
    address: String,
    oper_state: String,
    mtu: u32,
}

fn collect() -> anyhow::Result<InfinibandMetrics> {
    let mut ports = Vec::new();
    let devices = match std::fs::read_dir(SYS_CLASS_INFINIBAND) {
        Ok(devices) => devices,
        // No IB stack on this host.
        Err(_) => return Ok(InfinibandMetrics { ports }),
    };

    let ipoib = collect_ipoib_meta();
    for device in devices.flatten() {
        let device_name = device.file_name().to_string_lossy().into_owned();
        let ports_dir = device.path().join("ports");
        let Ok(port_entries) = std::fs::read_dir(&ports_dir) else { continue };
        for port_entry in port_entries.flatten() {
            let port_name = port_entry.file_name().to_string_lossy().into_owned();
            let Ok(port) = port_name.parse::<u32>() else { continue };
            if let Some(metrics) = collect_port(&device_name, port, &port_entry.path(), &ipoib) {
                ports.push(metrics);
            }
        }
    }
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(InfinibandMetrics { ports })
}

fn collect_ipoib_meta() -> HashMap<String, IpoibMeta> {
    let mut out = HashMap::new();
    let Ok(ifaces) = std::fs::read_dir(SYS_CLASS_NET) else {
        return out;
    };
    for iface in ifaces.flatten() {
        let base = iface.path();
        if read_trimmed(base.join("type")).ok().as_deref() != Some(INFINIBAND_IF_TYPE) {
            continue;
        }
        let Some((device, port)) = net_iface_port_ref(&base) else { continue };
        let meta = IpoibMeta {
            name: iface.file_name().to_string_lossy().into_owned(),
            address: read_trimmed(base.join("address")).unwrap_or_default(),
            oper_state: read_trimmed(base.join("operstate")).unwrap_or_default(),
            mtu: read_trimmed(base.join("mtu"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
        };
        out.insert(format!("{device}:{port}"), meta);
    }
    out
}

fn net_iface_port_ref(iface_base: &Path) -> Option<(String, u32)> {
    let ib_dir = iface_base.join("device/infiniband");
    let mut devices: Vec<_> = std::fs::read_dir(ib_dir).ok()?.flatten().collect();
    devices.sort_by_key(|e| e.file_name());
    let device = devices.first()?;
    let mut ports: Vec<_> = std::fs::read_dir(device.path().join("ports")).ok()?.flatten().collect();
    ports.sort_by_key(|e| e.file_name());
    let port = ports.first()?.file_name().to_string_lossy().parse::<u32>().ok()?;
    Some((device.file_name().to_string_lossy().into_owned(), port))
}

fn collect_port(
    device: &str,
    port: u32,
    port_path: &Path,
    ipoib: &HashMap<String, IpoibMeta>,
) -> Option<IbPortMetrics> {
    let rx_words = read_port_counter(port_path, "port_rcv_data")?;
    let tx_words = read_port_counter(port_path, "port_xmit_data")?;

    let meta = ipoib.get(&format!("{device}:{port}")).cloned().unwrap_or_default();
    let name =
        if meta.name.is_empty() { format!("{device}/{port}") } else { meta.name.clone() };
    Some(IbPortMetrics {
        name,
        address: meta.address,
        oper_state: meta.oper_state,
        mtu: meta.mtu,
        device: device.to_owned(),
        port,
        rate: read_trimmed(port_path.join("rate")).unwrap_or_default(),
        link_state: normalize_state_label(&read_trimmed(port_path.join("state")).unwrap_or_default()),
        physical_state: normalize_state_label(
            &read_trimmed(port_path.join("phys_state")).unwrap_or_default(),
        ),
        rx_bytes: rx_words.saturating_mul(IB_DATA_WORD_BYTES),
        tx_bytes: tx_words.saturating_mul(IB_DATA_WORD_BYTES),
    })
}

fn read_port_counter(port_path: &Path, counter: &str) -> Option<u64> {
    let candidates = [
        port_path.join("counters_ext").join(format!("{counter}_64")),
        port_path.join("counters_ext").join(counter),
        port_path.join("hw_counters").join(counter),
        port_path.join("counters").join(counter),
    ];
    candidates
        .iter()
        .find_map(|path| read_trimmed(path).ok().and_then(|v| v.parse::<u64>().ok()))
}

/// IB sysfs state files look like `4: ACTIVE`; keep the label.
pub(crate) fn normalize_state_label(raw: &str) -> String {
    match raw.split_once(':') {
        Some((_, label)) => label.trim().to_owned(),
        None => raw.trim().to_owned(),
    }
}

#[cfg(test)]
#[path = "infiniband_tests.rs"]
mod tests;
