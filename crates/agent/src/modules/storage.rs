// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage module: mounted filesystems with usage plus `/proc/diskstats`
//! IO counters. The static disk table goes into the registration metadata.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, CollectorSpec, DiskMetrics, MetricSample, ModuleRegistration, SamplePayload,
    StaticDiskInfo, StorageMetrics,
};

use super::{CollectorEntry, ControllerEntry, Module};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct StorageModule {
    intervals: ReportConfig,
}

impl StorageModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { intervals }
    }

    fn interval(&self) -> Duration {
        self.intervals.interval(category::STORAGE, DEFAULT_INTERVAL)
    }
}

impl Module for StorageModule {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn registration(&self) -> ModuleRegistration {
        let disks = collect()
            .map(|m| {
                m.disks
                    .into_iter()
                    .map(|d| StaticDiskInfo {
                        name: d.name,
                        mountpoint: d.mountpoint,
                        filesystem: d.filesystem,
                        total_bytes: d.total_bytes,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ModuleRegistration {
            name: "storage".to_owned(),
            collectors: vec![CollectorSpec {
                category: category::STORAGE.to_owned(),
                interval: humantime::format_duration(self.interval()).to_string(),
            }],
            disks,
            ..ModuleRegistration::default()
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        vec![CollectorEntry {
            category: category::STORAGE.to_owned(),
            interval: self.interval(),
            collect: Arc::new(|at| {
                Ok(MetricSample::new(at, SamplePayload::Storage(collect()?)))
            }),
        }]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DiskIoCounters {
    pub read_ios: u64,
    pub read_sectors: u64,
    pub write_ios: u64,
    pub write_sectors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountInfo {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

fn collect() -> anyhow::Result<StorageMetrics> {
    let io_counters = std::fs::read_to_string("/proc/diskstats")
        .map(|c| parse_diskstats(&c))
        .unwrap_or_default();
    let mounts_raw = std::fs::read_to_string("/proc/mounts")?;
    let mounts = parse_mounts(&mounts_raw);

    let mut disks = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let Ok(stat) = nix::sys::statvfs::statvfs(std::path::Path::new(&mount.mountpoint)) else {
            continue;
        };
        let block = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * block;
        let free = stat.blocks_available() as u64 * block;
        let name = mount.device.rsplit('/').next().unwrap_or(&mount.device).to_owned();
        let io = io_counters.get(&name).copied().unwrap_or_default();
        disks.push(DiskMetrics {
            name,
            mountpoint: mount.mountpoint,
            filesystem: mount.fs_type,
            total_bytes: total,
            used_bytes: total.saturating_sub(free),
            free_bytes: free,
            read_sectors: io.read_sectors,
            write_sectors: io.write_sectors,
            read_ios: io.read_ios,
            write_ios: io.write_ios,
        });
    }
    Ok(StorageMetrics { disks })
}

pub(crate) fn parse_mounts(contents: &str) -> Vec<MountInfo> {
    const IGNORED_FS: &[&str] = &[
        "proc", "sysfs", "tmpfs", "devtmpfs", "cgroup", "cgroup2", "overlay", "squashfs",
        "tracefs", "pstore", "securityfs",
    ];
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(16);
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if IGNORED_FS.contains(&fs_type) || !device.starts_with("/dev/") {
            continue;
        }
        if !seen.insert(mountpoint.to_owned()) {
            continue;
        }
        out.push(MountInfo {
            device: device.to_owned(),
            mountpoint: mountpoint.to_owned(),
            fs_type: fs_type.to_owned(),
        });
    }
    out
}

pub(crate) fn parse_diskstats(contents: &str) -> HashMap<String, DiskIoCounters> {
    let mut out = HashMap::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") {
            continue;
        }
        let parse = |i: usize| fields[i].parse::<u64>().unwrap_or_default();
        out.insert(
            name.to_owned(),
            DiskIoCounters {
                read_ios: parse(3),
                read_sectors: parse(5),
                write_ios: parse(7),
                write_sectors: parse(9),
            },
        );
    }
    out
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
