// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process module: `/proc/[pid]` scan sorted by CPU usage, and a controller
//! that delivers signals to processes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, command_type, Command, CommandPayload, CollectorSpec, ControllerSpec, MetricSample,
    ModuleRegistration, ProcessInfo, ProcessMetrics, SamplePayload,
};

use super::util::read_trimmed;
use super::{CollectorEntry, ControllerEntry, Module};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct ProcessModule {
    collector: Arc<ProcessCollector>,
    intervals: ReportConfig,
}

impl ProcessModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { collector: Arc::new(ProcessCollector::new()), intervals }
    }

    fn interval(&self) -> Duration {
        self.intervals.interval(category::PROCESS, DEFAULT_INTERVAL)
    }
}

impl Module for ProcessModule {
    fn name(&self) -> &'static str {
        "process"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "process".to_owned(),
            collectors: vec![CollectorSpec {
                category: category::PROCESS.to_owned(),
                interval: humantime::format_duration(self.interval()).to_string(),
            }],
            controllers: vec![ControllerSpec {
                command_type: command_type::PROCESS_SIGNAL.to_owned(),
            }],
            ..ModuleRegistration::default()
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        let collector = Arc::clone(&self.collector);
        vec![CollectorEntry {
            category: category::PROCESS.to_owned(),
            interval: self.interval(),
            collect: Arc::new(move |at| {
                Ok(MetricSample::new(at, SamplePayload::Process(collector.collect()?)))
            }),
        }]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        vec![ControllerEntry {
            command_type: command_type::PROCESS_SIGNAL.to_owned(),
            handle: Arc::new(|cmd: &Command| {
                let CommandPayload::ProcessSignal { pid, signal } = &cmd.payload else {
                    bail!("unexpected payload for {}", cmd.command_type());
                };
                send_signal(*pid, *signal)
            }),
        }]
    }
}

fn send_signal(pid: i32, signal: i32) -> anyhow::Result<()> {
    if pid <= 0 {
        bail!("invalid pid {pid}");
    }
    let sig = nix::sys::signal::Signal::try_from(signal)
        .map_err(|_| anyhow::anyhow!("invalid signal {signal}"))?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig)
        .map_err(|e| anyhow::anyhow!("signal pid {pid}: {e}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ProcSample {
    total_jiffies: u64,
    rss_pages: u64,
    ppid: i32,
    uid: u32,
}

struct PrevState {
    per_pid: HashMap<i32, u64>,
    total: u64,
}

pub struct ProcessCollector {
    prev: Mutex<PrevState>,
    uid_cache: Mutex<HashMap<u32, String>>,
    page_size: u64,
}

impl ProcessCollector {
    fn new() -> Self {
        let page_size = nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .map(|v| v as u64)
            .unwrap_or(4096);
        Self {
            prev: Mutex::new(PrevState { per_pid: HashMap::with_capacity(4096), total: 0 }),
            uid_cache: Mutex::new(HashMap::with_capacity(128)),
            page_size,
        }
    }

    fn collect(&self) -> anyhow::Result<ProcessMetrics> {
        let stat_first = std::fs::read_to_string("/proc/stat")?;
        let total = parse_total_jiffies(&stat_first)?;

        let entries = std::fs::read_dir("/proc")?;
        let mut processes = Vec::with_capacity(512);
        let mut next_prev = HashMap::with_capacity(512);

        let mut prev = self.prev.lock();
        let prev_total = if prev.total == 0 { total } else { prev.total };
        let delta_total = total.saturating_sub(prev_total);

        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else { continue };
            let base = entry.path();
            let Ok(stat) = std::fs::read_to_string(base.join("stat")) else { continue };
            let Some((comm, sample, state)) = parse_proc_stat(&stat) else { continue };
            let sample = ProcSample { uid: read_proc_uid(&base), ..sample };
            next_prev.insert(pid, sample.total_jiffies);

            let mut cpu_percent = 0.0;
            if let Some(&prev_jiffies) = prev.per_pid.get(&pid) {
                if delta_total > 0 && sample.total_jiffies >= prev_jiffies {
                    cpu_percent =
                        (sample.total_jiffies - prev_jiffies) as f64 * 100.0 / delta_total as f64;
                }
            }

            let mut command = read_proc_cmdline(&base);
            if command.is_empty() {
                command = comm;
            }

            processes.push(ProcessInfo {
                pid,
                ppid: sample.ppid,
                user: self.lookup_user(sample.uid),
                state,
                cpu_percent,
                memory_bytes: sample.rss_pages * self.page_size,
                command,
            });
        }

        prev.per_pid = next_prev;
        prev.total = total;
        drop(prev);

        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory_bytes.cmp(&a.memory_bytes))
        });

        Ok(ProcessMetrics { processes })
    }

    fn lookup_user(&self, uid: u32) -> String {
        let mut cache = self.uid_cache.lock();
        if let Some(name) = cache.get(&uid) {
            return name.clone();
        }
        let name = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string());
        cache.insert(uid, name.clone());
        name
    }
}

/// Sum of the aggregate `cpu` line fields in `/proc/stat`.
pub(crate) fn parse_total_jiffies(contents: &str) -> anyhow::Result<u64> {
    let line = contents.lines().next().unwrap_or_default();
    let mut fields = line.split_whitespace();
    if fields.next() != Some("cpu") {
        bail!("unexpected /proc/stat format");
    }
    Ok(fields.filter_map(|f| f.parse::<u64>().ok()).sum())
}

/// Parse a `/proc/[pid]/stat` line into (comm, sample, state). The comm field
/// is parenthesized and may itself contain spaces and parens.
pub(crate) fn parse_proc_stat(contents: &str) -> Option<(String, ProcSample, String)> {
    let start = contents.find('(')?;
    let end = contents.rfind(')')?;
    let comm = contents.get(start + 1..end)?.to_owned();
    let rest: Vec<&str> = contents.get(end + 2..)?.split_whitespace().collect();
    if rest.len() < 22 {
        return None;
    }
    let state = rest[0].to_owned();
    let ppid = rest[1].parse().unwrap_or_default();
    let utime: u64 = rest[11].parse().unwrap_or_default();
    let stime: u64 = rest[12].parse().unwrap_or_default();
    let rss_pages: u64 = rest[21].parse().unwrap_or_default();
    Some((
        comm,
        ProcSample { total_jiffies: utime + stime, rss_pages, ppid, uid: 0 },
        state,
    ))
}

fn read_proc_uid(base: &Path) -> u32 {
    let Ok(status) = std::fs::read_to_string(base.join("status")) else {
        return 0;
    };
    parse_status_uid(&status)
}

pub(crate) fn parse_status_uid(contents: &str) -> u32 {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn read_proc_cmdline(base: &Path) -> String {
    let Ok(raw) = std::fs::read(base.join("cmdline")) else {
        return String::new();
    };
    raw.split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
