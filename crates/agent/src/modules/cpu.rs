// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CPU module: cpufreq/topology discovery, medium (utilization + frequency)
//! and ultra (scaling config + RAPL + uncore) collectors, and controllers
//! for frequency ranges, governors, uncore limits, and RAPL power caps.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;
use tracing::warn;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{
    category, command_type, Command, CommandPayload, CollectorSpec, ControllerSpec, CoreMetrics,
    CoreScalingConfig, CpuMediumMetrics, CpuStaticInfo, CpuUltraMetrics, MetricSample,
    ModuleRegistration, PackageRapl, PackageTemperature, PowerCapDomain, SamplePayload,
    UncoreFrequency,
};

use super::util::{read_trimmed, read_u64, write_u64};
use super::{CollectorEntry, ControllerEntry, Module};

const CPU_SYSFS: &str = "/sys/devices/system/cpu";
const UNCORE_SYSFS: &str = "/sys/devices/system/cpu/intel_uncore_frequency";
const RAPL_SYSFS: &str = "/sys/class/powercap/intel-rapl";

const DEFAULT_ULTRA_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MEDIUM_INTERVAL: Duration = Duration::from_secs(1);

pub struct CpuModule {
    collector: Option<Arc<CpuCollector>>,
    intervals: ReportConfig,
}

impl CpuModule {
    pub fn new(intervals: ReportConfig) -> Self {
        let collector = match CpuCollector::discover() {
            Ok(collector) => Some(Arc::new(collector)),
            Err(e) => {
                warn!(err = %e, "cpu discovery failed, module disabled");
                None
            }
        };
        Self { collector, intervals }
    }

    fn ultra_interval(&self) -> Duration {
        self.intervals.interval(category::CPU_ULTRA, DEFAULT_ULTRA_INTERVAL)
    }

    fn medium_interval(&self) -> Duration {
        self.intervals.interval(category::CPU_MEDIUM, DEFAULT_MEDIUM_INTERVAL)
    }
}

impl Module for CpuModule {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "cpu".to_owned(),
            collectors: vec![
                CollectorSpec {
                    category: category::CPU_ULTRA.to_owned(),
                    interval: humantime::format_duration(self.ultra_interval()).to_string(),
                },
                CollectorSpec {
                    category: category::CPU_MEDIUM.to_owned(),
                    interval: humantime::format_duration(self.medium_interval()).to_string(),
                },
            ],
            controllers: vec![
                ControllerSpec { command_type: command_type::CPU_SCALING_RANGE.to_owned() },
                ControllerSpec { command_type: command_type::CPU_GOVERNOR.to_owned() },
                ControllerSpec { command_type: command_type::CPU_UNCORE_RANGE.to_owned() },
                ControllerSpec { command_type: command_type::CPU_POWER_CAP.to_owned() },
            ],
            cpu: self.collector.as_ref().map(|c| c.static_info.clone()),
            gpus: Vec::new(),
            disks: Vec::new(),
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        let Some(collector) = &self.collector else {
            return Vec::new();
        };
        let ultra = Arc::clone(collector);
        let medium = Arc::clone(collector);
        vec![
            CollectorEntry {
                category: category::CPU_ULTRA.to_owned(),
                interval: self.ultra_interval(),
                collect: Arc::new(move |at| {
                    let metrics = ultra.collect_ultra();
                    Ok(MetricSample::new(at, SamplePayload::CpuUltra(metrics)))
                }),
            },
            CollectorEntry {
                category: category::CPU_MEDIUM.to_owned(),
                interval: self.medium_interval(),
                collect: Arc::new(move |at| {
                    let metrics = medium.collect_medium()?;
                    Ok(MetricSample::new(at, SamplePayload::CpuMedium(metrics)))
                }),
            },
        ]
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        fn unavailable() -> anyhow::Error {
            anyhow::anyhow!("cpu control is unavailable on this host")
        }
        let collector = self.collector.clone();

        let scaling = collector.clone();
        let governor = collector.clone();
        let uncore = collector.clone();
        let power = collector;
        vec![
            ControllerEntry {
                command_type: command_type::CPU_SCALING_RANGE.to_owned(),
                handle: Arc::new(move |cmd: &Command| {
                    let CommandPayload::CpuScalingRange { package_id, min_khz, max_khz } =
                        &cmd.payload
                    else {
                        bail!("unexpected payload for {}", cmd.command_type());
                    };
                    let c = scaling.as_ref().ok_or_else(unavailable)?;
                    c.set_scaling_range(*package_id, *min_khz, *max_khz)
                }),
            },
            ControllerEntry {
                command_type: command_type::CPU_GOVERNOR.to_owned(),
                handle: Arc::new(move |cmd: &Command| {
                    let CommandPayload::CpuGovernor { package_id, governor: name } = &cmd.payload
                    else {
                        bail!("unexpected payload for {}", cmd.command_type());
                    };
                    let c = governor.as_ref().ok_or_else(unavailable)?;
                    c.set_governor(*package_id, name)
                }),
            },
            ControllerEntry {
                command_type: command_type::CPU_UNCORE_RANGE.to_owned(),
                handle: Arc::new(move |cmd: &Command| {
                    let CommandPayload::CpuUncoreRange { package_id, min_khz, max_khz } =
                        &cmd.payload
                    else {
                        bail!("unexpected payload for {}", cmd.command_type());
                    };
                    let c = uncore.as_ref().ok_or_else(unavailable)?;
                    c.set_uncore_range(*package_id, *min_khz, *max_khz)
                }),
            },
            ControllerEntry {
                command_type: command_type::CPU_POWER_CAP.to_owned(),
                handle: Arc::new(move |cmd: &Command| {
                    let CommandPayload::CpuPowerCap { package_id, microwatt, domain } =
                        &cmd.payload
                    else {
                        bail!("unexpected payload for {}", cmd.command_type());
                    };
                    let c = power.as_ref().ok_or_else(unavailable)?;
                    c.set_power_cap(*package_id, *microwatt, *domain)
                }),
            },
        ]
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

struct CorePaths {
    core_id: u32,
    scaling_cur: PathBuf,
    scaling_min: PathBuf,
    scaling_max: PathBuf,
    governor: PathBuf,
    avail_governors: PathBuf,
    driver: PathBuf,
}

impl CorePaths {
    fn new(core_id: u32) -> Self {
        let base = PathBuf::from(format!("{CPU_SYSFS}/cpu{core_id}/cpufreq"));
        Self {
            core_id,
            scaling_cur: base.join("scaling_cur_freq"),
            scaling_min: base.join("scaling_min_freq"),
            scaling_max: base.join("scaling_max_freq"),
            governor: base.join("scaling_governor"),
            avail_governors: base.join("scaling_available_governors"),
            driver: base.join("scaling_driver"),
        }
    }
}

struct RaplZone {
    energy: PathBuf,
    package_cap: PathBuf,
    dram_cap: Option<PathBuf>,
}

pub struct CpuCollector {
    static_info: CpuStaticInfo,
    core_paths: Vec<CorePaths>,
    /// Lowest core per package, read for the ultra scaling config.
    sample_cores: Vec<CorePaths>,
    core_to_pkg: HashMap<u32, u32>,
    package_temps: BTreeMap<u32, PathBuf>,
    uncore_paths: BTreeMap<u32, PathBuf>,
    rapl_zones: BTreeMap<u32, RaplZone>,
    prev_ticks: Mutex<HashMap<u32, CoreTick>>,
}

impl CpuCollector {
    fn discover() -> anyhow::Result<Self> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        let (vendor, model) = parse_cpuinfo_identity(&cpuinfo);

        let entries = std::fs::read_dir(CPU_SYSFS)?;
        let mut mappings: Vec<(u32, u32, u32)> = Vec::with_capacity(256); // (core, pkg, physical)
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_prefix("cpu").and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let topo = Path::new(CPU_SYSFS).join(&name).join("topology");
            let Ok(pkg) = read_u64(topo.join("physical_package_id")) else { continue };
            let Ok(core) = read_u64(topo.join("core_id")) else { continue };
            mappings.push((id, pkg as u32, core as u32));
        }
        mappings.sort_by_key(|&(core, pkg, _)| (pkg, core));

        let mut packages: BTreeSet<u32> = BTreeSet::new();
        let mut physical: BTreeSet<(u32, u32)> = BTreeSet::new();
        let mut core_to_pkg = HashMap::with_capacity(mappings.len());
        let mut core_paths = Vec::with_capacity(mappings.len());
        let mut sample_by_pkg: BTreeMap<u32, u32> = BTreeMap::new();
        for &(core_id, pkg, physical_core) in &mappings {
            packages.insert(pkg);
            physical.insert((pkg, physical_core));
            core_to_pkg.insert(core_id, pkg);
            core_paths.push(CorePaths::new(core_id));
            let sampled = sample_by_pkg.entry(pkg).or_insert(core_id);
            if core_id < *sampled {
                *sampled = core_id;
            }
        }
        core_paths.sort_by_key(|cp| cp.core_id);
        let sample_cores = sample_by_pkg.values().map(|&core| CorePaths::new(core)).collect();

        let logical = mappings.len() as u32;
        let physical_cores = physical.len() as u32;
        let threads_per_core =
            if physical_cores > 0 { (logical / physical_cores).max(1) } else { 1 };

        let cpuinfo_min_khz =
            read_u64(format!("{CPU_SYSFS}/cpu0/cpufreq/cpuinfo_min_freq")).unwrap_or_default();
        let cpuinfo_max_khz =
            read_u64(format!("{CPU_SYSFS}/cpu0/cpufreq/cpuinfo_max_freq")).unwrap_or_default();

        let uncore_paths: BTreeMap<u32, PathBuf> = if Path::new(UNCORE_SYSFS).is_dir() {
            packages
                .iter()
                .map(|&pkg| {
                    (pkg, PathBuf::from(format!("{UNCORE_SYSFS}/package_{pkg:02}_die_00")))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        let rapl_zones = discover_rapl_zones(Path::new(RAPL_SYSFS));
        let package_temps = discover_package_temperature_inputs(packages.iter().copied());

        let static_info = CpuStaticInfo {
            vendor,
            model,
            packages: packages.len() as u32,
            physical_cores,
            logical_cores: logical,
            threads_per_core,
            cpuinfo_min_khz,
            cpuinfo_max_khz,
            supports_uncore: !uncore_paths.is_empty(),
            supports_rapl: !rapl_zones.is_empty(),
        };

        Ok(Self {
            static_info,
            core_paths,
            sample_cores,
            core_to_pkg,
            package_temps,
            uncore_paths,
            rapl_zones,
            prev_ticks: Mutex::new(HashMap::new()),
        })
    }

    fn package_exists(&self, package_id: u32) -> bool {
        self.core_to_pkg.values().any(|&pkg| pkg == package_id)
    }

    // -- collection ---------------------------------------------------------

    fn collect_medium(&self) -> anyhow::Result<CpuMediumMetrics> {
        let stat = std::fs::read_to_string("/proc/stat")?;
        let ticks = parse_proc_stat_per_core(&stat);

        let mut out = CpuMediumMetrics {
            cores: Vec::with_capacity(self.core_paths.len()),
            temperatures: Vec::new(),
        };

        {
            let mut prev_ticks = self.prev_ticks.lock();
            for cp in &self.core_paths {
                let Some(&current) = ticks.get(&cp.core_id) else { continue };
                let prev = prev_ticks.insert(cp.core_id, current).unwrap_or_default();
                out.cores.push(CoreMetrics {
                    core_id: cp.core_id,
                    utilization: core_utilization(prev, current),
                    scaling_cur_khz: read_u64(&cp.scaling_cur).unwrap_or_default(),
                    package_id: self.core_to_pkg.get(&cp.core_id).copied().unwrap_or_default(),
                });
            }
        }

        for (&pkg, path) in &self.package_temps {
            let Ok(milli) = read_u64(path) else { continue };
            out.temperatures.push(PackageTemperature {
                package_id: pkg,
                milli_celsius: milli as u32,
            });
        }

        Ok(out)
    }

    fn collect_ultra(&self) -> CpuUltraMetrics {
        let mut out = CpuUltraMetrics {
            per_core: Vec::with_capacity(self.sample_cores.len()),
            rapl: Vec::with_capacity(self.rapl_zones.len()),
            uncore: Vec::with_capacity(self.uncore_paths.len()),
        };

        for cp in &self.sample_cores {
            let avail = read_trimmed(&cp.avail_governors).unwrap_or_default();
            out.per_core.push(CoreScalingConfig {
                core_id: cp.core_id,
                scaling_min_khz: read_u64(&cp.scaling_min).unwrap_or_default(),
                scaling_max_khz: read_u64(&cp.scaling_max).unwrap_or_default(),
                available_governors: avail.split_whitespace().map(str::to_owned).collect(),
                current_governor: read_trimmed(&cp.governor).unwrap_or_default(),
                scaling_driver: read_trimmed(&cp.driver).unwrap_or_default(),
                package_id: self.core_to_pkg.get(&cp.core_id).copied().unwrap_or_default(),
            });
        }

        for (&pkg, base) in &self.uncore_paths {
            let Ok(current_khz) = read_u64(base.join("current_freq_khz")) else { continue };
            out.uncore.push(UncoreFrequency {
                package_id: pkg,
                current_khz,
                min_khz: read_u64(base.join("min_freq_khz")).unwrap_or_default(),
                max_khz: read_u64(base.join("max_freq_khz")).unwrap_or_default(),
                initial_min_khz: read_u64(base.join("initial_min_freq_khz")).unwrap_or_default(),
                initial_max_khz: read_u64(base.join("initial_max_freq_khz")).unwrap_or_default(),
            });
        }

        for (&pkg, zone) in &self.rapl_zones {
            let Ok(energy) = read_u64(&zone.energy) else { continue };
            out.rapl.push(PackageRapl {
                package_id: pkg,
                energy_microjoule: energy,
                power_cap_microwatt: read_u64(&zone.package_cap).unwrap_or_default(),
            });
        }

        out
    }

    // -- control ------------------------------------------------------------

    fn set_scaling_range(
        &self,
        package_id: Option<u32>,
        min_khz: u64,
        max_khz: u64,
    ) -> anyhow::Result<()> {
        if let Some(pkg) = package_id {
            if !self.package_exists(pkg) {
                bail!("cpu package {pkg} not found");
            }
        }
        for cp in &self.core_paths {
            if let Some(pkg) = package_id {
                if self.core_to_pkg.get(&cp.core_id) != Some(&pkg) {
                    continue;
                }
            }
            if min_khz > 0 {
                write_u64(&cp.scaling_min, min_khz)?;
            }
            if max_khz > 0 {
                write_u64(&cp.scaling_max, max_khz)?;
            }
        }
        Ok(())
    }

    fn set_governor(&self, package_id: Option<u32>, governor: &str) -> anyhow::Result<()> {
        if governor.is_empty() {
            bail!("governor is empty");
        }
        if let Some(pkg) = package_id {
            if !self.package_exists(pkg) {
                bail!("cpu package {pkg} not found");
            }
        }
        for cp in &self.core_paths {
            if let Some(pkg) = package_id {
                if self.core_to_pkg.get(&cp.core_id) != Some(&pkg) {
                    continue;
                }
            }
            std::fs::write(&cp.governor, governor)
                .map_err(|e| anyhow::anyhow!("set core {} governor: {e}", cp.core_id))?;
        }
        Ok(())
    }

    fn set_uncore_range(&self, package_id: u32, min_khz: u64, max_khz: u64) -> anyhow::Result<()> {
        let Some(base) = self.uncore_paths.get(&package_id) else {
            bail!("uncore package {package_id} not found");
        };
        if min_khz > 0 {
            write_u64(base.join("min_freq_khz"), min_khz)?;
        }
        if max_khz > 0 {
            write_u64(base.join("max_freq_khz"), max_khz)?;
        }
        Ok(())
    }

    fn set_power_cap(
        &self,
        package_id: u32,
        microwatt: u64,
        domain: PowerCapDomain,
    ) -> anyhow::Result<()> {
        if microwatt == 0 {
            bail!("power cap is zero");
        }
        let Some(zone) = self.rapl_zones.get(&package_id) else {
            bail!("power cap control is unavailable for package {package_id}");
        };
        let path = match domain {
            PowerCapDomain::Package => &zone.package_cap,
            PowerCapDomain::Dram => zone.dram_cap.as_ref().ok_or_else(|| {
                anyhow::anyhow!("dram power cap is unavailable for package {package_id}")
            })?,
        };
        write_u64(path, microwatt)
    }
}

fn discover_rapl_zones(root: &Path) -> BTreeMap<u32, RaplZone> {
    let mut zones = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return zones;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Top-level package zones are `intel-rapl:<n>`; subzones have a
        // second colon.
        if !name.starts_with("intel-rapl:") || name.matches(':').count() != 1 {
            continue;
        }
        let base = root.join(&name);
        let Ok(zone_name) = read_trimmed(base.join("name")) else { continue };
        let pkg = match trailing_number(&zone_name).or_else(|| trailing_number(&name)) {
            Some(pkg) => pkg,
            None => continue,
        };
        zones.insert(
            pkg,
            RaplZone {
                energy: base.join("energy_uj"),
                package_cap: base.join("constraint_0_power_limit_uw"),
                dram_cap: discover_dram_cap(&base),
            },
        );
    }
    zones
}

fn discover_dram_cap(package_zone: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(package_zone).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.matches(':').count() != 2 {
            continue;
        }
        let sub = package_zone.join(&name);
        if read_trimmed(sub.join("name")).is_ok_and(|n| n == "dram") {
            return Some(sub.join("constraint_0_power_limit_uw"));
        }
    }
    None
}

fn discover_package_temperature_inputs(
    packages: impl Iterator<Item = u32>,
) -> BTreeMap<u32, PathBuf> {
    let wanted: Vec<u32> = packages.collect();
    let mut out = BTreeMap::new();

    if let Ok(hwmons) = std::fs::read_dir("/sys/class/hwmon") {
        for hwmon in hwmons.flatten() {
            let Ok(files) = std::fs::read_dir(hwmon.path()) else { continue };
            for file in files.flatten() {
                let name = file.file_name().to_string_lossy().into_owned();
                if !name.starts_with("temp") || !name.ends_with("_label") {
                    continue;
                }
                let Ok(label) = read_trimmed(file.path()) else { continue };
                let Some(pkg) = package_id_from_label(&label) else { continue };
                if !wanted.contains(&pkg) || out.contains_key(&pkg) {
                    continue;
                }
                let input = hwmon.path().join(name.replace("_label", "_input"));
                if input.exists() {
                    out.insert(pkg, input);
                }
            }
        }
    }

    let missing: Vec<u32> = wanted.iter().copied().filter(|pkg| !out.contains_key(pkg)).collect();
    if missing.is_empty() {
        return out;
    }

    let zones = discover_thermal_zones();
    if missing.len() == 1 {
        if let Some(zone) = zones.first() {
            out.insert(missing[0], zone.clone());
        }
    } else if zones.len() == missing.len() {
        for (pkg, zone) in missing.into_iter().zip(zones) {
            out.insert(pkg, zone);
        }
    }
    out
}

pub(crate) fn package_id_from_label(label: &str) -> Option<u32> {
    let lower = label.trim().to_lowercase();
    if !lower.contains("package id") {
        return None;
    }
    trailing_number(&lower)
}

fn trailing_number(s: &str) -> Option<u32> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    s[start..].parse().ok()
}

fn discover_thermal_zones() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };
    let mut zones: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| {
            let kind = read_trimmed(e.path().join("type")).ok()?.to_lowercase();
            (kind.contains("x86_pkg_temp") || kind.contains("cpu")).then(|| e.path().join("temp"))
        })
        .collect();
    zones.sort();
    zones
}

// ---------------------------------------------------------------------------
// /proc parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CoreTick {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CoreTick {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

pub(crate) fn parse_proc_stat_per_core(contents: &str) -> HashMap<u32, CoreTick> {
    let mut out = HashMap::with_capacity(128);
    for line in contents.lines() {
        let Some(rest) = line.strip_prefix("cpu") else { continue };
        let mut fields = rest.split_whitespace();
        let Some(id) = fields.next().and_then(|s| s.parse::<u32>().ok()) else {
            continue; // the aggregate "cpu " line has no id
        };
        let mut next = || fields.next().and_then(|s| s.parse::<u64>().ok()).unwrap_or_default();
        out.insert(
            id,
            CoreTick {
                user: next(),
                nice: next(),
                system: next(),
                idle: next(),
                iowait: next(),
                irq: next(),
                softirq: next(),
                steal: next(),
            },
        );
    }
    out
}

/// Fraction of non-idle time between two tick snapshots, in [0, 1].
pub(crate) fn core_utilization(prev: CoreTick, curr: CoreTick) -> f64 {
    let prev_total = prev.total();
    let curr_total = curr.total();
    if prev_total == 0 || curr_total <= prev_total {
        return 0.0;
    }
    let total_delta = curr_total - prev_total;
    let idle_delta = curr.idle_total().saturating_sub(prev.idle_total());
    (total_delta.saturating_sub(idle_delta)) as f64 / total_delta as f64
}

pub(crate) fn parse_cpuinfo_identity(contents: &str) -> (String, String) {
    let mut vendor = String::new();
    let mut model = String::new();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        match key.trim() {
            "vendor_id" if vendor.is_empty() => vendor = value.trim().to_owned(),
            "model name" if model.is_empty() => model = value.trim().to_owned(),
            _ => {}
        }
        if !vendor.is_empty() && !model.is_empty() {
            break;
        }
    }
    (vendor, model)
}

#[cfg(test)]
#[path = "cpu_tests.rs"]
mod tests;
