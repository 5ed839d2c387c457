// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain model for the agent/server session runtime.
//!
//! Sample and command payloads are closed tagged unions; the category or
//! command type string is derived from the variant and uniquely identifies
//! the payload shape on the wire.

use std::collections::BTreeMap;

/// Stable category tags, one per sample payload shape.
pub mod category {
    pub const CPU_MEDIUM: &str = "cpu_medium";
    pub const CPU_ULTRA: &str = "cpu_ultra_fast";
    pub const GPU_FAST: &str = "gpu_fast";
    pub const MEMORY: &str = "memory";
    pub const STORAGE: &str = "storage";
    pub const NETWORK: &str = "network";
    pub const INFINIBAND: &str = "infiniband";
    pub const PROCESS: &str = "process";
}

/// Stable command type tags, one per command payload shape.
pub mod command_type {
    pub const CPU_SCALING_RANGE: &str = "cpu_scaling_range";
    pub const CPU_GOVERNOR: &str = "cpu_governor";
    pub const CPU_UNCORE_RANGE: &str = "cpu_uncore_range";
    pub const CPU_POWER_CAP: &str = "cpu_power_cap";
    pub const GPU_CLOCK_RANGE: &str = "gpu_clock_range";
    pub const GPU_POWER_CAP: &str = "gpu_power_cap";
    pub const PROCESS_SIGNAL: &str = "process_signal";
}

/// Current time as Unix nanoseconds.
pub fn now_unix_nano() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Stream message unions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    Register(Registration),
    Metrics(MetricsBatch),
    CommandResult(CommandResult),
    Heartbeat(Heartbeat),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Ack(ServerAck),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub node_id: String,
    pub at: i64,
}

impl Heartbeat {
    pub fn now(node_id: &str) -> Self {
        Self { node_id: node_id.to_owned(), at: now_unix_nano() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerAck {
    pub node_id: String,
    pub at: i64,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Registration {
    pub node_id: String,
    pub basic: BasicInfo,
    pub modules: Vec<ModuleRegistration>,
    pub issued_at: i64,
}

/// Host identity reported once per registration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicInfo {
    pub hostname: String,
    pub ips: Vec<String>,
    pub os: String,
    pub kernel: String,
    pub arch: String,
    pub machine_id: String,
    pub boot_id: String,
    pub hardware_vendor: String,
    pub hardware_model: String,
}

/// Per-module metadata advertised at registration: discovered devices plus
/// the collector categories and command types the module supports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleRegistration {
    pub name: String,
    pub collectors: Vec<CollectorSpec>,
    pub controllers: Vec<ControllerSpec>,
    pub cpu: Option<CpuStaticInfo>,
    pub gpus: Vec<GpuStaticInfo>,
    pub disks: Vec<StaticDiskInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSpec {
    pub category: String,
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSpec {
    pub command_type: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuStaticInfo {
    pub vendor: String,
    pub model: String,
    pub packages: u32,
    pub physical_cores: u32,
    pub logical_cores: u32,
    pub threads_per_core: u32,
    pub cpuinfo_min_khz: u64,
    pub cpuinfo_max_khz: u64,
    pub supports_uncore: bool,
    pub supports_rapl: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpuStaticInfo {
    pub index: u32,
    pub name: String,
    pub uuid: String,
    pub memory_total_bytes: u64,
    pub power_min_milliwatt: u32,
    pub power_max_milliwatt: u32,
    pub sm_clock_min_mhz: u32,
    pub sm_clock_max_mhz: u32,
    pub mem_clock_min_mhz: u32,
    pub mem_clock_max_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaticDiskInfo {
    pub name: String,
    pub mountpoint: String,
    pub filesystem: String,
    pub total_bytes: u64,
}

// ---------------------------------------------------------------------------
// Metric samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsBatch {
    pub node_id: String,
    pub samples: Vec<MetricSample>,
    pub sent_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub category: String,
    pub at: i64,
    pub payload: SamplePayload,
}

impl MetricSample {
    /// Build a sample with the category implied by its payload.
    pub fn new(at: i64, payload: SamplePayload) -> Self {
        Self { category: payload.category().to_owned(), at, payload }
    }
}

/// Closed set of sample payload shapes, keyed by category.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    CpuMedium(CpuMediumMetrics),
    CpuUltra(CpuUltraMetrics),
    GpuFast(GpuFastMetrics),
    Memory(MemoryMetrics),
    Storage(StorageMetrics),
    Network(NetworkMetrics),
    Infiniband(InfinibandMetrics),
    Process(ProcessMetrics),
}

impl SamplePayload {
    /// The category tag this payload shape is keyed by.
    pub fn category(&self) -> &'static str {
        match self {
            Self::CpuMedium(_) => category::CPU_MEDIUM,
            Self::CpuUltra(_) => category::CPU_ULTRA,
            Self::GpuFast(_) => category::GPU_FAST,
            Self::Memory(_) => category::MEMORY,
            Self::Storage(_) => category::STORAGE,
            Self::Network(_) => category::NETWORK,
            Self::Infiniband(_) => category::INFINIBAND,
            Self::Process(_) => category::PROCESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreMetrics {
    pub core_id: u32,
    pub utilization: f64,
    pub scaling_cur_khz: u64,
    pub package_id: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageTemperature {
    pub package_id: u32,
    pub milli_celsius: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuMediumMetrics {
    pub cores: Vec<CoreMetrics>,
    pub temperatures: Vec<PackageTemperature>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreScalingConfig {
    pub core_id: u32,
    pub scaling_min_khz: u64,
    pub scaling_max_khz: u64,
    pub available_governors: Vec<String>,
    pub current_governor: String,
    pub scaling_driver: String,
    pub package_id: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageRapl {
    pub package_id: u32,
    pub energy_microjoule: u64,
    pub power_cap_microwatt: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UncoreFrequency {
    pub package_id: u32,
    pub current_khz: u64,
    pub min_khz: u64,
    pub max_khz: u64,
    pub initial_min_khz: u64,
    pub initial_max_khz: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuUltraMetrics {
    pub per_core: Vec<CoreScalingConfig>,
    pub rapl: Vec<PackageRapl>,
    pub uncore: Vec<UncoreFrequency>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpuDeviceMetrics {
    pub index: u32,
    pub utilization_gpu: u32,
    pub utilization_mem: u32,
    pub memory_used_bytes: u64,
    pub temperature_celsius: u32,
    pub power_usage_milliwatt: u32,
    pub graphics_clock_mhz: u32,
    pub memory_clock_mhz: u32,
    pub power_limit_milliwatt: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpuFastMetrics {
    pub devices: Vec<GpuDeviceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub cached_bytes: u64,
    pub buffers_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiskMetrics {
    pub name: String,
    pub mountpoint: String,
    pub filesystem: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub read_sectors: u64,
    pub write_sectors: u64,
    pub read_ios: u64,
    pub write_ios: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageMetrics {
    pub disks: Vec<DiskMetrics>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterfaceMetrics {
    pub name: String,
    pub ips: Vec<String>,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkMetrics {
    pub interfaces: Vec<InterfaceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IbPortMetrics {
    pub name: String,
    pub address: String,
    pub oper_state: String,
    pub mtu: u32,
    pub device: String,
    pub port: u32,
    pub rate: String,
    pub link_state: String,
    pub physical_state: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InfinibandMetrics {
    pub ports: Vec<IbPortMetrics>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub user: String,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessMetrics {
    pub processes: Vec<ProcessInfo>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Server-assigned, unique for the command's lifetime.
    pub id: String,
    pub node_id: String,
    pub issued_at: i64,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(payload: CommandPayload) -> Self {
        Self { id: String::new(), node_id: String::new(), issued_at: 0, payload }
    }

    /// The type tag this command's payload shape is keyed by.
    pub fn command_type(&self) -> &'static str {
        self.payload.command_type()
    }
}

/// RAPL power-cap domain within a CPU package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerCapDomain {
    #[default]
    Package,
    Dram,
}

impl PowerCapDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Dram => "dram",
        }
    }

    /// Parse from a wire string; empty means the default package domain.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" | "package" => Some(Self::Package),
            "dram" => Some(Self::Dram),
            _ => None,
        }
    }
}

/// Closed set of command payload shapes, keyed by command type.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    CpuScalingRange { package_id: Option<u32>, min_khz: u64, max_khz: u64 },
    CpuGovernor { package_id: Option<u32>, governor: String },
    CpuUncoreRange { package_id: u32, min_khz: u64, max_khz: u64 },
    CpuPowerCap { package_id: u32, microwatt: u64, domain: PowerCapDomain },
    GpuClockRange { gpu_index: u32, sm_min_mhz: u32, sm_max_mhz: u32, mem_min_mhz: u32, mem_max_mhz: u32 },
    GpuPowerCap { gpu_index: u32, milliwatt: u32 },
    ProcessSignal { pid: i32, signal: i32 },
}

impl CommandPayload {
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::CpuScalingRange { .. } => command_type::CPU_SCALING_RANGE,
            Self::CpuGovernor { .. } => command_type::CPU_GOVERNOR,
            Self::CpuUncoreRange { .. } => command_type::CPU_UNCORE_RANGE,
            Self::CpuPowerCap { .. } => command_type::CPU_POWER_CAP,
            Self::GpuClockRange { .. } => command_type::GPU_CLOCK_RANGE,
            Self::GpuPowerCap { .. } => command_type::GPU_POWER_CAP,
            Self::ProcessSignal { .. } => command_type::PROCESS_SIGNAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandResult {
    pub command_id: String,
    pub node_id: String,
    pub command_type: String,
    pub success: bool,
    pub error: String,
    pub finished_at: i64,
}

impl CommandResult {
    /// Build a failure result for the given command.
    pub fn failure(cmd: &Command, error: impl Into<String>) -> Self {
        Self {
            command_id: cmd.id.clone(),
            node_id: cmd.node_id.clone(),
            command_type: cmd.command_type().to_owned(),
            success: false,
            error: error.into(),
            finished_at: now_unix_nano(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node snapshots
// ---------------------------------------------------------------------------

/// Point-in-time view of a node: identity, connection state, and the latest
/// sample per category.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub connected: bool,
    pub last_seen: i64,
    pub registration: Option<Registration>,
    pub latest: BTreeMap<String, MetricSample>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
