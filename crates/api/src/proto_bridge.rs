// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversions between the domain model and the generated `telemetry.v1`
//! protobuf types. Decoding returns `None` for malformed messages (missing
//! or unknown payloads); callers drop those instead of failing the stream.

use crate::model::{
    AgentMessage, BasicInfo, Command, CommandPayload, CommandResult, CollectorSpec,
    ControllerSpec, CoreMetrics, CoreScalingConfig, CpuMediumMetrics, CpuStaticInfo,
    CpuUltraMetrics, DiskMetrics, GpuDeviceMetrics, GpuFastMetrics, GpuStaticInfo, Heartbeat,
    IbPortMetrics, InfinibandMetrics, InterfaceMetrics, MemoryMetrics, MetricSample,
    MetricsBatch, ModuleRegistration, NetworkMetrics, NodeSnapshot, PackageRapl,
    PackageTemperature, PowerCapDomain, ProcessInfo, ProcessMetrics, Registration, SamplePayload,
    ServerAck, ServerMessage, StaticDiskInfo, StorageMetrics, UncoreFrequency,
};
use crate::proto;

// ---------------------------------------------------------------------------
// Stream messages
// ---------------------------------------------------------------------------

pub fn to_pb_agent_message(msg: &AgentMessage) -> proto::AgentMessage {
    let kind = match msg {
        AgentMessage::Register(reg) => {
            proto::agent_message::Kind::Register(to_pb_registration(reg))
        }
        AgentMessage::Metrics(batch) => {
            proto::agent_message::Kind::Metrics(to_pb_metrics_batch(batch))
        }
        AgentMessage::CommandResult(res) => {
            proto::agent_message::Kind::CommandResult(to_pb_command_result(res))
        }
        AgentMessage::Heartbeat(hb) => proto::agent_message::Kind::Heartbeat(proto::Heartbeat {
            node_id: hb.node_id.clone(),
            at_unix_nano: hb.at,
        }),
    };
    proto::AgentMessage { kind: Some(kind) }
}

pub fn from_pb_agent_message(pb: proto::AgentMessage) -> Option<AgentMessage> {
    match pb.kind? {
        proto::agent_message::Kind::Register(reg) => {
            Some(AgentMessage::Register(from_pb_registration(reg)))
        }
        proto::agent_message::Kind::Metrics(batch) => {
            Some(AgentMessage::Metrics(from_pb_metrics_batch(batch)))
        }
        proto::agent_message::Kind::CommandResult(res) => {
            Some(AgentMessage::CommandResult(from_pb_command_result(res)))
        }
        proto::agent_message::Kind::Heartbeat(hb) => Some(AgentMessage::Heartbeat(Heartbeat {
            node_id: hb.node_id,
            at: hb.at_unix_nano,
        })),
    }
}

pub fn to_pb_server_message(msg: &ServerMessage) -> proto::ServerMessage {
    let kind = match msg {
        ServerMessage::Ack(ack) => proto::server_message::Kind::Ack(proto::ServerAck {
            node_id: ack.node_id.clone(),
            at_unix_nano: ack.at,
        }),
        ServerMessage::Command(cmd) => proto::server_message::Kind::Command(to_pb_command(cmd)),
    };
    proto::ServerMessage { kind: Some(kind) }
}

pub fn from_pb_server_message(pb: proto::ServerMessage) -> Option<ServerMessage> {
    match pb.kind? {
        proto::server_message::Kind::Ack(ack) => Some(ServerMessage::Ack(ServerAck {
            node_id: ack.node_id,
            at: ack.at_unix_nano,
        })),
        proto::server_message::Kind::Command(cmd) => {
            Some(ServerMessage::Command(from_pb_command(cmd)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub fn to_pb_registration(reg: &Registration) -> proto::Registration {
    proto::Registration {
        node_id: reg.node_id.clone(),
        basic: Some(proto::BasicInfo {
            hostname: reg.basic.hostname.clone(),
            ips: reg.basic.ips.clone(),
            os: reg.basic.os.clone(),
            kernel: reg.basic.kernel.clone(),
            arch: reg.basic.arch.clone(),
            machine_id: reg.basic.machine_id.clone(),
            boot_id: reg.basic.boot_id.clone(),
            hardware_vendor: reg.basic.hardware_vendor.clone(),
            hardware_model: reg.basic.hardware_model.clone(),
        }),
        modules: reg.modules.iter().map(to_pb_module_registration).collect(),
        issued_at_unix_nano: reg.issued_at,
    }
}

pub fn from_pb_registration(pb: proto::Registration) -> Registration {
    let basic = pb.basic.map(|b| BasicInfo {
        hostname: b.hostname,
        ips: b.ips,
        os: b.os,
        kernel: b.kernel,
        arch: b.arch,
        machine_id: b.machine_id,
        boot_id: b.boot_id,
        hardware_vendor: b.hardware_vendor,
        hardware_model: b.hardware_model,
    });
    Registration {
        node_id: pb.node_id,
        basic: basic.unwrap_or_default(),
        modules: pb.modules.into_iter().map(from_pb_module_registration).collect(),
        issued_at: pb.issued_at_unix_nano,
    }
}

pub fn to_pb_module_registration(module: &ModuleRegistration) -> proto::ModuleRegistration {
    proto::ModuleRegistration {
        name: module.name.clone(),
        collectors: module
            .collectors
            .iter()
            .map(|c| proto::CollectorSpec {
                category: c.category.clone(),
                interval: c.interval.clone(),
            })
            .collect(),
        controllers: module
            .controllers
            .iter()
            .map(|c| proto::ControllerSpec { r#type: c.command_type.clone() })
            .collect(),
        cpu: module.cpu.as_ref().map(|c| proto::CpuStaticInfo {
            vendor: c.vendor.clone(),
            model: c.model.clone(),
            packages: c.packages,
            physical_cores: c.physical_cores,
            logical_cores: c.logical_cores,
            threads_per_core: c.threads_per_core,
            cpuinfo_min_khz: c.cpuinfo_min_khz,
            cpuinfo_max_khz: c.cpuinfo_max_khz,
            supports_uncore: c.supports_uncore,
            supports_rapl: c.supports_rapl,
        }),
        gpus: module
            .gpus
            .iter()
            .map(|g| proto::GpuStaticInfo {
                index: g.index,
                name: g.name.clone(),
                uuid: g.uuid.clone(),
                memory_total_bytes: g.memory_total_bytes,
                power_min_milliwatt: g.power_min_milliwatt,
                power_max_milliwatt: g.power_max_milliwatt,
                sm_clock_min_mhz: g.sm_clock_min_mhz,
                sm_clock_max_mhz: g.sm_clock_max_mhz,
                mem_clock_min_mhz: g.mem_clock_min_mhz,
                mem_clock_max_mhz: g.mem_clock_max_mhz,
            })
            .collect(),
        disks: module
            .disks
            .iter()
            .map(|d| proto::StaticDiskInfo {
                name: d.name.clone(),
                mountpoint: d.mountpoint.clone(),
                filesystem: d.filesystem.clone(),
                total_bytes: d.total_bytes,
            })
            .collect(),
    }
}

pub fn from_pb_module_registration(pb: proto::ModuleRegistration) -> ModuleRegistration {
    ModuleRegistration {
        name: pb.name,
        collectors: pb
            .collectors
            .into_iter()
            .map(|c| CollectorSpec { category: c.category, interval: c.interval })
            .collect(),
        controllers: pb
            .controllers
            .into_iter()
            .map(|c| ControllerSpec { command_type: c.r#type })
            .collect(),
        cpu: pb.cpu.map(|c| CpuStaticInfo {
            vendor: c.vendor,
            model: c.model,
            packages: c.packages,
            physical_cores: c.physical_cores,
            logical_cores: c.logical_cores,
            threads_per_core: c.threads_per_core,
            cpuinfo_min_khz: c.cpuinfo_min_khz,
            cpuinfo_max_khz: c.cpuinfo_max_khz,
            supports_uncore: c.supports_uncore,
            supports_rapl: c.supports_rapl,
        }),
        gpus: pb
            .gpus
            .into_iter()
            .map(|g| GpuStaticInfo {
                index: g.index,
                name: g.name,
                uuid: g.uuid,
                memory_total_bytes: g.memory_total_bytes,
                power_min_milliwatt: g.power_min_milliwatt,
                power_max_milliwatt: g.power_max_milliwatt,
                sm_clock_min_mhz: g.sm_clock_min_mhz,
                sm_clock_max_mhz: g.sm_clock_max_mhz,
                mem_clock_min_mhz: g.mem_clock_min_mhz,
                mem_clock_max_mhz: g.mem_clock_max_mhz,
            })
            .collect(),
        disks: pb
            .disks
            .into_iter()
            .map(|d| StaticDiskInfo {
                name: d.name,
                mountpoint: d.mountpoint,
                filesystem: d.filesystem,
                total_bytes: d.total_bytes,
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

pub fn to_pb_metrics_batch(batch: &MetricsBatch) -> proto::MetricsBatch {
    proto::MetricsBatch {
        node_id: batch.node_id.clone(),
        samples: batch.samples.iter().map(to_pb_metric_sample).collect(),
        sent_at_unix_nano: batch.sent_at,
    }
}

pub fn from_pb_metrics_batch(pb: proto::MetricsBatch) -> MetricsBatch {
    MetricsBatch {
        node_id: pb.node_id,
        samples: pb.samples.into_iter().filter_map(from_pb_metric_sample).collect(),
        sent_at: pb.sent_at_unix_nano,
    }
}

pub fn to_pb_metric_sample(sample: &MetricSample) -> proto::MetricSample {
    let payload = match &sample.payload {
        SamplePayload::CpuMedium(m) => {
            proto::metric_sample::Payload::CpuMedium(proto::CpuMediumMetrics {
                cores: m
                    .cores
                    .iter()
                    .map(|c| proto::CoreMetrics {
                        core_id: c.core_id,
                        utilization: c.utilization,
                        scaling_cur_khz: c.scaling_cur_khz,
                        package_id: c.package_id,
                    })
                    .collect(),
                temperatures: m
                    .temperatures
                    .iter()
                    .map(|t| proto::PackageTemperature {
                        package_id: t.package_id,
                        milli_celsius: t.milli_celsius,
                    })
                    .collect(),
            })
        }
        SamplePayload::CpuUltra(m) => {
            proto::metric_sample::Payload::CpuUltra(proto::CpuUltraMetrics {
                per_core: m
                    .per_core
                    .iter()
                    .map(|c| proto::CoreScalingConfig {
                        core_id: c.core_id,
                        scaling_min_khz: c.scaling_min_khz,
                        scaling_max_khz: c.scaling_max_khz,
                        available_governors: c.available_governors.clone(),
                        current_governor: c.current_governor.clone(),
                        scaling_driver: c.scaling_driver.clone(),
                        package_id: c.package_id,
                    })
                    .collect(),
                rapl: m
                    .rapl
                    .iter()
                    .map(|r| proto::PackageRapl {
                        package_id: r.package_id,
                        energy_microjoule: r.energy_microjoule,
                        power_cap_microwatt: r.power_cap_microwatt,
                    })
                    .collect(),
                uncore: m
                    .uncore
                    .iter()
                    .map(|u| proto::UncoreFrequency {
                        package_id: u.package_id,
                        current_khz: u.current_khz,
                        min_khz: u.min_khz,
                        max_khz: u.max_khz,
                        initial_min_khz: u.initial_min_khz,
                        initial_max_khz: u.initial_max_khz,
                    })
                    .collect(),
            })
        }
        SamplePayload::GpuFast(m) => {
            proto::metric_sample::Payload::GpuFast(proto::GpuFastMetrics {
                devices: m
                    .devices
                    .iter()
                    .map(|d| proto::GpuDeviceMetrics {
                        index: d.index,
                        utilization_gpu: d.utilization_gpu,
                        utilization_mem: d.utilization_mem,
                        memory_used_bytes: d.memory_used_bytes,
                        temperature_celsius: d.temperature_celsius,
                        power_usage_milliwatt: d.power_usage_milliwatt,
                        graphics_clock_mhz: d.graphics_clock_mhz,
                        memory_clock_mhz: d.memory_clock_mhz,
                        power_limit_milliwatt: d.power_limit_milliwatt,
                    })
                    .collect(),
            })
        }
        SamplePayload::Memory(m) => proto::metric_sample::Payload::Memory(proto::MemoryMetrics {
            total_bytes: m.total_bytes,
            used_bytes: m.used_bytes,
            free_bytes: m.free_bytes,
            available_bytes: m.available_bytes,
            cached_bytes: m.cached_bytes,
            buffers_bytes: m.buffers_bytes,
        }),
        SamplePayload::Storage(m) => {
            proto::metric_sample::Payload::Storage(proto::StorageMetrics {
                disks: m
                    .disks
                    .iter()
                    .map(|d| proto::DiskMetrics {
                        name: d.name.clone(),
                        mountpoint: d.mountpoint.clone(),
                        filesystem: d.filesystem.clone(),
                        total_bytes: d.total_bytes,
                        used_bytes: d.used_bytes,
                        free_bytes: d.free_bytes,
                        read_sectors: d.read_sectors,
                        write_sectors: d.write_sectors,
                        read_ios: d.read_ios,
                        write_ios: d.write_ios,
                    })
                    .collect(),
            })
        }
        SamplePayload::Network(m) => {
            proto::metric_sample::Payload::Network(proto::NetworkMetrics {
                interfaces: m
                    .interfaces
                    .iter()
                    .map(|i| proto::InterfaceMetrics {
                        name: i.name.clone(),
                        ips: i.ips.clone(),
                        rx_bytes: i.rx_bytes,
                        rx_packets: i.rx_packets,
                        tx_bytes: i.tx_bytes,
                        tx_packets: i.tx_packets,
                    })
                    .collect(),
            })
        }
        SamplePayload::Infiniband(m) => {
            proto::metric_sample::Payload::Infiniband(proto::InfinibandMetrics {
                ports: m
                    .ports
                    .iter()
                    .map(|p| proto::IbPortMetrics {
                        name: p.name.clone(),
                        address: p.address.clone(),
                        oper_state: p.oper_state.clone(),
                        mtu: p.mtu,
                        device: p.device.clone(),
                        port: p.port,
                        rate: p.rate.clone(),
                        link_state: p.link_state.clone(),
                        physical_state: p.physical_state.clone(),
                        rx_bytes: p.rx_bytes,
                        tx_bytes: p.tx_bytes,
                    })
                    .collect(),
            })
        }
        SamplePayload::Process(m) => {
            proto::metric_sample::Payload::Process(proto::ProcessMetrics {
                processes: m
                    .processes
                    .iter()
                    .map(|p| proto::ProcessInfo {
                        pid: p.pid,
                        ppid: p.ppid,
                        user: p.user.clone(),
                        state: p.state.clone(),
                        cpu_percent: p.cpu_percent,
                        memory_bytes: p.memory_bytes,
                        command: p.command.clone(),
                    })
                    .collect(),
            })
        }
    };
    proto::MetricSample {
        category: sample.category.clone(),
        at_unix_nano: sample.at,
        payload: Some(payload),
    }
}

pub fn from_pb_metric_sample(pb: proto::MetricSample) -> Option<MetricSample> {
    let payload = match pb.payload? {
        proto::metric_sample::Payload::CpuMedium(m) => SamplePayload::CpuMedium(CpuMediumMetrics {
            cores: m
                .cores
                .into_iter()
                .map(|c| CoreMetrics {
                    core_id: c.core_id,
                    utilization: c.utilization,
                    scaling_cur_khz: c.scaling_cur_khz,
                    package_id: c.package_id,
                })
                .collect(),
            temperatures: m
                .temperatures
                .into_iter()
                .map(|t| PackageTemperature {
                    package_id: t.package_id,
                    milli_celsius: t.milli_celsius,
                })
                .collect(),
        }),
        proto::metric_sample::Payload::CpuUltra(m) => SamplePayload::CpuUltra(CpuUltraMetrics {
            per_core: m
                .per_core
                .into_iter()
                .map(|c| CoreScalingConfig {
                    core_id: c.core_id,
                    scaling_min_khz: c.scaling_min_khz,
                    scaling_max_khz: c.scaling_max_khz,
                    available_governors: c.available_governors,
                    current_governor: c.current_governor,
                    scaling_driver: c.scaling_driver,
                    package_id: c.package_id,
                })
                .collect(),
            rapl: m
                .rapl
                .into_iter()
                .map(|r| PackageRapl {
                    package_id: r.package_id,
                    energy_microjoule: r.energy_microjoule,
                    power_cap_microwatt: r.power_cap_microwatt,
                })
                .collect(),
            uncore: m
                .uncore
                .into_iter()
                .map(|u| UncoreFrequency {
                    package_id: u.package_id,
                    current_khz: u.current_khz,
                    min_khz: u.min_khz,
                    max_khz: u.max_khz,
                    initial_min_khz: u.initial_min_khz,
                    initial_max_khz: u.initial_max_khz,
                })
                .collect(),
        }),
        proto::metric_sample::Payload::GpuFast(m) => SamplePayload::GpuFast(GpuFastMetrics {
            devices: m
                .devices
                .into_iter()
                .map(|d| GpuDeviceMetrics {
                    index: d.index,
                    utilization_gpu: d.utilization_gpu,
                    utilization_mem: d.utilization_mem,
                    memory_used_bytes: d.memory_used_bytes,
                    temperature_celsius: d.temperature_celsius,
                    power_usage_milliwatt: d.power_usage_milliwatt,
                    graphics_clock_mhz: d.graphics_clock_mhz,
                    memory_clock_mhz: d.memory_clock_mhz,
                    power_limit_milliwatt: d.power_limit_milliwatt,
                })
                .collect(),
        }),
        proto::metric_sample::Payload::Memory(m) => SamplePayload::Memory(MemoryMetrics {
            total_bytes: m.total_bytes,
            used_bytes: m.used_bytes,
            free_bytes: m.free_bytes,
            available_bytes: m.available_bytes,
            cached_bytes: m.cached_bytes,
            buffers_bytes: m.buffers_bytes,
        }),
        proto::metric_sample::Payload::Storage(m) => SamplePayload::Storage(StorageMetrics {
            disks: m
                .disks
                .into_iter()
                .map(|d| DiskMetrics {
                    name: d.name,
                    mountpoint: d.mountpoint,
                    filesystem: d.filesystem,
                    total_bytes: d.total_bytes,
                    used_bytes: d.used_bytes,
                    free_bytes: d.free_bytes,
                    read_sectors: d.read_sectors,
                    write_sectors: d.write_sectors,
                    read_ios: d.read_ios,
                    write_ios: d.write_ios,
                })
                .collect(),
        }),
        proto::metric_sample::Payload::Network(m) => SamplePayload::Network(NetworkMetrics {
            interfaces: m
                .interfaces
                .into_iter()
                .map(|i| InterfaceMetrics {
                    name: i.name,
                    ips: i.ips,
                    rx_bytes: i.rx_bytes,
                    rx_packets: i.rx_packets,
                    tx_bytes: i.tx_bytes,
                    tx_packets: i.tx_packets,
                })
                .collect(),
        }),
        proto::metric_sample::Payload::Infiniband(m) => {
            SamplePayload::Infiniband(InfinibandMetrics {
                ports: m
                    .ports
                    .into_iter()
                    .map(|p| IbPortMetrics {
                        name: p.name,
                        address: p.address,
                        oper_state: p.oper_state,
                        mtu: p.mtu,
                        device: p.device,
                        port: p.port,
                        rate: p.rate,
                        link_state: p.link_state,
                        physical_state: p.physical_state,
                        rx_bytes: p.rx_bytes,
                        tx_bytes: p.tx_bytes,
                    })
                    .collect(),
            })
        }
        proto::metric_sample::Payload::Process(m) => SamplePayload::Process(ProcessMetrics {
            processes: m
                .processes
                .into_iter()
                .map(|p| ProcessInfo {
                    pid: p.pid,
                    ppid: p.ppid,
                    user: p.user,
                    state: p.state,
                    cpu_percent: p.cpu_percent,
                    memory_bytes: p.memory_bytes,
                    command: p.command,
                })
                .collect(),
        }),
    };
    let category = if pb.category.is_empty() {
        payload.category().to_owned()
    } else {
        pb.category
    };
    Some(MetricSample { category, at: pb.at_unix_nano, payload })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn to_pb_command(cmd: &Command) -> proto::Command {
    let payload = match &cmd.payload {
        CommandPayload::CpuScalingRange { package_id, min_khz, max_khz } => {
            proto::command::Payload::CpuScalingRange(proto::CpuScalingRangeCommand {
                package_id: *package_id,
                min_khz: *min_khz,
                max_khz: *max_khz,
            })
        }
        CommandPayload::CpuGovernor { package_id, governor } => {
            proto::command::Payload::CpuGovernor(proto::CpuGovernorCommand {
                package_id: *package_id,
                governor: governor.clone(),
            })
        }
        CommandPayload::CpuUncoreRange { package_id, min_khz, max_khz } => {
            proto::command::Payload::CpuUncoreRange(proto::CpuUncoreRangeCommand {
                package_id: *package_id,
                min_khz: *min_khz,
                max_khz: *max_khz,
            })
        }
        CommandPayload::CpuPowerCap { package_id, microwatt, domain } => {
            proto::command::Payload::CpuPowerCap(proto::CpuPowerCapCommand {
                package_id: *package_id,
                microwatt: *microwatt,
                domain: domain.as_str().to_owned(),
            })
        }
        CommandPayload::GpuClockRange { gpu_index, sm_min_mhz, sm_max_mhz, mem_min_mhz, mem_max_mhz } => {
            proto::command::Payload::GpuClockRange(proto::GpuClockRangeCommand {
                gpu_index: *gpu_index,
                sm_min_mhz: *sm_min_mhz,
                sm_max_mhz: *sm_max_mhz,
                mem_min_mhz: *mem_min_mhz,
                mem_max_mhz: *mem_max_mhz,
            })
        }
        CommandPayload::GpuPowerCap { gpu_index, milliwatt } => {
            proto::command::Payload::GpuPowerCap(proto::GpuPowerCapCommand {
                gpu_index: *gpu_index,
                milliwatt: *milliwatt,
            })
        }
        CommandPayload::ProcessSignal { pid, signal } => {
            proto::command::Payload::ProcessSignal(proto::ProcessSignalCommand {
                pid: *pid,
                signal: *signal,
            })
        }
    };
    proto::Command {
        id: cmd.id.clone(),
        node_id: cmd.node_id.clone(),
        r#type: cmd.command_type().to_owned(),
        issued_at_unix_nano: cmd.issued_at,
        payload: Some(payload),
    }
}

pub fn from_pb_command(pb: proto::Command) -> Option<Command> {
    let payload = from_pb_command_payload(pb.payload?)?;
    Some(Command {
        id: pb.id,
        node_id: pb.node_id,
        issued_at: pb.issued_at_unix_nano,
        payload,
    })
}

pub fn from_pb_command_payload(pb: proto::command::Payload) -> Option<CommandPayload> {
    match pb {
        proto::command::Payload::CpuScalingRange(p) => Some(CommandPayload::CpuScalingRange {
            package_id: p.package_id,
            min_khz: p.min_khz,
            max_khz: p.max_khz,
        }),
        proto::command::Payload::CpuGovernor(p) => Some(CommandPayload::CpuGovernor {
            package_id: p.package_id,
            governor: p.governor,
        }),
        proto::command::Payload::CpuUncoreRange(p) => Some(CommandPayload::CpuUncoreRange {
            package_id: p.package_id,
            min_khz: p.min_khz,
            max_khz: p.max_khz,
        }),
        proto::command::Payload::CpuPowerCap(p) => Some(CommandPayload::CpuPowerCap {
            package_id: p.package_id,
            microwatt: p.microwatt,
            domain: PowerCapDomain::parse(&p.domain)?,
        }),
        proto::command::Payload::GpuClockRange(p) => Some(CommandPayload::GpuClockRange {
            gpu_index: p.gpu_index,
            sm_min_mhz: p.sm_min_mhz,
            sm_max_mhz: p.sm_max_mhz,
            mem_min_mhz: p.mem_min_mhz,
            mem_max_mhz: p.mem_max_mhz,
        }),
        proto::command::Payload::GpuPowerCap(p) => Some(CommandPayload::GpuPowerCap {
            gpu_index: p.gpu_index,
            milliwatt: p.milliwatt,
        }),
        proto::command::Payload::ProcessSignal(p) => Some(CommandPayload::ProcessSignal {
            pid: p.pid,
            signal: p.signal,
        }),
    }
}

pub fn to_pb_command_result(res: &CommandResult) -> proto::CommandResult {
    proto::CommandResult {
        command_id: res.command_id.clone(),
        node_id: res.node_id.clone(),
        r#type: res.command_type.clone(),
        success: res.success,
        error: res.error.clone(),
        finished_at_unix_nano: res.finished_at,
    }
}

pub fn from_pb_command_result(pb: proto::CommandResult) -> CommandResult {
    CommandResult {
        command_id: pb.command_id,
        node_id: pb.node_id,
        command_type: pb.r#type,
        success: pb.success,
        error: pb.error,
        finished_at: pb.finished_at_unix_nano,
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

pub fn to_pb_node_snapshot(snapshot: &NodeSnapshot) -> proto::NodeSnapshot {
    proto::NodeSnapshot {
        node_id: snapshot.node_id.clone(),
        connected: snapshot.connected,
        last_seen_unix_nano: snapshot.last_seen,
        registration: snapshot.registration.as_ref().map(to_pb_registration),
        // BTreeMap iteration keeps categories sorted.
        latest: snapshot.latest.values().map(to_pb_metric_sample).collect(),
    }
}

#[cfg(test)]
#[path = "proto_bridge_tests.rs"]
mod tests;
