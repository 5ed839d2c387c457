// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use anyhow::anyhow;

use crate::model::{
    AgentMessage, BasicInfo, Command, CommandPayload, CommandResult, CoreMetrics,
    CpuMediumMetrics, Heartbeat, MemoryMetrics, MetricSample, MetricsBatch, ModuleRegistration,
    PowerCapDomain, Registration, SamplePayload, ServerMessage,
};
use crate::proto;
use crate::proto_bridge::{
    from_pb_agent_message, from_pb_command, from_pb_metric_sample, from_pb_server_message,
    to_pb_agent_message, to_pb_command, to_pb_metric_sample, to_pb_server_message,
};

fn sample_commands() -> Vec<Command> {
    let payloads = vec![
        CommandPayload::CpuScalingRange { package_id: None, min_khz: 800_000, max_khz: 3_600_000 },
        CommandPayload::CpuGovernor { package_id: Some(1), governor: "performance".to_owned() },
        CommandPayload::CpuUncoreRange { package_id: 0, min_khz: 1_200_000, max_khz: 2_400_000 },
        CommandPayload::CpuPowerCap {
            package_id: 0,
            microwatt: 125_000_000,
            domain: PowerCapDomain::Dram,
        },
        CommandPayload::GpuClockRange {
            gpu_index: 2,
            sm_min_mhz: 300,
            sm_max_mhz: 1500,
            mem_min_mhz: 405,
            mem_max_mhz: 6800,
        },
        CommandPayload::GpuPowerCap { gpu_index: 0, milliwatt: 250_000 },
        CommandPayload::ProcessSignal { pid: 4242, signal: 9 },
    ];
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| Command {
            id: format!("cmd-{i}"),
            node_id: "node-a".to_owned(),
            issued_at: 1_000 + i as i64,
            payload,
        })
        .collect()
}

#[test]
fn command_round_trip_all_types() -> anyhow::Result<()> {
    for cmd in sample_commands() {
        let pb = to_pb_command(&cmd);
        assert_eq!(pb.r#type, cmd.command_type());
        let back = from_pb_command(pb).ok_or_else(|| anyhow!("decode {}", cmd.command_type()))?;
        assert_eq!(back, cmd);
    }
    Ok(())
}

#[test]
fn command_without_payload_is_rejected() {
    let pb = proto::Command {
        id: "x".to_owned(),
        node_id: "n".to_owned(),
        r#type: "cpu_governor".to_owned(),
        issued_at_unix_nano: 1,
        payload: None,
    };
    assert!(from_pb_command(pb).is_none());
}

#[test]
fn power_cap_with_unknown_domain_is_rejected() {
    let pb = proto::Command {
        id: "x".to_owned(),
        node_id: "n".to_owned(),
        r#type: "cpu_power_cap".to_owned(),
        issued_at_unix_nano: 1,
        payload: Some(proto::command::Payload::CpuPowerCap(proto::CpuPowerCapCommand {
            package_id: 0,
            microwatt: 1,
            domain: "gpu".to_owned(),
        })),
    };
    assert!(from_pb_command(pb).is_none());
}

#[test]
fn metric_sample_round_trip() -> anyhow::Result<()> {
    let sample = MetricSample::new(
        7_000,
        SamplePayload::CpuMedium(CpuMediumMetrics {
            cores: vec![CoreMetrics {
                core_id: 3,
                utilization: 0.25,
                scaling_cur_khz: 2_400_000,
                package_id: 0,
            }],
            temperatures: vec![],
        }),
    );
    let back = from_pb_metric_sample(to_pb_metric_sample(&sample))
        .ok_or_else(|| anyhow!("decode sample"))?;
    assert_eq!(back, sample);
    Ok(())
}

#[test]
fn sample_without_payload_is_dropped() {
    let pb = proto::MetricSample {
        category: "memory".to_owned(),
        at_unix_nano: 1,
        payload: None,
    };
    assert!(from_pb_metric_sample(pb).is_none());
}

#[test]
fn sample_category_defaults_from_payload() -> anyhow::Result<()> {
    let pb = proto::MetricSample {
        category: String::new(),
        at_unix_nano: 5,
        payload: Some(proto::metric_sample::Payload::Memory(proto::MemoryMetrics::default())),
    };
    let back = from_pb_metric_sample(pb).ok_or_else(|| anyhow!("decode sample"))?;
    assert_eq!(back.category, "memory");
    Ok(())
}

#[test]
fn agent_message_round_trip() -> anyhow::Result<()> {
    let messages = vec![
        AgentMessage::Register(Registration {
            node_id: "node-a".to_owned(),
            basic: BasicInfo { hostname: "host-a".to_owned(), ..BasicInfo::default() },
            modules: vec![ModuleRegistration { name: "memory".to_owned(), ..Default::default() }],
            issued_at: 9,
        }),
        AgentMessage::Metrics(MetricsBatch {
            node_id: "node-a".to_owned(),
            samples: vec![MetricSample::new(1, SamplePayload::Memory(MemoryMetrics::default()))],
            sent_at: 2,
        }),
        AgentMessage::CommandResult(CommandResult {
            command_id: "cmd-1".to_owned(),
            node_id: "node-a".to_owned(),
            command_type: "cpu_governor".to_owned(),
            success: true,
            error: String::new(),
            finished_at: 3,
        }),
        AgentMessage::Heartbeat(Heartbeat { node_id: "node-a".to_owned(), at: 4 }),
    ];
    for msg in messages {
        let back = from_pb_agent_message(to_pb_agent_message(&msg))
            .ok_or_else(|| anyhow!("decode agent message"))?;
        assert_eq!(back, msg);
    }
    Ok(())
}

#[test]
fn server_message_round_trip() -> anyhow::Result<()> {
    let messages = vec![
        ServerMessage::Ack(crate::model::ServerAck { node_id: "node-a".to_owned(), at: 1 }),
        ServerMessage::Command(Command {
            id: "cmd-9".to_owned(),
            node_id: "node-a".to_owned(),
            issued_at: 2,
            payload: CommandPayload::CpuGovernor {
                package_id: None,
                governor: "schedutil".to_owned(),
            },
        }),
    ];
    for msg in messages {
        let back = from_pb_server_message(to_pb_server_message(&msg))
            .ok_or_else(|| anyhow!("decode server message"))?;
        assert_eq!(back, msg);
    }
    Ok(())
}

#[test]
fn empty_message_decodes_to_none() {
    assert!(from_pb_agent_message(proto::AgentMessage { kind: None }).is_none());
    assert!(from_pb_server_message(proto::ServerMessage { kind: None }).is_none());
}
