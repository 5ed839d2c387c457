// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::model::{
    category, command_type, Command, CommandPayload, CommandResult, MemoryMetrics, MetricSample,
    PowerCapDomain, SamplePayload,
};

#[test]
fn payload_category_matches_tag() {
    let sample = MetricSample::new(42, SamplePayload::Memory(MemoryMetrics::default()));
    assert_eq!(sample.category, category::MEMORY);
    assert_eq!(sample.at, 42);
}

#[test]
fn command_type_derived_from_payload() {
    let cmd = Command::new(CommandPayload::CpuGovernor {
        package_id: Some(0),
        governor: "powersave".to_owned(),
    });
    assert_eq!(cmd.command_type(), command_type::CPU_GOVERNOR);

    let cmd = Command::new(CommandPayload::ProcessSignal { pid: 1234, signal: 15 });
    assert_eq!(cmd.command_type(), command_type::PROCESS_SIGNAL);
}

#[test]
fn power_cap_domain_parses_known_values() {
    assert_eq!(PowerCapDomain::parse(""), Some(PowerCapDomain::Package));
    assert_eq!(PowerCapDomain::parse("package"), Some(PowerCapDomain::Package));
    assert_eq!(PowerCapDomain::parse("dram"), Some(PowerCapDomain::Dram));
    assert_eq!(PowerCapDomain::parse("gpu"), None);
}

#[test]
fn failure_result_carries_command_identity() {
    let mut cmd = Command::new(CommandPayload::GpuPowerCap { gpu_index: 1, milliwatt: 250_000 });
    cmd.id = "cmd-1".to_owned();
    cmd.node_id = "node-a".to_owned();

    let res = CommandResult::failure(&cmd, "boom");
    assert_eq!(res.command_id, "cmd-1");
    assert_eq!(res.node_id, "node-a");
    assert_eq!(res.command_type, command_type::GPU_POWER_CAP);
    assert!(!res.success);
    assert_eq!(res.error, "boom");
    assert!(res.finished_at > 0);
}
