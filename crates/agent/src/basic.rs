// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host identity collection for registration.

use telemetry_api::model::BasicInfo;

use crate::modules::util::{local_ipv4s, read_trimmed};

/// Gather the host identity reported in the agent's registration. Individual
/// sources failing leave their field empty; this never errors.
pub fn collect_basic_info() -> BasicInfo {
    let hostname = read_trimmed("/proc/sys/kernel/hostname").unwrap_or_default();
    let kernel = uname_field("-r");
    let arch = uname_field("-m");
    let machine_id = read_trimmed("/etc/machine-id").unwrap_or_default();
    let boot_id = read_trimmed("/proc/sys/kernel/random/boot_id").unwrap_or_default();
    let os = read_os_pretty_name().unwrap_or_default();
    let hardware_model = read_trimmed("/sys/class/dmi/id/product_name").unwrap_or_default();
    let hardware_vendor = read_trimmed("/sys/class/dmi/id/sys_vendor").unwrap_or_default();

    BasicInfo {
        hostname,
        ips: local_ipv4s(),
        os,
        kernel,
        arch,
        machine_id,
        boot_id,
        hardware_vendor,
        hardware_model,
    }
}

fn uname_field(flag: &str) -> String {
    std::process::Command::new("uname")
        .arg(flag)
        .output()
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned())
        .unwrap_or_default()
}

fn read_os_pretty_name() -> Option<String> {
    let contents = std::fs::read_to_string("/etc/os-release").ok()?;
    parse_os_pretty_name(&contents)
}

pub(crate) fn parse_os_pretty_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_owned())
}

#[cfg(test)]
#[path = "basic_tests.rs"]
mod tests;
