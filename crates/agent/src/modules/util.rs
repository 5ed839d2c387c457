// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small sysfs/procfs read helpers shared by the hardware modules.

use std::path::Path;

use anyhow::Context;

pub fn read_trimmed(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    Ok(raw.trim().to_owned())
}

pub fn read_u64(path: impl AsRef<Path>) -> anyhow::Result<u64> {
    let path = path.as_ref();
    let raw = read_trimmed(path)?;
    raw.parse::<u64>()
        .with_context(|| format!("parse uint from {}", path.display()))
}

pub fn read_i64(path: impl AsRef<Path>) -> anyhow::Result<i64> {
    let path = path.as_ref();
    let raw = read_trimmed(path)?;
    raw.parse::<i64>()
        .with_context(|| format!("parse int from {}", path.display()))
}

pub fn write_u64(path: impl AsRef<Path>, value: u64) -> anyhow::Result<()> {
    let path = path.as_ref();
    std::fs::write(path, value.to_string())
        .with_context(|| format!("write {}", path.display()))
}

/// IPv4 addresses of all interfaces that are up, sorted.
pub fn local_ipv4s() -> Vec<String> {
    let Ok(addrs) = nix::ifaddrs::getifaddrs() else {
        return Vec::new();
    };
    let mut ips: Vec<String> = addrs
        .filter(|ifa| ifa.flags.contains(nix::net::if_::InterfaceFlags::IFF_UP))
        .filter_map(|ifa| ifa.address)
        .filter_map(|addr| addr.as_sockaddr_in().map(|v4| v4.ip().to_string()))
        .collect();
    ips.sort();
    ips.dedup();
    ips
}

/// IPv4 addresses per interface name, for interfaces that are up.
pub fn interface_ipv4s() -> std::collections::HashMap<String, Vec<String>> {
    let mut out: std::collections::HashMap<String, Vec<String>> = Default::default();
    let Ok(addrs) = nix::ifaddrs::getifaddrs() else {
        return out;
    };
    for ifa in addrs {
        if !ifa.flags.contains(nix::net::if_::InterfaceFlags::IFF_UP) {
            continue;
        }
        let Some(addr) = ifa.address else { continue };
        let Some(v4) = addr.as_sockaddr_in() else { continue };
        out.entry(ifa.interface_name).or_default().push(v4.ip().to_string());
    }
    out
}
