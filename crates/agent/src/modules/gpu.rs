// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPU module. Vendor SDK access is not linked into this build, so the
//! module registers zero devices and no collectors; clock and power-cap
//! commands are still advertised and fail with a clear handler error.

use std::sync::Arc;

use anyhow::bail;

use telemetry_api::config::ReportConfig;
use telemetry_api::model::{command_type, Command, ControllerSpec, ModuleRegistration};

use super::{CollectorEntry, ControllerEntry, Module};

pub struct GpuModule {
    _intervals: ReportConfig,
}

impl GpuModule {
    pub fn new(intervals: ReportConfig) -> Self {
        Self { _intervals: intervals }
    }
}

impl Module for GpuModule {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration {
            name: "gpu".to_owned(),
            collectors: Vec::new(),
            controllers: vec![
                ControllerSpec { command_type: command_type::GPU_CLOCK_RANGE.to_owned() },
                ControllerSpec { command_type: command_type::GPU_POWER_CAP.to_owned() },
            ],
            cpu: None,
            gpus: Vec::new(),
            disks: Vec::new(),
        }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        Vec::new()
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        vec![
            ControllerEntry {
                command_type: command_type::GPU_CLOCK_RANGE.to_owned(),
                handle: Arc::new(|_cmd: &Command| {
                    bail!("gpu clock control is unsupported on this host")
                }),
            },
            ControllerEntry {
                command_type: command_type::GPU_POWER_CAP.to_owned(),
                handle: Arc::new(|_cmd: &Command| {
                    bail!("gpu power cap control is unsupported on this host")
                }),
            },
        ]
    }
}
