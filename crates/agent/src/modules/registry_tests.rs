// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use telemetry_api::model::{
    Command, CommandPayload, MemoryMetrics, MetricSample, ModuleRegistration, SamplePayload,
};

use super::{CollectorEntry, ControllerEntry, Module, Registry};

struct FakeModule {
    name: &'static str,
    collectors: Vec<(&'static str, Duration)>,
    controllers: Vec<&'static str>,
    calls: Arc<AtomicU32>,
}

impl FakeModule {
    fn new(name: &'static str) -> Self {
        Self { name, collectors: Vec::new(), controllers: Vec::new(), calls: Arc::default() }
    }
}

impl Module for FakeModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn registration(&self) -> ModuleRegistration {
        ModuleRegistration { name: self.name.to_owned(), ..ModuleRegistration::default() }
    }

    fn collector_entries(&self) -> Vec<CollectorEntry> {
        self.collectors
            .iter()
            .map(|(category, interval)| CollectorEntry {
                category: (*category).to_owned(),
                interval: *interval,
                collect: Arc::new(|at| {
                    Ok(MetricSample::new(at, SamplePayload::Memory(MemoryMetrics::default())))
                }),
            })
            .collect()
    }

    fn controller_entries(&self) -> Vec<ControllerEntry> {
        self.controllers
            .iter()
            .map(|command_type| {
                let calls = Arc::clone(&self.calls);
                ControllerEntry {
                    command_type: (*command_type).to_owned(),
                    handle: Arc::new(move |_cmd| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                }
            })
            .collect()
    }
}

#[test]
fn duplicate_command_types_are_rejected() {
    let mut a = FakeModule::new("alpha");
    a.controllers = vec!["cpu_governor"];
    let mut b = FakeModule::new("beta");
    b.controllers = vec!["cpu_governor"];

    let err = match Registry::new(vec![Box::new(a), Box::new(b)]) {
        Err(e) => e.to_string(),
        Ok(_) => String::new(),
    };
    assert!(err.contains("cpu_governor"), "{err}");
    assert!(err.contains("alpha") && err.contains("beta"), "{err}");
}

#[test]
fn collector_entries_sorted_by_interval_module_category() -> anyhow::Result<()> {
    let mut a = FakeModule::new("zeta");
    a.collectors = vec![("m1", Duration::from_millis(100))];
    let mut b = FakeModule::new("alpha");
    b.collectors =
        vec![("m3", Duration::from_secs(1)), ("m2", Duration::from_millis(100))];

    let registry = Registry::new(vec![Box::new(a), Box::new(b)])?;
    let order: Vec<(String, String)> = registry
        .collector_entries()
        .iter()
        .map(|e| (e.module.clone(), e.category.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("alpha".to_owned(), "m2".to_owned()),
            ("zeta".to_owned(), "m1".to_owned()),
            ("alpha".to_owned(), "m3".to_owned()),
        ]
    );
    Ok(())
}

#[test]
fn execute_resolves_handler_by_type() -> anyhow::Result<()> {
    let mut module = FakeModule::new("cpu");
    module.controllers = vec!["cpu_governor"];
    let calls = Arc::clone(&module.calls);

    let registry = Registry::new(vec![Box::new(module)])?;
    let cmd = Command::new(CommandPayload::CpuGovernor {
        package_id: None,
        governor: "powersave".to_owned(),
    });
    registry.execute(&cmd)?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn execute_unknown_type_is_distinguished() -> anyhow::Result<()> {
    let registry = Registry::new(vec![Box::new(FakeModule::new("memory"))])?;
    let cmd = Command::new(CommandPayload::GpuPowerCap { gpu_index: 0, milliwatt: 1 });
    let err = registry.execute(&cmd).map_err(|e| e.to_string());
    assert_eq!(
        err,
        Err("unsupported command type: gpu_power_cap".to_owned())
    );
    Ok(())
}

#[test]
fn metadata_aggregates_all_modules() -> anyhow::Result<()> {
    let registry =
        Registry::new(vec![Box::new(FakeModule::new("cpu")), Box::new(FakeModule::new("gpu"))])?;
    let names: Vec<String> = registry.module_metadata().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["cpu".to_owned(), "gpu".to_owned()]);
    Ok(())
}

#[test]
fn default_modules_build_a_valid_registry() -> anyhow::Result<()> {
    let registry = Registry::new(super::default_modules(&Default::default()))?;
    // Every advertised controller type resolves to exactly one module.
    let metadata = registry.module_metadata();
    assert!(metadata.iter().any(|m| m.name == "cpu"));
    assert!(metadata.iter().any(|m| m.name == "process"));
    Ok(())
}
