// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing subscriber setup shared by both binaries.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Initialize the global subscriber from the `log` config section.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init(cfg: &LogConfig) {
    let level = if cfg.level.is_empty() { "info" } else { cfg.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cfg.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
