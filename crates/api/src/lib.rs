// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared wire and domain model for the telemetry fleet: message unions,
//! typed sample/command payloads, configuration, logging, and mTLS loading.

pub mod config;
pub mod logging;
pub mod model;
pub mod proto_bridge;
pub mod tls;

/// Generated protobuf types for the `telemetry.v1` package.
pub mod proto {
    tonic::include_proto!("telemetry.v1");
}
