// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use prost::Message;

use telemetry_api::config::ServerConfig;
use telemetry_api::model::{
    MemoryMetrics, MetricSample, ModuleRegistration, Registration, SamplePayload,
};
use telemetry_api::proto;

use crate::server::Server;

use super::build_router;

fn test_app() -> anyhow::Result<(Arc<Server>, TestServer)> {
    let mut cfg = ServerConfig::default();
    cfg.command_timeout = Duration::from_millis(200);
    let server = Server::new(cfg);
    let app = TestServer::new(build_router(Arc::clone(&server)))
        .map_err(|e| anyhow::anyhow!("test server: {e}"))?;
    Ok((server, app))
}

fn registration(node_id: &str) -> Registration {
    Registration {
        node_id: node_id.to_owned(),
        modules: vec![ModuleRegistration { name: "memory".to_owned(), ..Default::default() }],
        ..Registration::default()
    }
}

#[tokio::test]
async fn healthz_reports_ok() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let response = app.get("/healthz").await;
    response.assert_status_ok();

    let health = proto::HealthzResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(health.status, "ok");
    assert!(health.time_unix_nano > 0);
    Ok(())
}

#[tokio::test]
async fn nodes_listing_includes_registered_nodes() -> anyhow::Result<()> {
    let (server, app) = test_app()?;
    server.store.set_registration(registration("node-a"));
    server.store.ingest(
        "node-a",
        &[MetricSample::new(7, SamplePayload::Memory(MemoryMetrics::default()))],
    );

    let response = app.get("/api/v1/nodes").await;
    response.assert_status_ok();
    let nodes = proto::ListNodesResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(nodes.nodes.len(), 1);
    let node = &nodes.nodes[0];
    assert_eq!(node.node_id, "node-a");
    assert!(node.connected);
    assert_eq!(node.latest.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_node_is_404_with_error_envelope() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let response = app.get("/api/v1/nodes/ghost").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);

    let err = proto::ErrorResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(err.error_message, "node ghost not found");
    assert!(err.time_unix_nano > 0);
    Ok(())
}

#[tokio::test]
async fn node_modules_returned_from_registration() -> anyhow::Result<()> {
    let (server, app) = test_app()?;
    server.store.set_registration(registration("node-a"));

    let response = app.get("/api/v1/nodes/node-a/modules").await;
    response.assert_status_ok();
    let modules = proto::NodeModulesResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(modules.modules.len(), 1);
    assert_eq!(modules.modules[0].name, "memory");
    Ok(())
}

#[tokio::test]
async fn samples_query_filters_by_category() -> anyhow::Result<()> {
    let (server, app) = test_app()?;
    server.store.set_registration(registration("node-a"));
    server.store.ingest(
        "node-a",
        &[MetricSample::new(7, SamplePayload::Memory(MemoryMetrics::default()))],
    );

    let response = app.get("/api/v1/nodes/node-a/samples?category=memory").await;
    response.assert_status_ok();
    let samples = proto::SamplesResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(samples.samples.len(), 1);

    let response = app.get("/api/v1/nodes/node-a/samples?category=storage").await;
    let samples = proto::SamplesResponse::decode(response.as_bytes().as_ref())?;
    assert!(samples.samples.is_empty());
    Ok(())
}

#[tokio::test]
async fn command_with_invalid_body_is_400() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let response = app
        .post("/api/v1/nodes/node-a/commands")
        .bytes(bytes::Bytes::from_static(b"\xff\xff\xff"))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn command_without_payload_is_400() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let pb = proto::Command {
        id: String::new(),
        node_id: String::new(),
        r#type: "cpu_governor".to_owned(),
        issued_at_unix_nano: 0,
        payload: None,
    };
    let response = app
        .post("/api/v1/nodes/node-a/commands")
        .bytes(bytes::Bytes::from(pb.encode_to_vec()))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let err = proto::ErrorResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(err.error_message, "invalid command payload");
    Ok(())
}

#[tokio::test]
async fn command_to_offline_node_is_502() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let pb = proto::Command {
        id: String::new(),
        node_id: String::new(),
        r#type: "cpu_governor".to_owned(),
        issued_at_unix_nano: 0,
        payload: Some(proto::command::Payload::CpuGovernor(proto::CpuGovernorCommand {
            package_id: None,
            governor: "powersave".to_owned(),
        })),
    };
    let response = app
        .post("/api/v1/nodes/missing/commands")
        .bytes(bytes::Bytes::from(pb.encode_to_vec()))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let err = proto::ErrorResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(err.error_message, "node missing is offline");
    Ok(())
}

#[tokio::test]
async fn command_by_type_rejects_unknown_type() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let response = app
        .post("/api/v1/nodes/node-a/commands/reboot")
        .bytes(bytes::Bytes::new())
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let err = proto::ErrorResponse::decode(response.as_bytes().as_ref())?;
    assert!(err.error_message.contains("unsupported command type"), "{}", err.error_message);
    Ok(())
}

#[tokio::test]
async fn command_by_type_decodes_typed_payload() -> anyhow::Result<()> {
    let (_server, app) = test_app()?;
    let payload = proto::CpuGovernorCommand {
        package_id: Some(0),
        governor: "powersave".to_owned(),
    };
    // Offline node: the payload decodes, dispatch fails downstream.
    let response = app
        .post("/api/v1/nodes/missing/commands/cpu_governor")
        .bytes(bytes::Bytes::from(payload.encode_to_vec()))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let err = proto::ErrorResponse::decode(response.as_bytes().as_ref())?;
    assert_eq!(err.error_message, "node missing is offline");
    Ok(())
}
