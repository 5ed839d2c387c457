// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST and WebSocket surface. Request and response bodies are protobuf
//! (`application/x-protobuf`); errors are `ErrorResponse` envelopes with the
//! appropriate HTTP status.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::debug;

use telemetry_api::model::{now_unix_nano, Command, CommandResult};
use telemetry_api::proto;
use telemetry_api::proto_bridge::{
    from_pb_command, from_pb_command_payload, to_pb_command_result, to_pb_metric_sample,
    to_pb_module_registration, to_pb_node_snapshot,
};

use crate::server::Server;
use crate::ws::{
    csv_to_set, deliver_command_result, node_frame, welcome_frame, WsFilter,
    DEFAULT_CLIENT_QUEUE,
};

const MAX_BODY_BYTES: usize = 1 << 20;
const MAX_WS_FRAME_BYTES: usize = 1 << 20;
const WS_PING_PERIOD: Duration = Duration::from_secs(20);
const WS_READ_DEADLINE: Duration = Duration::from_secs(60);
const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_router(server: Arc<Server>) -> Router {
    let timeout = TimeoutLayer::new(server.config().http_write_timeout);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/{node_id}", get(get_node))
        .route("/api/v1/nodes/{node_id}/modules", get(get_node_modules))
        .route("/api/v1/nodes/{node_id}/samples", get(get_samples))
        .route("/api/v1/nodes/{node_id}/commands", post(dispatch_command))
        .route("/api/v1/nodes/{node_id}/commands/{command_type}", post(dispatch_command_by_type))
        .route("/api/v1/ws/metrics", get(ws_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(timeout)
        .layer(CorsLayer::permissive())
        .with_state(server)
}

fn proto_response<T: prost::Message>(status: StatusCode, msg: &T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/x-protobuf")],
        msg.encode_to_vec(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    proto_response(
        status,
        &proto::ErrorResponse {
            error_message: message.into(),
            time_unix_nano: now_unix_nano(),
        },
    )
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

async fn healthz() -> Response {
    proto_response(
        StatusCode::OK,
        &proto::HealthzResponse { status: "ok".to_owned(), time_unix_nano: now_unix_nano() },
    )
}

async fn list_nodes(State(server): State<Arc<Server>>) -> Response {
    let nodes = server.store.list_snapshots().iter().map(to_pb_node_snapshot).collect();
    proto_response(StatusCode::OK, &proto::ListNodesResponse { nodes })
}

async fn get_node(State(server): State<Arc<Server>>, Path(node_id): Path<String>) -> Response {
    match server.store.get_snapshot(&node_id) {
        Ok(snapshot) => proto_response(StatusCode::OK, &to_pb_node_snapshot(&snapshot)),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

async fn get_node_modules(
    State(server): State<Arc<Server>>,
    Path(node_id): Path<String>,
) -> Response {
    let snapshot = match server.store.get_snapshot(&node_id) {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };
    let modules = snapshot
        .registration
        .map(|reg| reg.modules.iter().map(to_pb_module_registration).collect())
        .unwrap_or_default();
    proto_response(StatusCode::OK, &proto::NodeModulesResponse { modules })
}

#[derive(Debug, Deserialize)]
struct SamplesQuery {
    #[serde(default)]
    since: i64,
    limit: Option<usize>,
    #[serde(default)]
    category: String,
}

async fn get_samples(
    State(server): State<Arc<Server>>,
    Path(node_id): Path<String>,
    Query(query): Query<SamplesQuery>,
) -> Response {
    let limit = query.limit.filter(|&v| v > 0).unwrap_or(500);
    let samples = match server.store.query_latest(&node_id, query.since, &query.category, limit) {
        Ok(samples) => samples,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };
    let samples = samples
        .iter()
        .map(|sample| proto::TimedSample {
            node_id: node_id.clone(),
            sample: Some(to_pb_metric_sample(sample)),
        })
        .collect();
    proto_response(StatusCode::OK, &proto::SamplesResponse { samples })
}

// ---------------------------------------------------------------------------
// Command ingress
// ---------------------------------------------------------------------------

async fn dispatch_command(
    State(server): State<Arc<Server>>,
    Path(node_id): Path<String>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty protobuf payload");
    }
    let pb_cmd = match proto::Command::decode(body.as_ref()) {
        Ok(pb) => pb,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("decode command: {e}"))
        }
    };
    let Some(cmd) = from_pb_command(pb_cmd) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid command payload");
    };
    execute_command(&server, &node_id, cmd).await
}

async fn dispatch_command_by_type(
    State(server): State<Arc<Server>>,
    Path((node_id, command_type)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let pb_payload = match decode_command_payload(&command_type, &body) {
        Ok(payload) => payload,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let Some(payload) = from_pb_command_payload(pb_payload) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid command payload");
    };
    execute_command(&server, &node_id, Command::new(payload)).await
}

fn decode_command_payload(
    command_type: &str,
    raw: &[u8],
) -> anyhow::Result<proto::command::Payload> {
    use proto::command::Payload;
    let payload = match command_type {
        "cpu_scaling_range" => {
            Payload::CpuScalingRange(proto::CpuScalingRangeCommand::decode(raw)?)
        }
        "cpu_governor" => Payload::CpuGovernor(proto::CpuGovernorCommand::decode(raw)?),
        "cpu_uncore_range" => {
            Payload::CpuUncoreRange(proto::CpuUncoreRangeCommand::decode(raw)?)
        }
        "cpu_power_cap" => Payload::CpuPowerCap(proto::CpuPowerCapCommand::decode(raw)?),
        "gpu_clock_range" => Payload::GpuClockRange(proto::GpuClockRangeCommand::decode(raw)?),
        "gpu_power_cap" => Payload::GpuPowerCap(proto::GpuPowerCapCommand::decode(raw)?),
        "process_signal" => Payload::ProcessSignal(proto::ProcessSignalCommand::decode(raw)?),
        other => anyhow::bail!("unsupported command type {other}"),
    };
    Ok(payload)
}

/// Dispatch and map the outcome: a successful result comes back as a
/// CommandResult; offline, timeout, and failed results become 502 error
/// envelopes.
async fn execute_command(server: &Arc<Server>, node_id: &str, cmd: Command) -> Response {
    match server.dispatch_command(node_id, cmd).await {
        Ok(result) if result.success => {
            proto_response(StatusCode::OK, &to_pb_command_result(&result))
        }
        Ok(result) => error_response(StatusCode::BAD_GATEWAY, result.error),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    nodes: String,
    #[serde(default)]
    categories: String,
    queue: Option<usize>,
}

async fn ws_metrics(
    State(server): State<Arc<Server>>,
    Query(query): Query<WsQuery>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let filter = WsFilter {
        nodes: csv_to_set(&query.nodes),
        categories: csv_to_set(&query.categories),
    };
    let queue = query.queue.unwrap_or(DEFAULT_CLIENT_QUEUE);
    ws.max_message_size(MAX_WS_FRAME_BYTES)
        .on_upgrade(move |socket| handle_ws(server, socket, filter, queue, remote_addr))
}

async fn handle_ws(
    server: Arc<Server>,
    socket: WebSocket,
    filter: WsFilter,
    queue: usize,
    remote_addr: SocketAddr,
) {
    let (client, frame_rx) = server.hub.new_client(remote_addr.to_string(), queue, filter);
    server.hub.register(client.clone()).await;

    // Welcome with the active filters, then a best-effort preload of all
    // current node snapshots; stop early once the queue fills.
    let _ = client.try_send(welcome_frame(&client.filter()));
    for snapshot in server.store.list_snapshots() {
        if !client.try_send(node_frame(&snapshot)) {
            break;
        }
    }

    let (ws_tx, ws_rx) = socket.split();
    let cancel = client.cancelled().clone();
    let writer = tokio::spawn(write_pump(ws_tx, frame_rx, cancel.clone()));

    read_pump(&server, &client, ws_rx).await;

    server.hub.unregister(client.id).await;
    cancel.cancel();
    let _ = writer.await;
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<bytes::Bytes>,
    cancel: CancellationToken,
) {
    let mut ping = interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(WS_WRITE_TIMEOUT, ws_tx.send(Message::Close(None)))
                    .await;
                return;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = tokio::time::timeout(
                        WS_WRITE_TIMEOUT,
                        ws_tx.send(Message::Close(None)),
                    )
                    .await;
                    return;
                };
                match tokio::time::timeout(WS_WRITE_TIMEOUT, ws_tx.send(Message::Binary(frame)))
                    .await
                {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(
                    WS_WRITE_TIMEOUT,
                    ws_tx.send(Message::Ping(bytes::Bytes::new())),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

/// Read control frames until the socket closes, errors, is evicted, or goes
/// silent past the read deadline. Any inbound frame (pongs included)
/// refreshes the deadline.
async fn read_pump(
    server: &Arc<Server>,
    client: &crate::ws::WsClient,
    mut ws_rx: SplitStream<WebSocket>,
) {
    loop {
        let frame = tokio::select! {
            _ = client.cancelled().cancelled() => return,
            frame = tokio::time::timeout(WS_READ_DEADLINE, ws_rx.next()) => frame,
        };
        let msg = match frame {
            Err(_) => return, // read deadline
            Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Binary(payload) => handle_control(server, client, &payload).await,
            Message::Close(_) => return,
            _ => {}
        }
    }
}

async fn handle_control(server: &Arc<Server>, client: &crate::ws::WsClient, payload: &[u8]) {
    let Ok(ctrl) = proto::WsClientControl::decode(payload) else {
        debug!(remote_addr = %client.remote_addr, "ignoring malformed ws control frame");
        return;
    };
    if ctrl.op.eq_ignore_ascii_case("subscribe") {
        client.set_filter(WsFilter {
            nodes: ctrl.nodes.into_iter().collect(),
            categories: ctrl.categories.into_iter().collect(),
        });
        return;
    }
    if ctrl.op.eq_ignore_ascii_case("command") {
        let Some(pb_cmd) = ctrl.command else { return };
        let server = Arc::clone(server);
        let client = client.clone();
        tokio::spawn(async move {
            let result = dispatch_ws_command(&server, pb_cmd).await;
            deliver_command_result(&client, &result);
        });
    }
}

/// Submit a WS-originated command; validation failures, offline nodes, and
/// timeouts all come back as synthesized failure results on the same socket.
async fn dispatch_ws_command(server: &Arc<Server>, pb_cmd: proto::Command) -> CommandResult {
    let command_id = pb_cmd.id.clone();
    let node_id = pb_cmd.node_id.clone();
    let command_type = pb_cmd.r#type.clone();
    let failure = |error: String| CommandResult {
        command_id: command_id.clone(),
        node_id: node_id.clone(),
        command_type: command_type.clone(),
        success: false,
        error,
        finished_at: now_unix_nano(),
    };

    let Some(cmd) = from_pb_command(pb_cmd) else {
        return failure("invalid command payload".to_owned());
    };
    if node_id.is_empty() {
        return failure("command node_id is empty".to_owned());
    }
    match server.dispatch_command(&node_id, cmd).await {
        Ok(result) => result,
        Err(e) => failure(e.to_string()),
    }
}

#[cfg(test)]
#[path = "rest_tests.rs"]
mod tests;
