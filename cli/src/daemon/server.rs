// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP control API and UI WebSocket surface (C9, spec §4.9, §6.1, §6.3).
//! Every handler here is a thin adapter: parse path/body, call exactly one
//! core method, translate the outcome into the unified envelope. No
//! handler reaches into core state directly — that rule is what keeps the
//! HTTP layer swappable without touching the components it fronts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use mcp_gateway_core::domain::config::{CustomTool, CustomToolHandler, CustomToolHandlerConfig, ServiceConfig};
use mcp_gateway_core::domain::mcp::ConnectionTestResult;
use mcp_gateway_core::{ConfigStore, EndpointManager, EventBus, GatewayError, NotificationService, ServiceManager, WorkerCommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::daemon::{pid_file_path, write_pid_file, PidFileGuard};

#[derive(Clone)]
struct AppState {
    config_store: ConfigStore,
    event_bus: EventBus,
    service_manager: ServiceManager,
    endpoint_manager: EndpointManager,
    notification_service: NotificationService,
    start_time: Instant,
}

/// A uniform success envelope (spec §6.1: `{success:true, data, message?}`).
fn ok_envelope(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Map any [`GatewayError`] onto the unified error envelope and its HTTP
/// status code (spec §7).
struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            axum::http::StatusCode::from_u16(self.0.status_code()).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.public_message(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Bring up every core component from the config at `config_path`, serve
/// the HTTP/WebSocket surface on `host:port`, and block until SIGINT/
/// SIGTERM. Writes and removes the `.pid` file around the run (spec §6.4,
/// §6.5).
pub async fn run_foreground(config_path: PathBuf, host: String, port: u16) -> Result<()> {
    let pid_path = pid_file_path(&config_path);
    write_pid_file(&pid_path, "serve").context("failed to write pid file")?;
    let _pid_guard = PidFileGuard::new(pid_path);

    let event_bus = EventBus::default();
    let config_store = ConfigStore::load(&config_path, event_bus.clone())
        .context("failed to load configuration")?;

    let worker_command = WorkerCommand {
        program: std::env::current_exe()
            .context("failed to resolve own executable path for worker subprocess")?
            .to_string_lossy()
            .into_owned(),
        args: vec![
            "--worker".to_string(),
            "--config".to_string(),
            config_path.to_string_lossy().into_owned(),
        ],
    };

    let service_manager = ServiceManager::new(config_store.clone(), event_bus.clone());
    let endpoint_manager = EndpointManager::new(config_store.clone(), event_bus.clone(), worker_command);
    let notification_service = NotificationService::new(
        event_bus.clone(),
        config_store.clone(),
        endpoint_manager.clone(),
        service_manager.clone(),
    );

    service_manager.start().await.context("failed to start configured services")?;
    endpoint_manager.start().await;
    notification_service.start();

    let state = Arc::new(AppState {
        config_store,
        event_bus,
        service_manager,
        endpoint_manager,
        notification_service,
        start_time: Instant::now(),
    });

    let app = create_router(state.clone());
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "mcp-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down: stopping endpoints and services");
    state.endpoint_manager.shutdown().await;
    state.service_manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/endpoint/add", post(endpoint_add_handler))
        .route("/api/endpoint/connect", post(endpoint_connect_handler))
        .route("/api/endpoint/disconnect", post(endpoint_disconnect_handler))
        .route("/api/endpoint/reconnect", post(endpoint_reconnect_handler))
        .route("/api/endpoint/remove", delete(endpoint_remove_handler))
        .route("/api/endpoint/status", post(endpoint_status_handler))
        .route("/api/mcp-servers", post(add_service_handler))
        .route("/api/mcp-servers/{name}", delete(remove_service_handler))
        .route("/api/mcp-servers/{name}/status", get(service_status_handler))
        .route("/api/mcp-servers/{name}/tools", get(service_tools_handler))
        .route("/api/mcp-servers/{name}/config", put(update_service_config_handler))
        .route("/api/mcp-servers/test-connection", post(test_connection_handler))
        .route("/api/tools/call", post(call_tool_handler))
        .route("/api/tools/list", get(list_tools_handler))
        .route("/api/tools/custom", post(add_custom_tool_handler))
        .route("/api/tools/custom/{toolName}", delete(remove_custom_tool_handler))
        .route("/api/config", get(get_config_handler).put(put_config_handler))
        .route("/api/config/reload", post(reload_config_handler))
        .route("/api/config/exists", get(config_exists_handler))
        .route("/api/services/start", post(services_start_handler))
        .route("/api/services/stop", post(services_stop_handler))
        .route("/api/services/restart", post(services_restart_handler))
        .route("/ws/notifications", get(ui_ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Deserialize)]
struct EndpointBody {
    endpoint: String,
}

async fn endpoint_add_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    let result = state.endpoint_manager.add(&body.endpoint).await?;
    Ok(ok_envelope(json!(result)))
}

async fn endpoint_connect_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    let result = state.endpoint_manager.connect(&body.endpoint).await?;
    Ok(ok_envelope(json!(result)))
}

async fn endpoint_disconnect_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    let result = state.endpoint_manager.disconnect(&body.endpoint).await?;
    Ok(ok_envelope(json!(result)))
}

async fn endpoint_reconnect_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    let result = state.endpoint_manager.reconnect(&body.endpoint).await?;
    Ok(ok_envelope(json!(result)))
}

async fn endpoint_remove_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    state.endpoint_manager.remove(&body.endpoint).await?;
    Ok(ok_envelope(json!({ "endpoint": body.endpoint, "operation": "remove" })))
}

async fn endpoint_status_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndpointBody>,
) -> ApiResult<Json<Value>> {
    let result = state.endpoint_manager.status_for(&body.endpoint)?;
    Ok(ok_envelope(json!(result)))
}

#[derive(Deserialize)]
struct AddServiceBody {
    name: String,
    config: ServiceConfig,
}

async fn add_service_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddServiceBody>,
) -> ApiResult<Json<Value>> {
    state.service_manager.add_service(&body.name, body.config).await?;
    Ok(ok_envelope(json!({ "name": body.name })))
}

async fn remove_service_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let affected = state.service_manager.remove_service(&name, true, true).await?;
    Ok(ok_envelope(json!({ "name": name, "operation": "removed", "affectedTools": affected })))
}

async fn service_status_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.service_manager.service_state(&name).await?;
    Ok(ok_envelope(json!(status)))
}

async fn service_tools_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let tools = state.service_manager.tools_for_service(&name);
    Ok(ok_envelope(json!({ "serviceName": name, "count": tools.len(), "tools": tools })))
}

/// `PUT /api/mcp-servers/{name}/config`: the update semantics for an
/// in-place transport/URL change aren't pinned down elsewhere, so we
/// interpret it as replace-in-place: stop the running service, drop its
/// config entry, and add it back with the new `ServiceConfig` — a running
/// connection can't be reconfigured underneath itself. Dropping the config
/// entry also drops any per-tool `tools` overrides recorded under this
/// service's namespace; callers that depend on those surviving a transport
/// change should re-apply them after the PUT completes.
async fn update_service_config_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(config): Json<ServiceConfig>,
) -> ApiResult<Json<Value>> {
    state.service_manager.remove_service(&name, true, false).await.ok();
    state.config_store.remove_service(&name).ok();
    state.service_manager.add_service(&name, config).await?;
    Ok(ok_envelope(json!({ "name": name })))
}

async fn test_connection_handler(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ServiceConfig>,
) -> Json<Value> {
    let result: ConnectionTestResult = state.service_manager.test_connection(config).await;
    ok_envelope(json!(result))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolBody {
    service_name: String,
    tool_name: String,
    #[serde(default)]
    args: Value,
}

async fn call_tool_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallToolBody>,
) -> ApiResult<Json<Value>> {
    let namespaced = mcp_gateway_core::domain::config::namespaced_tool_name(&body.service_name, &body.tool_name);
    let result = state.service_manager.call_tool(&namespaced, body.args).await?;
    Ok(ok_envelope(result))
}

#[derive(Deserialize)]
struct ListToolsQuery {
    status: Option<String>,
}

async fn list_tools_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListToolsQuery>,
) -> Json<Value> {
    let all = state.service_manager.list_tools_including_disabled();
    let list: Vec<_> = match query.status.as_deref() {
        Some("enabled") => all.into_iter().filter(|t| t.enabled).collect(),
        Some("disabled") => all.into_iter().filter(|t| !t.enabled).collect(),
        _ => all,
    };
    ok_envelope(json!({ "list": list, "total": list.len() }))
}

/// `POST /api/tools/custom` body shape: `{workflow, customName?,
/// customDescription?, parameterConfig?}` without pinning down
/// `workflow`'s own fields. We take `workflow` to carry the handler
/// wiring (`platform`, `url`, `resultField`, `bodyTemplate`, `headers`) —
/// the same fields `CustomToolHandlerConfig` already needs — and use
/// `customName`/`customDescription` to override the tool's public name and
/// description, falling back to values inside `workflow` when omitted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCustomToolBody {
    workflow: WorkflowBody,
    custom_name: Option<String>,
    custom_description: Option<String>,
    #[serde(default)]
    parameter_config: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowBody {
    name: String,
    #[serde(default)]
    description: String,
    platform: String,
    url: String,
    result_field: String,
    #[serde(default = "default_body_template")]
    body_template: Value,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
}

fn default_body_template() -> Value {
    json!({})
}

async fn add_custom_tool_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddCustomToolBody>,
) -> ApiResult<Json<Value>> {
    let name = body.custom_name.unwrap_or_else(|| body.workflow.name.clone());
    let description = body.custom_description.unwrap_or_else(|| body.workflow.description.clone());
    let input_schema = if body.parameter_config.is_null() {
        json!({ "type": "object", "properties": {} })
    } else {
        body.parameter_config
    };

    let tool = CustomTool {
        name: name.clone(),
        description,
        input_schema,
        handler: CustomToolHandler {
            platform: body.workflow.platform,
            config: CustomToolHandlerConfig {
                url: body.workflow.url,
                result_field: body.workflow.result_field,
                body_template: body.workflow.body_template,
                headers: body.workflow.headers,
            },
        },
    };

    state.service_manager.add_custom_tool(tool.clone())?;
    Ok(ok_envelope(json!({ "tool": tool })))
}

async fn remove_custom_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(tool_name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service_manager.remove_custom_tool(&tool_name)?;
    Ok(ok_envelope(json!({ "toolName": tool_name, "operation": "removed" })))
}

async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    ok_envelope(json!(state.config_store.get()))
}

async fn put_config_handler(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<Value>> {
    let updated = state.config_store.update(|config| {
        let mut merged = serde_json::to_value(&*config).unwrap_or(json!({}));
        merge_json(&mut merged, &patch);
        *config = serde_json::from_value(merged).map_err(GatewayError::internal)?;
        Ok(())
    })?;
    Ok(ok_envelope(json!(updated)))
}

/// Shallow merge used by `PUT /api/config`: full or patch bodies are both
/// accepted, so a provided top-level key replaces the existing value
/// wholesale rather than deep-merging — callers sending a patch send only
/// the top-level section (e.g. `connection`) they mean to replace.
fn merge_json(base: &mut Value, patch: &Value) {
    if let (Some(base_map), Some(patch_map)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
}

async fn reload_config_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let config = state.config_store.reload()?;
    state.service_manager.rebuild_registry();
    Ok(ok_envelope(json!(config)))
}

async fn config_exists_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    ok_envelope(json!({ "exists": state.config_store.exists() }))
}

#[derive(Deserialize)]
struct ServiceNameBody {
    name: String,
}

/// `POST /api/services/start`: bring a configured-but-stopped service back
/// up. `ServiceManager::add_service` treats its name as brand new and
/// rejects one still present in the config store, so we drop the stale
/// config entry (the in-memory `cfg` we already captured survives that)
/// before re-adding it — the same add-back dance `update_service_config_handler`
/// uses for a transport change.
async fn services_start_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServiceNameBody>,
) -> ApiResult<Json<Value>> {
    let cfg = state
        .config_store
        .services()
        .get(&body.name)
        .cloned()
        .ok_or_else(|| GatewayError::ServerNotFound(body.name.clone()))?;
    state.config_store.remove_service(&body.name).ok();
    state.service_manager.add_service(&body.name, cfg).await?;
    Ok(ok_envelope(json!({ "name": body.name, "operation": "started" })))
}

/// `POST /api/services/stop`: stop the running connection but keep its
/// config entry, so a later `start` has something to restart from.
async fn services_stop_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServiceNameBody>,
) -> ApiResult<Json<Value>> {
    state.service_manager.remove_service(&body.name, true, false).await?;
    Ok(ok_envelope(json!({ "name": body.name, "operation": "stopped" })))
}

async fn services_restart_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServiceNameBody>,
) -> ApiResult<Json<Value>> {
    state.event_bus.emit(mcp_gateway_core::domain::events::GatewayEvent::ServiceRestartRequested {
        service_name: body.name.clone(),
    });
    let cfg = state
        .config_store
        .services()
        .get(&body.name)
        .cloned()
        .ok_or_else(|| GatewayError::ServerNotFound(body.name.clone()))?;
    state.service_manager.remove_service(&body.name, true, false).await.ok();
    state.config_store.remove_service(&body.name).ok();
    state.service_manager.add_service(&body.name, cfg).await?;
    Ok(ok_envelope(json!({ "name": body.name, "operation": "restarted" })))
}

async fn ui_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

/// Drive one UI WebSocket client: register with the notification service,
/// forward every [`mcp_gateway_core::infrastructure::notification_service::NotificationFrame`]
/// as JSON text until the socket closes, then unregister (spec §4.8,
/// §6.3).
async fn handle_ui_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut frames) = state.notification_service.register().await;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        let text = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
                        if socket.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "UI websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.notification_service.unregister(client_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_replaces_top_level_keys_wholesale() {
        let mut base = json!({ "endpoints": ["wss://a"], "connection": { "heartbeat_interval_ms": 30000 } });
        let patch = json!({ "connection": { "heartbeat_interval_ms": 1000 } });
        merge_json(&mut base, &patch);
        assert_eq!(base["endpoints"], json!(["wss://a"]));
        assert_eq!(base["connection"]["heartbeat_interval_ms"], 1000);
    }

    #[test]
    fn api_error_maps_not_found_to_404() {
        let error = ApiError(GatewayError::ServerNotFound("filesystem".to_string()));
        assert_eq!(error.0.status_code(), 404);
        assert_eq!(error.0.code(), "ServerNotFound");
    }

    #[test]
    fn api_error_redacts_internal_message() {
        let error = ApiError(GatewayError::internal(std::io::Error::other("disk full")));
        assert_eq!(error.0.public_message(), "an internal error occurred");
    }
}
