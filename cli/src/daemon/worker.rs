// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Worker mode: the "local aggregator entry point" spawned once per
//! endpoint connection (spec §4.6). This is a separate invocation of the
//! same `mcp-gateway` binary, started with `--worker` and talking pure
//! line-delimited JSON-RPC 2.0 over its own stdin/stdout — its parent
//! [`mcp_gateway_core::EndpointConnection`] never inspects the content,
//! only pipes bytes between this process and the upstream WebSocket.
//!
//! The worker builds its own config store, event bus and service manager
//! from the same on-disk config the daemon uses, starts every configured
//! service, and then answers whatever JSON-RPC requests arrive on stdin by
//! dispatching to that service manager — exactly the subset of the MCP
//! protocol a hub needs to list and call tools through this gateway.

use std::path::PathBuf;

use anyhow::{Context, Result};
use mcp_gateway_core::infrastructure::mcp::framing::pump_json_lines;
use mcp_gateway_core::{ConfigStore, EventBus, ServiceManager};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Run the worker loop until stdin closes. Never returns an error for a
/// malformed individual request — only for setup failures (config load,
/// service manager start) that make the worker unable to serve at all.
pub async fn run(config_path: PathBuf) -> Result<()> {
    let event_bus = EventBus::default();
    let config_store = ConfigStore::load(config_path, event_bus.clone())
        .context("worker failed to load config")?;
    let service_manager = ServiceManager::new(config_store.clone(), event_bus.clone());
    service_manager
        .start()
        .await
        .context("worker failed to start configured services")?;

    info!("worker ready, serving MCP requests over stdio");

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let (tx, mut rx) = mpsc::channel::<Value>(256);
    let pump = tokio::spawn(pump_json_lines(stdin, tx));

    while let Some(request) = rx.recv().await {
        let response = dispatch(&service_manager, &request).await;
        if let Some(response) = response {
            if let Err(e) = write_line(&mut stdout, &response).await {
                error!(error = %e, "failed writing worker response to stdout");
                break;
            }
        }
    }

    pump.abort();
    service_manager.shutdown().await;
    Ok(())
}

/// Dispatch one JSON-RPC request to the service manager, returning the
/// response envelope to write back — `None` for notifications (no `id`),
/// which per JSON-RPC 2.0 never get a response.
async fn dispatch(service_manager: &ServiceManager, request: &Value) -> Option<Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "mcp-gateway", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => {
            let tools: Vec<Value> = service_manager
                .get_all_tools()
                .into_iter()
                .map(|tool| {
                    json!({
                        "name": tool.namespaced_name,
                        "description": tool.description,
                        "inputSchema": tool.input_schema,
                    })
                })
                .collect();
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => call_tool(service_manager, &params).await,
        "ping" => Ok(json!({})),
        other => {
            warn!(method = %other, "worker received unsupported JSON-RPC method");
            Err(json!({ "code": -32601, "message": format!("method not found: {other}") }))
        }
    };

    let id = id?;
    Some(match result {
        Ok(value) => json!({ "jsonrpc": "2.0", "id": id, "result": value }),
        Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    })
}

async fn call_tool(service_manager: &ServiceManager, params: &Value) -> Result<Value, Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| json!({ "code": -32602, "message": "missing params.name" }))?;
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match service_manager.call_tool(name, arguments).await {
        Ok(value) => Ok(json!({
            "content": [{ "type": "text", "text": value.to_string() }],
            "isError": false,
        })),
        Err(e) => Err(json!({
            "code": -32000,
            "message": e.public_message(),
            "data": { "kind": e.code() },
        })),
    }
}

async fn write_line(stdout: &mut Stdout, value: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_service_manager() -> ServiceManager {
        let event_bus = EventBus::default();
        let dir = tempfile::tempdir().unwrap();
        let config_store = ConfigStore::load(dir.path().join("config.yaml"), event_bus.clone()).unwrap();
        ServiceManager::new(config_store, event_bus)
    }

    #[tokio::test]
    async fn initialize_returns_server_info_without_touching_services() {
        let service_manager = empty_service_manager();
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" });
        let response = dispatch(&service_manager, &request).await.unwrap();
        assert_eq!(response["result"]["serverInfo"]["name"], "mcp-gateway");
    }

    #[tokio::test]
    async fn tools_list_on_empty_registry_is_an_empty_array() {
        let service_manager = empty_service_manager();
        let request = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" });
        let response = dispatch(&service_manager, &request).await.unwrap();
        assert_eq!(response["result"]["tools"], json!([]));
    }

    #[tokio::test]
    async fn unknown_tool_call_is_a_jsonrpc_error_not_a_panic() {
        let service_manager = empty_service_manager();
        let request = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "ghost__tool", "arguments": {} },
        });
        let response = dispatch(&service_manager, &request).await.unwrap();
        assert_eq!(response["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn notification_without_id_gets_no_response() {
        let service_manager = empty_service_manager();
        let request = json!({ "jsonrpc": "2.0", "method": "ping" });
        assert!(dispatch(&service_manager, &request).await.is_none());
    }

    #[tokio::test]
    async fn unsupported_method_maps_to_method_not_found() {
        let service_manager = empty_service_manager();
        let request = json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/list" });
        let response = dispatch(&service_manager, &request).await.unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }
}
