// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! MCP Service (C3, spec §4.3): one connection to one MCP service, owning
//! its transport, its tool cache, and its JSON-RPC request/response
//! correlation table. All three transport kinds share this layer —
//! [`crate::infrastructure::mcp::transport`] is the only place that
//! differs per kind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain::config::{ServiceConfig, Tool};
use crate::domain::errors::GatewayError;
use crate::infrastructure::mcp::transport::{self, TransportHandle, TransportSink};

/// Default tool-call timeout (spec §4.3, §5).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

struct PendingCall {
    responder: oneshot::Sender<Result<Value, GatewayError>>,
}

struct Runtime {
    sink: TransportSink,
    handle: TransportHandle,
}

/// One connection to a single MCP service. Cheap to clone: state lives
/// behind `Arc`.
#[derive(Clone)]
pub struct McpService {
    name: String,
    config: ServiceConfig,
    connected: Arc<AtomicBool>,
    tools: Arc<Mutex<Vec<Tool>>>,
    last_error: Arc<Mutex<Option<String>>>,
    pending: Arc<Mutex<HashMap<u64, PendingCall>>>,
    next_id: Arc<AtomicU64>,
    // `tokio::sync::Mutex`, not `parking_lot`: the send path needs to hold
    // this guard across an `.await` while writing to the transport sink.
    runtime: Arc<tokio::sync::Mutex<Option<Runtime>>>,
}

impl McpService {
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            connected: Arc::new(AtomicBool::new(false)),
            tools: Arc::new(Mutex::new(Vec::new())),
            last_error: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            runtime: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn pid(&self) -> Option<u32> {
        self.runtime.lock().await.as_ref().and_then(|r| r.handle.pid())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Connect the transport, fetch the initial tool list, and begin
    /// pumping incoming messages (spec §4.3 `start()`).
    pub async fn start(&self) -> Result<(), GatewayError> {
        let connected = transport::connect(&self.config).await.map_err(|e| {
            *self.last_error.lock() = Some(e.to_string());
            e
        })?;

        let transport::Connected { sink, incoming, handle } = connected;
        *self.runtime.lock().await = Some(Runtime { sink, handle });
        self.connected.store(true, Ordering::SeqCst);

        self.spawn_incoming_pump(incoming);

        match self.list_tools_from_service().await {
            Ok(tools) => {
                *self.tools.lock() = tools;
                *self.last_error.lock() = None;
            }
            Err(e) => {
                warn!(service = %self.name, error = %e, "initial listTools failed");
                *self.last_error.lock() = Some(e.to_string());
            }
        }

        Ok(())
    }

    /// Close the transport (spec §4.3 `stop(graceful)`).
    pub async fn stop(&self, graceful: bool) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.handle.stop(graceful).await;
        }
        self.fail_all_pending(GatewayError::Cancelled);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Last-known tools (spec §4.3 `listTools()`), independent of the
    /// disable filter applied by the service manager's merged registry.
    pub fn cached_tools(&self) -> Vec<Tool> {
        self.tools.lock().clone()
    }

    /// Re-query the underlying service's tool list and refresh the cache,
    /// returning the newly observed tools (used by the service manager to
    /// rebuild the merged registry).
    pub async fn refresh_tools(&self) -> Result<Vec<Tool>, GatewayError> {
        let tools = self.list_tools_from_service().await?;
        *self.tools.lock() = tools.clone();
        Ok(tools)
    }

    async fn list_tools_from_service(&self) -> Result<Vec<Tool>, GatewayError> {
        let response = self.send_request("tools/list", json!({})).await?;
        let raw_tools = response
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut tools = Vec::with_capacity(raw_tools.len());
        for raw in raw_tools {
            let original_name = raw
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GatewayError::internal(std::io::Error::other("tool missing name")))?
                .to_string();
            let description = raw
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let input_schema = raw
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" }));

            tools.push(Tool {
                namespaced_name: crate::domain::config::namespaced_tool_name(&self.name, &original_name),
                service_name: self.name.clone(),
                original_name,
                description,
                input_schema,
                enabled: true,
            });
        }
        Ok(tools)
    }

    /// Invoke a tool by its original (un-namespaced) name (spec §4.3
    /// `callTool`). Fails fast with [`GatewayError::ServiceUnavailable`] if
    /// disconnected.
    pub async fn call_tool(&self, original_name: &str, args: Value) -> Result<Value, GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::ServiceUnavailable(self.name.clone()));
        }
        self.send_request(
            "tools/call",
            json!({ "name": original_name, "arguments": args }),
        )
        .await
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        self.send_request_with_timeout(method, params, DEFAULT_CALL_TIMEOUT).await
    }

    async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingCall { responder: tx });

        let mut guard = self.runtime.lock().await;
        let send_result = match guard.as_mut() {
            Some(runtime) => runtime.sink.send(&request).await,
            None => {
                drop(guard);
                self.pending.lock().remove(&id);
                return Err(GatewayError::ServiceUnavailable(self.name.clone()));
            }
        };
        drop(guard);
        if let Err(e) = send_result {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(GatewayError::Cancelled),
            Err(_elapsed) => {
                self.pending.lock().remove(&id);
                Err(GatewayError::CallTimeout(timeout))
            }
        }
    }

    fn spawn_incoming_pump(&self, mut incoming: tokio::sync::mpsc::Receiver<Value>) {
        let pending = self.pending.clone();
        let connected = self.connected.clone();
        let last_error = self.last_error.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                let Some(id) = message.get("id").and_then(Self::extract_id) else {
                    // Server-initiated notification: v1 supports none, ignore (spec §4.3).
                    continue;
                };
                let Some(pending_call) = pending.lock().remove(&id) else {
                    continue;
                };
                let resolved = if let Some(error) = message.get("error") {
                    Err(GatewayError::ExternalApiError {
                        status: 200,
                        body_excerpt: error.to_string(),
                    })
                } else {
                    Ok(message.get("result").cloned().unwrap_or(Value::Null))
                };
                let _ = pending_call.responder.send(resolved);
            }

            warn!(service = %name, "MCP service transport closed, marking disconnected");
            connected.store(false, Ordering::SeqCst);
            *last_error.lock() = Some("transport closed".to_string());
            let mut pending = pending.lock();
            for (_id, call) in pending.drain() {
                let _ = call.responder.send(Err(GatewayError::ServiceUnavailable(name.clone())));
            }
        });
    }

    fn extract_id(id: &Value) -> Option<u64> {
        id.as_u64()
    }

    fn fail_all_pending(&self, err: GatewayError) {
        let mut pending = self.pending.lock();
        for (_id, call) in pending.drain() {
            let cloned = match &err {
                GatewayError::Cancelled => GatewayError::Cancelled,
                other => GatewayError::internal(std::io::Error::other(other.to_string())),
            };
            let _ = call.responder.send(Err(cloned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn call_tool_fails_fast_when_disconnected() {
        let service = McpService::new(
            "filesystem",
            ServiceConfig::Stdio {
                command: "true".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        let result = service.call_tool("read_file", json!({})).await;
        assert!(matches!(result, Err(GatewayError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn stdio_roundtrip_lists_and_calls_tool() {
        // `cat` echoes each JSON-RPC request line back; we patch it to look
        // like a `tools/list` and `tools/call` response by construction of
        // the request's id, since a bare `cat` can't branch on method.
        // Instead use a tiny shell script so responses are meaningful.
        let script = r#"
while IFS= read -r line; do
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  if echo "$line" | grep -q 'tools/list'; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add","inputSchema":{"type":"object"}}]}}\n' "$id"
  else
    printf '{"jsonrpc":"2.0","id":%s,"result":{"sum":5}}\n' "$id"
  fi
done
"#;
        let service = McpService::new(
            "calc",
            ServiceConfig::Stdio {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: HashMap::new(),
            },
        );
        service.start().await.unwrap();
        assert!(service.is_connected());

        let tools = service.cached_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].namespaced_name, "calc__add");

        let result = service.call_tool("add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result["sum"], 5);

        service.stop(true).await;
        assert!(!service.is_connected());
    }

    #[tokio::test]
    async fn call_times_out_when_service_never_responds() {
        let service = McpService::new(
            "silent",
            ServiceConfig::Stdio {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "cat > /dev/null".to_string()],
                env: HashMap::new(),
            },
        );
        service.start().await.unwrap();
        let result = service
            .send_request_with_timeout("tools/call", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(GatewayError::CallTimeout(_))));
        service.stop(true).await;
    }
}
