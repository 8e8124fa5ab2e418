// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! MCP Service Manager (C5, spec §4.5): owns every [`McpService`] and
//! custom-tool binding, maintains the merged namespaced tool registry, and
//! dispatches `callTool` to whichever side owns the name. Registry
//! mutation goes through one mutex; calls only take a read snapshot of
//! their registry entry before proceeding (spec §4.5, §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::config::{namespaced_tool_name, CustomTool, ServiceConfig, Tool, RESERVED_SERVICE_NAME};
use crate::domain::errors::GatewayError;
use crate::domain::events::GatewayEvent;
use crate::domain::mcp::{ConnectionTestResult, ServiceState, ServiceStatus, ToolOwner};
use crate::infrastructure::config_store::ConfigStore;
use crate::infrastructure::custom_tool_proxy::CustomToolProxy;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::mcp::service::McpService;

#[derive(Clone)]
struct RegistryEntry {
    owner: ToolOwner,
    tool: Tool,
}

/// Owns all C3/C4 instances, the merged registry, and enable/disable state
/// (read from the config store).
#[derive(Clone)]
pub struct ServiceManager {
    config_store: ConfigStore,
    event_bus: EventBus,
    services: Arc<RwLock<HashMap<String, McpService>>>,
    registry: Arc<RwLock<HashMap<String, RegistryEntry>>>,
    custom_proxy: CustomToolProxy,
}

impl ServiceManager {
    pub fn new(config_store: ConfigStore, event_bus: EventBus) -> Self {
        Self {
            config_store,
            event_bus,
            services: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(RwLock::new(HashMap::new())),
            custom_proxy: CustomToolProxy::new(),
        }
    }

    /// Start every configured service and build the initial registry
    /// (spec §4.5 `start()`).
    pub async fn start(&self) -> Result<(), GatewayError> {
        let configured = self.config_store.services();
        for (name, cfg) in configured {
            if let Err(e) = self.spawn_and_register(&name, cfg).await {
                warn!(service = %name, error = %e, "failed to start configured service");
            }
        }
        self.rebuild_registry();
        Ok(())
    }

    async fn spawn_and_register(&self, name: &str, cfg: ServiceConfig) -> Result<(), GatewayError> {
        let service = McpService::new(name, cfg);
        service.start().await?;
        self.services.write().insert(name.to_string(), service);
        Ok(())
    }

    /// Add and start a new service (spec §4.5 `addService`). Persists the
    /// config mutation so it survives restart, then rebuilds the registry.
    pub async fn add_service(&self, name: &str, cfg: ServiceConfig) -> Result<(), GatewayError> {
        if self.services.read().contains_key(name) {
            return Err(GatewayError::ServerAlreadyExists(name.to_string()));
        }
        crate::domain::config::validate_service_name(name).map_err(GatewayError::InvalidServiceName)?;
        crate::domain::config::validate_service_config(&cfg).map_err(GatewayError::ConfigurationError)?;

        self.config_store.add_service(name, cfg.clone())?;
        self.spawn_and_register(name, cfg).await?;
        self.rebuild_registry();
        Ok(())
    }

    /// Remove a service (spec §4.5 `removeService`). `cleanup_config`
    /// additionally drops its entry (and `tools` keys) from the config
    /// store; callers that only want a transient stop pass `false`.
    pub async fn remove_service(
        &self,
        name: &str,
        graceful: bool,
        cleanup_config: bool,
    ) -> Result<Vec<String>, GatewayError> {
        let service = self
            .services
            .write()
            .remove(name)
            .ok_or_else(|| GatewayError::ServerNotFound(name.to_string()))?;
        service.stop(graceful).await;

        if cleanup_config {
            self.config_store.remove_service(name)?;
        }

        let affected = self.rebuild_registry();
        info!(service = %name, "removed MCP service");
        Ok(affected)
    }

    /// Rebuild the merged registry from current services + custom tools +
    /// config enable/disable state (spec §4.5 rebuild invariant). Returns
    /// the namespaced names that were affected (present before or after).
    pub fn rebuild_registry(&self) -> Vec<String> {
        let config = self.config_store.get();
        let mut next: HashMap<String, RegistryEntry> = HashMap::new();

        for (service_name, service) in self.services.read().iter() {
            for tool in service.cached_tools() {
                let enabled = config
                    .tools
                    .get(&tool.namespaced_name)
                    .map(|e| e.enabled)
                    .unwrap_or(true);
                next.insert(
                    tool.namespaced_name.clone(),
                    RegistryEntry {
                        owner: ToolOwner::Service(service_name.clone()),
                        tool: Tool { enabled, ..tool },
                    },
                );
            }
        }

        for custom_tool in &config.custom_tools {
            let enabled = config
                .tools
                .get(&custom_tool.name)
                .map(|e| e.enabled)
                .unwrap_or(true);
            next.insert(
                custom_tool.name.clone(),
                RegistryEntry {
                    owner: ToolOwner::CustomMcp,
                    tool: Tool {
                        namespaced_name: custom_tool.name.clone(),
                        service_name: RESERVED_SERVICE_NAME.to_string(),
                        original_name: custom_tool.name.clone(),
                        description: Some(custom_tool.description.clone()),
                        input_schema: custom_tool.input_schema.clone(),
                        enabled,
                    },
                },
            );
        }

        let affected: Vec<String> = {
            let previous = self.registry.read();
            let mut names: std::collections::HashSet<String> = previous.keys().cloned().collect();
            names.extend(next.keys().cloned());
            names.into_iter().collect()
        };

        *self.registry.write() = next;
        let all_tools = self.get_all_tools();
        self.event_bus.emit(GatewayEvent::ToolRegistryChanged { tools: all_tools });
        affected
    }

    /// Union view of every enabled tool across services and custom tools
    /// (spec §4.5 `getAllTools()`).
    pub fn get_all_tools(&self) -> Vec<Tool> {
        self.registry
            .read()
            .values()
            .filter(|e| e.tool.enabled)
            .map(|e| e.tool.clone())
            .collect()
    }

    /// All tools including disabled ones, for list endpoints that accept a
    /// status filter (spec §6.1 `GET /api/tools/list?status=`).
    pub fn list_tools_including_disabled(&self) -> Vec<Tool> {
        self.registry.read().values().map(|e| e.tool.clone()).collect()
    }

    pub fn tools_for_service(&self, service_name: &str) -> Vec<Tool> {
        self.registry
            .read()
            .values()
            .filter(|e| e.tool.service_name == service_name)
            .map(|e| e.tool.clone())
            .collect()
    }

    /// Dispatch a tool call by namespaced name (spec §4.5 `callTool`).
    pub async fn call_tool(&self, namespaced_name: &str, args: Value) -> Result<Value, GatewayError> {
        let entry = {
            let registry = self.registry.read();
            registry
                .get(namespaced_name)
                .cloned()
                .ok_or_else(|| GatewayError::ServiceOrToolNotFound(namespaced_name.to_string()))?
        };

        if !entry.tool.enabled {
            return Err(GatewayError::ToolDisabled(namespaced_name.to_string()));
        }

        match entry.owner {
            ToolOwner::Service(service_name) => {
                let service = self
                    .services
                    .read()
                    .get(&service_name)
                    .cloned()
                    .ok_or_else(|| GatewayError::ServiceOrToolNotFound(namespaced_name.to_string()))?;
                service.call_tool(&entry.tool.original_name, args).await
            }
            ToolOwner::CustomMcp => {
                let config = self.config_store.get();
                let custom_tool = config
                    .custom_tools
                    .iter()
                    .find(|t| t.name == entry.tool.original_name)
                    .cloned()
                    .ok_or_else(|| GatewayError::ServiceOrToolNotFound(namespaced_name.to_string()))?;
                let credentials = self.config_store.get_platform_credentials(&custom_tool.handler.platform);
                self.custom_proxy.invoke(&custom_tool, args, credentials).await
            }
        }
    }

    /// Snapshot of one service's status (spec §3 `ServiceState`).
    pub async fn service_state(&self, name: &str) -> Result<ServiceState, GatewayError> {
        let service = self
            .services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::ServerNotFound(name.to_string()))?;

        let status = if service.is_connected() {
            ServiceStatus::Running
        } else if service.last_error().is_some() {
            ServiceStatus::Error
        } else {
            ServiceStatus::Stopped
        };

        Ok(ServiceState {
            name: name.to_string(),
            status,
            pid: service.pid().await,
            tools_count: self.tools_for_service(name).len(),
            last_error: service.last_error(),
        })
    }

    pub fn known_service_names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Snapshot every known service's state, for the notification service's
    /// initial-connect payload (spec §4.8).
    pub async fn all_service_states(&self) -> Vec<ServiceState> {
        let mut states = Vec::new();
        for name in self.known_service_names() {
            if let Ok(state) = self.service_state(&name).await {
                states.push(state);
            }
        }
        states
    }

    /// Connect ephemerally, list tools, disconnect (spec §4.5
    /// `testConnection`) — used by the HTTP layer to validate a service
    /// spec before committing it to config.
    pub async fn test_connection(&self, cfg: ServiceConfig) -> ConnectionTestResult {
        let probe = McpService::new("__test_connection__", cfg);
        let started_at = Instant::now();
        match probe.start().await {
            Ok(()) => {
                let rtt_ms = started_at.elapsed().as_millis() as u64;
                let tool_count = probe.cached_tools().len();
                probe.stop(true).await;
                ConnectionTestResult {
                    ok: true,
                    message: format!("connected, discovered {tool_count} tool(s)"),
                    rtt_ms: Some(rtt_ms),
                }
            }
            Err(e) => ConnectionTestResult {
                ok: false,
                message: e.to_string(),
                rtt_ms: None,
            },
        }
    }

    /// Register a custom tool (spec §4.4/§6.1 `POST /api/tools/custom`).
    pub fn add_custom_tool(&self, tool: CustomTool) -> Result<(), GatewayError> {
        self.config_store.add_custom_tool(tool)?;
        self.rebuild_registry();
        Ok(())
    }

    pub fn remove_custom_tool(&self, name: &str) -> Result<(), GatewayError> {
        self.config_store.remove_custom_tool(name)?;
        self.rebuild_registry();
        Ok(())
    }

    pub fn set_tool_enabled(&self, namespaced_name: &str, enabled: bool) -> Result<(), GatewayError> {
        self.config_store.set_tool_enabled(namespaced_name, enabled)?;
        self.rebuild_registry();
        Ok(())
    }

    /// Shut every owned service down (process-wide shutdown fan-out, spec
    /// §5).
    pub async fn shutdown(&self) {
        let services: Vec<McpService> = self.services.write().drain().map(|(_, s)| s).collect();
        for service in services {
            service.stop(true).await;
        }
    }
}

/// Build the namespaced tool name for a service-owned tool (re-exported
/// convenience so callers don't need to import `domain::config` directly).
pub fn namespaced(service_name: &str, tool_name: &str) -> String {
    namespaced_tool_name(service_name, tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use tempfile::tempdir;

    fn manager() -> (ServiceManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let bus = EventBus::new();
        let store = ConfigStore::load(dir.path().join("config.yaml"), bus.clone()).unwrap();
        (ServiceManager::new(store, bus), dir)
    }

    fn echo_service_config() -> ServiceConfig {
        ServiceConfig::Stdio {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"while IFS= read -r line; do
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  if echo "$line" | grep -q 'tools/list'; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add","inputSchema":{"type":"object"}}]}}\n' "$id"
  else
    printf '{"jsonrpc":"2.0","id":%s,"result":{"sum":5}}\n' "$id"
  fi
done"#
                    .to_string(),
            ],
            env: Map::new(),
        }
    }

    #[tokio::test]
    async fn add_service_then_call_tool_dispatches_to_it() {
        let (manager, _dir) = manager();
        manager.add_service("calc", echo_service_config()).await.unwrap();

        let tools = manager.get_all_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].namespaced_name, "calc__add");

        let result = manager.call_tool("calc__add", serde_json::json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result["sum"], 5);
    }

    #[tokio::test]
    async fn disabled_tool_fails_fast_without_dispatch() {
        let (manager, _dir) = manager();
        manager.add_service("calc", echo_service_config()).await.unwrap();
        manager.set_tool_enabled("calc__add", false).unwrap();

        let err = manager.call_tool("calc__add", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::ToolDisabled(_)));
    }

    #[tokio::test]
    async fn remove_then_call_is_not_found() {
        let (manager, _dir) = manager();
        manager.add_service("calc", echo_service_config()).await.unwrap();
        manager.remove_service("calc", true, true).await.unwrap();

        let err = manager.call_tool("calc__add", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceOrToolNotFound(_)));
    }

    #[tokio::test]
    async fn remove_unknown_service_errors() {
        let (manager, _dir) = manager();
        let err = manager.remove_service("ghost", true, true).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn registry_names_are_unique_and_namespaced() {
        let (manager, _dir) = manager();
        manager.add_service("calc", echo_service_config()).await.unwrap();
        let tools = manager.get_all_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.namespaced_name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
        assert!(tools.iter().all(|t| t.namespaced_name.starts_with("calc__")));
    }
}
