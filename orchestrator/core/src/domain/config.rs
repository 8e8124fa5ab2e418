// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! The gateway's configuration document (spec §3): upstream endpoints, MCP
//! services, tool enable/disable state, connection tuning, platform
//! credentials and custom tools. This module is pure data plus the
//! structural validation rules; the single-writer/atomic-write machinery
//! lives in `infrastructure::config_store`.

use std::collections::HashMap;

use once_cell_regex::{CUSTOM_TOOL_NAME, SERVICE_NAME, TEMPLATE_VAR};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{GatewayError, ValidationErrors, ValidationKind};

/// Name reserved for the custom-tool proxy's synthetic owner; no real
/// service may be registered under this name (spec §4.1).
pub const RESERVED_SERVICE_NAME: &str = "customMCP";

/// Root configuration document (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,

    /// Keyed by namespaced tool name (`service__tool`) or a custom-tool name.
    #[serde(default)]
    pub tools: HashMap<String, ToolConfigEntry>,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub platforms: HashMap<String, PlatformCredentials>,

    #[serde(default)]
    pub custom_tools: Vec<CustomTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfigEntry {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_interval_ms() -> u64 {
    5_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

/// Arbitrary key/value credentials for a named platform (e.g. `coze.token`).
/// Stored as a flat string map; handlers pull the keys they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformCredentials(pub HashMap<String, String>);

/// Tagged-variant service transport config (spec §3, replacing dynamic
/// structural typing on `handler.{type,platform,config}` with an exhaustive
/// enum per the redesign notes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServiceConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl ServiceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceConfig::Stdio { .. } => "stdio",
            ServiceConfig::Sse { .. } => "sse",
            ServiceConfig::StreamableHttp { .. } => "streamableHttp",
        }
    }
}

/// A synthetic tool executed via a third-party HTTP API (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub handler: CustomToolHandler,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomToolHandler {
    pub platform: String,
    pub config: CustomToolHandlerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomToolHandlerConfig {
    /// Absolute URL of the platform's workflow-invocation endpoint.
    pub url: String,
    /// Result field to extract from the platform's 2xx response body.
    pub result_field: String,
    /// JSON body template; `{{var}}` placeholders are substituted from the
    /// tool call's arguments before the request is sent.
    pub body_template: serde_json::Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A tool entry in the merged registry (spec §3; owner is resolved at the
/// service-manager layer, not stored here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub namespaced_name: String,
    pub service_name: String,
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub enabled: bool,
}

/// Build the namespaced tool name `serviceName__toolName` (spec GLOSSARY).
pub fn namespaced_tool_name(service_name: &str, tool_name: &str) -> String {
    format!("{service_name}__{tool_name}")
}

/// Split a namespaced tool name back into `(service_name, tool_name)`. Only
/// ever meaningful for service-owned tools; custom tools are looked up by
/// their verbatim name instead.
pub fn split_namespaced_tool_name(namespaced: &str) -> Option<(&str, &str)> {
    namespaced.split_once("__")
}

impl Config {
    /// Validate the whole document, collecting every violation before
    /// returning (spec §4.1: "fail-fast, collect all errors" — i.e. fail the
    /// call, but only after every check has run, rather than bailing on the
    /// first one).
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut errors = ValidationErrors::new();

        for url in &self.endpoints {
            if let Err(e) = validate_endpoint_url(url) {
                errors.push_kind(ValidationKind::Endpoint, e);
            }
        }

        for (name, service) in &self.services {
            if let Err(e) = validate_service_name(name) {
                errors.push_kind(ValidationKind::ServiceName, e);
            }
            if let Err(e) = validate_service_config(service) {
                errors.push(format!("service `{name}`: {e}"));
            }
        }

        let mut seen_custom_names = std::collections::HashSet::new();
        for custom_tool in &self.custom_tools {
            if let Err(e) = validate_custom_tool(custom_tool) {
                errors.push(format!("custom tool `{}`: {e}", custom_tool.name));
            }
            if !seen_custom_names.insert(custom_tool.name.clone()) {
                errors.push(format!(
                    "custom tool `{}` is declared more than once",
                    custom_tool.name
                ));
            }
        }

        for key in self.tools.keys() {
            if !self.tool_key_resolves(key) {
                // Unknown keys are dropped with a warning on load, not a
                // hard validation failure — see `Config::prune_unknown_tool_keys`.
                continue;
            }
        }

        errors.into_result()
    }

    /// True if a `tools` map key matches `<serviceName>__<toolName>` for a
    /// configured service, or names a configured custom tool (spec §3
    /// invariant).
    pub fn tool_key_resolves(&self, key: &str) -> bool {
        if self.custom_tools.iter().any(|t| t.name == key) {
            return true;
        }
        if let Some((service_name, _tool_name)) = split_namespaced_tool_name(key) {
            return self.services.contains_key(service_name);
        }
        false
    }

    /// Drop `tools` entries that no longer resolve to a known service or
    /// custom tool, returning the dropped keys so the caller can log a
    /// warning per key (spec §4.1: "unknown keys dropped with warning on
    /// load").
    pub fn prune_unknown_tool_keys(&mut self) -> Vec<String> {
        let dropped: Vec<String> = self
            .tools
            .keys()
            .filter(|k| !self.tool_key_resolves(k))
            .cloned()
            .collect();
        for key in &dropped {
            self.tools.remove(key);
        }
        dropped
    }

    pub fn get_platform_credentials(&self, platform: &str) -> Option<&PlatformCredentials> {
        self.platforms.get(platform)
    }
}

pub fn validate_endpoint_url(url: &str) -> Result<(), String> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(format!("endpoint URL `{url}` must start with ws:// or wss://"));
    }
    url::Url::parse(url).map_err(|e| format!("endpoint URL `{url}` is not parseable: {e}"))?;
    Ok(())
}

pub fn validate_service_name(name: &str) -> Result<(), String> {
    if name == RESERVED_SERVICE_NAME {
        return Err(format!(
            "service name `{name}` is reserved for the custom-tool proxy"
        ));
    }
    if !SERVICE_NAME.is_match(name) {
        return Err(format!(
            "service name `{name}` must match [A-Za-z0-9_-]{{1,50}}"
        ));
    }
    Ok(())
}

pub fn validate_service_config(config: &ServiceConfig) -> Result<(), String> {
    match config {
        ServiceConfig::Stdio { command, .. } => {
            if command.trim().is_empty() {
                return Err("stdio service requires a non-empty command".to_string());
            }
        }
        ServiceConfig::Sse { url, .. } | ServiceConfig::StreamableHttp { url, .. } => {
            let parsed = url::Url::parse(url)
                .map_err(|e| format!("url `{url}` is not a parseable absolute URL: {e}"))?;
            if !parsed.has_host() {
                return Err(format!("url `{url}` must be absolute"));
            }
        }
    }
    Ok(())
}

pub fn validate_custom_tool(tool: &CustomTool) -> Result<(), String> {
    if !CUSTOM_TOOL_NAME.is_match(&tool.name) {
        return Err(format!(
            "name `{}` must match [A-Za-z][A-Za-z0-9_]{{0,62}}",
            tool.name
        ));
    }

    let schema_type = tool.input_schema.get("type").and_then(|v| v.as_str());
    if schema_type != Some("object") {
        return Err("inputSchema.type must be \"object\"".to_string());
    }

    let url = &tool.handler.config.url;
    let parsed = url::Url::parse(url)
        .map_err(|e| format!("handler.config.url `{url}` is not a parseable URL: {e}"))?;
    if !parsed.has_host() {
        return Err(format!("handler.config.url `{url}` must be absolute"));
    }

    validate_body_template(&tool.handler.config.body_template)?;

    Ok(())
}

/// Walk a JSON body template, checking every `{{var}}` placeholder's
/// variable name is a valid identifier (spec §4.1).
fn validate_body_template(value: &serde_json::Value) -> Result<(), String> {
    match value {
        serde_json::Value::String(s) => validate_template_placeholders(s),
        serde_json::Value::Array(items) => {
            for item in items {
                validate_body_template(item)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                validate_body_template(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_template_placeholders(s: &str) -> Result<(), String> {
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unterminated template placeholder in `{s}`"))?;
        let var_name = &after[..end];
        if !TEMPLATE_VAR.is_match(var_name) {
            return Err(format!(
                "template placeholder `{{{{{var_name}}}}}` is not a valid identifier"
            ));
        }
        rest = &after[end + 2..];
    }
    Ok(())
}

/// Minimal `lazy_static`-free regex holder: compiling a handful of small
/// regexes once at first use via `std::sync::OnceLock` rather than pulling
/// in `once_cell`/`lazy_static` for a handful of one-shot patterns.
mod once_cell_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct LazyRegex {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl LazyRegex {
        pub const fn new(pattern: &'static str) -> Self {
            Self {
                pattern,
                cell: OnceLock::new(),
            }
        }

        pub fn is_match(&self, text: &str) -> bool {
            self.cell
                .get_or_init(|| Regex::new(self.pattern).expect("static regex is valid"))
                .is_match(text)
        }
    }

    pub static SERVICE_NAME: LazyRegex = LazyRegex::new(r"^[A-Za-z0-9_-]{1,50}$");
    pub static CUSTOM_TOOL_NAME: LazyRegex = LazyRegex::new(r"^[A-Za-z][A-Za-z0-9_]{0,62}$");
    pub static TEMPLATE_VAR: LazyRegex = LazyRegex::new(r"^[A-Za-z_][A-Za-z0-9_]*$");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_custom_tool() -> CustomTool {
        CustomTool {
            name: "search_web".to_string(),
            description: "Search the web".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
            handler: CustomToolHandler {
                platform: "coze".to_string(),
                config: CustomToolHandlerConfig {
                    url: "https://api.coze.com/v1/workflow/run".to_string(),
                    result_field: "data.result".to_string(),
                    body_template: json!({ "query": "{{query}}" }),
                    headers: HashMap::new(),
                },
            },
        }
    }

    #[test]
    fn namespacing_round_trips() {
        let namespaced = namespaced_tool_name("filesystem", "read_file");
        assert_eq!(namespaced, "filesystem__read_file");
        assert_eq!(
            split_namespaced_tool_name(&namespaced),
            Some(("filesystem", "read_file"))
        );
    }

    #[test]
    fn endpoint_url_must_be_ws_scheme() {
        assert!(validate_endpoint_url("ws://localhost:9000").is_ok());
        assert!(validate_endpoint_url("wss://gateway.example.com").is_ok());
        assert!(validate_endpoint_url("http://localhost:9000").is_err());
        assert!(validate_endpoint_url("not a url").is_err());
    }

    #[test]
    fn service_name_rejects_reserved_and_malformed() {
        assert!(validate_service_name("filesystem").is_ok());
        assert!(validate_service_name(RESERVED_SERVICE_NAME).is_err());
        assert!(validate_service_name("bad name with spaces").is_err());
    }

    #[test]
    fn custom_tool_name_regex_enforced() {
        let mut tool = sample_custom_tool();
        assert!(validate_custom_tool(&tool).is_ok());
        tool.name = "1_bad_start".to_string();
        assert!(validate_custom_tool(&tool).is_err());
    }

    #[test]
    fn custom_tool_requires_object_schema() {
        let mut tool = sample_custom_tool();
        tool.input_schema = json!({ "type": "string" });
        assert!(validate_custom_tool(&tool).is_err());
    }

    #[test]
    fn body_template_placeholders_must_be_identifiers() {
        let mut tool = sample_custom_tool();
        tool.handler.config.body_template = json!({ "query": "{{1bad}}" });
        assert!(validate_custom_tool(&tool).is_err());

        tool.handler.config.body_template = json!({ "query": "{{query}}", "nested": { "x": "{{query}}" } });
        assert!(validate_custom_tool(&tool).is_ok());
    }

    #[test]
    fn config_validate_collects_every_error_not_just_the_first() {
        let mut config = Config::default();
        config.endpoints.push("http://bad-scheme".to_string());
        config.services.insert(
            RESERVED_SERVICE_NAME.to_string(),
            ServiceConfig::Stdio {
                command: "".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        // Both the bad endpoint and the reserved/empty-command service
        // complaints must be present — proving collection, not short-circuit.
        assert!(message.contains("ws://") || message.contains("wss://"));
        assert!(message.contains("reserved") || message.contains("command"));
    }

    #[test]
    fn unknown_tool_keys_are_pruned_not_hard_errors() {
        let mut config = Config::default();
        config.tools.insert(
            "ghost__tool".to_string(),
            ToolConfigEntry {
                enabled: true,
                description: None,
            },
        );
        assert!(config.validate().is_ok());
        let dropped = config.prune_unknown_tool_keys();
        assert_eq!(dropped, vec!["ghost__tool".to_string()]);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn tool_key_resolves_against_services_and_custom_tools() {
        let mut config = Config::default();
        config.services.insert(
            "filesystem".to_string(),
            ServiceConfig::Stdio {
                command: "mcp-fs".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        config.custom_tools.push(sample_custom_tool());

        assert!(config.tool_key_resolves("filesystem__read_file"));
        assert!(config.tool_key_resolves("search_web"));
        assert!(!config.tool_key_resolves("ghost__tool"));
    }

    #[test]
    fn config_yaml_round_trip_is_structurally_equal() {
        let mut config = Config::default();
        config.endpoints.push("wss://hub.example.com".to_string());
        config.services.insert(
            "filesystem".to_string(),
            ServiceConfig::Stdio {
                command: "mcp-fs".to_string(),
                args: vec!["--root".to_string(), "/data".to_string()],
                env: HashMap::new(),
            },
        );
        config.custom_tools.push(sample_custom_tool());

        let yaml = serde_yaml::to_string(&config).unwrap();
        let round_tripped: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, round_tripped);
    }
}
