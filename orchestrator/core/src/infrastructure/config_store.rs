// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Config Store (C1, spec §4.1): the authoritative, validated, atomically
//! persisted source of truth for endpoints, services, tools, and custom
//! tools. Single-writer via a mutex; readers get an owned snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::config::{
    namespaced_tool_name, Config, CustomTool, PlatformCredentials, ServiceConfig,
    ToolConfigEntry,
};
use crate::domain::errors::GatewayError;
use crate::domain::events::GatewayEvent;
use crate::infrastructure::event_bus::EventBus;

/// File format the config document is persisted in. The document schema
/// itself (spec §3) is format-agnostic; YAML is the on-disk default per
/// spec §6.4, JSON is accepted on load for interop with API-driven writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }

    fn serialize(self, config: &Config) -> Result<String, GatewayError> {
        match self {
            ConfigFormat::Yaml => {
                serde_yaml::to_string(config).map_err(GatewayError::internal)
            }
            ConfigFormat::Json => {
                serde_json::to_string_pretty(config).map_err(GatewayError::internal)
            }
        }
    }

    fn deserialize(self, text: &str) -> Result<Config, GatewayError> {
        match self {
            ConfigFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|e| GatewayError::ConfigurationError(format!("invalid config YAML: {e}"))),
            ConfigFormat::Json => serde_json::from_str(text)
                .map_err(|e| GatewayError::ConfigurationError(format!("invalid config JSON: {e}"))),
        }
    }
}

struct Inner {
    config: Config,
    path: PathBuf,
    format: ConfigFormat,
}

/// The Config Store. Cheap to clone — state lives behind `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Mutex<Inner>>,
    event_bus: EventBus,
}

impl ConfigStore {
    /// Load the document at `path`, validating it and dropping (with a
    /// warning) any `tools` keys that no longer resolve (spec §4.1). If no
    /// file exists yet, starts from an empty, already-valid [`Config`].
    pub fn load(path: impl Into<PathBuf>, event_bus: EventBus) -> Result<Self, GatewayError> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path);

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                GatewayError::ConfigurationError(format!("cannot read config at {path:?}: {e}"))
            })?;
            format.deserialize(&text)?
        } else {
            info!(?path, "no config file found, starting from empty config");
            Config::default()
        };

        for dropped in config.prune_unknown_tool_keys() {
            warn!(tool = %dropped, "dropped unresolved tools key on load");
        }
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { config, path, format })),
            event_bus,
        })
    }

    /// Immutable snapshot of the whole document.
    pub fn get(&self) -> Config {
        self.inner.lock().config.clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.inner.lock().config.endpoints.clone()
    }

    pub fn services(&self) -> HashMap<String, ServiceConfig> {
        self.inner.lock().config.services.clone()
    }

    pub fn tools(&self) -> HashMap<String, ToolConfigEntry> {
        self.inner.lock().config.tools.clone()
    }

    pub fn get_platform_credentials(&self, platform: &str) -> Option<PlatformCredentials> {
        self.inner
            .lock()
            .config
            .get_platform_credentials(platform)
            .cloned()
    }

    /// Apply `mutate` to a cloned working copy, re-validate it, and only on
    /// success persist + publish `config:changed` (spec §4.1: atomic —
    /// fully succeeds or fully fails, file untouched and no event on
    /// failure).
    pub fn update<F>(&self, mutate: F) -> Result<Config, GatewayError>
    where
        F: FnOnce(&mut Config) -> Result<(), GatewayError>,
    {
        let mut guard = self.inner.lock();
        let mut candidate = guard.config.clone();
        mutate(&mut candidate)?;
        candidate.validate()?;

        write_atomically(&guard.path, &guard.format.serialize(&candidate)?)?;
        guard.config = candidate.clone();
        drop(guard);

        self.event_bus
            .emit(GatewayEvent::ConfigChanged { config: candidate.clone() });
        Ok(candidate)
    }

    pub fn set_tool_enabled(&self, namespaced_name: &str, enabled: bool) -> Result<Config, GatewayError> {
        let name = namespaced_name.to_string();
        self.update(move |cfg| {
            if !cfg.tool_key_resolves(&name) {
                return Err(GatewayError::ServiceOrToolNotFound(name.clone()));
            }
            cfg.tools
                .entry(name.clone())
                .and_modify(|t| t.enabled = enabled)
                .or_insert(ToolConfigEntry {
                    enabled,
                    description: None,
                });
            Ok(())
        })
    }

    pub fn add_endpoint(&self, url: &str) -> Result<Config, GatewayError> {
        let url = url.to_string();
        self.update(move |cfg| {
            if cfg.endpoints.iter().any(|e| e == &url) {
                return Err(GatewayError::EndpointAlreadyExists(url.clone()));
            }
            cfg.endpoints.push(url.clone());
            Ok(())
        })
    }

    pub fn remove_endpoint(&self, url: &str) -> Result<Config, GatewayError> {
        let url = url.to_string();
        self.update(move |cfg| {
            let before = cfg.endpoints.len();
            cfg.endpoints.retain(|e| e != &url);
            if cfg.endpoints.len() == before {
                return Err(GatewayError::EndpointNotFound(url.clone()));
            }
            Ok(())
        })
    }

    pub fn add_service(&self, name: &str, config: ServiceConfig) -> Result<Config, GatewayError> {
        let name = name.to_string();
        self.update(move |cfg| {
            if cfg.services.contains_key(&name) {
                return Err(GatewayError::ServerAlreadyExists(name.clone()));
            }
            cfg.services.insert(name.clone(), config);
            Ok(())
        })
    }

    /// Remove a service and every `tools` entry it owned (spec §4.1
    /// invariant: `tools` keys must keep resolving).
    pub fn remove_service(&self, name: &str) -> Result<Config, GatewayError> {
        let name = name.to_string();
        self.update(move |cfg| {
            if cfg.services.remove(&name).is_none() {
                return Err(GatewayError::ServerNotFound(name.clone()));
            }
            let prefix = format!("{name}__");
            cfg.tools.retain(|key, _| !key.starts_with(&prefix));
            Ok(())
        })
    }

    pub fn add_custom_tool(&self, tool: CustomTool) -> Result<Config, GatewayError> {
        self.update(move |cfg| {
            if cfg.custom_tools.iter().any(|t| t.name == tool.name) {
                return Err(GatewayError::ServerAlreadyExists(tool.name.clone()));
            }
            cfg.custom_tools.push(tool);
            Ok(())
        })
    }

    pub fn remove_custom_tool(&self, name: &str) -> Result<Config, GatewayError> {
        let name = name.to_string();
        self.update(move |cfg| {
            let before = cfg.custom_tools.len();
            cfg.custom_tools.retain(|t| t.name != name);
            if cfg.custom_tools.len() == before {
                return Err(GatewayError::ServiceOrToolNotFound(name.clone()));
            }
            cfg.tools.remove(&name);
            Ok(())
        })
    }

    /// Re-read the document from disk, replacing the in-memory copy
    /// (`POST /api/config/reload`, spec §6.1).
    pub fn reload(&self) -> Result<Config, GatewayError> {
        let mut guard = self.inner.lock();
        let text = std::fs::read_to_string(&guard.path).map_err(|e| {
            GatewayError::ConfigurationError(format!("cannot read config at {:?}: {e}", guard.path))
        })?;
        let mut config = guard.format.deserialize(&text)?;
        for dropped in config.prune_unknown_tool_keys() {
            warn!(tool = %dropped, "dropped unresolved tools key on reload");
        }
        config.validate()?;
        guard.config = config.clone();
        drop(guard);
        self.event_bus.emit(GatewayEvent::ConfigChanged { config: config.clone() });
        Ok(config)
    }

    pub fn exists(&self) -> bool {
        self.inner.lock().path.exists()
    }
}

/// Write `contents` to a sibling temp file, flush, then rename over `path`.
/// On a POSIX filesystem `rename` is atomic, so a crash mid-write leaves the
/// previous config (or nothing, if it never existed) intact (spec §4.1).
fn write_atomically(path: &Path, contents: &str) -> Result<(), GatewayError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(GatewayError::internal)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config"),
        std::process::id()
    ));

    std::fs::write(&tmp_path, contents).map_err(GatewayError::internal)?;
    std::fs::rename(&tmp_path, path).map_err(GatewayError::internal)?;
    Ok(())
}

/// Build the default `ToolConfigEntry` a freshly discovered service tool
/// should register under, and its namespaced key (shared by the service
/// manager when it syncs `listTools()` results into the store).
pub fn default_tool_key(service_name: &str, tool_name: &str) -> String {
    namespaced_tool_name(service_name, tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ServiceConfig;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn store() -> (ConfigStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let bus = EventBus::new();
        let store = ConfigStore::load(&path, bus).unwrap();
        (store, dir)
    }

    #[test]
    fn add_then_remove_endpoint_restores_prior_list() {
        let (store, _dir) = store();
        let before = store.endpoints();
        store.add_endpoint("wss://hub.example.com").unwrap();
        store.remove_endpoint("wss://hub.example.com").unwrap();
        assert_eq!(store.endpoints(), before);
    }

    #[test]
    fn duplicate_endpoint_rejected() {
        let (store, _dir) = store();
        store.add_endpoint("wss://hub.example.com").unwrap();
        let err = store.add_endpoint("wss://hub.example.com").unwrap_err();
        assert!(matches!(err, GatewayError::EndpointAlreadyExists(_)));
    }

    #[test]
    fn failed_update_leaves_file_untouched_and_emits_no_event() {
        let (store, dir) = store();
        store.add_endpoint("wss://hub.example.com").unwrap();
        let path = dir.path().join("config.yaml");
        let before = std::fs::read_to_string(&path).unwrap();

        let (unsub, mut rx) = store.event_bus.subscribe_channel("config:changed");

        let result = store.update(|cfg| {
            cfg.endpoints.push("not-a-valid-url".to_string());
            Ok(())
        });
        assert!(result.is_err());

        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(before, after);
        assert!(rx.try_recv().is_none());
        unsub.unsubscribe();
    }

    #[test]
    fn malformed_endpoint_surfaces_as_invalid_endpoint_not_configuration_error() {
        // S6: a PUT /api/config with a malformed endpoint URL must map to
        // InvalidEndpoint (400), not the generic ConfigurationError (422).
        let (store, _dir) = store();
        let err = store
            .update(|cfg| {
                cfg.endpoints.push("not-a-valid-url".to_string());
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidEndpoint(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn remove_service_also_drops_its_tool_keys() {
        let (store, _dir) = store();
        store
            .add_service(
                "filesystem",
                ServiceConfig::Stdio {
                    command: "mcp-fs".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
            )
            .unwrap();
        store.set_tool_enabled("filesystem__read_file", false).unwrap();
        let cfg = store.remove_service("filesystem").unwrap();
        assert!(!cfg.tools.contains_key("filesystem__read_file"));
    }

    #[test]
    fn remove_unknown_service_fails() {
        let (store, _dir) = store();
        let err = store.remove_service("ghost").unwrap_err();
        assert!(matches!(err, GatewayError::ServerNotFound(_)));
    }

    #[test]
    fn load_round_trip_is_structurally_equal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let bus = EventBus::new();
        let store = ConfigStore::load(&path, bus.clone()).unwrap();
        store.add_endpoint("wss://hub.example.com").unwrap();

        let reloaded = ConfigStore::load(&path, bus).unwrap();
        assert_eq!(store.get(), reloaded.get());
    }
}
