// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Endpoint Manager (C7, spec §4.7): owns every [`EndpointConnection`],
//! mutating the `url → C6` map under one mutex while delegating all actual
//! I/O to each connection's own task. A failure isolated to one endpoint
//! never blocks operations on another (spec §4.7, invariant 2 in §8).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::domain::config::validate_endpoint_url;
use crate::domain::errors::GatewayError;
use crate::domain::mcp::EndpointState;
use crate::infrastructure::config_store::ConfigStore;
use crate::infrastructure::endpoint_connection::{EndpointConnection, WorkerCommand};
use crate::infrastructure::event_bus::EventBus;

/// Owns all [`EndpointConnection`] instances (spec §4.7).
#[derive(Clone)]
pub struct EndpointManager {
    config_store: ConfigStore,
    event_bus: EventBus,
    worker_command: WorkerCommand,
    endpoints: Arc<Mutex<HashMap<String, EndpointConnection>>>,
}

impl EndpointManager {
    pub fn new(config_store: ConfigStore, event_bus: EventBus, worker_command: WorkerCommand) -> Self {
        Self {
            config_store,
            event_bus,
            worker_command,
            endpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_connection(&self, url: &str) -> EndpointConnection {
        let connection_config = self.config_store.get().connection;
        EndpointConnection::new(url, connection_config, self.worker_command.clone(), self.event_bus.clone())
    }

    /// Start every endpoint already present in config (spec §4.7, called
    /// from process startup alongside the service manager's `start()`).
    pub async fn start(&self) {
        let urls = self.config_store.endpoints();
        for url in urls {
            let connection = self.build_connection(&url);
            connection.start().await;
            self.endpoints.lock().insert(url, connection);
        }
    }

    /// Register and connect a new endpoint (spec §4.7 `add(url)`).
    pub async fn add(&self, url: &str) -> Result<EndpointState, GatewayError> {
        validate_endpoint_url(url).map_err(GatewayError::InvalidEndpoint)?;
        if self.endpoints.lock().contains_key(url) {
            return Err(GatewayError::EndpointAlreadyExists(url.to_string()));
        }

        self.config_store.add_endpoint(url)?;
        let connection = self.build_connection(url);
        connection.start().await;
        let snapshot = connection.snapshot();
        self.endpoints.lock().insert(url.to_string(), connection);
        info!(%url, "endpoint added");
        Ok(snapshot)
    }

    /// Disconnect and forget an endpoint (spec §4.7 `remove(url)`).
    pub async fn remove(&self, url: &str) -> Result<(), GatewayError> {
        let connection = self
            .endpoints
            .lock()
            .remove(url)
            .ok_or_else(|| GatewayError::EndpointNotFound(url.to_string()))?;
        connection.stop().await;
        self.config_store.remove_endpoint(url)?;
        info!(%url, "endpoint removed");
        Ok(())
    }

    /// Ensure an endpoint is connecting/connected. Idempotent: a no-op
    /// success if it already is (spec §4.7, §8 invariant 7).
    pub async fn connect(&self, url: &str) -> Result<EndpointState, GatewayError> {
        let connection = self
            .endpoints
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::EndpointNotFound(url.to_string()))?;
        connection.start().await;
        Ok(connection.snapshot())
    }

    /// Stop reconnect attempts and tear the connection down (spec §4.7).
    /// Idempotent over an already-disconnected endpoint.
    pub async fn disconnect(&self, url: &str) -> Result<EndpointState, GatewayError> {
        let connection = self
            .endpoints
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::EndpointNotFound(url.to_string()))?;
        connection.stop().await;
        Ok(connection.snapshot())
    }

    /// Force an immediate reconnect, bypassing the normal backoff wait
    /// (spec §4.7 `reconnect(url)`).
    pub async fn reconnect(&self, url: &str) -> Result<EndpointState, GatewayError> {
        let connection = self
            .endpoints
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::EndpointNotFound(url.to_string()))?;
        connection.stop().await;
        connection.start().await;
        Ok(connection.snapshot())
    }

    /// Snapshot of every known endpoint's state (spec §4.7 `status()`).
    pub fn status(&self) -> Vec<EndpointState> {
        self.endpoints.lock().values().map(|c| c.snapshot()).collect()
    }

    pub fn status_for(&self, url: &str) -> Result<EndpointState, GatewayError> {
        self.endpoints
            .lock()
            .get(url)
            .map(|c| c.snapshot())
            .ok_or_else(|| GatewayError::EndpointNotFound(url.to_string()))
    }

    /// Tear every endpoint down (process-wide shutdown fan-out, spec §5).
    pub async fn shutdown(&self) {
        let connections: Vec<EndpointConnection> = self.endpoints.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (EndpointManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let bus = EventBus::new();
        let store = ConfigStore::load(dir.path().join("config.yaml"), bus.clone()).unwrap();
        let worker = WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "cat".to_string()],
        };
        (EndpointManager::new(store, bus, worker), dir)
    }

    #[tokio::test]
    async fn add_rejects_malformed_url() {
        let (manager, _dir) = manager();
        let err = manager.add("http://not-ws").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn add_then_remove_round_trips_through_config() {
        let (manager, _dir) = manager();
        manager.add("ws://127.0.0.1:1").await.unwrap();
        assert_eq!(manager.status().len(), 1);
        manager.remove("ws://127.0.0.1:1").await.unwrap();
        assert!(manager.status().is_empty());
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let (manager, _dir) = manager();
        manager.add("ws://127.0.0.1:1").await.unwrap();
        let err = manager.add("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, GatewayError::EndpointAlreadyExists(_)));
    }

    #[tokio::test]
    async fn operations_on_unknown_endpoint_fail_not_found() {
        let (manager, _dir) = manager();
        assert!(matches!(
            manager.connect("ws://127.0.0.1:1").await.unwrap_err(),
            GatewayError::EndpointNotFound(_)
        ));
        assert!(matches!(
            manager.disconnect("ws://127.0.0.1:1").await.unwrap_err(),
            GatewayError::EndpointNotFound(_)
        ));
        assert!(matches!(
            manager.remove("ws://127.0.0.1:1").await.unwrap_err(),
            GatewayError::EndpointNotFound(_)
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_on_already_stopped_endpoint() {
        let (manager, _dir) = manager();
        manager.add("ws://127.0.0.1:1").await.unwrap();
        manager.disconnect("ws://127.0.0.1:1").await.unwrap();
        let state = manager.disconnect("ws://127.0.0.1:1").await.unwrap();
        assert!(!state.connected);
    }
}
