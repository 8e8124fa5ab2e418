// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Notification Service (C8, spec §4.8): fans out C2 events to registered
//! UI WebSocket clients as typed `{type, data, timestamp}` frames. This
//! module is transport-agnostic — registering a client hands back an
//! `mpsc::Receiver` the HTTP layer drains into an actual WebSocket; it
//! never touches axum or any socket type directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::domain::events::GatewayEvent;
use crate::infrastructure::config_store::ConfigStore;
use crate::infrastructure::endpoint_manager::EndpointManager;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::service_manager::ServiceManager;

/// Queue depth per UI client; matches the event bus's own per-subscriber
/// bound since a UI client is ultimately fed from it.
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Every topic this service subscribes to on startup (spec §4.8: "the C2
/// topics listed in §4.2").
const TOPICS: &[&str] = &[
    "config:changed",
    "endpoint:statusChanged",
    "service:statusChanged",
    "service:restartRequested",
    "tool:registryChanged",
    "ws:messageReceived",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// One outbound frame (spec §6.3: `{type, data, timestamp}`, `type ∈
/// {config, status, configUpdate, statusUpdate, restartStatus, error}`).
#[derive(Debug, Clone, Serialize)]
pub struct NotificationFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationFrame {
    fn new(frame_type: &'static str, data: Value) -> Self {
        Self { frame_type, data, timestamp: Utc::now() }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    event_bus: EventBus,
    config_store: ConfigStore,
    endpoint_manager: EndpointManager,
    service_manager: ServiceManager,
    clients: Arc<Mutex<HashMap<ClientId, mpsc::Sender<NotificationFrame>>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationService {
    pub fn new(
        event_bus: EventBus,
        config_store: ConfigStore,
        endpoint_manager: EndpointManager,
        service_manager: ServiceManager,
    ) -> Self {
        Self {
            event_bus,
            config_store,
            endpoint_manager,
            service_manager,
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to every topic in [`TOPICS`] (spec §4.8 startup behavior).
    /// Safe to call once; each subscription lives for the process lifetime.
    pub fn start(&self) {
        for &topic in TOPICS {
            let this = self.clone();
            self.event_bus.subscribe(topic, move |event| {
                let this = this.clone();
                async move { this.broadcast(event).await }
            });
        }
    }

    async fn broadcast(&self, event: GatewayEvent) {
        for frame in event_to_frames(event) {
            let mut clients = self.clients.lock();
            clients.retain(|_, tx| tx.try_send(frame.clone()).is_ok());
        }
    }

    /// Register a new UI client, returning its id and the receiver the
    /// caller should drain into a WebSocket. Sends the initial
    /// `configUpdate` + `statusUpdate` snapshot before returning (spec
    /// §4.8, §6.3).
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<NotificationFrame>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

        let config = self.config_store.get();
        let _ = tx.try_send(NotificationFrame::new("configUpdate", json!(config)));

        let endpoint_statuses = self.endpoint_manager.status();
        let service_statuses = self.service_manager.all_service_states().await;
        let _ = tx.try_send(NotificationFrame::new(
            "statusUpdate",
            json!({ "endpointStatuses": endpoint_statuses, "serviceStatuses": service_statuses }),
        ));

        self.clients.lock().insert(id, tx);
        (id, rx)
    }

    /// Drop a client's registration (spec §4.8: "unregister on socket
    /// close").
    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Map one bus event onto the UI frame(s) it produces. Endpoint status
/// changes that carry a fresh error additionally surface an `error` frame
/// (spec §7: "the UI notifier surfaces error frames for asynchronous
/// failures").
fn event_to_frames(event: GatewayEvent) -> Vec<NotificationFrame> {
    match event {
        GatewayEvent::ConfigChanged { config } => {
            vec![NotificationFrame::new("configUpdate", json!(config))]
        }
        GatewayEvent::EndpointStatusChanged { endpoint } => {
            let mut frames = vec![NotificationFrame::new("statusUpdate", json!({ "endpoint": endpoint }))];
            if let Some(error) = &endpoint.last_error {
                frames.push(NotificationFrame::new(
                    "error",
                    json!({ "endpoint": endpoint.url, "message": error }),
                ));
            }
            frames
        }
        GatewayEvent::ServiceStatusChanged { service } => {
            vec![NotificationFrame::new("statusUpdate", json!({ "service": service }))]
        }
        GatewayEvent::ServiceRestartRequested { service_name } => {
            vec![NotificationFrame::new("restartStatus", json!({ "serviceName": service_name }))]
        }
        GatewayEvent::ToolRegistryChanged { tools } => {
            vec![NotificationFrame::new("statusUpdate", json!({ "tools": tools }))]
        }
        GatewayEvent::WsMessageReceived { endpoint_url, message } => {
            vec![NotificationFrame::new(
                "status",
                json!({ "endpointUrl": endpoint_url, "message": message }),
            )]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mcp::EndpointState;
    use tempfile::tempdir;

    fn service() -> (NotificationService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let bus = EventBus::new();
        let store = ConfigStore::load(dir.path().join("config.yaml"), bus.clone()).unwrap();
        let endpoint_manager = EndpointManager::new(
            store.clone(),
            bus.clone(),
            crate::infrastructure::endpoint_connection::WorkerCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "cat".to_string()],
            },
        );
        let service_manager = ServiceManager::new(store.clone(), bus.clone());
        (NotificationService::new(bus, store, endpoint_manager, service_manager), dir)
    }

    #[tokio::test]
    async fn register_sends_initial_snapshot_before_any_event() {
        let (notifier, _dir) = service();
        let (_id, mut rx) = notifier.register().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.frame_type, "configUpdate");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.frame_type, "statusUpdate");
    }

    #[tokio::test]
    async fn unregister_removes_client_and_stops_delivery() {
        let (notifier, _dir) = service();
        let (id, _rx) = notifier.register().await;
        assert_eq!(notifier.client_count(), 1);
        notifier.unregister(id);
        assert_eq!(notifier.client_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_registered_client() {
        let (notifier, _dir) = service();
        notifier.start();
        let (_id, mut rx) = notifier.register().await;
        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();

        notifier.event_bus.emit(GatewayEvent::EndpointStatusChanged {
            endpoint: EndpointState::new("wss://hub.example.com"),
        });

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.frame_type, "statusUpdate");
    }

    #[tokio::test]
    async fn endpoint_error_also_emits_an_error_frame() {
        let (notifier, _dir) = service();
        notifier.start();
        let (_id, mut rx) = notifier.register().await;
        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();

        let mut endpoint = EndpointState::new("wss://hub.example.com");
        endpoint.last_error = Some("boom".to_string());
        notifier.event_bus.emit(GatewayEvent::EndpointStatusChanged { endpoint });

        let status_frame = rx.recv().await.unwrap();
        assert_eq!(status_frame.frame_type, "statusUpdate");
        let error_frame = rx.recv().await.unwrap();
        assert_eq!(error_frame.frame_type, "error");
    }
}
