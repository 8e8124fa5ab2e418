// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain-level state snapshots for endpoints and MCP services (spec §3).
//! These are the types returned by `status()`/`getAllTools()`-style reads;
//! the structs that actually own and mutate this state live in
//! `infrastructure::endpoint_connection` / `infrastructure::mcp::service`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one upstream endpoint connection (spec §3). Transitions are
/// owned exclusively by that endpoint's own task — every other component
/// only ever reads a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointState {
    pub url: String,
    pub connected: bool,
    pub initialized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub reconnect_attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reconnect_at: Option<DateTime<Utc>>,
}

impl EndpointState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: false,
            initialized: false,
            last_error: None,
            reconnect_attempt: 0,
            next_reconnect_at: None,
        }
    }

    /// Enforce the `connected ⇒ initialized` invariant (spec §3). Call sites
    /// that would otherwise produce a state violating this return `false`
    /// and must not publish the resulting snapshot.
    pub fn is_consistent(&self) -> bool {
        !self.connected || self.initialized
    }
}

/// Status of one managed MCP service (spec §3), exclusively mutated by the
/// service manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceState {
    pub name: String,
    pub status: ServiceStatus,
    /// Only populated for stdio-transport services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub tools_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServiceState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::Stopped,
            pid: None,
            tools_count: 0,
            last_error: None,
        }
    }
}

/// Which side of the registry owns a tool (spec §4.5 namespacing rule).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOwner {
    Service(String),
    /// Reserved literal `customMCP` — tool name is exposed verbatim, no
    /// `service__` prefix.
    CustomMcp,
}

/// A `testConnection` result (spec §4.5 `C5::testConnection`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTestResult {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_state_invariant_rejects_connected_uninitialized() {
        let mut state = EndpointState::new("wss://hub.example.com");
        assert!(state.is_consistent());
        state.connected = true;
        assert!(!state.is_consistent());
        state.initialized = true;
        assert!(state.is_consistent());
    }

    #[test]
    fn service_state_defaults_to_stopped() {
        let state = ServiceState::new("filesystem");
        assert_eq!(state.status, ServiceStatus::Stopped);
        assert!(state.pid.is_none());
    }
}
