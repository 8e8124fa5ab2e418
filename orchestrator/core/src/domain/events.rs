// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Event-bus payloads. The topic set is fixed at exactly six topics — this
//! enum is both the topic enumeration and the payload carried on it, one
//! tagged enum rather than one channel per topic.

use serde::{Deserialize, Serialize};

use crate::domain::config::{Config, Tool};
use crate::domain::mcp::{EndpointState, ServiceState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum GatewayEvent {
    #[serde(rename = "config:changed")]
    ConfigChanged { config: Config },

    #[serde(rename = "endpoint:statusChanged")]
    EndpointStatusChanged { endpoint: EndpointState },

    #[serde(rename = "service:statusChanged")]
    ServiceStatusChanged { service: ServiceState },

    #[serde(rename = "service:restartRequested")]
    ServiceRestartRequested { service_name: String },

    #[serde(rename = "tool:registryChanged")]
    ToolRegistryChanged { tools: Vec<Tool> },

    #[serde(rename = "ws:messageReceived")]
    WsMessageReceived {
        endpoint_url: String,
        message: serde_json::Value,
    },
}

impl GatewayEvent {
    /// The topic name this event was published on, matching spec §4.2's
    /// literal topic strings.
    pub fn topic(&self) -> &'static str {
        match self {
            GatewayEvent::ConfigChanged { .. } => "config:changed",
            GatewayEvent::EndpointStatusChanged { .. } => "endpoint:statusChanged",
            GatewayEvent::ServiceStatusChanged { .. } => "service:statusChanged",
            GatewayEvent::ServiceRestartRequested { .. } => "service:restartRequested",
            GatewayEvent::ToolRegistryChanged { .. } => "tool:registryChanged",
            GatewayEvent::WsMessageReceived { .. } => "ws:messageReceived",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_match_spec_literals() {
        assert_eq!(
            GatewayEvent::ServiceRestartRequested {
                service_name: "filesystem".into()
            }
            .topic(),
            "service:restartRequested"
        );
    }
}
