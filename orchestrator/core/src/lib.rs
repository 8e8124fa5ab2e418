// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Core runtime for the MCP aggregation gateway: config persistence, the
//! event bus, MCP transports and the service/endpoint managers that own
//! them, the custom-tool proxy, and the UI notification fan-out. The `cli`
//! crate wires these into an HTTP surface and a process.

pub mod domain;
pub mod infrastructure;

pub use domain::GatewayError;
pub use infrastructure::config_store::ConfigStore;
pub use infrastructure::custom_tool_proxy::CustomToolProxy;
pub use infrastructure::endpoint_connection::{EndpointConnection, WorkerCommand};
pub use infrastructure::endpoint_manager::EndpointManager;
pub use infrastructure::event_bus::EventBus;
pub use infrastructure::mcp::McpService;
pub use infrastructure::notification_service::NotificationService;
pub use infrastructure::service_manager::ServiceManager;
