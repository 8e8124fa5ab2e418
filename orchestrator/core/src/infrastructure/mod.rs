// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure: everything that performs I/O — the event bus, the
//! config store's file persistence, MCP transports/services, the
//! custom-tool HTTP proxy, endpoint connections, and the service/endpoint
//! managers that own them.

pub mod config_store;
pub mod custom_tool_proxy;
pub mod endpoint_connection;
pub mod endpoint_manager;
pub mod event_bus;
pub mod mcp;
pub mod notification_service;
pub mod service_manager;
