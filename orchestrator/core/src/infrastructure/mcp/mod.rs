// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! MCP Service Manager internals (C3, spec §4.3): wire framing shared by
//! all transport kinds, the transport connect/send/stop machinery, and the
//! per-service connection built on top of both.

pub mod framing;
pub mod service;
pub mod transport;

pub use service::McpService;
