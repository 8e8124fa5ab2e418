// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! The gateway's single error taxonomy. Every leaf component (config store,
//! event bus, MCP service, custom-tool proxy, service manager, endpoint
//! connection/manager, notification service) raises one of these variants;
//! managers add context via [`GatewayError::context`] but never change the
//! variant, so the HTTP layer's status mapping stays accurate however deep
//! the error originated.

use thiserror::Error;

/// Error kind. Field lists here mirror what's useful for producing a
/// human-readable message — callers needing machine-readable detail use
/// `kind()` to branch.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("service or tool not found: {0}")]
    ServiceOrToolNotFound(String),

    #[error("server already exists: {0}")]
    ServerAlreadyExists(String),

    #[error("endpoint already exists: {0}")]
    EndpointAlreadyExists(String),

    #[error("endpoint already connected: {0}")]
    EndpointAlreadyConnected(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    #[error("tool disabled: {0}")]
    ToolDisabled(String),

    #[error("external API error (status {status}): {body_excerpt}")]
    ExternalApiError { status: u16, body_excerpt: String },

    #[error("call timed out after {0:?}")]
    CallTimeout(std::time::Duration),

    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error")]
    Internal(#[source] Option<Box<dyn std::error::Error + Send + Sync>>),

    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Wrap an arbitrary source error as [`GatewayError::Internal`], the
    /// only variant whose message is redacted before reaching a caller
    /// (per the error-handling design's redaction rule for internal errors).
    pub fn internal<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        GatewayError::Internal(Some(Box::new(source)))
    }

    /// HTTP status code this error kind maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_)
            | GatewayError::InvalidArguments(_)
            | GatewayError::InvalidEndpoint(_)
            | GatewayError::InvalidServiceName(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::ServerNotFound(_)
            | GatewayError::EndpointNotFound(_)
            | GatewayError::ServiceOrToolNotFound(_) => 404,
            GatewayError::ToolDisabled(_) => 403,
            GatewayError::ServerAlreadyExists(_)
            | GatewayError::EndpointAlreadyExists(_)
            | GatewayError::EndpointAlreadyConnected(_) => 409,
            GatewayError::ConfigurationError(_) => 422,
            GatewayError::ResourceLimitExceeded(_) => 429,
            GatewayError::ExternalApiError { .. } => 502,
            GatewayError::CallTimeout(_) | GatewayError::ConnectionTimeout(_) => 504,
            GatewayError::ServiceUnavailable(_) => 503,
            GatewayError::Internal(_) | GatewayError::Cancelled => 500,
        }
    }

    /// Machine-readable error code used in the HTTP envelope's `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "InvalidRequest",
            GatewayError::InvalidArguments(_) => "InvalidArguments",
            GatewayError::InvalidEndpoint(_) => "InvalidEndpoint",
            GatewayError::InvalidServiceName(_) => "InvalidServiceName",
            GatewayError::Unauthorized(_) => "Unauthorized",
            GatewayError::ServerNotFound(_) => "ServerNotFound",
            GatewayError::EndpointNotFound(_) => "EndpointNotFound",
            GatewayError::ServiceOrToolNotFound(_) => "ServiceOrToolNotFound",
            GatewayError::ServerAlreadyExists(_) => "ServerAlreadyExists",
            GatewayError::EndpointAlreadyExists(_) => "EndpointAlreadyExists",
            GatewayError::EndpointAlreadyConnected(_) => "EndpointAlreadyConnected",
            GatewayError::ConfigurationError(_) => "ConfigurationError",
            GatewayError::ResourceLimitExceeded(_) => "ResourceLimitExceeded",
            GatewayError::ToolDisabled(_) => "ToolDisabled",
            GatewayError::ExternalApiError { .. } => "ExternalApiError",
            GatewayError::CallTimeout(_) => "CallTimeout",
            GatewayError::ConnectionTimeout(_) => "ConnectionTimeout",
            GatewayError::ServiceUnavailable(_) => "ServiceUnavailable",
            GatewayError::Internal(_) => "InternalError",
            GatewayError::Cancelled => "Cancelled",
        }
    }

    /// Redacted message safe to hand to an HTTP caller — internal errors
    /// never leak their source, everything else is already human-readable.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Which [`GatewayError`] variant a validation failure should surface as,
/// when every failure collected agrees on one. Mirrors the distinct
/// `InvalidEndpoint`/`InvalidServiceName`/`ConfigurationError` kinds in the
/// §7 error taxonomy rather than flattening every config validation failure
/// into one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Endpoint,
    ServiceName,
    Configuration,
}

/// A collection of validation failures gathered by fail-fast-but-collect-all
/// validators (the Config Store's `validate()` and the custom-tool argument
/// validator both build one of these instead of bailing on the first fault).
#[derive(Debug, Default)]
pub struct ValidationErrors {
    messages: Vec<String>,
    kind: Option<ValidationKind>,
    mixed_kinds: bool,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message with no specific kind — always folds into
    /// `ConfigurationError` (used for checks that §7 doesn't give their own
    /// kind, e.g. custom-tool or service-config validation).
    pub fn push(&mut self, message: impl Into<String>) {
        self.push_kind(ValidationKind::Configuration, message);
    }

    /// Push a message tagged with the [`GatewayError`] kind it should
    /// surface as if every other collected message agrees.
    pub fn push_kind(&mut self, kind: ValidationKind, message: impl Into<String>) {
        match self.kind {
            None => self.kind = Some(kind),
            Some(existing) if existing != kind => self.mixed_kinds = true,
            _ => {}
        }
        self.messages.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Convert to a `Result`. If every collected failure agrees on a kind,
    /// the result carries that specific [`GatewayError`] variant (e.g. an
    /// endpoint-only failure surfaces as `InvalidEndpoint`, 400); a mix of
    /// kinds (or no kind at all) folds into `ConfigurationError` (422).
    pub fn into_result(self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Ok(());
        }
        let joined = self.messages.join("; ");
        let kind = if self.mixed_kinds { None } else { self.kind };
        Err(match kind {
            Some(ValidationKind::Endpoint) => GatewayError::InvalidEndpoint(joined),
            Some(ValidationKind::ServiceName) => GatewayError::InvalidServiceName(joined),
            _ => GatewayError::ConfigurationError(joined),
        })
    }
}
