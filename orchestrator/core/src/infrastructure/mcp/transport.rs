// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Transport connect/send/stop for the three MCP service kinds (spec
//! §4.3). Each transport reduces to: a background task pumping parsed
//! JSON-RPC values onto an `mpsc` channel, and a [`TransportSink`] used to
//! send outgoing messages. The stdio transport additionally owns the
//! child process.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::config::ServiceConfig;
use crate::domain::errors::GatewayError;
use crate::infrastructure::mcp::framing::{pump_json_lines, sse_block_to_json};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STDIO_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The live, writable half of a connected transport.
pub enum TransportSink {
    Stdio(ChildStdin),
    Http {
        client: reqwest::Client,
        url: String,
        headers: HeaderMap,
    },
}

impl TransportSink {
    pub async fn send(&mut self, message: &Value) -> Result<(), GatewayError> {
        match self {
            TransportSink::Stdio(stdin) => {
                let mut line = serde_json::to_vec(message).map_err(GatewayError::internal)?;
                line.push(b'\n');
                stdin.write_all(&line).await.map_err(GatewayError::internal)?;
                stdin.flush().await.map_err(GatewayError::internal)?;
                Ok(())
            }
            TransportSink::Http { client, url, headers } => {
                let response = client
                    .post(url.as_str())
                    .headers(headers.clone())
                    .json(message)
                    .send()
                    .await
                    .map_err(GatewayError::internal)?;
                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(GatewayError::ExternalApiError {
                        status,
                        body_excerpt: body.chars().take(200).collect(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Owns whatever must be torn down on `stop()` — the child process for
/// stdio, nothing for the HTTP-family transports (their pump task ends
/// when its `JoinHandle` is aborted).
pub enum TransportHandle {
    Stdio { child: Child, pump: tokio::task::JoinHandle<()> },
    Http { pump: tokio::task::JoinHandle<()> },
}

impl TransportHandle {
    pub fn pid(&self) -> Option<u32> {
        match self {
            TransportHandle::Stdio { child, .. } => child.id(),
            TransportHandle::Http { .. } => None,
        }
    }

    /// Stop the transport (spec §4.3 `stop(graceful)`): for stdio, SIGTERM
    /// then wait up to 5s then SIGKILL; for HTTP-family, just abort the
    /// pump task and drop the stream.
    pub async fn stop(self, graceful: bool) {
        match self {
            TransportHandle::Stdio { mut child, pump } => {
                pump.abort();
                if graceful {
                    #[cfg(unix)]
                    if let Some(pid) = child.id() {
                        unsafe {
                            libc::kill(pid as i32, libc::SIGTERM);
                        }
                    }
                    let waited = tokio::time::timeout(STDIO_GRACE_PERIOD, child.wait()).await;
                    if waited.is_ok() {
                        return;
                    }
                    warn!("stdio service did not exit within grace period, sending SIGKILL");
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            TransportHandle::Http { pump } => {
                pump.abort();
            }
        }
    }
}

pub struct Connected {
    pub sink: TransportSink,
    pub incoming: mpsc::Receiver<Value>,
    pub handle: TransportHandle,
}

pub async fn connect(config: &ServiceConfig) -> Result<Connected, GatewayError> {
    match config {
        ServiceConfig::Stdio { command, args, env } => connect_stdio(command, args, env).await,
        ServiceConfig::Sse { url, headers } => connect_sse(url, headers).await,
        ServiceConfig::StreamableHttp { url, headers } => connect_streamable_http(url, headers).await,
    }
}

async fn connect_stdio(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<Connected, GatewayError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = tokio::time::timeout(CONNECT_TIMEOUT, async { cmd.spawn() })
        .await
        .map_err(|_| GatewayError::ConnectionTimeout(CONNECT_TIMEOUT))?
        .map_err(GatewayError::internal)?;

    let stdin = child.stdin.take().ok_or_else(|| {
        GatewayError::internal(std::io::Error::other("child stdin not piped"))
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        GatewayError::internal(std::io::Error::other("child stdout not piped"))
    })?;
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel(256);
    let pump = tokio::spawn(pump_json_lines(stdout, tx));

    // Stderr is logged, not surfaced to the upstream/UI (spec §9 open
    // question: forwarding stderr to the operator UI is left unresolved).
    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "mcp_service_stderr", "{line}");
            }
        });
    }

    info!(%command, pid = child.id(), "spawned stdio MCP service");

    Ok(Connected {
        sink: TransportSink::Stdio(stdin),
        incoming: rx,
        handle: TransportHandle::Stdio { child, pump },
    })
}

fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, GatewayError> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::try_from(k.as_str())
            .map_err(|e| GatewayError::ConfigurationError(format!("invalid header name `{k}`: {e}")))?;
        let value = HeaderValue::try_from(v.as_str())
            .map_err(|e| GatewayError::ConfigurationError(format!("invalid header value for `{k}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn connect_sse(url: &str, headers: &HashMap<String, String>) -> Result<Connected, GatewayError> {
    let header_map = build_header_map(headers)?;
    let client = reqwest::Client::new();

    let response = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .headers(header_map.clone())
            .send(),
    )
    .await
    .map_err(|_| GatewayError::ConnectionTimeout(CONNECT_TIMEOUT))?
    .map_err(GatewayError::internal)?;

    if !response.status().is_success() {
        return Err(GatewayError::ExternalApiError {
            status: response.status().as_u16(),
            body_excerpt: String::new(),
        });
    }

    let (tx, rx) = mpsc::channel(256);
    let pump = tokio::spawn(async move {
        use futures_util::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "SSE stream error");
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find("\n\n") {
                let block: String = buffer.drain(..pos + 2).collect();
                if let Some(value) = sse_block_to_json(&block) {
                    if tx.send(value).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    info!(%url, "connected SSE MCP service");

    Ok(Connected {
        sink: TransportSink::Http {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers: header_map,
        },
        incoming: rx,
        handle: TransportHandle::Http { pump },
    })
}

async fn connect_streamable_http(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<Connected, GatewayError> {
    let header_map = build_header_map(headers)?;
    let client = reqwest::Client::new();

    // The streamable-HTTP transport has no standing connection to probe;
    // `connect` succeeds once the URL resolves at all by issuing an initial
    // long-poll request whose chunks are pumped the same way stdio lines
    // are (spec §4.3: "each chunk is one message").
    let response = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client.get(url).headers(header_map.clone()).send(),
    )
    .await
    .map_err(|_| GatewayError::ConnectionTimeout(CONNECT_TIMEOUT))?
    .map_err(GatewayError::internal)?;

    if !response.status().is_success() {
        return Err(GatewayError::ExternalApiError {
            status: response.status().as_u16(),
            body_excerpt: String::new(),
        });
    }

    let (tx, rx) = mpsc::channel(256);
    let pump = tokio::spawn(async move {
        use futures_util::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "streamable-HTTP stream error");
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping unparseable streamable-HTTP chunk"),
                }
            }
        }
    });

    info!(%url, "connected streamable-HTTP MCP service");

    Ok(Connected {
        sink: TransportSink::Http {
            client,
            url: url.to_string(),
            headers: header_map,
        },
        incoming: rx,
        handle: TransportHandle::Http { pump },
    })
}
