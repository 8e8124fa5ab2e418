// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Endpoint Connection (C6, spec §4.6): one upstream WebSocket plus its
//! dedicated child subprocess ("the local aggregator entry point" — a
//! separate invocation of this same gateway binary in its worker mode,
//! so a crash in one endpoint's message stream can never affect another's).
//! This component owns the connect/heartbeat/reconnect state machine and
//! the byte-level routing between the two; it never inspects JSON-RPC
//! content itself — that's the worker subprocess's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::domain::config::ConnectionConfig;
use crate::domain::errors::GatewayError;
use crate::domain::events::GatewayEvent;
use crate::domain::mcp::EndpointState;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::mcp::framing::pump_json_lines;

/// Operator-forbidden close code (spec §4.6) — never triggers a reconnect.
pub const FATAL_CLOSE_CODE: u16 = 4004;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBPROCESS_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How to launch the local aggregator entry point. The program is typically
/// this gateway's own executable invoked in worker mode; callers (the
/// endpoint manager) supply the same template for every endpoint — each
/// connection gets its own subprocess instance regardless.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    incoming: mpsc::Receiver<Value>,
    pump: tokio::task::JoinHandle<()>,
}

impl WorkerProcess {
    /// `true` if the subprocess is known to have already exited.
    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    async fn stop(mut self) {
        self.pump.abort();
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        let waited = tokio::time::timeout(SUBPROCESS_GRACE_PERIOD, self.child.wait()).await;
        if waited.is_err() {
            warn!("aggregator subprocess did not exit within grace period, sending SIGKILL");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

fn spawn_worker(worker: &WorkerCommand) -> Result<WorkerProcess, GatewayError> {
    let mut cmd = Command::new(&worker.program);
    cmd.args(&worker.args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(GatewayError::internal)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| GatewayError::internal(std::io::Error::other("worker stdin not piped")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::internal(std::io::Error::other("worker stdout not piped")))?;
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel(256);
    let pump = tokio::spawn(pump_json_lines(stdout, tx));

    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "aggregator_worker_stderr", "{line}");
            }
        });
    }

    Ok(WorkerProcess { child, stdin, incoming: rx, pump })
}

/// One upstream endpoint connection. Cheap to clone — state lives behind
/// shared handles; the supervisor loop runs on its own task.
#[derive(Clone)]
pub struct EndpointConnection {
    url: String,
    connection_config: ConnectionConfig,
    worker_command: WorkerCommand,
    event_bus: EventBus,
    state: Arc<Mutex<EndpointState>>,
    should_reconnect: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    supervisor: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl EndpointConnection {
    pub fn new(
        url: impl Into<String>,
        connection_config: ConnectionConfig,
        worker_command: WorkerCommand,
        event_bus: EventBus,
    ) -> Self {
        let url = url.into();
        Self {
            state: Arc::new(Mutex::new(EndpointState::new(url.clone()))),
            url,
            connection_config,
            worker_command,
            event_bus,
            should_reconnect: Arc::new(AtomicBool::new(true)),
            stop_notify: Arc::new(Notify::new()),
            supervisor: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn snapshot(&self) -> EndpointState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Start the supervisor task (spec §4.6 lazily-created subprocess, first
    /// connect attempt). No-op if already running.
    pub async fn start(&self) {
        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            return;
        }
        self.should_reconnect.store(true, Ordering::SeqCst);
        let this = self.clone();
        *guard = Some(tokio::spawn(async move { this.run_supervisor().await }));
    }

    /// Tear the connection down: stop reconnecting, close the socket, kill
    /// the subprocess (spec §4.6 `stop()`).
    pub async fn stop(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
        let mut state = self.state.lock();
        state.connected = false;
        state.initialized = false;
    }

    async fn run_supervisor(&self) {
        let worker: tokio::sync::Mutex<Option<WorkerProcess>> = tokio::sync::Mutex::new(None);

        loop {
            if !self.should_reconnect.load(Ordering::SeqCst) {
                break;
            }

            {
                let mut guard = worker.lock().await;
                let needs_spawn = match guard.as_mut() {
                    Some(w) => w.has_exited(),
                    None => true,
                };
                if needs_spawn {
                    match spawn_worker(&self.worker_command) {
                        Ok(w) => *guard = Some(w),
                        Err(e) => {
                            warn!(url = %self.url, error = %e, "failed to spawn aggregator worker");
                            self.set_disconnected(Some(e.to_string()));
                            if !self.wait_for_reconnect().await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            }

            match self.connect_once(&worker).await {
                SessionOutcome::Fatal => {
                    self.should_reconnect.store(false, Ordering::SeqCst);
                    break;
                }
                SessionOutcome::Stopped => break,
                SessionOutcome::Reconnect => {
                    if !self.wait_for_reconnect().await {
                        break;
                    }
                }
            }
        }

        if let Some(w) = worker.lock().await.take() {
            w.stop().await;
        }
        let mut state = self.state.lock();
        state.connected = false;
        state.initialized = false;
    }

    async fn wait_for_reconnect(&self) -> bool {
        let interval = Duration::from_millis(self.connection_config.reconnect_interval_ms);
        {
            let mut state = self.state.lock();
            state.next_reconnect_at = Some(Utc::now() + chrono::Duration::milliseconds(interval.as_millis() as i64));
        }
        self.event_bus.emit(GatewayEvent::EndpointStatusChanged { endpoint: self.snapshot() });

        tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            _ = self.stop_notify.notified() => false,
        }
    }

    fn set_disconnected(&self, last_error: Option<String>) {
        let mut state = self.state.lock();
        state.connected = false;
        state.initialized = false;
        state.last_error = last_error;
        if self.should_reconnect.load(Ordering::SeqCst) {
            state.reconnect_attempt += 1;
        }
        drop(state);
        self.event_bus.emit(GatewayEvent::EndpointStatusChanged { endpoint: self.snapshot() });
    }

    async fn connect_once(&self, worker: &tokio::sync::Mutex<Option<WorkerProcess>>) -> SessionOutcome {
        let connect_result = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&self.url)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.set_disconnected(Some(e.to_string()));
                return SessionOutcome::Reconnect;
            }
            Err(_elapsed) => {
                self.set_disconnected(Some("connection attempt timed out".to_string()));
                return SessionOutcome::Reconnect;
            }
        };

        {
            let mut state = self.state.lock();
            state.connected = true;
            state.initialized = true;
            state.last_error = None;
            state.reconnect_attempt = 0;
            state.next_reconnect_at = None;
        }
        info!(url = %self.url, "endpoint connected");
        self.event_bus.emit(GatewayEvent::EndpointStatusChanged { endpoint: self.snapshot() });

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let mut worker_guard = worker.lock().await;
        let Some(worker_process) = worker_guard.as_mut() else {
            return SessionOutcome::Reconnect;
        };

        let heartbeat_interval = Duration::from_millis(self.connection_config.heartbeat_interval_ms);
        let heartbeat_timeout = Duration::from_millis(self.connection_config.heartbeat_timeout_ms);
        let mut heartbeat_tick = tokio::time::interval(heartbeat_interval);
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut awaiting_pong: Option<tokio::time::Instant> = None;

        loop {
            let timeout_fut = async {
                match awaiting_pong {
                    Some(sent_at) => tokio::time::sleep_until(sent_at + heartbeat_timeout).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.stop_notify.notified() => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    return SessionOutcome::Stopped;
                }

                _ = heartbeat_tick.tick(), if awaiting_pong.is_none() => {
                    if ws_sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        self.set_disconnected(Some("failed to send heartbeat ping".to_string()));
                        return SessionOutcome::Reconnect;
                    }
                    awaiting_pong = Some(tokio::time::Instant::now());
                }

                _ = timeout_fut => {
                    warn!(url = %self.url, "heartbeat timed out, closing connection");
                    let _ = ws_sink.send(Message::Close(None)).await;
                    self.set_disconnected(Some("heartbeat timeout".to_string()));
                    return SessionOutcome::Reconnect;
                }

                incoming = worker_process.incoming.recv() => {
                    match incoming {
                        Some(value) => {
                            let mut line = match serde_json::to_string(&value) {
                                Ok(s) => s,
                                Err(e) => {
                                    warn!(url = %self.url, error = %e, "failed to serialize worker message");
                                    continue;
                                }
                            };
                            line.push('\n');
                            if ws_sink.send(Message::Text(line.into())).await.is_err() {
                                self.set_disconnected(Some("failed to forward worker message upstream".to_string()));
                                return SessionOutcome::Reconnect;
                            }
                        }
                        None => {
                            warn!(url = %self.url, "aggregator worker stdout closed");
                            self.set_disconnected(Some("aggregator worker exited".to_string()));
                            return SessionOutcome::Reconnect;
                        }
                    }
                }

                frame = ws_stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.event_bus.emit(GatewayEvent::WsMessageReceived {
                                endpoint_url: self.url.clone(),
                                message: serde_json::from_str(&text).unwrap_or(Value::Null),
                            });
                            let mut line = text.to_string();
                            line.push('\n');
                            let write_result = async {
                                worker_process.stdin.write_all(line.as_bytes()).await?;
                                worker_process.stdin.flush().await
                            }
                            .await;
                            if write_result.is_err() {
                                self.set_disconnected(Some("failed to forward message to worker".to_string()));
                                return SessionOutcome::Reconnect;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = None;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code: u16 = frame.as_ref().map(|f| f.code.into()).unwrap_or(1000);
                            if code == FATAL_CLOSE_CODE {
                                warn!(url = %self.url, "endpoint closed with fatal code, will not reconnect");
                                self.set_disconnected(Some(format!("closed by server with fatal code {code}")));
                                return SessionOutcome::Fatal;
                            }
                            self.set_disconnected(Some(format!("closed by server with code {code}")));
                            return SessionOutcome::Reconnect;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.set_disconnected(Some(e.to_string()));
                            return SessionOutcome::Reconnect;
                        }
                        None => {
                            self.set_disconnected(Some("connection closed".to_string()));
                            return SessionOutcome::Reconnect;
                        }
                    }
                }
            }
        }
    }
}

enum SessionOutcome {
    /// Non-fatal disconnect; caller should wait out `reconnectIntervalMs`.
    Reconnect,
    /// Fatal close code observed — do not reconnect.
    Fatal,
    /// `stop()` was called.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn echo_worker() -> WorkerCommand {
        WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "cat".to_string()],
        }
    }

    async fn start_echo_ws_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        let (mut sink, mut stream) = ws.split();
                        while let Some(Ok(msg)) = stream.next().await {
                            if msg.is_text() && sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn connects_and_reports_connected_state() {
        let addr = start_echo_ws_server().await;
        let conn = EndpointConnection::new(
            format!("ws://{addr}"),
            ConnectionConfig {
                heartbeat_interval_ms: 60_000,
                heartbeat_timeout_ms: 60_000,
                reconnect_interval_ms: 100,
            },
            echo_worker(),
            EventBus::new(),
        );
        conn.start().await;

        let mut connected = false;
        for _ in 0..50 {
            if conn.is_connected() {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(connected);
        conn.stop().await;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_harmless_no_op() {
        let conn = EndpointConnection::new(
            "ws://127.0.0.1:1",
            ConnectionConfig::default(),
            echo_worker(),
            EventBus::new(),
        );
        conn.stop().await;
        assert!(!conn.is_connected());
    }
}
