// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle: the `.pid` file format (spec §6.4), process probing,
//! and the start/stop/status plumbing the `mcp-gateway` CLI subcommands
//! drive. The HTTP/WebSocket surface itself lives in [`server`]; the
//! worker subprocess entry point lives in [`worker`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

pub mod server;
pub mod worker;

/// Contents of the `.pid` file persisted next to the config document (spec
/// §6.4: `{pid, startedAtMillis, mode}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFileInfo {
    pub pid: u32,
    pub started_at_millis: i64,
    pub mode: String,
}

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: u32, uptime_seconds: Option<u64> },
    Stopped,
    Unhealthy { pid: u32, error: String },
}

/// Path of the `.pid` file for a given config path: same directory, same
/// stem, `.pid` extension (spec §6.4: "a `.pid` file next to the config").
pub fn pid_file_path(config_path: &Path) -> PathBuf {
    let mut path = config_path.to_path_buf();
    path.set_extension("pid");
    path
}

pub fn write_pid_file(pid_path: &Path, mode: &str) -> Result<()> {
    let info = PidFileInfo {
        pid: std::process::id(),
        started_at_millis: chrono::Utc::now().timestamp_millis(),
        mode: mode.to_string(),
    };
    let json = serde_json::to_string_pretty(&info)?;
    std::fs::write(pid_path, json)
        .with_context(|| format!("failed to write pid file {pid_path:?}"))?;
    info!(path = ?pid_path, pid = info.pid, "wrote pid file");
    Ok(())
}

pub fn read_pid_file(pid_path: &Path) -> Option<PidFileInfo> {
    let content = std::fs::read_to_string(pid_path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn remove_pid_file(pid_path: &Path) -> Result<()> {
    if pid_path.exists() {
        std::fs::remove_file(pid_path)
            .with_context(|| format!("failed to remove pid file {pid_path:?}"))?;
        info!(path = ?pid_path, "removed pid file");
    }
    Ok(())
}

/// RAII guard that removes the `.pid` file on drop, so every early-return
/// path out of `run_foreground` still cleans up.
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file(&self.path);
    }
}

/// Check whether a daemon is running: HTTP health check first, falling
/// back to the `.pid` file's process liveness when the HTTP probe can't be
/// reached at all.
pub async fn check_daemon_running(host: &str, port: u16, pid_path: &Path) -> DaemonStatus {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
    {
        Ok(client) => client,
        Err(_) => return DaemonStatus::Stopped,
    };
    let health_url = format!("http://{host}:{port}/health");
    let local_pid = read_pid_file(pid_path).map(|info| info.pid);

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["uptimeSeconds"].as_u64());
            DaemonStatus::Running { pid: local_pid.unwrap_or(0), uptime_seconds: uptime }
        }
        Ok(resp) => DaemonStatus::Unhealthy {
            pid: local_pid.unwrap_or(0),
            error: format!("HTTP {}", resp.status()),
        },
        Err(e) => match local_pid {
            Some(pid) if process_exists(pid) => {
                DaemonStatus::Unhealthy { pid, error: e.to_string() }
            }
            Some(_) => {
                let _ = remove_pid_file(pid_path);
                DaemonStatus::Stopped
            }
            None => DaemonStatus::Stopped,
        },
    }
}

/// Send SIGTERM, poll for exit, escalate to SIGKILL after `timeout_secs`.
pub async fn stop_daemon(pid_path: &Path, force: bool, timeout_secs: u64) -> Result<()> {
    let info = read_pid_file(pid_path).context("no pid file found — is the daemon running?")?;
    let pid = info.pid;

    info!(pid, "sending SIGTERM");
    send_signal(pid, Signal::Term)?;

    for _ in 0..timeout_secs {
        if !process_exists(pid) {
            info!(pid, "daemon stopped gracefully");
            let _ = remove_pid_file(pid_path);
            return Ok(());
        }
        sleep(Duration::from_secs(1)).await;
    }

    if force {
        warn!(pid, "graceful shutdown timed out, sending SIGKILL");
        send_signal(pid, Signal::Kill)?;
        sleep(Duration::from_secs(1)).await;
        let _ = remove_pid_file(pid_path);
        Ok(())
    } else {
        anyhow::bail!("daemon did not stop within {timeout_secs}s")
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let raw = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        if libc::kill(pid as i32, raw) != 0 {
            anyhow::bail!("failed to signal process {pid}");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> Result<()> {
    anyhow::bail!("stopping a daemon by pid is only supported on unix")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_path_swaps_extension() {
        let config = PathBuf::from("/etc/mcp-gateway/config.yaml");
        assert_eq!(pid_file_path(&config), PathBuf::from("/etc/mcp-gateway/config.pid"));
    }

    #[test]
    fn write_then_read_pid_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.pid");
        write_pid_file(&path, "serve").unwrap();
        let info = read_pid_file(&path).unwrap();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.mode, "serve");
        remove_pid_file(&path).unwrap();
        assert!(!path.exists());
    }
}
