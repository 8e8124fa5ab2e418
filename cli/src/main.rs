// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `mcp-gateway` — a multi-endpoint MCP aggregation gateway. Running with
//! no subcommand (or `serve`) starts the daemon in the foreground; `start`/
//! `stop`/`status` manage it as a background process. `--worker` is a
//! hidden mode used only by the gateway's own endpoint connections to
//! launch the local aggregator entry point (spec §4.6) — it is never meant
//! to be invoked directly by an operator.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

mod config;
mod daemon;

use daemon::{check_daemon_running, pid_file_path, stop_daemon, DaemonStatus};

/// Process exit codes (spec §6.5).
const EXIT_OK: u8 = 0;
const EXIT_FATAL_STARTUP: u8 = 1;
const EXIT_ENVIRONMENT: u8 = 2;

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(version, about = "Multi-endpoint MCP aggregation gateway", long_about = None)]
struct Cli {
    /// Internal: run as the per-endpoint worker subprocess. Not intended
    /// for direct use.
    #[arg(long, hide = true)]
    worker: bool,

    /// Path to the config document (overrides discovery).
    #[arg(short, long, global = true, env = "MCP_GATEWAY_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API host.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// HTTP API port.
    #[arg(long, global = true, default_value_t = 8642)]
    port: u16,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway in the foreground (default if no subcommand given).
    Serve,

    /// Start the gateway as a detached background process.
    Start,

    /// Stop a running background gateway.
    Stop {
        /// Escalate to SIGKILL if the process doesn't exit within the timeout.
        #[arg(long)]
        force: bool,

        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Report whether the gateway is running.
    Status,

    /// Write a starter config document to disk.
    Init {
        #[arg(short, long, default_value = "./mcp-gateway.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{}: {e}", "failed to initialize logging".red());
        return ExitCode::from(EXIT_FATAL_STARTUP);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}: {e:#}", "error".red().bold());
            ExitCode::from(EXIT_FATAL_STARTUP)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    // `cli.config` is already the explicit override, whether it came from
    // `--config` or the `MCP_GATEWAY_CONFIG_PATH` env var (clap's `env`
    // attribute merges both into this field before we ever see it).
    let explicit_config = cli.config.clone();
    let config_path = config::resolve_config_path(explicit_config.clone());

    if cli.worker {
        daemon::worker::run(config_path).await?;
        return Ok(EXIT_OK);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config_path, explicit_config, cli.host, cli.port).await,
        Commands::Start => start_detached(config_path, cli.host, cli.port).await,
        Commands::Stop { force, timeout_secs } => stop(config_path, force, timeout_secs).await,
        Commands::Status => status(config_path, cli.host, cli.port).await,
        Commands::Init { output } => init_config(output).await,
    }
}

async fn serve(config_path: PathBuf, explicit_config: Option<PathBuf>, host: String, port: u16) -> Result<u8> {
    if explicit_config.is_some() && !config_path.exists() {
        eprintln!(
            "{}",
            format!("config path {} does not exist", config_path.display()).red()
        );
        return Ok(EXIT_ENVIRONMENT);
    }

    info!(config = %config_path.display(), %host, port, "starting mcp-gateway");
    daemon::server::run_foreground(config_path, host, port)
        .await
        .context("gateway failed to start")?;
    Ok(EXIT_OK)
}

/// Re-exec this same binary detached from the controlling terminal, the
/// way a `daemon start` subcommand spawns its own `--daemon` child.
async fn start_detached(config_path: PathBuf, host: String, port: u16) -> Result<u8> {
    let pid_path = pid_file_path(&config_path);
    if let DaemonStatus::Running { pid, .. } = check_daemon_running(&host, port, &pid_path).await {
        println!("{}", format!("gateway already running (pid {pid})").yellow());
        return Ok(EXIT_OK);
    }

    let exe = std::env::current_exe().context("failed to resolve own executable path")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("serve")
        .arg("--config")
        .arg(&config_path)
        .arg("--host")
        .arg(&host)
        .arg("--port")
        .arg(port.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command.spawn().context("failed to spawn detached gateway process")?;
    println!("{}", "gateway starting in background".green());
    Ok(EXIT_OK)
}

async fn stop(config_path: PathBuf, force: bool, timeout_secs: u64) -> Result<u8> {
    let pid_path = pid_file_path(&config_path);
    stop_daemon(&pid_path, force, timeout_secs).await?;
    println!("{}", "gateway stopped".green());
    Ok(EXIT_OK)
}

async fn status(config_path: PathBuf, host: String, port: u16) -> Result<u8> {
    let pid_path = pid_file_path(&config_path);
    match check_daemon_running(&host, port, &pid_path).await {
        DaemonStatus::Running { pid, uptime_seconds } => {
            let uptime = uptime_seconds.map(format_duration).unwrap_or_else(|| "unknown".to_string());
            println!("{} (pid {pid}, uptime {uptime})", "running".green().bold());
        }
        DaemonStatus::Unhealthy { pid, error } => {
            println!("{} (pid {pid}): {error}", "unhealthy".yellow().bold());
        }
        DaemonStatus::Stopped => {
            println!("{}", "stopped".red().bold());
        }
    }
    Ok(EXIT_OK)
}

async fn init_config(output: PathBuf) -> Result<u8> {
    if output.exists() {
        eprintln!("{}", format!("{} already exists, not overwriting", output.display()).red());
        return Ok(EXIT_ENVIRONMENT);
    }
    let sample = include_str!("../templates/config-minimal.yaml");
    std::fs::write(&output, sample).with_context(|| format!("failed to write {}", output.display()))?;
    println!("{}", format!("wrote starter config to {}", output.display()).green());
    Ok(EXIT_OK)
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
