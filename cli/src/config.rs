// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Config-path discovery for the CLI binary. Resolving *how* to find the
//! config document is platform glue (spec §1 scopes config-file-parsing
//! beyond the §3 schema out of the core); the schema and validation rules
//! themselves live in `mcp_gateway_core::domain::config`.

use std::path::PathBuf;

/// Env var carrying an explicit config path override, checked ahead of the
/// discovery chain below.
pub const CONFIG_PATH_ENV: &str = "MCP_GATEWAY_CONFIG_PATH";

/// Resolve the config document path: an explicit `--config` flag first,
/// then `MCP_GATEWAY_CONFIG_PATH`, then `./mcp-gateway.yaml`, then
/// `~/.mcp-gateway/config.yaml`. The last candidate is returned even if it
/// doesn't exist yet — `ConfigStore::load` treats a missing file as an
/// empty, already-valid document.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let cwd_candidate = PathBuf::from("./mcp-gateway.yaml");
    if cwd_candidate.exists() {
        return cwd_candidate;
    }
    if let Some(home) = dirs_home() {
        return home.join(".mcp-gateway").join("config.yaml");
    }
    cwd_candidate
}

/// Minimal `$HOME` lookup — the gateway doesn't otherwise depend on the
/// `dirs` crate for a single lookup used only as a last-resort default.
fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_everything() {
        let resolved = resolve_config_path(Some(PathBuf::from("/tmp/explicit.yaml")));
        assert_eq!(resolved, PathBuf::from("/tmp/explicit.yaml"));
    }
}
