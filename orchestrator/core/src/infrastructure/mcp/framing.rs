// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Shared line-delimited JSON-RPC framing (spec §4.3). All three transports
//! reduce to "a byte stream that yields complete lines" — a subprocess's
//! stdout, an SSE `data:` stream, or a chunked HTTP body — so one reader
//! drives all of them: a standard buffered line reader accumulates partial
//! reads until `\n` and yields one parsed JSON value per complete line,
//! preserving the trailing partial line across reads.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pump complete, non-empty lines from `reader` as parsed JSON values onto
/// `tx` until the source closes or a send fails (receiver dropped). Lines
/// that fail to parse as JSON are logged and skipped rather than killing
/// the pump — a stray stderr-ish line must not take down the connection.
pub async fn pump_json_lines<R>(reader: R, tx: mpsc::Sender<serde_json::Value>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(trimmed) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, line = %trimmed, "skipping unparseable JSON-RPC line"),
                }
            }
            Ok(None) => {
                debug!("transport line stream closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "error reading transport line stream");
                return;
            }
        }
    }
}

/// Extract the JSON payload from one SSE block's lines (the `data:` field,
/// possibly split across multiple `data:` lines per the SSE spec, joined
/// with `\n`). Returns `None` for blocks carrying no `data:` field (e.g.
/// bare `:` comment/keepalive lines).
pub fn sse_block_to_json(block: &str) -> Option<serde_json::Value> {
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let joined = data_lines.join("\n");
    serde_json::from_str(&joined).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pumps_complete_lines_and_preserves_partial_across_reads() {
        let (tx, mut rx) = mpsc::channel(8);
        let input = b"{\"id\":1}\n{\"id\":2}\n" as &[u8];
        pump_json_lines(input, tx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first["id"], 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second["id"], 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn skips_unparseable_lines_without_stopping() {
        let (tx, mut rx) = mpsc::channel(8);
        let input = b"not json\n{\"id\":1}\n" as &[u8];
        pump_json_lines(input, tx).await;

        let value = rx.recv().await.unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn sse_block_joins_multiple_data_lines() {
        let block = "event: message\ndata: {\"id\":1,\ndata: \"ok\":true}\n";
        let value = sse_block_to_json(block).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn sse_block_without_data_is_none() {
        assert!(sse_block_to_json(": keepalive\n").is_none());
    }
}
