// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Correlation-Table RPC Client
//!
//! Line-delimited JSON-RPC client used by the stress runner to drive a
//! one-shot tool-server subprocess. Outgoing requests are tagged with a
//! monotonically increasing id and registered in a correlation table of
//! `{id -> completion slot}`; a single reader task fulfills slots as
//! responses arrive, and callers block on their slot with a deadline. The
//! protocol loop is thereby decoupled from the number of pending calls.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::command::split_command;
use crate::domain::rpc::{self, RpcFrame, RpcMessage};

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("failed to spawn {command:?}: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("target command is empty")]
    EmptyCommand,

    #[error("request {id} timed out after {timeout_ms} ms")]
    Timeout { id: i64, timeout_ms: u64 },

    #[error("connection closed before response to request {id}")]
    Closed { id: i64 },

    #[error("write failed: {0}")]
    Write(std::io::Error),
}

struct CorrelationTable {
    slots: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
}

impl CorrelationTable {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, id: i64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(id, tx);
        }
        rx
    }

    fn fulfill(&self, id: i64, value: Value) {
        let slot = match self.slots.lock() {
            Ok(mut slots) => slots.remove(&id),
            Err(_) => None,
        };
        if let Some(tx) = slot {
            let _ = tx.send(value);
        }
    }

    fn forget(&self, id: i64) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(&id);
        }
    }
}

/// JSON-RPC client over a pair of byte streams.
pub struct RpcClient {
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    table: Arc<CorrelationTable>,
    next_id: AtomicI64,
    reader_task: JoinHandle<()>,
    child: Option<Child>,
}

impl RpcClient {
    /// Spawn `target` and speak JSON-RPC over its standard streams.
    pub fn spawn(target: &str) -> Result<Self, RpcClientError> {
        let tokens = split_command(target);
        let (program, args) = tokens
            .split_first()
            .ok_or(RpcClientError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RpcClientError::SpawnFailed {
                command: target.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| RpcClientError::SpawnFailed {
            command: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout missing"),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| RpcClientError::SpawnFailed {
            command: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin missing"),
        })?;

        let mut client = Self::over_streams(stdout, stdin);
        client.child = Some(child);
        Ok(client)
    }

    /// Build a client over arbitrary streams (tests use duplex pipes).
    pub fn over_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let table = Arc::new(CorrelationTable::new());
        let reader_table = Arc::clone(&table);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let RpcFrame::Message(RpcMessage::Response { id: Some(id), raw, .. }) =
                    rpc::parse_line(&line)
                {
                    if let Ok(id) = id.parse::<i64>() {
                        reader_table.fulfill(id, raw);
                    }
                } else {
                    debug!("ignoring non-response line from stress target");
                }
            }
        });

        Self {
            writer: AsyncMutex::new(Box::new(writer)),
            table,
            next_id: AtomicI64::new(1),
            reader_task,
            child: None,
        }
    }

    /// Issue a request and block on its completion slot until `timeout`.
    ///
    /// On timeout the slot is forgotten; a late response is discarded by the
    /// reader. Returns the full response object.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = self.table.register(id);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_line(&message).await.map_err(|e| {
            self.table.forget(id);
            e
        })?;

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RpcClientError::Closed { id }),
            Err(_) => {
                self.table.forget(id);
                Err(RpcClientError::Timeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcClientError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&message).await
    }

    async fn write_line(&self, message: &Value) -> Result<(), RpcClientError> {
        let line = message.to_string();
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(RpcClientError::Write)?;
        writer.write_all(b"\n").await.map_err(RpcClientError::Write)?;
        writer.flush().await.map_err(RpcClientError::Write)?;
        Ok(())
    }

    /// Kill the subprocess (if any) and stop the reader.
    pub async fn shutdown(mut self) {
        self.reader_task.abort();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; the reader must not outlive us.
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn request_is_fulfilled_by_matching_response() {
        let (client_side, server_side) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (client_read, client_write) = tokio::io::split(client_side);

        // Echo server: answers every request with {"ok": true}.
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut out = server_write;
            while let Ok(Some(line)) = lines.next_line().await {
                let value: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": value["id"],
                    "result": { "ok": true },
                });
                out.write_all(reply.to_string().as_bytes()).await.unwrap();
                out.write_all(b"\n").await.unwrap();
            }
        });

        let client = RpcClient::over_streams(client_read, client_write);
        let response = client
            .request("tools/list", json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response["result"]["ok"], json!(true));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client_side, _server_side) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let client = RpcClient::over_streams(client_read, client_write);

        let err = client
            .request("tools/call", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcClientError::Timeout { .. }));
    }
}
