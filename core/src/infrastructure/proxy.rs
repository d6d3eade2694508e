// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Stdio Proxy Engine
//!
//! Bridges two line-delimited JSON-RPC channels — the host's standard
//! streams on the client side and a spawned tool-server subprocess on the
//! server side — journaling every protocol message and applying chaos at the
//! boundary.
//!
//! One correlator task owns the pending-request table, the chaos engine, and
//! both write halves; per-direction reader tasks feed it over bounded
//! queues. That single task performs every journal write, which is what
//! guarantees monotonic event ids and journal-before-forward ordering.
//!
//! The pump is generic over `AsyncRead`/`AsyncWrite` so tests can drive a
//! session with in-memory duplex pipes instead of a real subprocess.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, AsyncBufReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::chaos::{ChaosApplied, ChaosConfig, ChaosEngine};
use crate::domain::command::split_command;
use crate::domain::events::{EventKind, NewEvent};
use crate::domain::project::AgentId;
use crate::domain::repository::{Journal, JournalError};
use crate::domain::rpc::{self, RpcFrame, RpcMessage};
use crate::domain::run::{RunCounters, RunId, RunStatus};
use crate::infrastructure::event_bus::{BusMessage, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to spawn {command:?}: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("target command is empty")]
    EmptyCommand,

    #[error("journal write failed: {0}")]
    Journal(#[from] JournalError),

    #[error("peer write failed: {0}")]
    PeerWrite(std::io::Error),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ClientEof,
    ServerEof,
    Shutdown,
}

/// Counters accumulated over one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub counters: RunCounters,
    pub reason: EndReason,
}

/// Running proxy session. Dropping the trigger (or the whole handle) asks
/// the session to stop; the end-of-run sequence still runs.
#[derive(Debug)]
pub struct ProxyHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<SessionSummary, ProxyError>>,
}

impl ProxyHandle {
    /// Detach the shutdown trigger, e.g. to fire it from a signal handler.
    pub fn take_shutdown_trigger(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Request an orderly stop and wait for the end-of-run sequence.
    pub async fn shutdown(mut self) -> Result<SessionSummary, ProxyError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for the session to end (peer EOF or a fired trigger).
    pub async fn join(self) -> Result<SessionSummary, ProxyError> {
        self.task.await.unwrap_or(Err(ProxyError::PeerWrite(
            std::io::Error::new(std::io::ErrorKind::Other, "proxy task panicked"),
        )))
    }
}

/// Stdio proxy engine. Handles are injected; the proxy owns no globals.
pub struct StdioProxy {
    journal: Arc<dyn Journal>,
    bus: EventBus,
}

/// In-flight request state, keyed by stringified id. A second request with
/// the same id evicts the first; the evicted call is lost, not retried.
struct Pending {
    started: Instant,
    tool: Option<String>,
    chaos: Option<ChaosApplied>,
}

enum Inbound {
    FromClient(String),
    FromServer(String),
    ClientClosed,
    ServerClosed,
}

impl StdioProxy {
    pub fn new(journal: Arc<dyn Journal>, bus: EventBus) -> Self {
        Self { journal, bus }
    }

    /// Spawn the target command and run a proxy session between the host's
    /// standard streams and the child's. On spawn failure the run is marked
    /// `failed` before the error is returned.
    pub async fn start(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        target: &str,
        chaos: Option<ChaosConfig>,
    ) -> Result<ProxyHandle, ProxyError> {
        let tokens = split_command(target);
        let (program, args) = match tokens.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => {
                self.mark_failed(run_id).await;
                return Err(ProxyError::EmptyCommand);
            }
        };

        let mut child = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.mark_failed(run_id).await;
                return Err(ProxyError::SpawnFailed {
                    command: target.to_string(),
                    source,
                });
            }
        };

        info!(%run_id, target, "tool server spawned");

        let server_in = child.stdout.take().ok_or_else(|| ProxyError::SpawnFailed {
            command: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout missing"),
        })?;
        let server_out = child.stdin.take().ok_or_else(|| ProxyError::SpawnFailed {
            command: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin missing"),
        })?;

        let ProxyHandle { shutdown_tx, task } = self.spawn_session(
            run_id,
            agent_id,
            chaos,
            tokio::io::stdin(),
            tokio::io::stdout(),
            server_in,
            server_out,
        );

        // Whatever ends the session (client EOF, server exit, shutdown,
        // failure) must also take the tool server down with it.
        let task = tokio::spawn(async move {
            let result = task.await.unwrap_or(Err(ProxyError::PeerWrite(
                std::io::Error::new(std::io::ErrorKind::Other, "proxy task panicked"),
            )));
            let _ = child.kill().await;
            result
        });

        Ok(ProxyHandle { shutdown_tx, task })
    }

    /// Run a session over caller-supplied channels. Used by `start` with the
    /// real stdio + subprocess pipes, and by tests with duplex pipes.
    pub fn spawn_session<CI, CO, SI, SO>(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        chaos: Option<ChaosConfig>,
        client_in: CI,
        client_out: CO,
        server_in: SI,
        server_out: SO,
    ) -> ProxyHandle
    where
        CI: AsyncRead + Unpin + Send + 'static,
        CO: AsyncWrite + Unpin + Send + 'static,
        SI: AsyncRead + Unpin + Send + 'static,
        SO: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Session {
            journal: Arc::clone(&self.journal),
            bus: self.bus.clone(),
            run_id,
            agent_id,
            chaos: chaos.map(ChaosEngine::new),
            pending: HashMap::new(),
            counters: RunCounters::default(),
        };
        let task = tokio::spawn(session.run(client_in, client_out, server_in, server_out, shutdown_rx));
        ProxyHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn mark_failed(&self, run_id: RunId) {
        match self
            .journal
            .update_run_status(run_id, RunStatus::Failed, None)
            .await
        {
            Ok(run) => self.bus.publish(BusMessage::RunUpdated { run }),
            Err(e) => warn!(%run_id, error = %e, "failed to mark run failed"),
        }
    }
}

struct Session {
    journal: Arc<dyn Journal>,
    bus: EventBus,
    run_id: RunId,
    agent_id: Option<AgentId>,
    chaos: Option<ChaosEngine>,
    pending: HashMap<String, Pending>,
    counters: RunCounters,
}

impl Session {
    async fn run<CI, CO, SI, SO>(
        mut self,
        client_in: CI,
        mut client_out: CO,
        server_in: SI,
        mut server_out: SO,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<SessionSummary, ProxyError>
    where
        CI: AsyncRead + Unpin + Send + 'static,
        CO: AsyncWrite + Unpin + Send + 'static,
        SI: AsyncRead + Unpin + Send + 'static,
        SO: AsyncWrite + Unpin + Send + 'static,
    {
        self.transition(RunStatus::Running).await?;
        self.record(NewEvent::of_kind(EventKind::SessionStart))
            .await?;

        let (tx, mut rx) = mpsc::channel::<Inbound>(64);
        let client_reader =
            spawn_reader(client_in, tx.clone(), Inbound::FromClient, Inbound::ClientClosed);
        let server_reader =
            spawn_reader(server_in, tx, Inbound::FromServer, Inbound::ServerClosed);

        let outcome: Result<EndReason, ProxyError> = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break Ok(EndReason::Shutdown),
                inbound = rx.recv() => match inbound {
                    None => break Ok(EndReason::ServerEof),
                    Some(Inbound::ClientClosed) => break Ok(EndReason::ClientEof),
                    Some(Inbound::ServerClosed) => break Ok(EndReason::ServerEof),
                    Some(Inbound::FromClient(line)) => {
                        if let Err(e) = self.handle_client_line(&line, &mut server_out).await {
                            break Err(e);
                        }
                    }
                    Some(Inbound::FromServer(line)) => {
                        if let Err(e) = self.handle_server_line(&line, &mut client_out).await {
                            break Err(e);
                        }
                    }
                },
            }
        };

        client_reader.abort();
        server_reader.abort();

        match outcome {
            Ok(reason) => {
                self.finish(RunStatus::Completed).await?;
                Ok(SessionSummary {
                    counters: self.counters,
                    reason,
                })
            }
            Err(e) => {
                // Best effort: the journal itself may be the failure.
                let _ = self.finish(RunStatus::Failed).await;
                Err(e)
            }
        }
    }

    async fn handle_client_line<SO>(
        &mut self,
        line: &str,
        server_out: &mut SO,
    ) -> Result<(), ProxyError>
    where
        SO: AsyncWrite + Unpin,
    {
        match rpc::parse_line(line) {
            RpcFrame::Passthrough(raw) => {
                // Not JSON: forwarded verbatim, never journaled.
                debug!(run_id = %self.run_id, "passthrough line from client");
                write_line(server_out, &raw).await?;
            }
            RpcFrame::Message(message) => {
                let forwarded = self.process_request(&message).await?;
                write_line(server_out, &forwarded).await?;
            }
        }
        Ok(())
    }

    async fn handle_server_line<CO>(
        &mut self,
        line: &str,
        client_out: &mut CO,
    ) -> Result<(), ProxyError>
    where
        CO: AsyncWrite + Unpin,
    {
        match rpc::parse_line(line) {
            RpcFrame::Passthrough(raw) => {
                debug!(run_id = %self.run_id, "passthrough line from server");
                write_line(client_out, &raw).await?;
            }
            RpcFrame::Message(RpcMessage::Response { id, result, error, raw }) => {
                let forwarded = self
                    .process_response(id.as_deref(), result, error, raw)
                    .await?;
                write_line(client_out, &forwarded).await?;
            }
            RpcFrame::Message(message) => {
                // Server-originated request or notification: journaled as an
                // rpc_request observation and forwarded untouched.
                let (method, params, correlation_id) = match &message {
                    RpcMessage::Request { id, method, params, .. } => {
                        (method.clone(), params.clone(), Some(id.clone()))
                    }
                    RpcMessage::Notification { method, params, .. } => {
                        (method.clone(), params.clone(), None)
                    }
                    RpcMessage::Response { .. } => unreachable!(),
                };
                let mut event = NewEvent::of_kind(EventKind::RpcRequest).with_method(method);
                if let Some(params) = params {
                    event = event.with_params(params);
                }
                if let Some(id) = correlation_id {
                    event = event.with_correlation_id(id);
                }
                self.record(event).await?;
                let line = serde_json::to_string(message.raw())
                    .map_err(|e| ProxyError::Journal(JournalError::from(e)))?;
                write_line(client_out, &line).await?;
            }
        }
        Ok(())
    }

    /// Journal a client request (plus `tool_call` for `tools/call`), decide
    /// chaos, and return the line to forward downstream.
    async fn process_request(&mut self, message: &RpcMessage) -> Result<String, ProxyError> {
        let started = Instant::now();

        match message {
            RpcMessage::Request { id, method, params, raw } => {
                let tool = message.tool_name().map(str::to_string);

                let chaos_applied = match (&mut self.chaos, &tool) {
                    (Some(engine), Some(tool_name)) => Some(engine.apply(tool_name)),
                    _ => None,
                };

                let mut event = NewEvent::of_kind(EventKind::RpcRequest)
                    .with_method(method.clone())
                    .with_correlation_id(id.clone());
                if let Some(params) = params.clone() {
                    event = event.with_params(params);
                }
                if let Some(tool_name) = &tool {
                    event = event.with_tool(tool_name.clone());
                }
                self.record(event).await?;

                if let Some(tool_name) = &tool {
                    self.counters.total_calls += 1;
                    let arguments = params
                        .as_ref()
                        .and_then(|p| p.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.record(
                        NewEvent::of_kind(EventKind::ToolCall)
                            .with_tool(tool_name.clone())
                            .with_correlation_id(id.clone())
                            .with_params(arguments),
                    )
                    .await?;
                }

                if let Some(previous) = self.pending.insert(
                    id.clone(),
                    Pending {
                        started,
                        tool,
                        chaos: chaos_applied,
                    },
                ) {
                    // Duplicate in-flight id: the earlier call is lost.
                    warn!(run_id = %self.run_id, id = %id, tool = ?previous.tool, "evicted in-flight request with duplicate id");
                }

                if let Some(applied) = chaos_applied {
                    if let Some(delay) = applied.delay_ms {
                        debug!(run_id = %self.run_id, delay_ms = delay, "chaos delay before forward");
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }

                serde_json::to_string(raw).map_err(|e| ProxyError::Journal(JournalError::from(e)))
            }
            RpcMessage::Notification { method, params, raw } => {
                let mut event = NewEvent::of_kind(EventKind::RpcRequest).with_method(method.clone());
                if let Some(params) = params.clone() {
                    event = event.with_params(params);
                }
                self.record(event).await?;
                serde_json::to_string(raw).map_err(|e| ProxyError::Journal(JournalError::from(e)))
            }
            RpcMessage::Response { id, result, error, raw } => {
                // A response on the client channel answers a server-initiated
                // request; journal without latency and forward.
                let mut event = NewEvent::of_kind(EventKind::RpcResponse);
                if let Some(id) = id {
                    event = event.with_correlation_id(id.clone());
                }
                if let Some(result) = result.clone() {
                    event = event.with_result(result);
                }
                if let Some(error) = error.clone() {
                    event = event.with_error(error);
                }
                self.record(event).await?;
                serde_json::to_string(raw).map_err(|e| ProxyError::Journal(JournalError::from(e)))
            }
        }
    }

    /// Match a server response to its in-flight request, apply chaos to the
    /// forwarded payload, journal, and return the line for the client.
    async fn process_response(
        &mut self,
        id: Option<&str>,
        result: Option<Value>,
        error: Option<Value>,
        raw: Value,
    ) -> Result<String, ProxyError> {
        let pending = id.and_then(|key| self.pending.remove(key));
        let latency_ms = pending
            .as_ref()
            .map(|p| p.started.elapsed().as_millis() as u64);
        let chaos_applied = pending.as_ref().and_then(|p| p.chaos);
        let tool = pending.as_ref().and_then(|p| p.tool.clone());

        if pending.is_none() {
            if let Some(id) = id {
                debug!(run_id = %self.run_id, id, "response for unknown correlation id");
            }
        }

        // Chaos rewrites happen before journaling so the journal records
        // exactly what the client will see.
        let (forward_value, result, error) = match chaos_applied {
            Some(applied) if applied.error_injected => {
                let injected = json!({
                    "code": -32603,
                    "message": "Injected error (chaos)"
                });
                let mut obj = Map::new();
                obj.insert("jsonrpc".to_string(), json!("2.0"));
                if let Some(id_value) = raw.get("id") {
                    obj.insert("id".to_string(), id_value.clone());
                }
                obj.insert("error".to_string(), injected.clone());
                (Value::Object(obj), None, Some(injected))
            }
            Some(applied) if applied.corrupted => {
                let original = result.unwrap_or(Value::Null);
                let mut corrupted = original.as_object().cloned().unwrap_or_default();
                let original_keys: Vec<String> = corrupted.keys().cloned().collect();
                corrupted.insert("_corrupted".to_string(), json!(true));
                corrupted.insert("_originalKeys".to_string(), json!(original_keys));
                let corrupted = Value::Object(corrupted);

                let mut envelope = raw.as_object().cloned().unwrap_or_default();
                envelope.insert("result".to_string(), corrupted.clone());
                (Value::Object(envelope), Some(corrupted), error)
            }
            _ => (raw, result, error),
        };

        if error.is_some() {
            self.counters.total_errors += 1;
        }

        let mut event = NewEvent::of_kind(EventKind::RpcResponse);
        if let Some(id) = id {
            event = event.with_correlation_id(id.to_string());
        }
        if let Some(result) = result.clone() {
            event = event.with_result(result);
        }
        if let Some(error) = error.clone() {
            event = event.with_error(error);
        }
        if let Some(latency) = latency_ms {
            event = event.with_latency_ms(latency);
        }
        if let Some(applied) = chaos_applied {
            event = event.with_chaos(applied);
        }
        self.record(event).await?;

        if let Some(tool_name) = tool {
            let mut event = NewEvent::of_kind(EventKind::ToolResult).with_tool(tool_name);
            if let Some(id) = id {
                event = event.with_correlation_id(id.to_string());
            }
            if let Some(result) = result {
                event = event.with_result(result);
            }
            if let Some(error) = error {
                event = event.with_error(error);
            }
            if let Some(latency) = latency_ms {
                event = event.with_latency_ms(latency);
            }
            self.record(event).await?;
        }

        serde_json::to_string(&forward_value).map_err(|e| ProxyError::Journal(JournalError::from(e)))
    }

    /// Journal first, then broadcast. A journal failure here is fatal to the
    /// run.
    async fn record(&self, event: NewEvent) -> Result<(), ProxyError> {
        let stored = self.journal.insert_event(self.run_id, event).await?;
        self.bus.publish(BusMessage::Event {
            agent_id: self.agent_id,
            event: stored,
        });
        Ok(())
    }

    async fn transition(&self, status: RunStatus) -> Result<(), ProxyError> {
        let run = self
            .journal
            .update_run_status(self.run_id, status, None)
            .await?;
        self.bus.publish(BusMessage::RunUpdated { run });
        Ok(())
    }

    async fn finish(&self, status: RunStatus) -> Result<(), ProxyError> {
        self.record(
            NewEvent::of_kind(EventKind::SessionEnd).with_params(json!({
                "totalCalls": self.counters.total_calls,
                "totalErrors": self.counters.total_errors,
            })),
        )
        .await?;
        let run = self
            .journal
            .update_run_status(self.run_id, status, Some(self.counters))
            .await?;
        self.bus.publish(BusMessage::RunUpdated { run });
        Ok(())
    }
}

fn spawn_reader<R>(
    reader: R,
    tx: mpsc::Sender<Inbound>,
    wrap: fn(String) -> Inbound,
    closed: Inbound,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).await.is_err() {
                        return;
                    }
                }
                // EOF and read errors both mean the peer is gone.
                Ok(None) | Err(_) => break,
            }
        }
        let _ = tx.send(closed).await;
    })
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(ProxyError::PeerWrite)?;
    writer.write_all(b"\n").await.map_err(ProxyError::PeerWrite)?;
    writer.flush().await.map_err(ProxyError::PeerWrite)?;
    Ok(())
}
