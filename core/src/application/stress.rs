// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Stress Runner
//!
//! Drives a one-shot tool-server subprocess through the initialize
//! handshake, tool enumeration, and the mutation matrix, classifying each
//! probe's outcome and journaling one `stress_mutation` event per probe.
//!
//! Probes are strictly sequential; a probe timeout never aborts the sweep.
//! The server is killed when the sweep ends, whatever the outcome.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::application::coordinator::Coordinator;
use crate::domain::events::{EventKind, NewEvent};
use crate::domain::mutation::{generate_mutations, Mutation};
use crate::domain::outcome::{classify_outcome, Outcome};
use crate::domain::project::AgentId;
use crate::domain::rpc::{self, PROTOCOL_VERSION, TOOLS_CALL_METHOD, TOOLS_LIST_METHOD};
use crate::domain::run::{RunCounters, RunId, RunStatus, StressCounters};
use crate::infrastructure::rpc_client::{RpcClient, RpcClientError};

/// Wall-clock deadline for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Settle time between `notifications/initialized` and `tools/list`, fixed
/// by convention with the downstream ecosystem.
const INITIALIZED_SETTLE: Duration = Duration::from_millis(100);

/// Outcome totals for one finished sweep.
#[derive(Debug, Clone, Copy)]
pub struct StressSweepReport {
    pub run_id: RunId,
    pub tools_probed: usize,
    pub counters: StressCounters,
}

pub struct StressRunner {
    coordinator: Coordinator,
    probe_timeout: Duration,
}

impl StressRunner {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Spawn the target, run the sweep, and kill the server. On spawn
    /// failure the run is marked `failed` and the error returned.
    pub async fn run(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        target: &str,
    ) -> Result<StressSweepReport> {
        let client = match RpcClient::spawn(target) {
            Ok(client) => client,
            Err(e) => {
                let _ = self
                    .coordinator
                    .update_run_status(run_id, RunStatus::Failed, None)
                    .await;
                return Err(e).with_context(|| format!("spawning stress target {target:?}"));
            }
        };

        let outcome = self.sweep_with_client(run_id, agent_id, &client).await;
        client.shutdown().await;
        outcome
    }

    /// Run the sweep over an already-connected client (tests drive this with
    /// duplex pipes).
    pub async fn sweep_with_client(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        client: &RpcClient,
    ) -> Result<StressSweepReport> {
        self.coordinator
            .update_run_status(run_id, RunStatus::Running, None)
            .await?;
        self.coordinator
            .record_event(run_id, agent_id, NewEvent::of_kind(EventKind::SessionStart))
            .await?;

        let tools = match self.enumerate_tools(client).await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = self
                    .coordinator
                    .update_run_status(run_id, RunStatus::Failed, None)
                    .await;
                return Err(e);
            }
        };

        info!(%run_id, tool_count = tools.len(), "stress sweep starting");

        let mut counters = StressCounters::default();
        let mut total_errors = 0u64;

        for (tool_name, schema) in &tools {
            for mutation in generate_mutations(schema) {
                let outcome = self
                    .probe(run_id, agent_id, client, tool_name, &mutation, &mut total_errors)
                    .await?;
                match outcome {
                    Outcome::Pass => counters.passed += 1,
                    Outcome::GracefulFail => counters.graceful += 1,
                    Outcome::CrashOrHang => counters.crashed += 1,
                }
            }
        }

        counters.score =
            StressCounters::compute_score(counters.passed, counters.graceful, counters.crashed);

        self.coordinator
            .record_event(
                run_id,
                agent_id,
                NewEvent::of_kind(EventKind::SessionEnd).with_params(json!({
                    "totalCalls": counters.total(),
                    "totalErrors": total_errors,
                    "passed": counters.passed,
                    "graceful": counters.graceful,
                    "crashed": counters.crashed,
                    "score": counters.score,
                })),
            )
            .await?;
        self.coordinator.update_stress_counters(run_id, counters).await?;
        self.coordinator
            .update_run_status(
                run_id,
                RunStatus::Completed,
                Some(RunCounters {
                    total_calls: counters.total(),
                    total_errors,
                }),
            )
            .await?;

        info!(%run_id, score = counters.score, "stress sweep finished");

        Ok(StressSweepReport {
            run_id,
            tools_probed: tools.len(),
            counters,
        })
    }

    /// Initialize handshake then tool enumeration. Only tools that declare
    /// an input schema are swept.
    async fn enumerate_tools(&self, client: &RpcClient) -> Result<Vec<(String, Value)>> {
        client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcptap",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
                self.probe_timeout,
            )
            .await
            .context("initialize request failed")?;

        client
            .notify("notifications/initialized", json!({}))
            .await
            .context("initialized notification failed")?;
        tokio::time::sleep(INITIALIZED_SETTLE).await;

        let listing = client
            .request(TOOLS_LIST_METHOD, json!({}), self.probe_timeout)
            .await
            .context("tools/list request failed")?;

        let tools = listing["result"]["tools"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str)?;
                let schema = tool.get("inputSchema")?;
                Some((name.to_string(), schema.clone()))
            })
            .collect())
    }

    /// Issue one `tools/call` probe and classify its outcome. Timeouts and
    /// transport failures are recorded, never propagated.
    async fn probe(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        client: &RpcClient,
        tool_name: &str,
        mutation: &Mutation,
        total_errors: &mut u64,
    ) -> Result<Outcome> {
        let started = Instant::now();
        let response = client
            .request(
                TOOLS_CALL_METHOD,
                json!({
                    "name": tool_name,
                    "arguments": mutation.arguments,
                }),
                self.probe_timeout,
            )
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (outcome, error_payload) = match &response {
            Ok(value) => {
                let error = value.get("error").filter(|e| !e.is_null()).cloned();
                let message = error.as_ref().and_then(|e| rpc::error_message(e));
                (classify_outcome(message.as_deref(), false), error)
            }
            Err(RpcClientError::Timeout { timeout_ms, .. }) => {
                warn!(%run_id, tool = tool_name, timeout_ms, "probe timed out");
                (
                    classify_outcome(None, true),
                    Some(json!({ "message": format!("probe timed out after {timeout_ms} ms") })),
                )
            }
            Err(e) => {
                warn!(%run_id, tool = tool_name, error = %e, "probe transport failure");
                (
                    Outcome::CrashOrHang,
                    Some(json!({ "message": e.to_string() })),
                )
            }
        };

        if error_payload.is_some() {
            *total_errors += 1;
        }

        let mut event = NewEvent::of_kind(EventKind::StressMutation)
            .with_tool(tool_name.to_string())
            .with_params(mutation.arguments.clone())
            .with_latency_ms(latency_ms)
            .with_result(json!({
                "mutation": mutation.kind.as_str(),
                "field": mutation.field,
                "description": mutation.description,
                "outcome": outcome.as_str(),
            }));
        if let Some(error) = error_payload {
            event = event.with_error(error);
        }
        self.coordinator.record_event(run_id, agent_id, event).await?;

        Ok(outcome)
    }
}
