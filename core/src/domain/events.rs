// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Trace Events
//!
//! A [`TraceEvent`] is a single journaled observation within a run. Event ids
//! are assigned by the journal and strictly increase within a run; events are
//! append-only and removed only when their run is cascade-deleted.
//!
//! Params/result/error payloads are kept as opaque [`serde_json::Value`]s —
//! the tool protocol is open-ended, so the journal never interprets them.
//! Parsing happens only at comparison/classification time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::chaos::ChaosApplied;
use crate::domain::run::RunId;

/// Closed set of journaled event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    RpcRequest,
    RpcResponse,
    ToolCall,
    ToolResult,
    StressMutation,
    ChatMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::RpcRequest => "rpc_request",
            Self::RpcResponse => "rpc_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::StressMutation => "stress_mutation",
            Self::ChatMessage => "chat_message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_start" => Some(Self::SessionStart),
            "session_end" => Some(Self::SessionEnd),
            "rpc_request" => Some(Self::RpcRequest),
            "rpc_response" => Some(Self::RpcResponse),
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "stress_mutation" => Some(Self::StressMutation),
            "chat_message" => Some(Self::ChatMessage),
            _ => None,
        }
    }
}

/// Payload for an event about to be appended; the journal assigns the id and
/// timestamp ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub kind: EventKind,
    /// JSON-RPC method, when the event observes a protocol message.
    pub method: Option<String>,
    /// Tool name, for `tool_call` / `tool_result` / `stress_mutation`.
    pub tool: Option<String>,
    /// Stringified correlation id of the underlying request, if any.
    pub correlation_id: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub latency_ms: Option<u64>,
    pub chaos_applied: Option<ChaosApplied>,
}

impl NewEvent {
    pub fn of_kind(kind: EventKind) -> Self {
        Self {
            kind,
            method: None,
            tool: None,
            correlation_id: None,
            params: None,
            result: None,
            error: None,
            latency_ms: None,
            chaos_applied: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosApplied) -> Self {
        self.chaos_applied = Some(chaos);
        self
    }
}

/// A journaled observation, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Journal-assigned id; strictly increasing within a run.
    pub id: i64,
    pub run_id: RunId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub method: Option<String>,
    pub tool: Option<String>,
    pub correlation_id: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub latency_ms: Option<u64>,
    pub chaos_applied: Option<ChaosApplied>,
}
