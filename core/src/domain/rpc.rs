// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Tool-Protocol Message Model
//!
//! Line-delimited JSON-RPC 2.0 as spoken between an AI client and a tool
//! server. Framing rules: a line that does not parse as a JSON object is
//! passed through verbatim and never journaled; a parsed object with a
//! `method` is a request (id present) or notification (id absent); an object
//! without `method` is a response.

use serde_json::Value;

/// Protocol version sent in the stress runner's `initialize` request. Fixed
/// by convention with the downstream ecosystem.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method name that carries tool invocations.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Method name that enumerates tools.
pub const TOOLS_LIST_METHOD: &str = "tools/list";

/// Classification of one received line.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcFrame {
    /// Parsed JSON-RPC object.
    Message(RpcMessage),
    /// Bytes that are not a JSON object; forwarded verbatim, not journaled.
    Passthrough(String),
}

/// A parsed JSON-RPC 2.0 object.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        /// Correlation id, stringified so numeric and string ids share a key
        /// space.
        id: String,
        method: String,
        params: Option<Value>,
        raw: Value,
    },
    Notification {
        method: String,
        params: Option<Value>,
        raw: Value,
    },
    Response {
        id: Option<String>,
        result: Option<Value>,
        error: Option<Value>,
        raw: Value,
    },
}

impl RpcMessage {
    pub fn raw(&self) -> &Value {
        match self {
            Self::Request { raw, .. } | Self::Notification { raw, .. } | Self::Response { raw, .. } => raw,
        }
    }

    /// Tool name from `params.name`, for `tools/call` requests.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Request { method, params, .. } if method == TOOLS_CALL_METHOD => params
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Stringify a JSON-RPC id so numeric `1` and string `"1"` correlate the
/// same way the wire peer sees them.
pub fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classify one received line per the framing rules.
pub fn parse_line(line: &str) -> RpcFrame {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return RpcFrame::Passthrough(line.to_string()),
    };
    if !value.is_object() {
        return RpcFrame::Passthrough(line.to_string());
    }

    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let id = value.get("id").and_then(id_key);
    let params = value.get("params").cloned();

    let message = match (method, id) {
        (Some(method), Some(id)) => RpcMessage::Request {
            id,
            method,
            params,
            raw: value,
        },
        (Some(method), None) => RpcMessage::Notification {
            method,
            params,
            raw: value,
        },
        (None, id) => {
            let result = value.get("result").cloned();
            let error = value.get("error").cloned();
            RpcMessage::Response {
                id,
                result,
                error,
                raw: value,
            }
        }
    };
    RpcFrame::Message(message)
}

/// Extract a human-readable message from a JSON-RPC error payload.
pub fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(error.to_string())),
        _ => Some(error.to_string()),
    }
}
