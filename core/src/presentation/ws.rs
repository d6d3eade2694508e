// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Websocket Subscription Transport
//!
//! Accepts `{"type": "subscribe"|"unsubscribe", "runId"|"agentId"|"global":
//! ...}` frames and streams matching fan-out messages as JSON text frames.
//! Delivery is at-most-once; after a reconnect the client re-subscribes and
//! re-fetches history over the HTTP API. A connection that falls behind the
//! bus capacity receives a `lagged` notice with the dropped count.

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::project::AgentId;
use crate::domain::run::RunId;
use crate::infrastructure::event_bus::{BusError, Topic};
use crate::presentation::api::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionFrame {
    #[serde(rename = "type")]
    action: String,
    run_id: Option<String>,
    agent_id: Option<String>,
    #[serde(default)]
    global: bool,
}

impl SubscriptionFrame {
    fn topic(&self) -> Option<Topic> {
        if self.global {
            return Some(Topic::Global);
        }
        if let Some(raw) = &self.run_id {
            return Uuid::parse_str(raw).ok().map(|id| Topic::Run(RunId(id)));
        }
        if let Some(raw) = &self.agent_id {
            return Uuid::parse_str(raw).ok().map(|id| Topic::Agent(AgentId(id)));
        }
        None
    }
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One connection: the subscription frame stream mutates a local topic set;
/// every bus message is filtered against it at delivery time.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let bus = state.coordinator.bus();
    let (mut sender, mut frames) = socket.split();
    let mut topics: Vec<Topic> = Vec::new();
    let mut receiver = bus.subscribe(Topic::Global);

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        if handle_frame(frame, &mut topics, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            message = receiver.recv() => {
                let text = match message {
                    Ok(message) => {
                        if !topics.iter().any(|t| message.matches(t)) {
                            continue;
                        }
                        match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(_) => continue,
                        }
                    }
                    Err(BusError::Lagged(n)) => json!({ "lagged": n }).to_string(),
                    Err(BusError::Closed) => break,
                };
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Apply one inbound frame to the connection's topic set. `Err` means the
/// peer is gone.
async fn handle_frame(
    frame: WsMessage,
    topics: &mut Vec<Topic>,
    sender: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<(), ()> {
    let text = match frame {
        WsMessage::Text(text) => text,
        WsMessage::Close(_) => return Err(()),
        // Pings are answered by axum; binary frames are ignored.
        _ => return Ok(()),
    };

    let parsed: SubscriptionFrame = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            let notice = json!({ "error": format!("bad frame: {e}") });
            return sender
                .send(WsMessage::Text(notice.to_string()))
                .await
                .map_err(|_| ());
        }
    };
    let Some(topic) = parsed.topic() else {
        let notice = json!({ "error": "frame names no topic" });
        return sender
            .send(WsMessage::Text(notice.to_string()))
            .await
            .map_err(|_| ());
    };

    match parsed.action.as_str() {
        "subscribe" => {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        "unsubscribe" => topics.retain(|t| *t != topic),
        other => debug!(action = other, "unknown subscription action"),
    }
    Ok(())
}
