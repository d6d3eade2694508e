// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fan-Out Bus
//!
//! In-process topic hub delivering journaled events and run-state
//! transitions to live subscribers. Topics: `run/<id>`, `agent/<id>`,
//! `global`. Delivery is at-most-once with no persistent replay; a
//! reconnecting client re-subscribes and re-fetches history from the
//! journal.
//!
//! Backpressure policy: the bus rides a bounded `tokio::sync::broadcast`
//! channel, so a subscriber that falls more than the channel capacity behind
//! loses the oldest messages and observes [`BusError::Lagged`] with the
//! dropped count. Slow subscribers never block writers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::TraceEvent;
use crate::domain::project::AgentId;
use crate::domain::run::{Run, RunId};

/// Subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Run(RunId),
    Agent(AgentId),
    Global,
}

/// One fan-out message. Every journal write and run transition becomes
/// exactly one of these, broadcast after the underlying write committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    Event {
        agent_id: Option<AgentId>,
        event: TraceEvent,
    },
    RunCreated {
        run: Run,
    },
    RunUpdated {
        run: Run,
    },
}

impl BusMessage {
    fn run_id(&self) -> RunId {
        match self {
            Self::Event { event, .. } => event.run_id,
            Self::RunCreated { run } | Self::RunUpdated { run } => run.id,
        }
    }

    fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::Event { agent_id, .. } => *agent_id,
            Self::RunCreated { run } | Self::RunUpdated { run } => run.agent_id,
        }
    }

    /// Whether this message belongs to `topic`.
    pub fn matches(&self, topic: &Topic) -> bool {
        match topic {
            Topic::Global => true,
            Topic::Run(id) => self.run_id() == *id,
            Topic::Agent(id) => self.agent_id() == Some(*id),
        }
    }
}

/// Fan-out bus handle. Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl EventBus {
    /// Capacity bounds the per-subscriber queue; beyond it the oldest
    /// messages are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Broadcast to all subscribers. Callers must journal first: the commit
    /// happens before the broadcast, never after.
    pub fn publish(&self, message: BusMessage) {
        let _receiver_count = self.sender.send(message).unwrap_or(0);
    }

    /// Subscribe to a single topic.
    pub fn subscribe(&self, topic: Topic) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
            topics: vec![topic],
        }
    }

    /// Subscribe to an arbitrary topic mix; a message matching any held
    /// topic is delivered once.
    pub fn subscribe_topics(&self, topics: Vec<Topic>) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
            topics,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Filtered receiver over the shared channel.
pub struct BusReceiver {
    receiver: broadcast::Receiver<BusMessage>,
    topics: Vec<Topic>,
}

impl BusReceiver {
    /// Replace the topic set (used by the websocket transport when a client
    /// sends subscribe/unsubscribe frames mid-stream).
    pub fn set_topics(&mut self, topics: Vec<Topic>) {
        self.topics = topics;
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Receive the next message matching any held topic.
    pub async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            let message = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => BusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("bus receiver lagged by {} messages", n);
                    BusError::Lagged(n)
                }
            })?;
            if self.topics.iter().any(|t| message.matches(t)) {
                return Ok(message);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,

    #[error("receiver lagged by {0} messages (messages were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{EventKind, NewEvent};
    use crate::domain::run::{Run, RunKind};
    use chrono::Utc;

    fn event_for(run_id: RunId) -> TraceEvent {
        TraceEvent {
            id: 1,
            run_id,
            kind: EventKind::SessionStart,
            timestamp: Utc::now(),
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

    #[tokio::test]
    async fn run_topic_filters_other_runs() {
        let bus = EventBus::new(16);
        let run_id = RunId::new();
        let other_id = RunId::new();
        let mut receiver = bus.subscribe(Topic::Run(run_id));

        bus.publish(BusMessage::Event {
            agent_id: None,
            event: event_for(other_id),
        });
        bus.publish(BusMessage::Event {
            agent_id: None,
            event: event_for(run_id),
        });

        match receiver.recv().await.unwrap() {
            BusMessage::Event { event, .. } => assert_eq!(event.run_id, run_id),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn global_topic_sees_everything_in_order() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe(Topic::Global);

        let run_a = Run::new(None, RunKind::Proxy, "a", None);
        let run_b = Run::new(None, RunKind::Stress, "b", None);
        bus.publish(BusMessage::RunCreated { run: run_a.clone() });
        bus.publish(BusMessage::RunCreated { run: run_b.clone() });

        match receiver.recv().await.unwrap() {
            BusMessage::RunCreated { run } => assert_eq!(run.id, run_a.id),
            other => panic!("expected run_created, got {other:?}"),
        }
        match receiver.recv().await.unwrap() {
            BusMessage::RunCreated { run } => assert_eq!(run.id, run_b.id),
            other => panic!("expected run_created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_topic_receives_run_lifecycle() {
        let bus = EventBus::new(16);
        let agent_id = AgentId::new();
        let mut receiver = bus.subscribe(Topic::Agent(agent_id));

        bus.publish(BusMessage::RunCreated {
            run: Run::new(None, RunKind::Proxy, "unrelated", None),
        });
        bus.publish(BusMessage::RunCreated {
            run: Run::new(Some(agent_id), RunKind::Proxy, "mine", None),
        });

        match receiver.recv().await.unwrap() {
            BusMessage::RunCreated { run } => assert_eq!(run.agent_id, Some(agent_id)),
            other => panic!("expected run_created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_reports_lag() {
        let bus = EventBus::new(4);
        let run_id = RunId::new();
        let mut receiver = bus.subscribe(Topic::Run(run_id));

        for _ in 0..10 {
            bus.publish(BusMessage::Event {
                agent_id: None,
                event: event_for(run_id),
            });
        }

        match receiver.recv().await {
            Err(BusError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
