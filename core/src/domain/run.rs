// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Run Aggregate
//!
//! One recorded session against a tool server: either a transparent proxy
//! pass-through or a stress sweep. A run snapshots the agent's target command
//! and chaos config at creation, then transitions `pending -> running ->
//! completed|failed` exactly once in each direction. Counter fields are a
//! cache refreshed on status transitions; at any terminal state they must
//! equal a recomputation from the run's journaled events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::project::AgentId;

/// Unique identifier for a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What kind of session a run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Proxy,
    Stress,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Stress => "stress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proxy" => Some(Self::Proxy),
            "stress" => Some(Self::Stress),
            _ => None,
        }
    }
}

/// Run lifecycle status. Transitions are monotonic: a run never moves
/// backwards and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DomainError {
    #[error("invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: RunStatus, to: RunStatus },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy-side traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_calls: u64,
    pub total_errors: u64,
}

/// Stress-sweep outcome counters plus the derived reliability score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressCounters {
    pub passed: u64,
    pub graceful: u64,
    pub crashed: u64,
    pub score: u8,
}

impl StressCounters {
    pub fn total(&self) -> u64 {
        self.passed + self.graceful + self.crashed
    }

    /// `round(100 * (pass + graceful) / total)`, or 0 for an empty sweep.
    pub fn compute_score(passed: u64, graceful: u64, crashed: u64) -> u8 {
        let total = passed + graceful + crashed;
        if total == 0 {
            return 0;
        }
        let ratio = (passed + graceful) as f64 / total as f64;
        (ratio * 100.0).round() as u8
    }
}

/// One recorded session: a proxy pass-through or a stress sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_id: Option<AgentId>,
    pub kind: RunKind,
    /// Target command snapshot taken at creation.
    pub target: String,
    /// Chaos config snapshot taken at creation; opaque to the catalog.
    pub chaos: Option<Value>,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub stress: StressCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        agent_id: Option<AgentId>,
        kind: RunKind,
        target: impl Into<String>,
        chaos: Option<Value>,
    ) -> Self {
        Self {
            id: RunId::new(),
            agent_id,
            kind,
            target: target.into(),
            chaos,
            status: RunStatus::Pending,
            counters: RunCounters::default(),
            stress: StressCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Apply a forward status transition, stamping `started_at` / `ended_at`.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            RunStatus::Completed | RunStatus::Failed => self.ended_at = Some(Utc::now()),
            RunStatus::Pending => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        let mut run = Run::new(None, RunKind::Proxy, "echo hi", None);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none() && run.ended_at.is_none());

        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());

        run.transition(RunStatus::Completed).unwrap();
        assert!(run.ended_at.is_some());
        assert!(run.started_at.unwrap() <= run.ended_at.unwrap());

        // Terminal states never move again, not even to the other terminal.
        assert!(run.transition(RunStatus::Running).is_err());
        assert!(run.transition(RunStatus::Failed).is_err());
    }

    #[test]
    fn pending_can_fail_directly() {
        let mut run = Run::new(None, RunKind::Proxy, "nonexistent-binary", None);
        run.transition(RunStatus::Failed).unwrap();
        assert!(run.status.is_terminal());
        assert!(run.started_at.is_none());
    }

    #[test]
    fn score_rounds_and_handles_empty_sweep() {
        assert_eq!(StressCounters::compute_score(0, 0, 0), 0);
        assert_eq!(StressCounters::compute_score(1, 1, 0), 100);
        assert_eq!(StressCounters::compute_score(1, 0, 2), 33);
        assert_eq!(StressCounters::compute_score(2, 0, 1), 67);
    }
}
