// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Journal Contract
//!
//! Storage-backend abstraction for the catalog (Projects, Agents, Runs) and
//! the append-only trace journal. Implementations serialize writes (single
//! writer) and must not lose an acknowledged write on power loss; every
//! operation either succeeds or leaves state unchanged.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::events::{NewEvent, TraceEvent};
use crate::domain::project::{Agent, AgentId, Project, ProjectId};
use crate::domain::run::{Run, RunCounters, RunId, RunKind, RunStatus, StressCounters};

/// Journal errors. `Conflict` is distinct so callers may coalesce duplicate
/// creations instead of treating them as storage failures.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for JournalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => JournalError::NotFound("row not found".to_string()),
            _ => JournalError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Serialization(err.to_string())
    }
}

/// Filters for run listings. Results are ordered created-at descending.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub agent_id: Option<AgentId>,
    pub status: Option<RunStatus>,
    pub kind: Option<RunKind>,
    /// Substring match against the run's target-command snapshot.
    pub target_contains: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Durable catalog + append-only event log.
#[async_trait]
pub trait Journal: Send + Sync {
    // Projects

    /// Fails with [`JournalError::Conflict`] if the name exists.
    async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, JournalError>;

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, JournalError>;

    async fn list_projects(&self) -> Result<Vec<Project>, JournalError>;

    /// Cascades to agents, their runs, and their events.
    async fn delete_project(&self, id: ProjectId) -> Result<(), JournalError>;

    // Agents

    /// Fails with [`JournalError::Conflict`] on duplicate (project, name).
    async fn create_agent(
        &self,
        project_id: ProjectId,
        name: &str,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Agent, JournalError>;

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, JournalError>;

    async fn list_agents(&self, project_id: ProjectId) -> Result<Vec<Agent>, JournalError>;

    /// Cascades to runs and their events.
    async fn delete_agent(&self, id: AgentId) -> Result<(), JournalError>;

    // Runs

    /// Creates a `pending` run. Before creating, promotes any run still
    /// marked `running` for the same `(agent, kind)` to `completed`,
    /// recomputing its `total_calls` from journaled events. The cleanup is
    /// scoped to the pair so unrelated concurrent runs are untouched.
    async fn create_run(
        &self,
        agent_id: Option<AgentId>,
        kind: RunKind,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Run, JournalError>;

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, JournalError>;

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, JournalError>;

    /// Monotonic status update; rejects backwards transitions with
    /// [`JournalError::InvalidTransition`]. Sets `started_at` on entering
    /// `running` and `ended_at` on entering a terminal state. Counters, when
    /// given, refresh the cached values.
    async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        counters: Option<RunCounters>,
    ) -> Result<Run, JournalError>;

    /// Refresh the stress counter cache (sweep-end atomically).
    async fn update_stress_counters(
        &self,
        id: RunId,
        stress: StressCounters,
    ) -> Result<Run, JournalError>;

    /// Cascades to the run's events.
    async fn delete_run(&self, id: RunId) -> Result<(), JournalError>;

    /// Latest stress run for an agent, newest first.
    async fn latest_stress_run(&self, agent_id: AgentId) -> Result<Option<Run>, JournalError>;

    // Events

    /// Append one event; returns it with the server-assigned monotonic id.
    async fn insert_event(&self, run_id: RunId, event: NewEvent)
        -> Result<TraceEvent, JournalError>;

    /// Events for a run, ordered by id ascending.
    async fn get_events(
        &self,
        run_id: RunId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<TraceEvent>, JournalError>;
}
