// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Coordinator
//!
//! Top-level owner of the shared handles: the journal and the fan-out bus.
//! Every subsystem receives its references through this coordinator rather
//! than through process-wide globals, so a test harness can instantiate an
//! isolated coordinator per test.
//!
//! The coordinator enforces the one cross-cutting ordering rule: a journal
//! write commits before its fan-out broadcast.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::events::{NewEvent, TraceEvent};
use crate::domain::project::{Agent, AgentId, Project, ProjectId};
use crate::domain::repository::{Journal, JournalError, RunFilter};
use crate::domain::run::{Run, RunCounters, RunId, RunKind, RunStatus, StressCounters};
use crate::infrastructure::event_bus::{BusMessage, EventBus};

#[derive(Clone)]
pub struct Coordinator {
    journal: Arc<dyn Journal>,
    bus: EventBus,
}

impl Coordinator {
    pub fn new(journal: Arc<dyn Journal>, bus: EventBus) -> Self {
        Self { journal, bus }
    }

    pub fn journal(&self) -> Arc<dyn Journal> {
        Arc::clone(&self.journal)
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    // Catalog

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, JournalError> {
        self.journal.create_project(name, description).await
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, JournalError> {
        self.journal.get_project(id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, JournalError> {
        self.journal.list_projects().await
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<(), JournalError> {
        self.journal.delete_project(id).await
    }

    pub async fn create_agent(
        &self,
        project_id: ProjectId,
        name: &str,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Agent, JournalError> {
        self.journal.create_agent(project_id, name, target, chaos).await
    }

    pub async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, JournalError> {
        self.journal.get_agent(id).await
    }

    pub async fn list_agents(&self, project_id: ProjectId) -> Result<Vec<Agent>, JournalError> {
        self.journal.list_agents(project_id).await
    }

    pub async fn delete_agent(&self, id: AgentId) -> Result<(), JournalError> {
        self.journal.delete_agent(id).await
    }

    // Runs

    /// Create a pending run (stale `running` runs for the same pair are
    /// promoted first) and announce it on the bus.
    pub async fn create_run(
        &self,
        agent_id: Option<AgentId>,
        kind: RunKind,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Run, JournalError> {
        let run = self.journal.create_run(agent_id, kind, target, chaos).await?;
        self.bus.publish(BusMessage::RunCreated { run: run.clone() });
        Ok(run)
    }

    pub async fn get_run(&self, id: RunId) -> Result<Option<Run>, JournalError> {
        self.journal.get_run(id).await
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, JournalError> {
        self.journal.list_runs(filter).await
    }

    pub async fn delete_run(&self, id: RunId) -> Result<(), JournalError> {
        self.journal.delete_run(id).await
    }

    pub async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        counters: Option<RunCounters>,
    ) -> Result<Run, JournalError> {
        let run = self.journal.update_run_status(id, status, counters).await?;
        self.bus.publish(BusMessage::RunUpdated { run: run.clone() });
        Ok(run)
    }

    pub async fn update_stress_counters(
        &self,
        id: RunId,
        stress: StressCounters,
    ) -> Result<Run, JournalError> {
        let run = self.journal.update_stress_counters(id, stress).await?;
        self.bus.publish(BusMessage::RunUpdated { run: run.clone() });
        Ok(run)
    }

    pub async fn latest_stress_run(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<Run>, JournalError> {
        self.journal.latest_stress_run(agent_id).await
    }

    // Events

    /// Append an event and broadcast it; the journal write commits first.
    pub async fn record_event(
        &self,
        run_id: RunId,
        agent_id: Option<AgentId>,
        event: NewEvent,
    ) -> Result<TraceEvent, JournalError> {
        let stored = self.journal.insert_event(run_id, event).await?;
        self.bus.publish(BusMessage::Event {
            agent_id,
            event: stored.clone(),
        });
        Ok(stored)
    }

    pub async fn get_events(
        &self,
        run_id: RunId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<TraceEvent>, JournalError> {
        self.journal.get_events(run_id, limit, offset).await
    }
}
