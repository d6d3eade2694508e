// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # SQLite Journal
//!
//! Production [`Journal`] implementation backed by the `projects`, `agents`,
//! `runs`, and `trace_events` tables. Translates between domain aggregates
//! and the relational schema; JSON payloads cross this boundary as opaque
//! serialized text.
//!
//! SQLite serializes writers at the connection level and the pool runs in
//! WAL mode, which together give the single-writer, crash-consistent
//! semantics the journal contract requires.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::events::{EventKind, NewEvent, TraceEvent};
use crate::domain::project::{Agent, AgentId, Project, ProjectId};
use crate::domain::repository::{Journal, JournalError, RunFilter};
use crate::domain::run::{Run, RunCounters, RunId, RunKind, RunStatus, StressCounters};
use crate::infrastructure::db::Database;

pub struct SqliteJournal {
    db: Database,
}

impl SqliteJournal {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_uuid(text: &str) -> Result<Uuid, JournalError> {
    Uuid::parse_str(text).map_err(|e| JournalError::Serialization(format!("bad uuid: {e}")))
}

fn parse_json_column(text: Option<String>) -> Result<Option<Value>, JournalError> {
    match text {
        Some(t) => Ok(Some(serde_json::from_str(&t)?)),
        None => Ok(None),
    }
}

fn row_to_project(row: &SqliteRow) -> Result<Project, JournalError> {
    Ok(Project {
        id: ProjectId(parse_uuid(&row.get::<String, _>("id"))?),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent, JournalError> {
    Ok(Agent {
        id: AgentId(parse_uuid(&row.get::<String, _>("id"))?),
        project_id: ProjectId(parse_uuid(&row.get::<String, _>("project_id"))?),
        name: row.get("name"),
        target: row.get("target"),
        chaos: parse_json_column(row.get("chaos"))?,
        created_at: row.get("created_at"),
    })
}

fn row_to_run(row: &SqliteRow) -> Result<Run, JournalError> {
    let agent_id = row
        .get::<Option<String>, _>("agent_id")
        .map(|s| parse_uuid(&s).map(AgentId))
        .transpose()?;
    let kind_str: String = row.get("kind");
    let kind = RunKind::parse(&kind_str)
        .ok_or_else(|| JournalError::Serialization(format!("unknown run kind {kind_str:?}")))?;
    let status_str: String = row.get("status");
    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| JournalError::Serialization(format!("unknown run status {status_str:?}")))?;

    Ok(Run {
        id: RunId(parse_uuid(&row.get::<String, _>("id"))?),
        agent_id,
        kind,
        target: row.get("target"),
        chaos: parse_json_column(row.get("chaos"))?,
        status,
        counters: RunCounters {
            total_calls: row.get::<i64, _>("total_calls") as u64,
            total_errors: row.get::<i64, _>("total_errors") as u64,
        },
        stress: StressCounters {
            passed: row.get::<i64, _>("stress_passed") as u64,
            graceful: row.get::<i64, _>("stress_graceful") as u64,
            crashed: row.get::<i64, _>("stress_crashed") as u64,
            score: row.get::<i64, _>("stress_score") as u8,
        },
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    })
}

fn row_to_event(row: &SqliteRow) -> Result<TraceEvent, JournalError> {
    let kind_str: String = row.get("kind");
    let kind = EventKind::parse(&kind_str)
        .ok_or_else(|| JournalError::Serialization(format!("unknown event kind {kind_str:?}")))?;
    let chaos_applied = match row.get::<Option<String>, _>("chaos_applied") {
        Some(t) => Some(serde_json::from_str(&t)?),
        None => None,
    };

    Ok(TraceEvent {
        id: row.get("id"),
        run_id: RunId(parse_uuid(&row.get::<String, _>("run_id"))?),
        kind,
        timestamp: row.get("timestamp"),
        method: row.get("method"),
        tool: row.get("tool_name"),
        correlation_id: row.get("correlation_id"),
        params: parse_json_column(row.get("params"))?,
        result: parse_json_column(row.get("result"))?,
        error: parse_json_column(row.get("error"))?,
        latency_ms: row.get::<Option<i64>, _>("latency_ms").map(|v| v as u64),
        chaos_applied,
    })
}

fn json_text(value: Option<&Value>) -> Result<Option<String>, JournalError> {
    value
        .map(|v| serde_json::to_string(v).map_err(JournalError::from))
        .transpose()
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, JournalError> {
        let existing = sqlx::query("SELECT id FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;
        if existing.is_some() {
            return Err(JournalError::Conflict(format!(
                "project {name:?} already exists"
            )));
        }

        let project = Project::new(name, description.map(str::to_string));
        sqlx::query(
            "INSERT INTO projects (id, name, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project.id.0.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, JournalError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_project).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>, JournalError> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at DESC")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_project).collect()
    }

    async fn delete_project(&self, id: ProjectId) -> Result<(), JournalError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.0.to_string())
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(format!("project {id}")));
        }
        Ok(())
    }

    async fn create_agent(
        &self,
        project_id: ProjectId,
        name: &str,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Agent, JournalError> {
        if self.get_project(project_id).await?.is_none() {
            return Err(JournalError::NotFound(format!("project {project_id}")));
        }
        let existing = sqlx::query("SELECT id FROM agents WHERE project_id = ? AND name = ?")
            .bind(project_id.0.to_string())
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;
        if existing.is_some() {
            return Err(JournalError::Conflict(format!(
                "agent {name:?} already exists in project {project_id}"
            )));
        }

        let agent = Agent::new(project_id, name, target, chaos.cloned());
        sqlx::query(
            "INSERT INTO agents (id, project_id, name, target, chaos, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(agent.id.0.to_string())
        .bind(agent.project_id.0.to_string())
        .bind(&agent.name)
        .bind(&agent.target)
        .bind(json_text(agent.chaos.as_ref())?)
        .bind(agent.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(agent)
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, JournalError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list_agents(&self, project_id: ProjectId) -> Result<Vec<Agent>, JournalError> {
        let rows = sqlx::query("SELECT * FROM agents WHERE project_id = ? ORDER BY created_at")
            .bind(project_id.0.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn delete_agent(&self, id: AgentId) -> Result<(), JournalError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.0.to_string())
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(format!("agent {id}")));
        }
        Ok(())
    }

    async fn create_run(
        &self,
        agent_id: Option<AgentId>,
        kind: RunKind,
        target: &str,
        chaos: Option<&Value>,
    ) -> Result<Run, JournalError> {
        self.cleanup_stale(agent_id, kind).await?;

        let run = Run::new(agent_id, kind, target, chaos.cloned());
        sqlx::query(
            "INSERT INTO runs (id, agent_id, kind, target, chaos, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.0.to_string())
        .bind(run.agent_id.map(|a| a.0.to_string()))
        .bind(run.kind.as_str())
        .bind(&run.target)
        .bind(json_text(run.chaos.as_ref())?)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, JournalError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, JournalError> {
        let mut sql = String::from("SELECT * FROM runs WHERE 1 = 1");
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if filter.target_contains.is_some() {
            sql.push_str(" AND target LIKE ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_id) = filter.agent_id {
            query = query.bind(agent_id.0.to_string());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }
        if let Some(substr) = &filter.target_contains {
            query = query.bind(format!("%{substr}%"));
        }
        query = query
            .bind(filter.limit.map(i64::from).unwrap_or(-1))
            .bind(filter.offset.map(i64::from).unwrap_or(0));

        let rows = query.fetch_all(self.db.pool()).await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        counters: Option<RunCounters>,
    ) -> Result<Run, JournalError> {
        let run = self
            .get_run(id)
            .await?
            .ok_or_else(|| JournalError::NotFound(format!("run {id}")))?;

        if !run.status.can_transition_to(status) {
            return Err(JournalError::InvalidTransition {
                from: run.status,
                to: status,
            });
        }

        let now = Utc::now();
        let started_at = match status {
            RunStatus::Running => Some(now),
            _ => run.started_at,
        };
        let ended_at = if status.is_terminal() { Some(now) } else { None };
        let counters = counters.unwrap_or(run.counters);

        sqlx::query(
            "UPDATE runs SET status = ?, total_calls = ?, total_errors = ?, \
             started_at = ?, ended_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(counters.total_calls as i64)
        .bind(counters.total_errors as i64)
        .bind(started_at)
        .bind(ended_at)
        .bind(id.0.to_string())
        .execute(self.db.pool())
        .await?;

        self.get_run(id)
            .await?
            .ok_or_else(|| JournalError::NotFound(format!("run {id}")))
    }

    async fn update_stress_counters(
        &self,
        id: RunId,
        stress: StressCounters,
    ) -> Result<Run, JournalError> {
        let result = sqlx::query(
            "UPDATE runs SET stress_passed = ?, stress_graceful = ?, stress_crashed = ?, \
             stress_score = ? WHERE id = ?",
        )
        .bind(stress.passed as i64)
        .bind(stress.graceful as i64)
        .bind(stress.crashed as i64)
        .bind(stress.score as i64)
        .bind(id.0.to_string())
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(format!("run {id}")));
        }
        self.get_run(id)
            .await?
            .ok_or_else(|| JournalError::NotFound(format!("run {id}")))
    }

    async fn delete_run(&self, id: RunId) -> Result<(), JournalError> {
        let result = sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(id.0.to_string())
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn latest_stress_run(&self, agent_id: AgentId) -> Result<Option<Run>, JournalError> {
        let row = sqlx::query(
            "SELECT * FROM runs WHERE agent_id = ? AND kind = 'stress' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(agent_id.0.to_string())
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn insert_event(
        &self,
        run_id: RunId,
        event: NewEvent,
    ) -> Result<TraceEvent, JournalError> {
        let timestamp = Utc::now();
        let chaos_text = event
            .chaos_applied
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "INSERT INTO trace_events \
             (run_id, kind, timestamp, method, tool_name, correlation_id, \
              params, result, error, latency_ms, chaos_applied) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.0.to_string())
        .bind(event.kind.as_str())
        .bind(timestamp)
        .bind(&event.method)
        .bind(&event.tool)
        .bind(&event.correlation_id)
        .bind(json_text(event.params.as_ref())?)
        .bind(json_text(event.result.as_ref())?)
        .bind(json_text(event.error.as_ref())?)
        .bind(event.latency_ms.map(|v| v as i64))
        .bind(chaos_text)
        .execute(self.db.pool())
        .await?;

        Ok(TraceEvent {
            id: result.last_insert_rowid(),
            run_id,
            kind: event.kind,
            timestamp,
            method: event.method,
            tool: event.tool,
            correlation_id: event.correlation_id,
            params: event.params,
            result: event.result,
            error: event.error,
            latency_ms: event.latency_ms,
            chaos_applied: event.chaos_applied,
        })
    }

    async fn get_events(
        &self,
        run_id: RunId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<TraceEvent>, JournalError> {
        let rows = sqlx::query(
            "SELECT * FROM trace_events WHERE run_id = ? ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(run_id.0.to_string())
        .bind(limit.map(i64::from).unwrap_or(-1))
        .bind(offset.map(i64::from).unwrap_or(0))
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(row_to_event).collect()
    }
}

impl SqliteJournal {
    /// Crash recovery: any run still `running` for the same `(agent, kind)`
    /// is promoted to `completed`, with `total_calls` recomputed from its
    /// journaled events. Scoped to the pair so unrelated concurrent runs are
    /// left alone.
    async fn cleanup_stale(
        &self,
        agent_id: Option<AgentId>,
        kind: RunKind,
    ) -> Result<(), JournalError> {
        let sql = match agent_id {
            Some(_) => {
                "SELECT id FROM runs WHERE status = 'running' AND kind = ? AND agent_id = ?"
            }
            None => "SELECT id FROM runs WHERE status = 'running' AND kind = ? AND agent_id IS NULL",
        };
        let mut query = sqlx::query(sql).bind(kind.as_str());
        if let Some(agent_id) = agent_id {
            query = query.bind(agent_id.0.to_string());
        }
        let rows = query.fetch_all(self.db.pool()).await?;

        let now = Utc::now();
        for row in rows {
            let id: String = row.get("id");
            let calls: i64 = sqlx::query(
                "SELECT COUNT(*) AS n FROM trace_events WHERE run_id = ? AND kind = 'tool_call'",
            )
            .bind(&id)
            .fetch_one(self.db.pool())
            .await?
            .get("n");

            tracing::warn!(run_id = %id, total_calls = calls, "promoting stale running run to completed");
            sqlx::query(
                "UPDATE runs SET status = 'completed', total_calls = ?, ended_at = ? WHERE id = ?",
            )
            .bind(calls)
            .bind(now)
            .bind(&id)
            .execute(self.db.pool())
            .await?;
        }
        Ok(())
    }
}
