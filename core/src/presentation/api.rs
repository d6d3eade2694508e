// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # HTTP API
//!
//! Collaborator-facing surface over the coordinator: catalog CRUD, run
//! queries, stress sweeps, and the `/notify` ingestion endpoint an
//! out-of-process proxy uses to push events into a shared journal. The
//! websocket subscription transport hangs off `/ws`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::application::coordinator::Coordinator;
use crate::application::diff::{diff_runs, reduce_tool_calls, DiffReport};
use crate::application::stress::StressRunner;
use crate::domain::events::NewEvent;
use crate::domain::project::{AgentId, ProjectId};
use crate::domain::repository::{JournalError, RunFilter};
use crate::domain::run::{RunId, RunKind, RunStatus};

pub struct AppState {
    pub coordinator: Coordinator,
}

pub fn app(coordinator: Coordinator) -> Router {
    let state = Arc::new(AppState { coordinator });

    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/:id", get(get_project).delete(delete_project))
        .route("/projects/:id/agents", post(create_agent).get(list_agents))
        .route("/agents/:id", get(get_agent).delete(delete_agent))
        .route("/agents/:id/stress", post(start_stress))
        .route("/agents/:id/stress/latest", get(latest_stress))
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run).delete(delete_run))
        .route("/runs/:id/events", get(list_events))
        .route("/diff/:baseline/:current", get(diff_runs_handler))
        .route("/notify", post(notify))
        .route("/ws", get(crate::presentation::ws::ws_handler))
        .with_state(state)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(coordinator: Coordinator, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "api listening");
    axum::serve(listener, app(coordinator)).await?;
    Ok(())
}

fn journal_error(e: JournalError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        JournalError::NotFound(_) => StatusCode::NOT_FOUND,
        JournalError::Conflict(_) => StatusCode::CONFLICT,
        JournalError::InvalidTransition { .. } => StatusCode::CONFLICT,
        JournalError::Database(_) | JournalError::Serialization(_) => {
            error!(error = %e, "journal failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn bad_uuid(what: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("invalid {what} id") })),
    )
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    match state
        .coordinator
        .create_project(&payload.name, payload.description.as_deref())
        .await
    {
        Ok(project) => (StatusCode::CREATED, Json(json!({ "project": project }))).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn list_projects(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.coordinator.list_projects().await {
        Ok(projects) => Json(json!({ "projects": projects })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => ProjectId(id),
        Err(_) => return bad_uuid("project").into_response(),
    };
    match state.coordinator.get_project(id).await {
        Ok(Some(project)) => Json(json!({ "project": project })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "project not found" })),
        )
            .into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => ProjectId(id),
        Err(_) => return bad_uuid("project").into_response(),
    };
    match state.coordinator.delete_project(id).await {
        Ok(()) => Json(json!({ "deleted": true })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub target: String,
    pub chaos: Option<Value>,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<CreateAgentRequest>,
) -> impl IntoResponse {
    let project_id = match Uuid::parse_str(&id) {
        Ok(id) => ProjectId(id),
        Err(_) => return bad_uuid("project").into_response(),
    };
    match state
        .coordinator
        .create_agent(
            project_id,
            &payload.name,
            &payload.target,
            payload.chaos.as_ref(),
        )
        .await
    {
        Ok(agent) => (StatusCode::CREATED, Json(json!({ "agent": agent }))).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project_id = match Uuid::parse_str(&id) {
        Ok(id) => ProjectId(id),
        Err(_) => return bad_uuid("project").into_response(),
    };
    match state.coordinator.list_agents(project_id).await {
        Ok(agents) => Json(json!({ "agents": agents })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => AgentId(id),
        Err(_) => return bad_uuid("agent").into_response(),
    };
    match state.coordinator.get_agent(id).await {
        Ok(Some(agent)) => Json(json!({ "agent": agent })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "agent not found" })),
        )
            .into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => AgentId(id),
        Err(_) => return bad_uuid("agent").into_response(),
    };
    match state.coordinator.delete_agent(id).await {
        Ok(()) => Json(json!({ "deleted": true })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

/// Create a stress run for the agent and launch the sweep in the
/// background; the caller follows progress over the fan-out bus.
async fn start_stress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let agent_id = match Uuid::parse_str(&id) {
        Ok(id) => AgentId(id),
        Err(_) => return bad_uuid("agent").into_response(),
    };
    let agent = match state.coordinator.get_agent(agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "agent not found" })),
            )
                .into_response()
        }
        Err(e) => return journal_error(e).into_response(),
    };

    let run = match state
        .coordinator
        .create_run(
            Some(agent_id),
            RunKind::Stress,
            &agent.target,
            agent.chaos.as_ref(),
        )
        .await
    {
        Ok(run) => run,
        Err(e) => return journal_error(e).into_response(),
    };

    let runner = StressRunner::new(state.coordinator.clone());
    let run_id = run.id;
    let target = agent.target.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run(run_id, Some(agent_id), &target).await {
            error!(%run_id, error = %e, "stress sweep failed");
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "run": run }))).into_response()
}

async fn latest_stress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let agent_id = match Uuid::parse_str(&id) {
        Ok(id) => AgentId(id),
        Err(_) => return bad_uuid("agent").into_response(),
    };
    match state.coordinator.latest_stress_run(agent_id).await {
        Ok(Some(run)) => Json(json!({ "run": run })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no stress runs for agent" })),
        )
            .into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub target: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> impl IntoResponse {
    let agent_id = match &query.agent_id {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(AgentId(id)),
            Err(_) => return bad_uuid("agent").into_response(),
        },
        None => None,
    };
    let filter = RunFilter {
        agent_id,
        status: query.status.as_deref().and_then(RunStatus::parse),
        kind: query.kind.as_deref().and_then(RunKind::parse),
        target_contains: query.target.clone(),
        limit: query.limit,
        offset: query.offset,
    };
    match state.coordinator.list_runs(&filter).await {
        Ok(runs) => Json(json!({ "runs": runs })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };
    match state.coordinator.get_run(id).await {
        Ok(Some(run)) => Json(json!({ "run": run })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "run not found" })),
        )
            .into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };
    match state.coordinator.delete_run(id).await {
        Ok(()) => Json(json!({ "deleted": true })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };
    match state.coordinator.get_events(id, query.limit, query.offset).await {
        Ok(events) => Json(json!({ "events": events })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

async fn diff_runs_handler(
    State(state): State<Arc<AppState>>,
    Path((baseline, current)): Path<(String, String)>,
) -> impl IntoResponse {
    let baseline = match Uuid::parse_str(&baseline) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };
    let current = match Uuid::parse_str(&current) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };

    match compare(&state.coordinator, baseline, current).await {
        Ok(report) => Json(json!({ "diff": report })).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}

/// Load both runs' events and compare their tool-call traces.
pub async fn compare(
    coordinator: &Coordinator,
    baseline: RunId,
    current: RunId,
) -> Result<DiffReport, JournalError> {
    let baseline_events = coordinator.get_events(baseline, None, None).await?;
    let current_events = coordinator.get_events(current, None, None).await?;
    Ok(diff_runs(
        &reduce_tool_calls(&baseline_events),
        &reduce_tool_calls(&current_events),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub run_id: String,
    pub agent_id: Option<String>,
    pub event: NewEvent,
}

/// Ingestion endpoint for an out-of-process proxy sharing this journal:
/// journals the pushed event and fans it out.
async fn notify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotifyRequest>,
) -> impl IntoResponse {
    let run_id = match Uuid::parse_str(&payload.run_id) {
        Ok(id) => RunId(id),
        Err(_) => return bad_uuid("run").into_response(),
    };
    let agent_id = match &payload.agent_id {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(AgentId(id)),
            Err(_) => return bad_uuid("agent").into_response(),
        },
        None => None,
    };
    match state
        .coordinator
        .record_event(run_id, agent_id, payload.event)
        .await
    {
        Ok(event) => (StatusCode::CREATED, Json(json!({ "event": event }))).into_response(),
        Err(e) => journal_error(e).into_response(),
    }
}
