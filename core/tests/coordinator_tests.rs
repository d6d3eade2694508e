// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator integration tests: journal-then-broadcast ordering, run
//! lifecycle fan-out, and trace comparison across two recorded runs.

use std::sync::Arc;

use serde_json::json;

use mcptap_core::application::Coordinator;
use mcptap_core::domain::events::{EventKind, NewEvent};
use mcptap_core::domain::repository::Journal;
use mcptap_core::domain::run::{RunKind, RunStatus};
use mcptap_core::infrastructure::event_bus::{BusMessage, Topic};
use mcptap_core::infrastructure::{Database, EventBus, SqliteJournal};
use mcptap_core::presentation::api::compare;

async fn coordinator() -> Coordinator {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let journal = Arc::new(SqliteJournal::new(db));
    Coordinator::new(
        journal as Arc<dyn Journal>,
        EventBus::with_default_capacity(),
    )
}

#[tokio::test]
async fn broadcast_carries_the_committed_event() {
    let coordinator = coordinator().await;
    let run = coordinator
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let mut receiver = coordinator.bus().subscribe(Topic::Run(run.id));

    let stored = coordinator
        .record_event(
            run.id,
            None,
            NewEvent::of_kind(EventKind::RpcRequest).with_method("tools/list"),
        )
        .await
        .unwrap();

    match receiver.recv().await.unwrap() {
        BusMessage::Event { event, .. } => {
            // The broadcast message is the committed row, id included.
            assert_eq!(event.id, stored.id);
            assert_eq!(event.method.as_deref(), Some("tools/list"));
        }
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn run_lifecycle_reaches_agent_subscribers() {
    let coordinator = coordinator().await;
    let project = coordinator.create_project("alpha", None).await.unwrap();
    let agent = coordinator
        .create_agent(project.id, "fs", "server-filesystem /tmp", None)
        .await
        .unwrap();

    let mut receiver = coordinator.bus().subscribe(Topic::Agent(agent.id));

    let run = coordinator
        .create_run(Some(agent.id), RunKind::Stress, "server-filesystem /tmp", None)
        .await
        .unwrap();
    coordinator
        .update_run_status(run.id, RunStatus::Running, None)
        .await
        .unwrap();

    match receiver.recv().await.unwrap() {
        BusMessage::RunCreated { run: created } => assert_eq!(created.id, run.id),
        other => panic!("expected run_created, got {other:?}"),
    }
    match receiver.recv().await.unwrap() {
        BusMessage::RunUpdated { run: updated } => {
            assert_eq!(updated.status, RunStatus::Running)
        }
        other => panic!("expected run_updated, got {other:?}"),
    }
}

async fn record_tool_call(
    coordinator: &Coordinator,
    run_id: mcptap_core::domain::run::RunId,
    tool: &str,
    arguments: serde_json::Value,
    latency_ms: u64,
) {
    coordinator
        .record_event(
            run_id,
            None,
            NewEvent::of_kind(EventKind::ToolCall)
                .with_tool(tool.to_string())
                .with_params(arguments),
        )
        .await
        .unwrap();
    coordinator
        .record_event(
            run_id,
            None,
            NewEvent::of_kind(EventKind::ToolResult)
                .with_tool(tool.to_string())
                .with_latency_ms(latency_ms),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn compare_reports_argument_and_latency_drift() {
    let coordinator = coordinator().await;
    let baseline = coordinator
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();
    let current = coordinator
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    record_tool_call(
        &coordinator,
        baseline.id,
        "write_file",
        json!({"path": "/a", "content": "x"}),
        50,
    )
    .await;
    record_tool_call(
        &coordinator,
        current.id,
        "write_file",
        json!({"path": "/b", "content": "x"}),
        120,
    )
    .await;

    let report = compare(&coordinator, baseline.id, current.id).await.unwrap();

    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed[0].tool, "write_file");

    assert_eq!(report.latency_changes.len(), 1);
    let shift = &report.latency_changes[0];
    assert_eq!(shift.baseline_mean_ms, 50.0);
    assert_eq!(shift.current_mean_ms, 120.0);
    assert!((shift.change_percent - 140.0).abs() < 1e-9);
}

#[tokio::test]
async fn compare_of_a_run_with_itself_is_empty() {
    let coordinator = coordinator().await;
    let run = coordinator
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();
    record_tool_call(&coordinator, run.id, "read_file", json!({"path": "/a"}), 10).await;

    let report = compare(&coordinator, run.id, run.id).await.unwrap();
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert!(report.changed.is_empty());
    assert!(report.latency_changes.is_empty());
}
