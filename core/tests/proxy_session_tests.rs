// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Proxy session integration tests. Sessions run over in-memory duplex
//! pipes: the test plays both the AI client and the tool server.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use mcptap_core::domain::chaos::ChaosConfig;
use mcptap_core::domain::events::EventKind;
use mcptap_core::domain::repository::Journal;
use mcptap_core::domain::run::{RunKind, RunStatus};
use mcptap_core::infrastructure::{Database, EventBus, SqliteJournal, StdioProxy};

struct Harness {
    journal: Arc<SqliteJournal>,
    proxy: StdioProxy,
}

async fn harness() -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let journal = Arc::new(SqliteJournal::new(db));
    let proxy = StdioProxy::new(
        journal.clone() as Arc<dyn Journal>,
        EventBus::with_default_capacity(),
    );
    Harness { journal, proxy }
}

/// Start a session wired to two duplex pipes; returns the client-side and
/// server-side test ends.
fn wire(
    harness: &Harness,
    run_id: mcptap_core::domain::run::RunId,
    chaos: Option<ChaosConfig>,
) -> (
    DuplexStream,
    DuplexStream,
    mcptap_core::infrastructure::ProxyHandle,
) {
    let (test_client, proxy_client_side) = duplex(64 * 1024);
    let (test_server, proxy_server_side) = duplex(64 * 1024);
    let (client_in, client_out) = split(proxy_client_side);
    let (server_in, server_out) = split(proxy_server_side);
    let handle =
        harness
            .proxy
            .spawn_session(run_id, None, chaos, client_in, client_out, server_in, server_out);
    (test_client, test_server, handle)
}

async fn send_line<W: AsyncWriteExt + Unpin>(writer: &mut W, value: &Value) {
    writer.write_all(value.to_string().as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    writer.flush().await.unwrap();
}

#[tokio::test]
async fn happy_round_trip_journals_request_and_response() {
    let harness = harness().await;
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, None);
    let (client_read, mut client_write) = split(test_client);
    let mut client_lines = BufReader::new(client_read).lines();
    let (server_read, mut server_write) = split(test_server);
    let mut server_lines = BufReader::new(server_read).lines();

    send_line(
        &mut client_write,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;

    // The server sees the request unchanged.
    let at_server: Value =
        serde_json::from_str(&server_lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(at_server["method"], json!("tools/list"));
    assert_eq!(at_server["id"], json!(1));

    send_line(
        &mut server_write,
        &json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}),
    )
    .await;

    // The client sees exactly the server's reply.
    let at_client: Value =
        serde_json::from_str(&client_lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(at_client, json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));

    // Close the client side; the session ends completed.
    drop(client_write);
    drop(client_lines);
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.counters.total_calls, 0);
    assert_eq!(summary.counters.total_errors, 0);

    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::SessionStart,
            EventKind::RpcRequest,
            EventKind::RpcResponse,
            EventKind::SessionEnd,
        ]
    );
    assert_eq!(events[1].method.as_deref(), Some("tools/list"));
    assert_eq!(events[1].correlation_id.as_deref(), Some("1"));
    assert_eq!(events[2].correlation_id.as_deref(), Some("1"));
    assert!(events[2].latency_ms.is_some());
    assert_eq!(events[2].result, Some(json!({"tools": []})));
    assert_eq!(
        events[3].params,
        Some(json!({"totalCalls": 0, "totalErrors": 0}))
    );

    let run = harness.journal.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn chaos_delay_is_applied_and_recorded() {
    let harness = harness().await;
    let chaos: ChaosConfig = serde_json::from_value(json!({
        "seed": 1,
        "tools": { "read_file": { "delayMs": { "p": 1.0, "value": 200 } } }
    }))
    .unwrap();
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, Some(chaos));
    let (client_read, mut client_write) = split(test_client);
    let mut client_lines = BufReader::new(client_read).lines();
    let (server_read, mut server_write) = split(test_server);
    let mut server_lines = BufReader::new(server_read).lines();

    // Echo server task: answer the call as soon as it arrives.
    let echo = tokio::spawn(async move {
        let line = server_lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        let reply = json!({"jsonrpc": "2.0", "id": value["id"], "result": {"content": []}});
        server_write
            .write_all(format!("{reply}\n").as_bytes())
            .await
            .unwrap();
        server_write.flush().await.unwrap();
    });

    let started = Instant::now();
    send_line(
        &mut client_write,
        &json!({
            "jsonrpc": "2.0", "id": 7, "method": "tools/call",
            "params": {"name": "read_file", "arguments": {"path": "/etc/hosts"}}
        }),
    )
    .await;

    let _reply = client_lines.next_line().await.unwrap().unwrap();
    let upstream_latency = started.elapsed();
    assert!(
        upstream_latency.as_millis() >= 200,
        "delay not applied: {upstream_latency:?}"
    );
    echo.await.unwrap();

    drop(client_write);
    drop(client_lines);
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.counters.total_calls, 1);

    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    let response = events
        .iter()
        .find(|e| e.kind == EventKind::RpcResponse)
        .unwrap();
    let applied = response.chaos_applied.unwrap();
    assert_eq!(applied.seed, 1);
    assert_eq!(applied.delay_ms, Some(200));

    // tools/call also journals the tool_call / tool_result pair.
    let call = events.iter().find(|e| e.kind == EventKind::ToolCall).unwrap();
    assert_eq!(call.tool.as_deref(), Some("read_file"));
    assert_eq!(call.params, Some(json!({"path": "/etc/hosts"})));
    let result = events.iter().find(|e| e.kind == EventKind::ToolResult).unwrap();
    assert_eq!(result.tool.as_deref(), Some("read_file"));
    assert!(result.latency_ms.unwrap() >= 200);
}

#[tokio::test]
async fn injected_error_replaces_the_response() {
    let harness = harness().await;
    let chaos: ChaosConfig = serde_json::from_value(json!({
        "seed": 9,
        "tools": { "write_file": { "failRate": 1.0 } }
    }))
    .unwrap();
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, Some(chaos));
    let (client_read, mut client_write) = split(test_client);
    let mut client_lines = BufReader::new(client_read).lines();
    let (server_read, mut server_write) = split(test_server);
    let mut server_lines = BufReader::new(server_read).lines();

    send_line(
        &mut client_write,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "write_file", "arguments": {"path": "/a", "content": "x"}}
        }),
    )
    .await;
    let line = server_lines.next_line().await.unwrap().unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();
    send_line(
        &mut server_write,
        &json!({"jsonrpc": "2.0", "id": value["id"], "result": {"ok": true}}),
    )
    .await;

    let at_client: Value =
        serde_json::from_str(&client_lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(at_client["error"]["code"], json!(-32603));
    assert!(at_client.get("result").is_none());

    drop(client_write);
    drop(client_lines);
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.counters.total_errors, 1);

    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    let response = events
        .iter()
        .find(|e| e.kind == EventKind::RpcResponse)
        .unwrap();
    assert!(response.error.is_some());
    assert!(response.chaos_applied.unwrap().error_injected);
}

#[tokio::test]
async fn corruption_wraps_the_result_in_a_marker_envelope() {
    let harness = harness().await;
    let chaos: ChaosConfig = serde_json::from_value(json!({
        "seed": 4,
        "tools": { "read_file": { "corruptRate": 1.0 } }
    }))
    .unwrap();
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, Some(chaos));
    let (client_read, mut client_write) = split(test_client);
    let mut client_lines = BufReader::new(client_read).lines();
    let (server_read, mut server_write) = split(test_server);
    let mut server_lines = BufReader::new(server_read).lines();

    send_line(
        &mut client_write,
        &json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "read_file", "arguments": {"path": "/a"}}
        }),
    )
    .await;
    let _ = server_lines.next_line().await.unwrap().unwrap();
    send_line(
        &mut server_write,
        &json!({"jsonrpc": "2.0", "id": 3, "result": {"content": "data", "isError": false}}),
    )
    .await;

    let at_client: Value =
        serde_json::from_str(&client_lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(at_client["result"]["_corrupted"], json!(true));
    assert_eq!(at_client["result"]["content"], json!("data"));
    let keys: Vec<String> = at_client["result"]["_originalKeys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(keys.contains(&"content".to_string()));
    assert!(keys.contains(&"isError".to_string()));

    drop(client_write);
    drop(client_lines);
    handle.join().await.unwrap();
}

#[tokio::test]
async fn unknown_correlation_id_is_forwarded_and_journaled_without_latency() {
    let harness = harness().await;
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, None);
    let (client_read, mut client_write) = split(test_client);
    let mut client_lines = BufReader::new(client_read).lines();
    let (_server_read, mut server_write) = split(test_server);

    send_line(
        &mut server_write,
        &json!({"jsonrpc": "2.0", "id": 99, "result": {"late": true}}),
    )
    .await;

    let at_client: Value =
        serde_json::from_str(&client_lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(at_client["result"]["late"], json!(true));

    drop(client_write);
    drop(client_lines);
    handle.join().await.unwrap();

    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    let response = events
        .iter()
        .find(|e| e.kind == EventKind::RpcResponse)
        .unwrap();
    assert_eq!(response.correlation_id.as_deref(), Some("99"));
    assert!(response.latency_ms.is_none());
}

#[tokio::test]
async fn non_json_lines_pass_through_without_journaling() {
    let harness = harness().await;
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, handle) = wire(&harness, run.id, None);
    let (client_read, mut client_write) = split(test_client);
    let (server_read, _server_write) = split(test_server);
    let mut server_lines = BufReader::new(server_read).lines();

    client_write.write_all(b"plain text banner\n").await.unwrap();
    client_write.flush().await.unwrap();

    let at_server = server_lines.next_line().await.unwrap().unwrap();
    assert_eq!(at_server, "plain text banner");

    // Closing both client halves delivers EOF to the session.
    drop(client_write);
    drop(client_read);
    let _ = handle.join().await.unwrap();

    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    assert!(events
        .iter()
        .all(|e| e.kind != EventKind::RpcRequest && e.kind != EventKind::RpcResponse));
}

#[tokio::test]
async fn spawn_failure_marks_the_run_failed() {
    let harness = harness().await;
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "definitely-not-a-real-binary-xyz", None)
        .await
        .unwrap();

    let err = harness
        .proxy
        .start(run.id, None, "definitely-not-a-real-binary-xyz", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        mcptap_core::infrastructure::ProxyError::SpawnFailed { .. }
    ));

    let run = harness.journal.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn shutdown_trigger_ends_the_run_cleanly() {
    let harness = harness().await;
    let run = harness
        .journal
        .create_run(None, RunKind::Proxy, "mock", None)
        .await
        .unwrap();

    let (test_client, test_server, mut handle) = wire(&harness, run.id, None);

    let trigger = handle.take_shutdown_trigger().unwrap();
    trigger.send(()).unwrap();
    let summary = handle.join().await.unwrap();
    assert_eq!(
        summary.reason,
        mcptap_core::infrastructure::proxy::EndReason::Shutdown
    );

    drop(test_client);
    drop(test_server);

    let run = harness.journal.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let events = harness.journal.get_events(run.id, None, None).await.unwrap();
    assert_eq!(events.first().unwrap().kind, EventKind::SessionStart);
    assert_eq!(events.last().unwrap().kind, EventKind::SessionEnd);
}
