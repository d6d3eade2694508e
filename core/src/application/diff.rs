// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Trace Diff Engine
//!
//! Compares two runs' tool-call traces and reports behavioral drift
//! (added / removed / changed calls) and latency drift (per-tool mean shift
//! beyond ±20%). The engine never fails: empty inputs yield empty lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::events::{EventKind, TraceEvent};

/// Threshold beyond which a per-tool mean latency shift is reported.
const LATENCY_SHIFT_PERCENT: f64 = 20.0;

/// One tool call reduced from a run's trace: the `tool_call` arguments plus
/// the paired `tool_result` latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub latency_ms: Option<u64>,
}

/// A call present on only one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDelta {
    pub tool: String,
    pub arguments: Value,
}

/// A call whose argument payload differs between the runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedCall {
    pub tool: String,
    pub baseline_arguments: Value,
    pub current_arguments: Value,
}

/// A per-tool mean latency shift beyond the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyChange {
    pub tool: String,
    pub baseline_mean_ms: f64,
    pub current_mean_ms: f64,
    /// Signed percentage relative to the baseline mean.
    pub change_percent: f64,
}

/// Comparison result between a baseline run and a current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub baseline_calls: usize,
    pub current_calls: usize,
    pub added: Vec<CallDelta>,
    pub removed: Vec<CallDelta>,
    pub changed: Vec<ChangedCall>,
    pub latency_changes: Vec<LatencyChange>,
}

/// Reduce a run's ordered events to its tool-call records. Each
/// `tool_result` latency attaches to the earliest still-unpaired call of the
/// same tool, which preserves in-order pairing for the sequential protocol.
pub fn reduce_tool_calls(events: &[TraceEvent]) -> Vec<ToolCallRecord> {
    let mut records: Vec<ToolCallRecord> = Vec::new();
    for event in events {
        match event.kind {
            EventKind::ToolCall => {
                if let Some(tool) = &event.tool {
                    records.push(ToolCallRecord {
                        tool: tool.clone(),
                        arguments: event.params.clone().unwrap_or(Value::Null),
                        latency_ms: None,
                    });
                }
            }
            EventKind::ToolResult => {
                if let (Some(tool), Some(latency)) = (&event.tool, event.latency_ms) {
                    if let Some(record) = records
                        .iter_mut()
                        .find(|r| r.tool == *tool && r.latency_ms.is_none())
                    {
                        record.latency_ms = Some(latency);
                    }
                }
            }
            _ => {}
        }
    }
    records
}

fn group_by_tool(records: &[ToolCallRecord]) -> BTreeMap<&str, Vec<&ToolCallRecord>> {
    let mut groups: BTreeMap<&str, Vec<&ToolCallRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.tool.as_str()).or_default().push(record);
    }
    groups
}

fn mean_latency(calls: &[&ToolCallRecord]) -> Option<f64> {
    let latencies: Vec<u64> = calls.iter().filter_map(|c| c.latency_ms).collect();
    if latencies.is_empty() {
        return None;
    }
    Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
}

/// Compare two runs' tool-call records.
pub fn diff_runs(baseline: &[ToolCallRecord], current: &[ToolCallRecord]) -> DiffReport {
    let baseline_groups = group_by_tool(baseline);
    let current_groups = group_by_tool(current);

    let mut report = DiffReport {
        baseline_calls: baseline.len(),
        current_calls: current.len(),
        ..Default::default()
    };

    let mut tools: Vec<&str> = baseline_groups.keys().copied().collect();
    for tool in current_groups.keys() {
        if !baseline_groups.contains_key(tool) {
            tools.push(tool);
        }
    }
    tools.sort_unstable();

    for tool in tools {
        let in_baseline = baseline_groups.get(tool).map(Vec::as_slice).unwrap_or(&[]);
        let in_current = current_groups.get(tool).map(Vec::as_slice).unwrap_or(&[]);

        let paired = in_baseline.len().min(in_current.len());
        for (before, after) in in_baseline.iter().zip(in_current.iter()) {
            if before.arguments != after.arguments {
                report.changed.push(ChangedCall {
                    tool: tool.to_string(),
                    baseline_arguments: before.arguments.clone(),
                    current_arguments: after.arguments.clone(),
                });
            }
        }
        for surplus in &in_baseline[paired..] {
            report.removed.push(CallDelta {
                tool: tool.to_string(),
                arguments: surplus.arguments.clone(),
            });
        }
        for surplus in &in_current[paired..] {
            report.added.push(CallDelta {
                tool: tool.to_string(),
                arguments: surplus.arguments.clone(),
            });
        }

        if let (Some(base_mean), Some(cur_mean)) =
            (mean_latency(in_baseline), mean_latency(in_current))
        {
            if base_mean > 0.0 {
                let change_percent = (cur_mean - base_mean) / base_mean * 100.0;
                if change_percent.abs() > LATENCY_SHIFT_PERCENT {
                    report.latency_changes.push(LatencyChange {
                        tool: tool.to_string(),
                        baseline_mean_ms: base_mean,
                        current_mean_ms: cur_mean,
                        change_percent,
                    });
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tool: &str, arguments: Value, latency_ms: Option<u64>) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.to_string(),
            arguments,
            latency_ms,
        }
    }

    #[test]
    fn identical_traces_produce_an_empty_report() {
        let trace = vec![
            record("read_file", json!({"path": "/a"}), Some(10)),
            record("write_file", json!({"path": "/b", "content": "x"}), Some(20)),
        ];
        let report = diff_runs(&trace, &trace);
        assert!(report.added.is_empty());
        assert!(report.removed.is_empty());
        assert!(report.changed.is_empty());
        assert!(report.latency_changes.is_empty());
        assert_eq!(report.baseline_calls, 2);
        assert_eq!(report.current_calls, 2);
    }

    #[test]
    fn empty_inputs_never_fail() {
        let report = diff_runs(&[], &[]);
        assert_eq!(report, DiffReport::default());
    }

    #[test]
    fn changed_arguments_and_latency_regression() {
        let baseline = vec![record(
            "write_file",
            json!({"path": "/a", "content": "x"}),
            Some(50),
        )];
        let current = vec![record(
            "write_file",
            json!({"path": "/b", "content": "x"}),
            Some(120),
        )];
        let report = diff_runs(&baseline, &current);

        assert!(report.added.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].tool, "write_file");
        assert_eq!(report.changed[0].baseline_arguments, json!({"path": "/a", "content": "x"}));
        assert_eq!(report.changed[0].current_arguments, json!({"path": "/b", "content": "x"}));

        assert_eq!(report.latency_changes.len(), 1);
        let shift = &report.latency_changes[0];
        assert_eq!(shift.baseline_mean_ms, 50.0);
        assert_eq!(shift.current_mean_ms, 120.0);
        assert!((shift.change_percent - 140.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tool_only_on_one_side_is_added_or_removed_per_call() {
        let baseline = vec![
            record("read_file", json!({"path": "/a"}), None),
            record("read_file", json!({"path": "/b"}), None),
        ];
        let current = vec![record("list_dir", json!({"path": "/"}), None)];
        let report = diff_runs(&baseline, &current);

        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].tool, "list_dir");
        assert!(report.changed.is_empty());
    }

    #[test]
    fn surplus_calls_on_shared_tool_become_deltas() {
        let baseline = vec![record("read_file", json!({"path": "/a"}), None)];
        let current = vec![
            record("read_file", json!({"path": "/a"}), None),
            record("read_file", json!({"path": "/c"}), None),
        ];
        let report = diff_runs(&baseline, &current);
        assert!(report.changed.is_empty());
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].arguments, json!({"path": "/c"}));
    }

    #[test]
    fn small_latency_shift_is_not_reported() {
        let baseline = vec![record("read_file", json!({}), Some(100))];
        let current = vec![record("read_file", json!({}), Some(115))];
        let report = diff_runs(&baseline, &current);
        assert!(report.latency_changes.is_empty());
    }

    #[test]
    fn reduce_pairs_results_in_order() {
        use crate::domain::run::RunId;
        use chrono::Utc;

        let run_id = RunId::new();
        let mk = |id: i64, kind: EventKind, tool: &str, params: Option<Value>, latency: Option<u64>| {
            TraceEvent {
                id,
                run_id,
                kind,
                timestamp: Utc::now(),
                method: None,
                tool: Some(tool.to_string()),
                correlation_id: None,
                params,
                result: None,
                error: None,
                latency_ms: latency,
                chaos_applied: None,
            }
        };

        let events = vec![
            mk(1, EventKind::ToolCall, "read_file", Some(json!({"path": "/a"})), None),
            mk(2, EventKind::ToolCall, "read_file", Some(json!({"path": "/b"})), None),
            mk(3, EventKind::ToolResult, "read_file", None, Some(11)),
            mk(4, EventKind::ToolResult, "read_file", None, Some(22)),
        ];
        let records = reduce_tool_calls(&events);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].latency_ms, Some(11));
        assert_eq!(records[1].latency_ms, Some(22));
    }
}
