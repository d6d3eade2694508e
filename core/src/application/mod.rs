// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod coordinator;
pub mod diff;
pub mod stress;

pub use coordinator::Coordinator;
pub use diff::{diff_runs, reduce_tool_calls, DiffReport, ToolCallRecord};
pub use stress::{StressRunner, StressSweepReport};
