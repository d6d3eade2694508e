// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod chaos;
pub mod command;
pub mod events;
pub mod mutation;
pub mod outcome;
pub mod project;
pub mod repository;
pub mod rpc;
pub mod run;

pub use chaos::{ChaosApplied, ChaosConfig, ChaosEngine, ChaosRule, Probabilistic};
pub use command::split_command;
pub use events::{EventKind, NewEvent, TraceEvent};
pub use mutation::{generate_mutations, Mutation, MutationKind};
pub use outcome::{classify_outcome, Outcome};
pub use project::{Agent, AgentId, Project, ProjectId};
pub use repository::{Journal, JournalError, RunFilter};
pub use rpc::{RpcFrame, RpcMessage};
pub use run::{Run, RunCounters, RunId, RunKind, RunStatus, StressCounters};
