// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Project & Agent Aggregates
//!
//! A [`Project`] groups the tool-server configurations a user is debugging.
//! An [`Agent`] is one named, configured tool-server invocation inside a
//! project: its target command line plus an optional chaos config blob.
//!
//! Agent names are unique within a project; project names are unique
//! globally. Deleting a project cascades to its agents and their runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a [`Project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Named grouping of agents under one debugging effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description,
            created_at: Utc::now(),
        }
    }
}

/// A named, configured tool-server invocation within a project.
///
/// `target` is the raw command line spawned for proxy and stress runs;
/// `chaos` is an opaque chaos-config blob copied by value into each run at
/// creation so later edits do not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub project_id: ProjectId,
    pub name: String,
    pub target: String,
    pub chaos: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        target: impl Into<String>,
        chaos: Option<Value>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            project_id,
            name: name.into(),
            target: target.into(),
            chaos,
            created_at: Utc::now(),
        }
    }
}
