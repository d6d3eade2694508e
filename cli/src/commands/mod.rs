// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod diff;
pub mod proxy;
pub mod serve;
pub mod stress;

pub use diff::DiffArgs;
pub use proxy::ProxyArgs;
pub use serve::ServeArgs;
pub use stress::StressArgs;

use anyhow::Result;
use std::sync::Arc;

use mcptap_core::application::Coordinator;
use mcptap_core::infrastructure::{Database, EventBus, SqliteJournal};

/// Open the journal and build an isolated coordinator around it.
pub async fn open_coordinator(db_path: &str) -> Result<Coordinator> {
    let url = if db_path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{db_path}")
    };
    let db = Database::connect(&url).await?;
    let journal = Arc::new(SqliteJournal::new(db));
    Ok(Coordinator::new(journal, EventBus::with_default_capacity()))
}
