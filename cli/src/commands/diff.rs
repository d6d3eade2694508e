// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Result};
use clap::Args;
use uuid::Uuid;

use mcptap_core::presentation::api::compare;
use mcptap_core::domain::run::RunId;

use super::open_coordinator;

#[derive(Args)]
pub struct DiffArgs {
    /// Baseline run id
    pub baseline: String,

    /// Current run id
    pub current: String,
}

pub async fn execute(args: DiffArgs, db_path: &str) -> Result<()> {
    let baseline = parse_run(&args.baseline)?;
    let current = parse_run(&args.current)?;

    let coordinator = open_coordinator(db_path).await?;
    let report = compare(&coordinator, baseline, current).await?;

    // The comparison result is data; rendering stays out of the core.
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_run(raw: &str) -> Result<RunId> {
    match Uuid::parse_str(raw) {
        Ok(id) => Ok(RunId(id)),
        Err(_) => bail!("run id must be a UUID, got {raw:?}"),
    }
}
