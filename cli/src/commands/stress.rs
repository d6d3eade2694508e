// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::time::Duration;
use uuid::Uuid;

use mcptap_core::application::StressRunner;
use mcptap_core::domain::project::AgentId;
use mcptap_core::domain::run::RunKind;

use super::open_coordinator;

#[derive(Args)]
pub struct StressArgs {
    /// Tool-server command line to spawn (quote-aware)
    #[arg(long)]
    pub target: String,

    /// Agent to attribute the run to
    #[arg(long)]
    pub agent: Option<String>,

    /// Per-probe timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub probe_timeout_ms: u64,
}

pub async fn execute(args: StressArgs, db_path: &str) -> Result<()> {
    let agent_id = match args.agent.as_deref() {
        None => None,
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(AgentId(id)),
            Err(_) => bail!("--agent must be a UUID, got {raw:?}"),
        },
    };

    let coordinator = open_coordinator(db_path).await?;
    let run = coordinator
        .create_run(agent_id, RunKind::Stress, &args.target, None)
        .await?;

    let runner = StressRunner::new(coordinator.clone())
        .with_probe_timeout(Duration::from_millis(args.probe_timeout_ms));
    let report = runner.run(run.id, agent_id, &args.target).await?;

    println!(
        "{} {} tools probed, {} pass / {} graceful / {} crash, score {}",
        "stress sweep:".green(),
        report.tools_probed,
        report.counters.passed,
        report.counters.graceful,
        report.counters.crashed,
        report.counters.score.to_string().bold()
    );
    Ok(())
}
