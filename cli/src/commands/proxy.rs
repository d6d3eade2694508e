// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;
use uuid::Uuid;

use mcptap_core::domain::chaos::ChaosConfig;
use mcptap_core::domain::project::AgentId;
use mcptap_core::domain::run::RunKind;
use mcptap_core::infrastructure::StdioProxy;

use super::open_coordinator;

#[derive(Args)]
pub struct ProxyArgs {
    /// Tool-server command line to spawn (quote-aware)
    #[arg(long)]
    pub target: String,

    /// Agent to attribute the run to
    #[arg(long)]
    pub agent: Option<String>,

    /// Path to a chaos config JSON file
    #[arg(long, value_name = "FILE")]
    pub inject: Option<String>,
}

pub async fn execute(args: ProxyArgs, db_path: &str) -> Result<()> {
    // Chaos config errors are fatal before anything touches the journal.
    let chaos = match &args.inject {
        Some(path) => Some(ChaosConfig::from_file(path)?),
        None => None,
    };
    let agent_id = parse_agent(args.agent.as_deref())?;

    let coordinator = open_coordinator(db_path).await?;
    let chaos_snapshot = chaos
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("serializing chaos snapshot")?;

    let run = coordinator
        .create_run(
            agent_id,
            RunKind::Proxy,
            &args.target,
            chaos_snapshot.as_ref(),
        )
        .await?;
    info!(run_id = %run.id, "proxy run created");

    let proxy = StdioProxy::new(coordinator.journal(), coordinator.bus());
    let mut handle = proxy.start(run.id, agent_id, &args.target, chaos).await?;

    if let Some(trigger) = handle.take_shutdown_trigger() {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = trigger.send(());
        });
    }

    let summary = handle.join().await?;
    eprintln!(
        "{} {} calls, {} errors",
        "session ended:".green(),
        summary.counters.total_calls,
        summary.counters.total_errors
    );
    Ok(())
}

fn parse_agent(raw: Option<&str>) -> Result<Option<AgentId>> {
    match raw {
        None => Ok(None),
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Ok(Some(AgentId(id))),
            Err(_) => bail!("--agent must be a UUID, got {raw:?}"),
        },
    }
}
