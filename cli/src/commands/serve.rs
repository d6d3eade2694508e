// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;

use mcptap_core::presentation;

use super::open_coordinator;

#[derive(Args)]
pub struct ServeArgs {
    /// HTTP API host
    #[arg(long, env = "MCPTAP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP API port
    #[arg(long, env = "MCPTAP_PORT", default_value = "3001")]
    pub port: u16,
}

pub async fn execute(args: ServeArgs, db_path: &str) -> Result<()> {
    let coordinator = open_coordinator(db_path).await?;
    presentation::serve(coordinator, &args.host, args.port).await
}
