// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod journal;
pub mod proxy;
pub mod rpc_client;

pub use db::Database;
pub use event_bus::{BusError, BusMessage, EventBus, Topic};
pub use journal::SqliteJournal;
pub use proxy::{EndReason, ProxyError, ProxyHandle, SessionSummary, StdioProxy};
pub use rpc_client::{RpcClient, RpcClientError};
