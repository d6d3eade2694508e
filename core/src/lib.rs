// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # mcptap core
//!
//! Data-plane engine for the mcptap tool-protocol interceptor: the stdio
//! proxy, the schema-driven stress runner, the durable trace journal, the
//! run-scoped fan-out bus, and the trace diff engine.
//!
//! # Architecture
//!
//! - **domain** — entities, value objects, and pure algorithms
//! - **application** — services wiring domain logic to infrastructure
//! - **infrastructure** — SQLite journal, event bus, proxy and RPC plumbing
//! - **presentation** — HTTP API and websocket subscription transport

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
