// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure coordination types and the collaborator contracts the engine depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Features, task graph, leases, signals, sessions, store traits

pub mod agent;
pub mod clock;
pub mod config;
pub mod feature;
pub mod lock;
pub mod observation;
pub mod repository;
pub mod runtime;
pub mod session;
pub mod signal;
pub mod task_graph;
