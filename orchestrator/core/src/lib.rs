// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Coordination engine for fleets of containerized coding agents: the task
//! graph, the lease-based file lock manager, the signal channel, the session
//! loop and the maintenance sweeper.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Admit, order, lock and complete concurrent agent work

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
