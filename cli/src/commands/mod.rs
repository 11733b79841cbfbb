// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for agent-bridge

pub mod config;
pub mod feature;
pub mod locks;
pub mod maintenance;
pub mod sessions;
pub mod signal;
pub mod spec;

pub use self::config::ConfigCommand;
pub use self::feature::FeatureCommand;
pub use self::locks::LocksCommand;
pub use self::sessions::SessionsCommand;
pub use self::signal::Verdict;
pub use self::spec::SpecCommand;
