// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod repositories;
pub mod runtime;
pub mod session_store;

pub use runtime::DockerContainerRunner;
pub use session_store::FileSessionManager;
