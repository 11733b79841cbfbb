// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod feature_service;
pub mod lock_manager;
pub mod maintenance;
pub mod repository_factory;
pub mod review;
pub mod session;
pub mod signal_channel;
pub mod ui_verification;

pub use feature_service::{FeatureError, FeatureService};
pub use lock_manager::{LeaseLockManager, LockError};
pub use maintenance::{MaintenanceSweeper, SweepError, SweepReport};
pub use repository_factory::Repositories;
pub use review::QaReport;
pub use session::{SessionDeps, SessionError, SessionOrchestrator, SessionOutcome};
pub use signal_channel::{SignalChannel, SignalError};
