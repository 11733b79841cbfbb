// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Signals
//!
//! Per-project key/value flags with last-write-wins semantics. Values are
//! strings; a flag counts as raised when its value is `"true"`.
//!
//! | Key | Written by | Meaning |
//! |-----|-----------|---------|
//! | `BLOCKER` | agents | free-text reason the project cannot proceed |
//! | `TRIGGER_QA` | orchestrator / `qa` command | QA pass requested |
//! | `TRIGGER_MANAGER` | orchestrator / `manager` command | manager review requested |
//! | `QA_PASSED` | orchestrator | QA signed off |
//! | `PROJECT_SIGNED_OFF` | orchestrator | manager signed off |
//! | `COMPLETED` | feature auto-completion | every feature done and passing |
//!
//! The privileged keys cannot be written through the agent-facing setter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BLOCKER: &str = "BLOCKER";
pub const TRIGGER_QA: &str = "TRIGGER_QA";
pub const TRIGGER_MANAGER: &str = "TRIGGER_MANAGER";
pub const QA_PASSED: &str = "QA_PASSED";
pub const PROJECT_SIGNED_OFF: &str = "PROJECT_SIGNED_OFF";
pub const COMPLETED: &str = "COMPLETED";

pub const PRIVILEGED_KEYS: [&str; 5] = [
    PROJECT_SIGNED_OFF,
    TRIGGER_QA,
    TRIGGER_MANAGER,
    QA_PASSED,
    COMPLETED,
];

/// Substring marking a `BLOCKER` raised while waiting for human UI checks.
pub const UI_VERIFICATION_MARKER: &str = "UI Verification Required";

pub const TRUE_VALUE: &str = "true";

pub fn is_privileged(key: &str) -> bool {
    PRIVILEGED_KEYS.contains(&key)
}

pub fn is_raised(value: &str) -> bool {
    value == TRUE_VALUE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub project_id: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_keys() {
        for key in PRIVILEGED_KEYS {
            assert!(is_privileged(key));
        }
        assert!(!is_privileged(BLOCKER));
        assert!(!is_privileged("completed"));
    }
}
