// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Observation history: free-text notes recorded by agents and the session
//! loop, kept newest-first and trimmed to a fixed cap by the sweeper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub project_id: String,
    pub agent_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
