// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # File Locks (Leases)
//!
//! A [`FileLock`] is a time-bounded exclusive claim on one path inside one
//! project. At most one unexpired row exists per `(project_id, path)`. An
//! expired row may be taken over by any other claimant ("hijack"), so a holder
//! that crashed never blocks a path for longer than one lease.
//!
//! Lease duration and poll interval default to the constants below and can be
//! overridden through [`LockPolicy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Administrative identity allowed to release any lock.
pub const MANAGER_IDENTITY: &str = "MANAGER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    pub project_id: String,
    pub path: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.agent_id == agent_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    #[serde(with = "humantime_serde", default = "default_lease")]
    pub lease_duration: Duration,
    #[serde(with = "humantime_serde", default = "default_poll")]
    pub poll_interval: Duration,
}

fn default_lease() -> Duration {
    DEFAULT_LEASE_DURATION
}

fn default_poll() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LockPolicy {
    /// Lease length as a chrono duration for timestamp arithmetic. Clamped to
    /// a century.
    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_duration)
            .map(|d| d.min(chrono::Duration::days(36_500)))
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let lock = FileLock {
            project_id: "p".into(),
            path: "/a.go".into(),
            agent_id: "agent1".into(),
            created_at: now,
            expires_at: now,
        };

        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_policy_parses_humantime() {
        let policy: LockPolicy =
            serde_yaml::from_str("lease_duration: 2m\npoll_interval: 50ms\n").unwrap();

        assert_eq!(policy.lease_duration, Duration::from_secs(120));
        assert_eq!(policy.poll_interval, Duration::from_millis(50));
        assert_eq!(policy.lease(), chrono::Duration::minutes(2));
    }
}
