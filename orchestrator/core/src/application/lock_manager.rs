// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lease Lock Manager
//!
//! Polling acquire built on the single-statement primitives of
//! [`LockRepository`]. Each poll reads the row for `(project, path)` and then:
//!
//! 1. no row: insert one owned by the caller (losing the insert race retries)
//! 2. expired row: hijack it for the caller
//! 3. unexpired row held by the caller: renew the lease
//! 4. unexpired row held by someone else: sleep one poll interval and retry
//!
//! Waiters are not queued; whichever poll lands first after a release wins.
//! Store errors abort the acquire immediately. A clean timeout is `Ok(false)`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the lease-based distributed lock contract

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::clock::Clock;
use crate::domain::lock::{FileLock, LockPolicy, MANAGER_IDENTITY};
use crate::domain::repository::{LockRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock acquisition cancelled")]
    Cancelled,

    #[error("'{0}' is reserved and cannot hold locks")]
    ReservedIdentity(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Inserted,
    Hijacked,
    Renewed,
    Busy,
}

impl Attempt {
    fn acquired(self) -> bool {
        !matches!(self, Attempt::Busy)
    }
}

#[derive(Clone)]
pub struct LeaseLockManager {
    locks: Arc<dyn LockRepository>,
    clock: Arc<dyn Clock>,
    policy: LockPolicy,
}

impl LeaseLockManager {
    pub fn new(locks: Arc<dyn LockRepository>, clock: Arc<dyn Clock>, policy: LockPolicy) -> Self {
        Self { locks, clock, policy }
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Acquire `path` for `agent_id`, polling until `timeout` elapses. A zero
    /// timeout tries exactly once.
    pub async fn acquire(
        &self,
        project_id: &str,
        path: &str,
        agent_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, LockError> {
        if agent_id == MANAGER_IDENTITY {
            return Err(LockError::ReservedIdentity(agent_id.to_string()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }

            let attempt = self.try_acquire(project_id, path, agent_id).await?;
            if attempt.acquired() {
                metrics::counter!("recac_lock_acquired_total").increment(1);
                debug!(project_id, path, agent_id, ?attempt, "Lock acquired");
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                metrics::counter!("recac_lock_timeout_total").increment(1);
                debug!(project_id, path, agent_id, "Lock acquire timed out");
                return Ok(false);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(self.policy.poll_interval.min(remaining)) => {}
            }
        }
    }

    async fn try_acquire(&self, project_id: &str, path: &str, agent_id: &str) -> Result<Attempt, RepositoryError> {
        let now = self.clock.now();
        let expires_at = self.expiry_from(now);

        match self.locks.find_lock(project_id, path).await? {
            None => {
                let lock = new_lock(project_id, path, agent_id, now, expires_at);
                if self.locks.insert_lock(&lock).await? {
                    Ok(Attempt::Inserted)
                } else {
                    Ok(Attempt::Busy)
                }
            }
            Some(current) if current.is_expired(now) => {
                let lock = new_lock(project_id, path, agent_id, now, expires_at);
                if self.locks.hijack_lock(&lock, now).await? {
                    metrics::counter!("recac_lock_hijacked_total").increment(1);
                    warn!(
                        project_id,
                        path,
                        agent_id,
                        previous_owner = %current.agent_id,
                        expired_at = %current.expires_at,
                        "Hijacked expired lock"
                    );
                    Ok(Attempt::Hijacked)
                } else {
                    Ok(Attempt::Busy)
                }
            }
            Some(current) if current.is_held_by(agent_id) => {
                if self.locks.renew_lock(project_id, path, agent_id, now, expires_at).await? {
                    Ok(Attempt::Renewed)
                } else {
                    Ok(Attempt::Busy)
                }
            }
            Some(_) => Ok(Attempt::Busy),
        }
    }

    /// Extend a lease the caller already holds. False if it lapsed or moved.
    pub async fn renew(&self, project_id: &str, path: &str, agent_id: &str) -> Result<bool, LockError> {
        let now = self.clock.now();
        let renewed = self
            .locks
            .renew_lock(project_id, path, agent_id, now, self.expiry_from(now))
            .await?;
        Ok(renewed)
    }

    /// Delete the lock if `agent_id` owns it. `MANAGER` deletes it regardless
    /// of owner. Releasing someone else's lock is a silent no-op.
    pub async fn release(&self, project_id: &str, path: &str, agent_id: &str) -> Result<(), LockError> {
        let removed = if agent_id == MANAGER_IDENTITY {
            let removed = self.locks.delete_lock(project_id, path).await?;
            if removed > 0 {
                info!(project_id, path, "Lock force-released by manager");
            }
            removed
        } else {
            self.locks.delete_owned_lock(project_id, path, agent_id).await?
        };
        debug!(project_id, path, agent_id, removed, "Lock released");
        Ok(())
    }

    pub async fn force_release(&self, project_id: &str, path: &str) -> Result<(), LockError> {
        self.release(project_id, path, MANAGER_IDENTITY).await
    }

    /// Drop every lock `agent_id` holds in the project.
    pub async fn release_all(&self, project_id: &str, agent_id: &str) -> Result<u64, LockError> {
        let removed = self.locks.delete_agent_locks(project_id, agent_id).await?;
        if removed > 0 {
            info!(project_id, agent_id, removed, "Released all locks held by agent");
        }
        Ok(removed)
    }

    pub async fn active_locks(&self, project_id: &str) -> Result<Vec<FileLock>, LockError> {
        Ok(self.locks.list_active_locks(project_id, self.clock.now()).await?)
    }

    /// Acquire every path or none. Paths are taken in sorted order so two
    /// agents claiming overlapping sets cannot deadlock each other. On any
    /// miss the partial set is released and `None` is returned.
    pub async fn acquire_all(
        &self,
        project_id: &str,
        paths: &[String],
        agent_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<String>>, LockError> {
        let mut ordered: Vec<String> = paths.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for path in ordered {
            match self.acquire(project_id, &path, agent_id, timeout, cancel).await {
                Ok(true) => held.push(path),
                Ok(false) => {
                    self.release_paths(project_id, &held, agent_id).await;
                    return Ok(None);
                }
                Err(e) => {
                    self.release_paths(project_id, &held, agent_id).await;
                    return Err(e);
                }
            }
        }
        Ok(Some(held))
    }

    /// Best-effort release used on cleanup paths; failures are logged.
    pub async fn release_paths(&self, project_id: &str, paths: &[String], agent_id: &str) {
        for path in paths {
            if let Err(e) = self.release(project_id, path, agent_id).await {
                warn!(project_id, path = %path, agent_id, error = %e, "Failed to release lock");
            }
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.policy.lease()
    }
}

fn new_lock(project_id: &str, path: &str, agent_id: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> FileLock {
    FileLock {
        project_id: project_id.to_string(),
        path: path.to_string(),
        agent_id: agent_id.to_string(),
        created_at: now,
        expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryCoordinationStore;

    fn manager(clock: &ManualClock) -> LeaseLockManager {
        let policy = LockPolicy {
            lease_duration: Duration::from_secs(600),
            poll_interval: Duration::from_millis(10),
        };
        LeaseLockManager::new(Arc::new(InMemoryCoordinationStore::new()), Arc::new(clock.clone()), policy)
    }

    #[tokio::test]
    async fn test_acquire_then_contend_then_hijack() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let cancel = CancellationToken::new();

        assert!(locks.acquire("p", "/a.go", "agent1", Duration::from_secs(1), &cancel).await.unwrap());
        assert!(!locks.acquire("p", "/a.go", "agent2", Duration::from_millis(50), &cancel).await.unwrap());

        clock.advance(chrono::Duration::minutes(11));
        assert!(locks.acquire("p", "/a.go", "agent2", Duration::ZERO, &cancel).await.unwrap());

        let active = locks.active_locks("p").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, "agent2");
    }

    #[tokio::test]
    async fn test_reacquire_by_owner_renews() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let cancel = CancellationToken::new();

        assert!(locks.acquire("p", "/a.go", "agent1", Duration::ZERO, &cancel).await.unwrap());
        let first = locks.active_locks("p").await.unwrap()[0].expires_at;

        clock.advance(chrono::Duration::minutes(5));
        assert!(locks.acquire("p", "/a.go", "agent1", Duration::ZERO, &cancel).await.unwrap());
        let second = locks.active_locks("p").await.unwrap()[0].expires_at;
        assert_eq!(second - first, chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_release_rules() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let cancel = CancellationToken::new();
        assert!(locks.acquire("p", "/a.go", "agent1", Duration::ZERO, &cancel).await.unwrap());

        locks.release("p", "/a.go", "agent2").await.unwrap();
        assert_eq!(locks.active_locks("p").await.unwrap().len(), 1);

        locks.release("p", "/a.go", MANAGER_IDENTITY).await.unwrap();
        assert!(locks.active_locks("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manager_cannot_acquire() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let result = locks
            .acquire("p", "/a.go", MANAGER_IDENTITY, Duration::ZERO, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LockError::ReservedIdentity(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_polling_returns_promptly() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let cancel = CancellationToken::new();
        assert!(locks.acquire("p", "/a.go", "agent1", Duration::ZERO, &cancel).await.unwrap());

        let waiter = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { locks.acquire("p", "/a.go", "agent2", Duration::from_secs(30), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(LockError::Cancelled)));
        assert_eq!(locks.active_locks("p").await.unwrap()[0].agent_id, "agent1");
    }

    #[tokio::test]
    async fn test_acquire_all_is_all_or_nothing() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let cancel = CancellationToken::new();
        assert!(locks.acquire("p", "/b.go", "agent1", Duration::ZERO, &cancel).await.unwrap());

        let paths = vec!["/c.go".to_string(), "/a.go".to_string(), "/b.go".to_string()];
        let held = locks.acquire_all("p", &paths, "agent2", Duration::ZERO, &cancel).await.unwrap();
        assert!(held.is_none());

        let active = locks.active_locks("p").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, "agent1");

        locks.release_all("p", "agent1").await.unwrap();
        let held = locks.acquire_all("p", &paths, "agent2", Duration::ZERO, &cancel).await.unwrap();
        assert_eq!(held.unwrap(), vec!["/a.go", "/b.go", "/c.go"]);
    }
}
