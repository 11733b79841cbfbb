// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Maintenance Sweeper
//!
//! Periodic garbage collection of the coordination store:
//!
//! 1. lock rows whose lease ended
//! 2. signals older than the retention window, except the privileged keys
//! 3. observations beyond the global cap, oldest first
//!
//! Steps run in that order and the first failure stops the sweep. Rows
//! already deleted by earlier steps stay deleted. Re-running is harmless.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::clock::Clock;
use crate::domain::config::MaintenanceConfig;
use crate::domain::repository::{LockRepository, ObservationRepository, RepositoryError, SignalRepository};
use crate::domain::signal::PRIVILEGED_KEYS;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to clean expired locks: {0}")]
    Locks(#[source] RepositoryError),

    #[error("failed to clean old signals: {0}")]
    Signals(#[source] RepositoryError),

    #[error("failed to trim observations: {0}")]
    Observations(#[source] RepositoryError),
}

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_locks: u64,
    pub stale_signals: u64,
    pub trimmed_observations: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.expired_locks + self.stale_signals + self.trimmed_observations
    }
}

pub struct MaintenanceSweeper {
    locks: Arc<dyn LockRepository>,
    signals: Arc<dyn SignalRepository>,
    observations: Arc<dyn ObservationRepository>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
}

impl MaintenanceSweeper {
    pub fn new(
        locks: Arc<dyn LockRepository>,
        signals: Arc<dyn SignalRepository>,
        observations: Arc<dyn ObservationRepository>,
        clock: Arc<dyn Clock>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            locks,
            signals,
            observations,
            clock,
            config,
        }
    }

    pub async fn cleanup(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        report.expired_locks = self.locks.delete_expired_locks(now).await.map_err(SweepError::Locks)?;
        metrics::counter!("recac_sweeper_deleted_total", "table" => "file_locks").increment(report.expired_locks);

        let retention = chrono::Duration::from_std(self.config.signal_retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        report.stale_signals = self
            .signals
            .delete_signals_before(now - retention, &PRIVILEGED_KEYS)
            .await
            .map_err(SweepError::Signals)?;
        metrics::counter!("recac_sweeper_deleted_total", "table" => "signals").increment(report.stale_signals);

        report.trimmed_observations = self
            .observations
            .trim_observations(self.config.observation_cap)
            .await
            .map_err(SweepError::Observations)?;
        metrics::counter!("recac_sweeper_deleted_total", "table" => "observations")
            .increment(report.trimmed_observations);

        if report.total() > 0 {
            info!(
                expired_locks = report.expired_locks,
                stale_signals = report.stale_signals,
                trimmed_observations = report.trimmed_observations,
                "Maintenance sweep removed rows"
            );
        } else {
            debug!("Maintenance sweep found nothing to remove");
        }
        Ok(report)
    }

    /// Sweep every `interval` until cancelled. Failures are logged and the
    /// next tick tries again.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Maintenance sweeper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!(error = %e, "Maintenance sweep failed");
                    }
                }
            }
        }
    }

    fn interval(&self) -> Duration {
        self.config.interval.max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::lock::FileLock;
    use crate::domain::observation::Observation;
    use crate::domain::signal::Signal;
    use crate::infrastructure::repositories::InMemoryCoordinationStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    #[tokio::test]
    async fn test_cleanup_scenario() {
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryCoordinationStore::new());
        let start = clock.now();

        store.set_signal("p", "STALE", "x", start).await.unwrap();
        store.set_signal("p", "COMPLETED", "true", start).await.unwrap();
        store
            .insert_lock(&FileLock {
                project_id: "p".into(),
                path: "/a.go".into(),
                agent_id: "agent1".into(),
                created_at: start,
                expires_at: start + chrono::Duration::minutes(10),
            })
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(25));
        store.set_signal("p", "FRESH", "y", clock.now()).await.unwrap();

        let sweeper = MaintenanceSweeper::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(clock.clone()),
            MaintenanceConfig::default(),
        );
        let report = sweeper.cleanup().await.unwrap();
        assert_eq!(report.expired_locks, 1);
        assert_eq!(report.stale_signals, 1);

        assert!(store.find_lock("p", "/a.go").await.unwrap().is_none());
        assert!(store.get_signal("p", "STALE").await.unwrap().is_none());
        assert_eq!(store.get_signal("p", "COMPLETED").await.unwrap().as_deref(), Some("true"));
        assert!(store.get_signal("p", "FRESH").await.unwrap().is_some());

        // Caught up: nothing further to remove
        assert_eq!(sweeper.cleanup().await.unwrap().total(), 0);
    }

    struct BrokenSignals;

    #[async_trait]
    impl SignalRepository for BrokenSignals {
        async fn set_signal(&self, _: &str, _: &str, _: &str, _: DateTime<Utc>) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn get_signal(&self, _: &str, _: &str) -> Result<Option<String>, RepositoryError> {
            Ok(None)
        }
        async fn delete_signal(&self, _: &str, _: &str) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_signals(&self, _: &str) -> Result<Vec<Signal>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn delete_signals_before(&self, _: DateTime<Utc>, _: &[&str]) -> Result<u64, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".into()))
        }
    }

    #[tokio::test]
    async fn test_failure_names_step_and_keeps_prior_deletions() {
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryCoordinationStore::new());
        let start = clock.now();
        store
            .insert_lock(&FileLock {
                project_id: "p".into(),
                path: "/a.go".into(),
                agent_id: "agent1".into(),
                created_at: start,
                expires_at: start,
            })
            .await
            .unwrap();
        store.save_observation("p", "a", "kept", start).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));

        let sweeper = MaintenanceSweeper::new(
            store.clone(),
            Arc::new(BrokenSignals),
            store.clone(),
            Arc::new(clock),
            MaintenanceConfig {
                observation_cap: 0,
                ..MaintenanceConfig::default()
            },
        );
        let err = sweeper.cleanup().await.unwrap_err();
        assert!(err.to_string().starts_with("failed to clean old signals"));

        assert!(store.find_lock("p", "/a.go").await.unwrap().is_none());
        let history: Vec<Observation> = store.query_history("p", 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
