//! Temporary grant reaper.
//!
//! Each pass expires every active grant with `expires_at <= now` and writes
//! one audit record per row in the same store transaction. A pass is
//! idempotent: rows already expired are no longer active and are skipped.
//! Concurrent passes are excluded by the store's reaper lock; the loser
//! reports `None` and tries again on its next tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::store::{GrantStore, ReapReport, StoreError, Stores};

/// Reaper runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReaperStats {
    pub passes: u64,
    /// Passes that found the lock held elsewhere.
    pub skipped: u64,
    pub failures: u64,
    pub expired_permissions: u64,
    pub expired_roles: u64,
}

impl ReaperStats {
    fn record(&mut self, outcome: &Result<Option<ReapReport>, StoreError>) {
        self.passes += 1;
        match outcome {
            Ok(Some(report)) => {
                self.expired_permissions += report.expired_permissions.len() as u64;
                self.expired_roles += report.expired_roles.len() as u64;
            }
            Ok(None) => self.skipped += 1,
            Err(_) => self.failures += 1,
        }
    }
}

/// Handle to control a running reaper.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ReaperStats>>,
}

impl ReaperHandle {
    /// Request graceful shutdown and wait for the current pass to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> ReaperStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrantReaper {
    grants: Arc<dyn GrantStore>,
}

impl core::fmt::Debug for GrantReaper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GrantReaper").finish_non_exhaustive()
    }
}

impl GrantReaper {
    pub fn new(stores: &Stores) -> Self {
        Self {
            grants: stores.grants.clone(),
        }
    }

    /// One pass at `now`. `None` when another pass holds the lock.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Option<ReapReport>, StoreError> {
        let outcome = self.grants.reap_expired(now).await;
        match &outcome {
            Ok(Some(report)) if report.total() > 0 => info!(
                expired_permissions = report.expired_permissions.len(),
                expired_roles = report.expired_roles.len(),
                "expired temporary grants"
            ),
            Ok(Some(_)) => debug!("reaper pass found nothing due"),
            Ok(None) => debug!("reaper lock held elsewhere; pass skipped"),
            Err(e) => error!(error = %e, "reaper pass failed; retrying next interval"),
        }
        outcome
    }

    /// Run a pass every `interval` until the handle is shut down.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ReaperStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "grant reaper started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let outcome = self.run_once(Utc::now()).await;
                        if let Ok(mut s) = stats_clone.lock() {
                            s.record(&outcome);
                        }
                    }
                }
            }

            info!("grant reaper stopped");
        });

        ReaperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}
