//! Disconnect cleanup monitor.
//!
//! Applies the compensating writes left behind by clients that vanished
//! while holding a lease. Every connected client may run one, so the same
//! record can be processed by several monitors at once; each step is safe to
//! repeat. A revert or unlock is only written while the shape is still
//! locked by the record's user, and the record is deleted afterwards whether
//! or not that write went through.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use shapesync_core::{CleanupKey, CleanupRecord};
use shapesync_session::{CleanupChange, CleanupFeed, FeedEvent, SessionStore};

use crate::repo::ShapeRepo;

/// Result of processing one cleanup record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Position restored and lock cleared
    Reverted,
    /// Lock cleared
    Unlocked,
    /// Shape no longer locked by the record's user; nothing written
    Stale,
    /// Shape was deleted
    Gone,
    /// Record belongs to another canvas; left for its own monitor
    OtherCanvas,
    /// A store call failed; logged and dropped
    Failed,
}

/// Watches the cleanup namespace for one canvas
#[derive(Clone)]
pub struct CleanupMonitor {
    repo: ShapeRepo,
    sessions: Arc<dyn SessionStore>,
    rescan_interval: Duration,
}

impl std::fmt::Debug for CleanupMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupMonitor")
            .field("canvas", self.repo.canvas_id())
            .field("rescan_interval", &self.rescan_interval)
            .finish()
    }
}

impl CleanupMonitor {
    pub fn new(repo: ShapeRepo, sessions: Arc<dyn SessionStore>, rescan_interval: Duration) -> Self {
        Self {
            repo,
            sessions,
            rescan_interval,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// Reacts to the live feed, and rescans everything pending on start, after
    /// the feed lags, and on every rescan tick.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            canvas = %self.repo.canvas_id(),
            rescan_ms = self.rescan_interval.as_millis() as u64,
            "Cleanup monitor started"
        );

        // Subscribe before the first scan so nothing slips between the two
        let mut feed = Some(self.sessions.watch_cleanup());
        let mut interval = tokio::time::interval(self.rescan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Cleanup monitor stopping");
                    break;
                }
                event = next_event(&mut feed) => match event {
                    Some(FeedEvent::Change(CleanupChange::Written { key, record })) => {
                        self.process(&key, &record).await;
                    }
                    Some(FeedEvent::Change(CleanupChange::Removed { .. })) => {}
                    Some(FeedEvent::Lagged(missed)) => {
                        tracing::warn!(missed, "Cleanup feed lagged, rescanning");
                        self.process_pending().await;
                    }
                    None => {
                        tracing::warn!("Cleanup feed closed, falling back to rescans");
                        feed = None;
                    }
                },
                _ = interval.tick() => {
                    self.process_pending().await;
                }
            }
        }
    }

    /// Process every record currently pending; returns how many were seen
    pub async fn process_pending(&self) -> usize {
        let pending = match self.sessions.pending_cleanup().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending cleanup");
                return 0;
            }
        };
        for (key, record) in &pending {
            self.process(key, record).await;
        }
        pending.len()
    }

    /// Apply one record. Never fails; problems are logged.
    pub async fn process(&self, key: &CleanupKey, record: &CleanupRecord) -> CleanupOutcome {
        if record.canvas_id != *self.repo.canvas_id() {
            return CleanupOutcome::OtherCanvas;
        }

        let outcome = self.apply(key, record).await;
        match outcome {
            CleanupOutcome::Reverted | CleanupOutcome::Unlocked => {
                tracing::info!(key = %key, outcome = ?outcome, "Applied disconnect cleanup");
            }
            _ => tracing::debug!(key = %key, outcome = ?outcome, "Disconnect cleanup had nothing to do"),
        }

        if let Err(e) = self.sessions.remove_cleanup(key).await {
            tracing::error!(key = %key, error = %e, "Failed to delete cleanup record");
        }
        outcome
    }

    async fn apply(&self, key: &CleanupKey, record: &CleanupRecord) -> CleanupOutcome {
        let shape = match self.repo.get(&record.shape_id).await {
            Ok(Some(shape)) => shape,
            Ok(None) => return CleanupOutcome::Gone,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to read shape for cleanup");
                return CleanupOutcome::Failed;
            }
        };

        if shape.lock_holder() != Some(&record.user_id) {
            return CleanupOutcome::Stale;
        }

        let (result, outcome) = match record.revert_to() {
            Some(position) => (
                self.repo.write_revert_and_unlock(&shape, position).await,
                CleanupOutcome::Reverted,
            ),
            None => (self.repo.write_unlock(&shape.id).await, CleanupOutcome::Unlocked),
        };
        match result {
            Ok(()) => outcome,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Cleanup write failed");
                CleanupOutcome::Failed
            }
        }
    }
}

async fn next_event(feed: &mut Option<CleanupFeed>) -> Option<FeedEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}
