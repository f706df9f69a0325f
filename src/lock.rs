//! Per-shape edit leases.
//!
//! A lease is the lock fields on the shape document plus a disconnect hook in
//! the session store. Acquiring scans the caller's existing locks and swaps
//! them for the target in one atomic batch; the hook is registered only after
//! that batch commits.
//!
//! The scan and the batch are two steps, so two tabs of the same user racing
//! to acquire can briefly both win. That is accepted; the next acquire or a
//! lease timeout repairs it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use shapesync_core::time::{Timestamp, now_ms};
use shapesync_core::{CleanupKey, CleanupRecord, Point, SessionId, ShapeId, SyncError, SyncResult, UserId};
use shapesync_session::SessionStore;

use crate::repo::ShapeRepo;

/// A lock this client took
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub shape_id: ShapeId,
    pub user_id: UserId,
    pub acquired_at: Timestamp,
    /// Shapes this user held before and lost in the swap
    pub released: Vec<ShapeId>,
}

/// Acquires and releases leases for one client session. Cheap to clone.
#[derive(Clone)]
pub struct LockManager {
    repo: ShapeRepo,
    sessions: Arc<dyn SessionStore>,
    session_id: SessionId,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("canvas", self.repo.canvas_id())
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl LockManager {
    pub fn new(repo: ShapeRepo, sessions: Arc<dyn SessionStore>, session_id: SessionId) -> Self {
        Self {
            repo,
            sessions,
            session_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn hook_key(&self, user: &UserId, shape: &ShapeId) -> CleanupKey {
        CleanupKey::new(self.session_id.clone(), user.clone(), shape.clone())
    }

    fn hook_record(&self, user: &UserId, shape: &ShapeId, origin: Option<Point>) -> CleanupRecord {
        CleanupRecord::for_lease(
            self.repo.canvas_id().clone(),
            user.clone(),
            shape.clone(),
            origin,
            now_ms(),
        )
    }

    /// Lock `shape` for `user`, releasing any other shape `user` holds.
    ///
    /// `origin` is the pre-drag position to restore if this client vanishes
    /// mid-drag. `cancel` is checked right before and right after the commit;
    /// a cancel that lands after the commit releases the fresh lock again.
    pub async fn acquire(
        &self,
        shape: &ShapeId,
        user: &UserId,
        origin: Option<Point>,
        cancel: &CancellationToken,
    ) -> SyncResult<Lease> {
        let current = self.repo.require(shape).await?;
        if let Some(holder) = current.lock_holder().filter(|h| *h != user) {
            return Err(SyncError::LockConflict {
                shape_id: shape.clone(),
                locked_by: holder.clone(),
            });
        }

        let released: Vec<ShapeId> = self
            .repo
            .locked_by(user)
            .await?
            .into_iter()
            .map(|s| s.id)
            .filter(|id| id != shape)
            .collect();

        if cancel.is_cancelled() {
            tracing::debug!(shape_id = %shape, "Lock acquisition cancelled before commit");
            return Err(SyncError::Cancelled);
        }

        self.repo.commit_lock_swap(&released, shape, user).await?;

        // The swap unlocked these whether or not the caller still wants the target
        for old in &released {
            self.cancel_hook(user, old).await;
        }

        if cancel.is_cancelled() {
            tracing::debug!(shape_id = %shape, "Lock acquisition cancelled after commit, releasing");
            if let Err(e) = self.repo.write_unlock(shape).await {
                tracing::warn!(shape_id = %shape, error = %e, "Failed to release cancelled lock");
            }
            return Err(SyncError::Cancelled);
        }

        let key = self.hook_key(user, shape);
        let record = self.hook_record(user, shape, origin);
        let registered = self
            .repo
            .retry_policy()
            .run("register_hook", || self.sessions.register_disconnect_hook(&key, record.clone()))
            .await;
        if let Err(e) = registered {
            tracing::warn!(shape_id = %shape, error = %e, "Disconnect hook registration failed, releasing lock");
            if let Err(unlock_err) = self.repo.write_unlock(shape).await {
                tracing::warn!(shape_id = %shape, error = %unlock_err, "Failed to release lock without hook");
            }
            return Err(e);
        }

        tracing::info!(
            shape_id = %shape,
            user = %user,
            released = released.len(),
            "Lock acquired",
        );
        Ok(Lease {
            shape_id: shape.clone(),
            user_id: user.clone(),
            acquired_at: now_ms(),
            released,
        })
    }

    /// Cancel the disconnect hook, then clear the lock fields.
    ///
    /// Releasing an unlocked or deleted shape succeeds.
    pub async fn release(&self, shape: &ShapeId, user: &UserId) -> SyncResult<()> {
        self.cancel_hook(user, shape).await;
        match self.repo.write_unlock(shape).await {
            Ok(()) => {
                tracing::debug!(shape_id = %shape, user = %user, "Lock released");
                Ok(())
            }
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(shape_id = %shape, "Released lock on a deleted shape");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Swap the hook for one that also restores `origin` on disconnect
    pub async fn begin_drag(&self, shape: &ShapeId, user: &UserId, origin: Point) -> SyncResult<()> {
        self.register_hook(shape, user, Some(origin)).await
    }

    /// Drag finished gracefully; fall back to a plain unlock hook
    pub async fn end_drag(&self, shape: &ShapeId, user: &UserId) -> SyncResult<()> {
        self.register_hook(shape, user, None).await
    }

    async fn register_hook(&self, shape: &ShapeId, user: &UserId, origin: Option<Point>) -> SyncResult<()> {
        let key = self.hook_key(user, shape);
        let record = self.hook_record(user, shape, origin);
        self.repo
            .retry_policy()
            .run("register_hook", || self.sessions.register_disconnect_hook(&key, record.clone()))
            .await
    }

    /// A hook that survives is harmless: the monitor only unlocks shapes
    /// still held by the hook's user.
    async fn cancel_hook(&self, user: &UserId, shape: &ShapeId) {
        let key = self.hook_key(user, shape);
        let result = self
            .repo
            .retry_policy()
            .run("cancel_hook", || self.sessions.cancel_disconnect_hook(&key))
            .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Failed to cancel disconnect hook");
        }
    }
}
