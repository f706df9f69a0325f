//! Client-side lease timer.
//!
//! The timer releases a lock after a short idle timeout. When it fires while
//! the caller's "still active" predicate holds (typically: mid-drag) it is
//! rearmed instead. The disconnect hook covers the case where this process
//! dies before the timer can run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use shapesync_core::{ShapeId, UserId};

use crate::lock::LockManager;

/// Handle to a running lease timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct LeaseTimer {
    shape_id: ShapeId,
    extend_tx: mpsc::UnboundedSender<Duration>,
    cancel: CancellationToken,
    expired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LeaseTimer {
    /// Start a timer that releases `shape` for `user` after `timeout`.
    ///
    /// `on_expire` runs once the timer has given the lock up, so the owner can
    /// drop whatever local state still assumes it is held.
    pub fn spawn<F, E>(
        locks: LockManager,
        shape: ShapeId,
        user: UserId,
        timeout: Duration,
        still_active: F,
        on_expire: E,
    ) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
        E: FnOnce() + Send + 'static,
    {
        let (extend_tx, mut extend_rx) = mpsc::unbounded_channel::<Duration>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let expired = Arc::new(AtomicBool::new(false));
        let task_expired = expired.clone();
        let task_shape = shape.clone();

        let mut on_expire = Some(on_expire);
        let task = tokio::spawn(async move {
            let mut deadline = Instant::now() + timeout;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    Some(extra) = extend_rx.recv() => {
                        deadline = deadline.max(Instant::now() + extra);
                    }
                    _ = sleep_until(deadline) => {
                        if still_active() {
                            tracing::trace!(shape_id = %task_shape, "Lease still active, rearming");
                            deadline = Instant::now() + timeout;
                            continue;
                        }
                        tracing::debug!(shape_id = %task_shape, user = %user, "Lease expired");
                        task_expired.store(true, Ordering::SeqCst);
                        if let Err(e) = locks.release(&task_shape, &user).await {
                            tracing::warn!(shape_id = %task_shape, error = %e, "Failed to release expired lease");
                        }
                        if let Some(notify) = on_expire.take().filter(|_| !token.is_cancelled()) {
                            notify();
                        }
                        return;
                    }
                }
            }
        });

        Self {
            shape_id: shape,
            extend_tx,
            cancel,
            expired,
            task,
        }
    }

    pub fn shape_id(&self) -> &ShapeId {
        &self.shape_id
    }

    /// Push the deadline out to at least `by` from now
    pub fn extend(&self, by: Duration) {
        // A closed channel means the timer already fired
        let _ = self.extend_tx.send(by);
    }

    /// Stop the timer without releasing
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fired (even if the release is still in flight), cancelled, or otherwise done
    pub fn is_finished(&self) -> bool {
        self.expired.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

impl Drop for LeaseTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
