//! Public surface consumed by the UI and the command planner.
//!
//! Every mutation is applied to the local cache first, then sent through the
//! repository. A final remote failure rolls back exactly the values that
//! mutation overwrote. Snapshots from the store subscription replace the
//! cache wholesale, which is how everyone converges on the last write.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shapesync_core::time::now_ms;
use shapesync_core::{CanvasMeta, NewShape, Shape, ShapeId, ShapePatch, SyncError, SyncResult, UserId};
use shapesync_session::SessionStore;
use shapesync_store::{ShapeSnapshot, ShapeStore};

use crate::cache::{Pending, ShapeCache};
use crate::cleanup::CleanupMonitor;
use crate::config::SyncConfig;
use crate::lease::LeaseTimer;
use crate::lock::{Lease, LockManager};
use crate::presence::{Interaction, InteractionState};
use crate::repo::{BatchChange, ShapeRepo};
use crate::retry::RetryPolicy;

/// Handle returned by [`CanvasClient::subscribe_to_shapes`]. Dropping it
/// stops the callback.
#[derive(Debug)]
pub struct Unsubscribe {
    task: JoinHandle<()>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {}
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One user's connection to one canvas
pub struct CanvasClient {
    user: UserId,
    repo: ShapeRepo,
    locks: LockManager,
    cache: Arc<Mutex<ShapeCache>>,
    interaction: Arc<InteractionState>,
    lease_timeout: Duration,
    lease: Mutex<Option<LeaseTimer>>,
    shutdown: CancellationToken,
    sync_task: JoinHandle<()>,
}

impl std::fmt::Debug for CanvasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasClient")
            .field("user", &self.user)
            .field("canvas", self.repo.canvas_id())
            .field("session_id", self.locks.session_id())
            .finish()
    }
}

impl CanvasClient {
    /// Open the configured canvas for `user`.
    ///
    /// Creates the canvas record if needed, starts mirroring the store into
    /// the local cache and starts a disconnect cleanup monitor. Both
    /// background tasks stop when the client is dropped.
    pub async fn connect(
        config: &SyncConfig,
        user: UserId,
        shapes: Arc<dyn ShapeStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> SyncResult<Self> {
        let repo = ShapeRepo::new(shapes, config.canvas_id.clone(), RetryPolicy::from(&config.retry));
        repo.ensure_canvas(&user).await?;

        let session_id = config.session_id();
        let locks = LockManager::new(repo.clone(), sessions.clone(), session_id.clone());

        let mut subscription = repo.subscribe();
        let mut cache = ShapeCache::new();
        cache.replace_all(&subscription.current());
        let cache = Arc::new(Mutex::new(cache));

        let sync_cache = cache.clone();
        let sync_task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                lock_cache(&sync_cache).replace_all(&snapshot);
            }
        });

        let shutdown = CancellationToken::new();
        let monitor = CleanupMonitor::new(repo.clone(), sessions, config.cleanup.rescan_interval());
        tokio::spawn(monitor.run(shutdown.child_token()));

        tracing::info!(
            canvas = %config.canvas_id,
            user = %user,
            session = %session_id,
            "Connected to canvas"
        );

        Ok(Self {
            user,
            repo,
            locks,
            cache,
            interaction: Arc::new(InteractionState::new()),
            lease_timeout: config.lease.timeout(),
            lease: Mutex::new(None),
            shutdown,
            sync_task,
        })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn repo(&self) -> &ShapeRepo {
        &self.repo
    }

    fn cache(&self) -> MutexGuard<'_, ShapeCache> {
        lock_cache(&self.cache)
    }

    /// Local view, including unconfirmed mutations
    pub fn shapes(&self) -> Vec<Shape> {
        self.cache().iter().cloned().collect()
    }

    pub fn shape(&self, id: &ShapeId) -> Option<Shape> {
        self.cache().get(id).cloned()
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction.current()
    }

    pub fn watch_interaction(&self) -> watch::Receiver<Interaction> {
        self.interaction.subscribe()
    }

    pub async fn canvas_meta(&self) -> SyncResult<Option<CanvasMeta>> {
        self.repo.canvas_meta().await
    }

    fn rollback(&self, pending: Pending, error: SyncError) -> SyncError {
        if pending.is_empty() {
            return error;
        }
        let restored = self.cache().rollback(pending);
        if restored {
            tracing::warn!(error = %error, "Remote write failed, rolled back optimistic change");
        } else {
            tracing::debug!(error = %error, "Remote write failed after a newer snapshot, no rollback");
        }
        error
    }

    // --- Shapes ---

    pub async fn add_shape(&self, draft: NewShape) -> SyncResult<Shape> {
        let mut created = self.batch_create(vec![draft]).await?;
        created
            .pop()
            .ok_or_else(|| SyncError::Serialization("empty create result".into()))
    }

    pub async fn batch_create(&self, drafts: Vec<NewShape>) -> SyncResult<Vec<Shape>> {
        // Assign ids here so the optimistic copies match what the store keeps
        let drafts: Vec<NewShape> = drafts
            .into_iter()
            .map(|d| {
                let id = d.id.clone().unwrap_or_default();
                d.with_id(id)
            })
            .collect();
        let now = now_ms();
        let local: Vec<Shape> = drafts
            .iter()
            .map(|d| Shape::create(d.clone(), &self.user, now))
            .collect();
        for shape in &local {
            shape.validate()?;
        }

        let pending = self.cache().apply_insert(local);
        self.repo
            .batch_create(drafts, &self.user)
            .await
            .map_err(|e| self.rollback(pending, e))
    }

    pub async fn update_shape(&self, id: &ShapeId, patch: ShapePatch) -> SyncResult<Shape> {
        let pending = {
            let mut cache = self.cache();
            let updated = cache
                .get(id)
                .map(|current| current.patched(&patch, &self.user, now_ms()))
                .transpose()?;
            cache.apply_update(updated.into_iter().collect())
        };
        self.repo
            .update(id, &patch, &self.user)
            .await
            .map_err(|e| self.rollback(pending, e))
    }

    /// Same fields for every id, or a transform resolved per shape
    pub async fn batch_update(&self, ids: &[ShapeId], change: BatchChange) -> SyncResult<Vec<Shape>> {
        let pending = {
            let mut cache = self.cache();
            let now = now_ms();
            let mut updated = Vec::with_capacity(ids.len());
            for current in ids.iter().filter_map(|id| cache.get(id)) {
                let patch = match &change {
                    BatchChange::Fields(patch) => patch.clone(),
                    BatchChange::Transform(t) => current.transform_patch(t)?,
                };
                updated.push(current.patched(&patch, &self.user, now)?);
            }
            cache.apply_update(updated)
        };
        self.repo
            .batch_update(ids, &change, &self.user)
            .await
            .map_err(|e| self.rollback(pending, e))
    }

    pub async fn delete_shape(&self, id: &ShapeId) -> SyncResult<()> {
        self.batch_delete(std::slice::from_ref(id)).await
    }

    pub async fn batch_delete(&self, ids: &[ShapeId]) -> SyncResult<()> {
        let pending = self.cache().apply_delete(ids);
        self.repo
            .batch_delete(ids, &self.user)
            .await
            .map_err(|e| self.rollback(pending, e))?;

        let held = self.lease_shape().filter(|id| ids.contains(id));
        if let Some(id) = held {
            self.drop_lease(&id);
            if let Err(e) = self.locks.release(&id, &self.user).await {
                tracing::warn!(shape_id = %id, error = %e, "Failed to clear hook for deleted shape");
            }
        }
        Ok(())
    }

    // --- Locks ---

    /// Take the edit lease on `id`, giving up any other lease this user holds
    pub async fn lock_shape(&self, id: &ShapeId) -> SyncResult<Lease> {
        self.lock_shape_with(id, &CancellationToken::new()).await
    }

    /// [`lock_shape`](Self::lock_shape) that can be abandoned through `cancel`
    pub async fn lock_shape_with(&self, id: &ShapeId, cancel: &CancellationToken) -> SyncResult<Lease> {
        let pending = self.cache().apply_lock(id, &self.user, now_ms());
        let lease = self
            .locks
            .acquire(id, &self.user, None, cancel)
            .await
            .map_err(|e| self.rollback(pending, e))?;

        self.interaction.select(id.clone());
        let interaction = self.interaction.clone();
        let expired = id.clone();
        let timer = LeaseTimer::spawn(
            self.locks.clone(),
            id.clone(),
            self.user.clone(),
            self.lease_timeout,
            self.interaction.dragging_predicate(id.clone()),
            move || interaction.release(&expired),
        );
        *lock_slot(&self.lease) = Some(timer);
        Ok(lease)
    }

    pub async fn unlock_shape(&self, id: &ShapeId) -> SyncResult<()> {
        self.drop_lease(id);
        let pending = self.cache().apply_unlock(id);
        self.locks
            .release(id, &self.user)
            .await
            .map_err(|e| self.rollback(pending, e))
    }

    /// Start dragging `id`, locking it first if this client does not hold it.
    ///
    /// Until [`end_drag`](Self::end_drag), a disconnect moves the shape back
    /// to where the drag started.
    pub async fn begin_drag(&self, id: &ShapeId) -> SyncResult<()> {
        if self.interaction.current().is_dragging(id) {
            return Ok(());
        }
        if self.lease_shape().as_ref() != Some(id) {
            self.lock_shape(id).await?;
        }
        let origin = self
            .shape(id)
            .map(|s| s.position())
            .ok_or_else(|| SyncError::shape_not_found(id))?;

        if !self.interaction.begin_drag(id, origin) {
            tracing::debug!(shape_id = %id, "Selection changed before the drag started");
            return Err(SyncError::Cancelled);
        }
        if let Err(e) = self.locks.begin_drag(id, &self.user, origin).await {
            self.interaction.end_drag(id);
            return Err(e);
        }
        tracing::debug!(shape_id = %id, x = origin.x, y = origin.y, "Drag started");
        Ok(())
    }

    /// Finish a drag; the lease then runs its normal timeout again
    pub async fn end_drag(&self, id: &ShapeId) -> SyncResult<()> {
        if self.interaction.end_drag(id).is_none() {
            return Ok(());
        }
        if let Some(timer) = lock_slot(&self.lease).as_ref().filter(|t| t.shape_id() == id) {
            timer.extend(self.lease_timeout);
        }
        self.locks.end_drag(id, &self.user).await
    }

    /// Shape this client still holds a live lease on
    fn lease_shape(&self) -> Option<ShapeId> {
        lock_slot(&self.lease)
            .as_ref()
            .filter(|t| !t.is_finished())
            .map(|t| t.shape_id().clone())
    }

    fn drop_lease(&self, id: &ShapeId) {
        let mut slot = lock_slot(&self.lease);
        if slot.as_ref().is_some_and(|t| t.shape_id() == id) {
            *slot = None;
        }
        drop(slot);
        self.interaction.release(id);
    }

    // --- Subscriptions ---

    /// Call `callback` with every authoritative snapshot, starting with the
    /// current one
    pub fn subscribe_to_shapes<F>(&self, mut callback: F) -> Unsubscribe
    where
        F: FnMut(ShapeSnapshot) + Send + 'static,
    {
        let mut subscription = self.repo.subscribe();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                callback(snapshot);
            }
        });
        Unsubscribe { task }
    }

    /// Release any lease gracefully and stop the background tasks
    pub async fn close(self) -> SyncResult<()> {
        let held = self.lease_shape();
        if let Some(id) = held {
            self.unlock_shape(&id).await?;
        }
        Ok(())
    }
}

impl Drop for CanvasClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.sync_task.abort();
    }
}

fn lock_cache(cache: &Mutex<ShapeCache>) -> MutexGuard<'_, ShapeCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_slot(slot: &Mutex<Option<LeaseTimer>>) -> MutexGuard<'_, Option<LeaseTimer>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
