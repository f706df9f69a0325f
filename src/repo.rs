//! Remote shape store access.
//!
//! [`ShapeRepo`] is the only component that writes shape documents. It checks
//! the last known document state for foreign locks before writing, resolves
//! relative transforms per shape, validates every record before a batch is
//! submitted, and keeps the canvas metadata record current. All store calls
//! go through the retry policy.

use std::collections::HashSet;
use std::sync::Arc;

use shapesync_core::time::now_ms;
use shapesync_core::{
    CanvasId, CanvasMeta, LockFields, NewShape, Point, RelativeTransform, Shape, ShapeId, ShapePatch,
    SyncError, SyncResult, UserId,
};
use shapesync_store::{ShapeStore, ShapeSubscription, WriteOp};

use crate::retry::RetryPolicy;

/// Change applied to every shape of a batch update
#[derive(Debug, Clone, PartialEq)]
pub enum BatchChange {
    /// The same fields on every target
    Fields(ShapePatch),
    /// Move/rotate/scale relative to each target's current geometry
    Transform(RelativeTransform),
}

/// Injected handle to the shared shape set of one canvas. Cheap to clone.
#[derive(Clone)]
pub struct ShapeRepo {
    store: Arc<dyn ShapeStore>,
    canvas: CanvasId,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ShapeRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeRepo").field("canvas", &self.canvas).finish()
    }
}

impl ShapeRepo {
    pub fn new(store: Arc<dyn ShapeStore>, canvas: CanvasId, retry: RetryPolicy) -> Self {
        Self { store, canvas, retry }
    }

    pub fn canvas_id(&self) -> &CanvasId {
        &self.canvas
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // --- Reads ---

    pub async fn get(&self, id: &ShapeId) -> SyncResult<Option<Shape>> {
        self.retry.run("get", || self.store.get(&self.canvas, id)).await
    }

    /// Current document, or `NotFound`
    pub async fn require(&self, id: &ShapeId) -> SyncResult<Shape> {
        self.get(id).await?.ok_or_else(|| SyncError::shape_not_found(id))
    }

    pub async fn list(&self) -> SyncResult<Vec<Shape>> {
        self.retry.run("list", || self.store.list(&self.canvas)).await
    }

    /// Shapes currently locked by `user`
    pub async fn locked_by(&self, user: &UserId) -> SyncResult<Vec<Shape>> {
        self.retry.run("locked_by", || self.store.locked_by(&self.canvas, user)).await
    }

    pub fn subscribe(&self) -> ShapeSubscription {
        self.store.subscribe(&self.canvas)
    }

    // --- Canvas metadata ---

    /// Create the canvas record on first access; returns the stored record
    pub async fn ensure_canvas(&self, by: &UserId) -> SyncResult<CanvasMeta> {
        if let Some(meta) = self.retry.run("canvas", || self.store.canvas(&self.canvas)).await? {
            return Ok(meta);
        }
        let meta = CanvasMeta::new(self.canvas.clone(), by.clone(), now_ms());
        let stored = self
            .retry
            .run("create_canvas", || self.store.create_canvas(meta.clone()))
            .await?;
        tracing::info!(canvas = %self.canvas, "Created canvas record");
        Ok(stored)
    }

    pub async fn canvas_meta(&self) -> SyncResult<Option<CanvasMeta>> {
        self.retry.run("canvas", || self.store.canvas(&self.canvas)).await
    }

    /// Best-effort metadata bump after a committed mutation
    async fn touch_canvas(&self, delta: i64) {
        let now = now_ms();
        if let Err(e) = self.store.touch_canvas(&self.canvas, delta, now).await {
            tracing::warn!(canvas = %self.canvas, error = %e, "Failed to update canvas metadata");
        }
    }

    async fn commit(&self, op_name: &str, ops: Vec<WriteOp>) -> SyncResult<()> {
        self.retry
            .run(op_name, || self.store.commit(&self.canvas, ops.clone()))
            .await
    }

    // --- Shape writes ---

    /// Create one shape; system fields are filled in here
    pub async fn create(&self, draft: NewShape, by: &UserId) -> SyncResult<Shape> {
        let mut shapes = self.batch_create(vec![draft], by).await?;
        shapes.pop().ok_or_else(|| SyncError::Serialization("empty create result".into()))
    }

    /// Create several shapes in one atomic batch
    pub async fn batch_create(&self, drafts: Vec<NewShape>, by: &UserId) -> SyncResult<Vec<Shape>> {
        let now = now_ms();
        let shapes: Vec<Shape> = drafts.into_iter().map(|d| Shape::create(d, by, now)).collect();
        // Validate everything up front so nothing is sent for a bad batch
        for shape in &shapes {
            shape.validate()?;
        }
        let ops = shapes.iter().cloned().map(WriteOp::Set).collect();
        self.commit("batch_create", ops).await?;
        self.touch_canvas(shapes.len() as i64).await;
        tracing::debug!(canvas = %self.canvas, count = shapes.len(), "Created shapes");
        Ok(shapes)
    }

    /// Apply a partial update, refusing shapes locked by another user
    pub async fn update(&self, id: &ShapeId, patch: &ShapePatch, by: &UserId) -> SyncResult<Shape> {
        let current = self.require(id).await?;
        ensure_not_locked_by_other(&current, by)?;
        let updated = current.patched(patch, by, now_ms())?;
        self.commit("update", vec![update_op(&updated, patch)?]).await?;
        self.touch_canvas(0).await;
        Ok(updated)
    }

    /// Update several shapes atomically. Transforms are resolved against each
    /// target's current geometry before anything is submitted.
    pub async fn batch_update(&self, ids: &[ShapeId], change: &BatchChange, by: &UserId) -> SyncResult<Vec<Shape>> {
        let now = now_ms();
        let mut updated = Vec::with_capacity(ids.len());
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            let current = self.require(id).await?;
            ensure_not_locked_by_other(&current, by)?;
            let patch = match change {
                BatchChange::Fields(patch) => patch.clone(),
                BatchChange::Transform(t) => current.transform_patch(t)?,
            };
            let shape = current.patched(&patch, by, now)?;
            ops.push(update_op(&shape, &patch)?);
            updated.push(shape);
        }
        self.commit("batch_update", ops).await?;
        self.touch_canvas(0).await;
        Ok(updated)
    }

    /// Delete a shape, refusing shapes locked by another user
    pub async fn delete(&self, id: &ShapeId, by: &UserId) -> SyncResult<()> {
        self.batch_delete(std::slice::from_ref(id), by).await
    }

    /// Delete several shapes atomically
    pub async fn batch_delete(&self, ids: &[ShapeId], by: &UserId) -> SyncResult<()> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<&ShapeId> = ids.iter().filter(|id| seen.insert(*id)).collect();
        for id in &ids {
            let current = self.require(id).await?;
            ensure_not_locked_by_other(&current, by)?;
        }
        let ops = ids.iter().map(|id| WriteOp::Delete((*id).clone())).collect();
        self.commit("batch_delete", ops).await?;
        self.touch_canvas(-(ids.len() as i64)).await;
        tracing::debug!(canvas = %self.canvas, count = ids.len(), "Deleted shapes");
        Ok(())
    }

    // --- Lock writes (used by the lock manager and cleanup monitor) ---

    /// One atomic batch: unlock every shape in `release`, lock `target` for `user`
    pub async fn commit_lock_swap(&self, release: &[ShapeId], target: &ShapeId, user: &UserId) -> SyncResult<()> {
        let mut ops: Vec<WriteOp> = release
            .iter()
            .filter(|id| *id != target)
            .map(|id| WriteOp::Update {
                id: id.clone(),
                fields: LockFields::unlocked().to_fields(),
            })
            .collect();
        ops.push(WriteOp::Update {
            id: target.clone(),
            fields: LockFields::held_by(user.clone(), now_ms()).to_fields(),
        });
        self.commit("lock", ops).await
    }

    /// Unconditionally clear the lock fields of `id`
    pub async fn write_unlock(&self, id: &ShapeId) -> SyncResult<()> {
        let op = WriteOp::Update {
            id: id.clone(),
            fields: LockFields::unlocked().to_fields(),
        };
        self.commit("unlock", vec![op]).await
    }

    /// Move `shape` back to `position` and unlock it in the same batch
    pub async fn write_revert_and_unlock(&self, shape: &Shape, position: Point) -> SyncResult<()> {
        let mut fields = shape.move_to_patch(position).to_fields();
        fields.extend(LockFields::unlocked().to_fields());
        let op = WriteOp::Update {
            id: shape.id.clone(),
            fields,
        };
        self.commit("revert", vec![op]).await
    }
}

fn ensure_not_locked_by_other(shape: &Shape, by: &UserId) -> SyncResult<()> {
    match shape.lock_holder() {
        Some(holder) if holder != by => Err(SyncError::LockConflict {
            shape_id: shape.id.clone(),
            locked_by: holder.clone(),
        }),
        _ => Ok(()),
    }
}

/// Merge op carrying only the patched fields plus the audit bump
fn update_op(updated: &Shape, patch: &ShapePatch) -> SyncResult<WriteOp> {
    let mut fields = patch.to_fields();
    let record = updated.to_record()?;
    for key in ["lastModifiedBy", "lastModifiedAt"] {
        if let Some(value) = record.get(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    Ok(WriteOp::Update {
        id: updated.id.clone(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapesync_core::ValidationError;
    use shapesync_store::MemoryShapeStore;

    fn setup() -> (MemoryShapeStore, ShapeRepo) {
        let store = MemoryShapeStore::new();
        let repo = ShapeRepo::new(Arc::new(store.clone()), CanvasId::from("main"), RetryPolicy::no_retry());
        (store, repo)
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    #[tokio::test]
    async fn create_populates_system_fields() {
        let (_, repo) = setup();
        let draft = NewShape::rectangle(1.0, 2.0, 3.0, 4.0);
        let created = repo.create(draft.clone(), &alice()).await.unwrap();

        let stored = repo.require(&created.id).await.unwrap();
        assert_eq!(stored.body, draft.body);
        assert_eq!(stored.style, draft.style);
        assert_eq!(stored.audit.created_by, alice());
        assert!(stored.audit.created_at > 0);
        assert!(!stored.lock.is_locked);
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_store() {
        let (store, repo) = setup();
        let drafts = vec![
            NewShape::rectangle(0.0, 0.0, 1.0, 1.0),
            NewShape::rectangle(0.0, 0.0, -1.0, 1.0),
            NewShape::rectangle(0.0, 0.0, 1.0, 1.0),
        ];
        let result = repo.batch_create(drafts, &alice()).await;
        assert!(matches!(result, Err(SyncError::Invalid(ValidationError::Negative { .. }))));
        assert!(repo.list().await.unwrap().is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn update_refuses_foreign_lock() {
        let (_, repo) = setup();
        let shape = repo.create(NewShape::rectangle(0.0, 0.0, 1.0, 1.0), &alice()).await.unwrap();
        repo.commit_lock_swap(&[], &shape.id, &alice()).await.unwrap();

        let result = repo.update(&shape.id, &ShapePatch::position(5.0, 5.0), &bob()).await;
        assert!(matches!(result, Err(SyncError::LockConflict { ref locked_by, .. }) if *locked_by == alice()));

        // the holder may still write
        let updated = repo.update(&shape.id, &ShapePatch::position(5.0, 5.0), &alice()).await.unwrap();
        assert_eq!(updated.position(), Point::new(5.0, 5.0));
        assert!(updated.lock.is_locked);
    }

    #[tokio::test]
    async fn update_of_missing_shape_is_not_found() {
        let (_, repo) = setup();
        let result = repo.update(&"ghost".into(), &ShapePatch::position(0.0, 0.0), &alice()).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn relative_transform_is_per_shape() {
        let (_, repo) = setup();
        let shapes = repo
            .batch_create(
                vec![
                    NewShape::rectangle(0.0, 0.0, 10.0, 10.0),
                    NewShape::circle(100.0, 50.0, 20.0, 20.0),
                ],
                &alice(),
            )
            .await
            .unwrap();
        let ids: Vec<ShapeId> = shapes.iter().map(|s| s.id.clone()).collect();

        let t = RelativeTransform {
            delta_x: 5.0,
            scale_x: 2.0,
            ..Default::default()
        };
        repo.batch_update(&ids, &BatchChange::Transform(t), &bob()).await.unwrap();

        let a = repo.require(&ids[0]).await.unwrap();
        let b = repo.require(&ids[1]).await.unwrap();
        assert_eq!(a.body.bounds().x, 5.0);
        assert_eq!(a.body.bounds().width, 20.0);
        assert_eq!(b.body.bounds().x, 105.0);
        assert_eq!(b.body.bounds().width, 40.0);
        assert_eq!(b.audit.last_modified_by, bob());
    }

    #[tokio::test]
    async fn batch_update_with_one_locked_target_applies_nothing() {
        let (store, repo) = setup();
        let shapes = repo
            .batch_create(
                vec![NewShape::rectangle(0.0, 0.0, 1.0, 1.0), NewShape::rectangle(5.0, 5.0, 1.0, 1.0)],
                &alice(),
            )
            .await
            .unwrap();
        repo.commit_lock_swap(&[], &shapes[1].id, &alice()).await.unwrap();
        let commits = store.commit_count();

        let ids = [shapes[0].id.clone(), shapes[1].id.clone()];
        let result = repo
            .batch_update(&ids, &BatchChange::Fields(ShapePatch::position(9.0, 9.0)), &bob())
            .await;
        assert!(matches!(result, Err(SyncError::LockConflict { .. })));
        assert_eq!(store.commit_count(), commits);
        assert_eq!(repo.require(&ids[0]).await.unwrap().position(), Point::new(0.0, 0.0));
    }

    #[tokio::test]
    async fn delete_refuses_foreign_lock_and_missing_shape() {
        let (_, repo) = setup();
        let shape = repo.create(NewShape::rectangle(0.0, 0.0, 1.0, 1.0), &alice()).await.unwrap();
        repo.commit_lock_swap(&[], &shape.id, &alice()).await.unwrap();

        assert!(matches!(repo.delete(&shape.id, &bob()).await, Err(SyncError::LockConflict { .. })));
        repo.delete(&shape.id, &alice()).await.unwrap();
        assert!(matches!(repo.delete(&shape.id, &alice()).await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn canvas_meta_tracks_mutations() {
        let (_, repo) = setup();
        repo.ensure_canvas(&alice()).await.unwrap();
        let shapes = repo
            .batch_create(
                vec![NewShape::rectangle(0.0, 0.0, 1.0, 1.0), NewShape::rectangle(1.0, 1.0, 1.0, 1.0)],
                &alice(),
            )
            .await
            .unwrap();
        repo.delete(&shapes[0].id, &alice()).await.unwrap();

        let meta = repo.canvas_meta().await.unwrap().unwrap();
        assert_eq!(meta.shape_count, 1);
        assert_eq!(meta.created_by, alice());

        // a second ensure keeps the original record
        let again = repo.ensure_canvas(&bob()).await.unwrap();
        assert_eq!(again.created_by, alice());
    }

    #[tokio::test]
    async fn batch_delete_counts_repeated_ids_once() {
        let (store, repo) = setup();
        repo.ensure_canvas(&alice()).await.unwrap();
        let shapes = repo
            .batch_create(
                vec![NewShape::rectangle(0.0, 0.0, 1.0, 1.0), NewShape::rectangle(1.0, 1.0, 1.0, 1.0)],
                &alice(),
            )
            .await
            .unwrap();
        let commits = store.commit_count();

        let ids = [shapes[0].id.clone(), shapes[0].id.clone()];
        repo.batch_delete(&ids, &alice()).await.unwrap();

        assert_eq!(store.commit_count(), commits + 1);
        assert_eq!(repo.canvas_meta().await.unwrap().unwrap().shape_count, 1);
        assert!(repo.get(&shapes[1].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lock_swap_moves_lock_atomically() {
        let (store, repo) = setup();
        let shapes = repo
            .batch_create(
                vec![NewShape::rectangle(0.0, 0.0, 1.0, 1.0), NewShape::rectangle(1.0, 1.0, 1.0, 1.0)],
                &alice(),
            )
            .await
            .unwrap();
        repo.commit_lock_swap(&[], &shapes[0].id, &alice()).await.unwrap();
        repo.commit_lock_swap(&[shapes[0].id.clone()], &shapes[1].id, &alice()).await.unwrap();

        let held = repo.locked_by(&alice()).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, shapes[1].id);

        let raw = store.raw_record(repo.canvas_id(), &shapes[0].id).unwrap();
        assert_eq!(raw["isLocked"], serde_json::json!(false));
        assert_eq!(raw["lockedBy"], serde_json::Value::Null);
    }
}
