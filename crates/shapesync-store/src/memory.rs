//! In-process [`ShapeStore`].
//!
//! Behaves like a managed document store: documents are validated on write,
//! batches are all-or-nothing, and every committed change republishes the full
//! snapshot. Faults can be injected to exercise the retry and rollback paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use shapesync_core::time::Timestamp;
use shapesync_core::{CanvasId, CanvasMeta, Fields, Shape, ShapeId, SyncError, SyncResult, UserId};

use crate::subscription::{ShapeSnapshot, ShapeSubscription};
use crate::{ShapeStore, WriteOp};

/// Shared in-memory shape store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryShapeStore {
    inner: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryShapeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryShapeStore").finish()
    }
}

#[derive(Default)]
struct State {
    canvases: HashMap<CanvasId, CanvasDocs>,
    /// Errors returned by the next commits, oldest first
    faults: VecDeque<SyncError>,
    offline: bool,
    commits: u64,
}

struct CanvasDocs {
    docs: BTreeMap<ShapeId, Fields>,
    meta: Option<CanvasMeta>,
    tx: watch::Sender<ShapeSnapshot>,
}

impl Default for CanvasDocs {
    fn default() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            docs: BTreeMap::new(),
            meta: None,
            tx,
        }
    }
}

impl CanvasDocs {
    fn shapes(&self) -> Vec<Shape> {
        let mut shapes: Vec<Shape> = self
            .docs
            .values()
            .filter_map(|fields| Shape::from_record(fields).ok())
            .collect();
        shapes.sort_by(|a, b| {
            a.audit
                .created_at
                .cmp(&b.audit.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        shapes
    }

    fn publish(&self) {
        self.tx.send_replace(Arc::new(self.shapes()));
    }
}

impl MemoryShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied batch:
        // batches are staged on a copy and swapped in at the end.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next commit fail with `error`. Queued faults fire in order.
    pub fn fail_next(&self, error: SyncError) {
        self.state().faults.push_back(error);
    }

    /// Queue the same fault `times` times
    pub fn fail_times(&self, error: SyncError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.faults.push_back(error.clone());
        }
    }

    /// While offline every call fails with [`SyncError::Offline`]
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Number of successfully applied batches
    pub fn commit_count(&self) -> u64 {
        self.state().commits
    }

    /// Raw stored record, for inspecting exactly what was persisted
    pub fn raw_record(&self, canvas: &CanvasId, id: &ShapeId) -> Option<Fields> {
        self.state()
            .canvases
            .get(canvas)
            .and_then(|c| c.docs.get(id).cloned())
    }

    fn check_online(state: &State) -> SyncResult<()> {
        if state.offline { Err(SyncError::Offline) } else { Ok(()) }
    }
}

/// Apply `ops` to a copy of `docs`, validating every touched document
fn stage(docs: &BTreeMap<ShapeId, Fields>, ops: &[WriteOp]) -> SyncResult<BTreeMap<ShapeId, Fields>> {
    let mut staged = docs.clone();
    for op in ops {
        match op {
            WriteOp::Set(shape) => {
                shape.validate()?;
                staged.insert(shape.id.clone(), shape.to_record()?);
            }
            WriteOp::Update { id, fields } => {
                let doc = staged.get_mut(id).ok_or_else(|| SyncError::shape_not_found(id))?;
                doc.extend(fields.clone());
                let shape = Shape::from_record(doc)?;
                if &shape.id != id {
                    return Err(SyncError::PermissionDenied(format!("update may not change id of {id}")));
                }
            }
            WriteOp::Delete(id) => {
                staged.remove(id);
            }
        }
    }
    Ok(staged)
}

#[async_trait]
impl ShapeStore for MemoryShapeStore {
    async fn get(&self, canvas: &CanvasId, id: &ShapeId) -> SyncResult<Option<Shape>> {
        let state = self.state();
        Self::check_online(&state)?;
        let Some(fields) = state.canvases.get(canvas).and_then(|c| c.docs.get(id)) else {
            return Ok(None);
        };
        Ok(Some(Shape::from_record(fields)?))
    }

    async fn list(&self, canvas: &CanvasId) -> SyncResult<Vec<Shape>> {
        let state = self.state();
        Self::check_online(&state)?;
        Ok(state.canvases.get(canvas).map(CanvasDocs::shapes).unwrap_or_default())
    }

    async fn locked_by(&self, canvas: &CanvasId, user: &UserId) -> SyncResult<Vec<Shape>> {
        let shapes = self.list(canvas).await?;
        Ok(shapes
            .into_iter()
            .filter(|s| s.lock.locked_by.as_ref() == Some(user))
            .collect())
    }

    async fn commit(&self, canvas: &CanvasId, ops: Vec<WriteOp>) -> SyncResult<()> {
        let mut state = self.state();
        Self::check_online(&state)?;
        if let Some(fault) = state.faults.pop_front() {
            tracing::debug!(canvas = %canvas, error = %fault, "Injected commit fault");
            return Err(fault);
        }
        if ops.is_empty() {
            return Ok(());
        }

        let entry = state.canvases.entry(canvas.clone()).or_default();
        let staged = stage(&entry.docs, &ops)?;
        entry.docs = staged;
        entry.publish();
        state.commits += 1;

        tracing::debug!(canvas = %canvas, ops = ops.len(), "Committed batch");
        Ok(())
    }

    fn subscribe(&self, canvas: &CanvasId) -> ShapeSubscription {
        let mut state = self.state();
        let entry = state.canvases.entry(canvas.clone()).or_default();
        ShapeSubscription::new(entry.tx.subscribe())
    }

    async fn canvas(&self, canvas: &CanvasId) -> SyncResult<Option<CanvasMeta>> {
        let state = self.state();
        Self::check_online(&state)?;
        Ok(state.canvases.get(canvas).and_then(|c| c.meta.clone()))
    }

    async fn create_canvas(&self, meta: CanvasMeta) -> SyncResult<CanvasMeta> {
        let mut state = self.state();
        Self::check_online(&state)?;
        let entry = state.canvases.entry(meta.canvas_id.clone()).or_default();
        Ok(entry.meta.get_or_insert(meta).clone())
    }

    async fn touch_canvas(&self, canvas: &CanvasId, delta: i64, now: Timestamp) -> SyncResult<()> {
        let mut state = self.state();
        Self::check_online(&state)?;
        let meta = state
            .canvases
            .get_mut(canvas)
            .and_then(|c| c.meta.as_mut())
            .ok_or_else(|| SyncError::NotFound(format!("canvas {canvas}")))?;
        meta.touch(delta, now);
        Ok(())
    }
}
