//! Remote shape store access for shapesync.
//!
//! The durable store is an external dependency. [`ShapeStore`] is the narrow
//! surface the engine needs from it: point reads, a lock query, atomic batch
//! commits, full-snapshot subscriptions and the canvas metadata record.
//! [`MemoryShapeStore`] implements it in-process.

pub mod memory;
pub mod subscription;

use async_trait::async_trait;

use shapesync_core::{CanvasId, CanvasMeta, Fields, Shape, ShapeId, SyncResult, UserId};
use shapesync_core::time::Timestamp;

pub use memory::MemoryShapeStore;
pub use subscription::{ShapeSnapshot, ShapeSubscription};

/// One document write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Write the full record, replacing any existing document
    Set(Shape),
    /// Merge fields into an existing document; fails with `NotFound` if absent
    Update { id: ShapeId, fields: Fields },
    /// Remove a document; absent documents are ignored
    Delete(ShapeId),
}

impl WriteOp {
    pub fn shape_id(&self) -> &ShapeId {
        match self {
            WriteOp::Set(shape) => &shape.id,
            WriteOp::Update { id, .. } | WriteOp::Delete(id) => id,
        }
    }
}

/// The durable, document-per-shape store.
///
/// Implementations must apply [`commit`](ShapeStore::commit) all-or-nothing
/// and must reject any batch whose resulting documents fail shape
/// validation. Subscriptions deliver the whole shape set, never deltas.
#[async_trait]
pub trait ShapeStore: Send + Sync {
    async fn get(&self, canvas: &CanvasId, id: &ShapeId) -> SyncResult<Option<Shape>>;

    async fn list(&self, canvas: &CanvasId) -> SyncResult<Vec<Shape>>;

    /// Shapes whose `lockedBy` equals `user`
    async fn locked_by(&self, canvas: &CanvasId, user: &UserId) -> SyncResult<Vec<Shape>>;

    async fn commit(&self, canvas: &CanvasId, ops: Vec<WriteOp>) -> SyncResult<()>;

    /// Live view of the canvas; the first `next()` yields the current state
    fn subscribe(&self, canvas: &CanvasId) -> ShapeSubscription;

    async fn canvas(&self, canvas: &CanvasId) -> SyncResult<Option<CanvasMeta>>;

    /// Create the metadata record unless one already exists; returns the stored record
    async fn create_canvas(&self, meta: CanvasMeta) -> SyncResult<CanvasMeta>;

    /// Adjust `shapeCount` by `delta` and bump `lastUpdated`
    async fn touch_canvas(&self, canvas: &CanvasId, delta: i64, now: Timestamp) -> SyncResult<()>;
}
