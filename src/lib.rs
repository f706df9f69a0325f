//! shapesync - shape synchronization and lease-based locking for a shared canvas.
//!
//! Many users edit one set of shapes. Each client keeps an optimistic local
//! cache, writes through a retrying repository to the shared shape store, and
//! takes short per-shape leases before editing. A lease is backed twice: a
//! local timer releases it when the user goes idle, and a disconnect hook in
//! the session store lets any other client's [`CleanupMonitor`] release it
//! (and undo a half-finished drag) when the holder vanishes.
//!
//! Both stores are injected as trait objects; nothing here is global.

pub mod cache;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod lease;
pub mod lock;
pub mod presence;
pub mod repo;
pub mod retry;

pub use cache::{Pending, ShapeCache};
pub use cleanup::{CleanupMonitor, CleanupOutcome};
pub use client::{CanvasClient, Unsubscribe};
pub use config::{SyncConfig, default_config_path};
pub use lease::LeaseTimer;
pub use lock::{Lease, LockManager};
pub use presence::{Interaction, InteractionState};
pub use repo::{BatchChange, ShapeRepo};
pub use retry::RetryPolicy;

pub use shapesync_core::{
    CanvasId, CanvasMeta, NewShape, Point, RelativeTransform, SessionId, Shape, ShapeBody, ShapeId, ShapeKind,
    ShapePatch, ShapeStyle, SyncError, SyncResult, UserId,
};
pub use shapesync_session::{MemorySessionStore, SessionStore};
pub use shapesync_store::{MemoryShapeStore, ShapeSnapshot, ShapeStore, ShapeSubscription};
