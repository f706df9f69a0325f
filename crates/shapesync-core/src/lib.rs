//! Core types for shapesync: identifiers, the shape model and its persisted
//! record form, canvas metadata, disconnect-cleanup records and the error
//! taxonomy shared by every layer.

pub mod canvas;
pub mod cleanup;
pub mod error;
pub mod ids;
pub mod shape;
pub mod time;

pub use canvas::CanvasMeta;
pub use cleanup::{CLEANUP_NAMESPACE, CleanupAction, CleanupKey, CleanupRecord};
pub use error::{ErrorClass, SyncError, SyncResult, ValidationError};
pub use ids::{CanvasId, SessionId, ShapeId, UserId};
pub use shape::{Audit, Fields, LockFields, NewShape, Shape, ShapeBody, ShapeKind, ShapePatch, ShapeStyle};
pub use shapesync_geometry::{Bounds, Point, RelativeTransform};
