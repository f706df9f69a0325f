//! Canvas metadata record.

use serde::{Deserialize, Serialize};

use crate::ids::{CanvasId, UserId};
use crate::time::Timestamp;

/// Per-canvas bookkeeping. Created on first access, touched on every shape
/// mutation, never deleted during normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMeta {
    pub canvas_id: CanvasId,
    pub shape_count: u64,
    pub created_at: Timestamp,
    pub last_updated: Timestamp,
    pub created_by: UserId,
}

impl CanvasMeta {
    pub fn new(canvas_id: CanvasId, created_by: UserId, now: Timestamp) -> Self {
        Self {
            canvas_id,
            shape_count: 0,
            created_at: now,
            last_updated: now,
            created_by,
        }
    }

    /// Record a mutation that changed the shape count by `delta`
    pub fn touch(&mut self, delta: i64, now: Timestamp) {
        self.shape_count = self.shape_count.saturating_add_signed(delta);
        self.last_updated = self.last_updated.max(now);
    }
}
