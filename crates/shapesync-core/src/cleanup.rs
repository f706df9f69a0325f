//! Disconnect-cleanup records.
//!
//! When a client takes a lease it leaves a compensating instruction in the
//! session store under `disconnect-cleanup/{session}/{user}/{shape}`. The
//! store writes it when the connection drops; any cleanup monitor may then
//! apply it.

use serde::{Deserialize, Serialize};

use shapesync_geometry::Point;

use crate::ids::{CanvasId, SessionId, ShapeId, UserId};
use crate::time::Timestamp;

/// Root of the cleanup key space in the session store
pub const CLEANUP_NAMESPACE: &str = "disconnect-cleanup";

/// What a monitor must do for an abandoned lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    Unlock,
    UnlockAndRevert,
}

/// Payload of a cleanup entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRecord {
    pub action: CleanupAction,
    pub shape_id: ShapeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_position: Option<Point>,
    pub canvas_id: CanvasId,
    pub user_id: UserId,
    pub timestamp: Timestamp,
}

impl CleanupRecord {
    /// Plain unlock, or unlock-and-revert when a pre-drag position is known
    pub fn for_lease(
        canvas_id: CanvasId,
        user_id: UserId,
        shape_id: ShapeId,
        original_position: Option<Point>,
        now: Timestamp,
    ) -> Self {
        let action = if original_position.is_some() {
            CleanupAction::UnlockAndRevert
        } else {
            CleanupAction::Unlock
        };
        Self {
            action,
            shape_id,
            original_position,
            canvas_id,
            user_id,
            timestamp: now,
        }
    }

    /// Position to restore, if the record asks for a revert
    pub fn revert_to(&self) -> Option<Point> {
        match self.action {
            CleanupAction::UnlockAndRevert => self.original_position,
            CleanupAction::Unlock => None,
        }
    }
}

/// Address of one cleanup entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CleanupKey {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub shape_id: ShapeId,
}

impl CleanupKey {
    pub fn new(session_id: SessionId, user_id: UserId, shape_id: ShapeId) -> Self {
        Self {
            session_id,
            user_id,
            shape_id,
        }
    }

    /// `disconnect-cleanup/{session}/{user}/{shape}`
    pub fn path(&self) -> String {
        format!(
            "{CLEANUP_NAMESPACE}/{}/{}/{}",
            self.session_id, self.user_id, self.shape_id
        )
    }

    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(CLEANUP_NAMESPACE)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let (session, user, shape) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || [session, user, shape].iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self::new(session.into(), user.into(), shape.into()))
    }
}

impl std::fmt::Display for CleanupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}
