//! Error taxonomy shared by the stores and the sync engine.

use crate::ids::{ShapeId, UserId};
use crate::shape::ShapeKind;

/// Result alias used throughout shapesync
pub type SyncResult<T> = Result<T, SyncError>;

/// Whether an operation that failed with an error may be attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

/// Every failure a store call or engine operation can surface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Not allowed: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Shape {shape_id} is locked by another user ({locked_by})")]
    LockConflict { shape_id: ShapeId, locked_by: UserId },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Client is offline")]
    Offline,

    #[error("Invalid shape: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed record: {0}")]
    Serialization(String),
}

impl SyncError {
    pub fn shape_not_found(id: &ShapeId) -> Self {
        Self::NotFound(format!("shape {id}"))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Unavailable(_) | SyncError::DeadlineExceeded(_) | SyncError::Offline => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Stable code, matching the backing store's status strings where one exists
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::PermissionDenied(_) => "permission-denied",
            SyncError::NotFound(_) => "not-found",
            SyncError::LockConflict { .. } => "locked",
            SyncError::Unavailable(_) => "unavailable",
            SyncError::DeadlineExceeded(_) => "deadline-exceeded",
            SyncError::Offline => "offline",
            SyncError::Invalid(_) => "invalid-argument",
            SyncError::Cancelled => "cancelled",
            SyncError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// A shape record or patch that must not reach the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Shape id must not be empty")]
    EmptyId,

    #[error("Field {0} must be a finite number")]
    NonFinite(&'static str),

    #[error("Field {field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("Opacity must be within 0..=1, got {0}")]
    OpacityOutOfRange(f64),

    #[error("A line needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("Text shapes need non-empty text")]
    EmptyText,

    #[error("Lock fields disagree: isLocked={is_locked} but lockedBy is {holder}")]
    LockInconsistent { is_locked: bool, holder: &'static str },

    #[error("Field {field} does not apply to {kind} shapes")]
    FieldNotApplicable { field: &'static str, kind: ShapeKind },

    #[error("Relative transform must be finite with positive scale")]
    InvalidTransform,

    #[error("Malformed shape record: {0}")]
    Record(String),
}
