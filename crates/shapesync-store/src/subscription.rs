//! Full-snapshot subscriptions over a `watch` channel.
//!
//! A watch channel keeps only the newest value, which is exactly the
//! semantics of a full-snapshot feed: a slow reader skips intermediate
//! states and converges on the latest one.

use std::sync::Arc;

use tokio::sync::watch;

use shapesync_core::Shape;

/// Every shape on the canvas at one point in time
pub type ShapeSnapshot = Arc<Vec<Shape>>;

/// Receiving end of a canvas subscription
#[derive(Debug)]
pub struct ShapeSubscription {
    rx: watch::Receiver<ShapeSnapshot>,
    primed: bool,
}

impl ShapeSubscription {
    pub fn new(rx: watch::Receiver<ShapeSnapshot>) -> Self {
        Self { rx, primed: false }
    }

    /// Latest snapshot without waiting
    pub fn current(&self) -> ShapeSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ShapeSnapshot> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
