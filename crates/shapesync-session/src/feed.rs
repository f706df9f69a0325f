//! Change feed for the cleanup namespace.

use tokio::sync::broadcast;

use shapesync_core::{CleanupKey, CleanupRecord};

/// One change under `disconnect-cleanup/`
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupChange {
    Written { key: CleanupKey, record: CleanupRecord },
    Removed { key: CleanupKey },
}

/// What a feed reader observes
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(CleanupChange),
    /// The reader fell behind and `n` changes were dropped; rescan to catch up
    Lagged(u64),
}

/// Receiving end of [`SessionStore::watch_cleanup`](crate::SessionStore::watch_cleanup)
#[derive(Debug)]
pub struct CleanupFeed {
    rx: broadcast::Receiver<CleanupChange>,
}

impl CleanupFeed {
    pub fn new(rx: broadcast::Receiver<CleanupChange>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the store has shut down
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        match self.rx.recv().await {
            Ok(change) => Some(FeedEvent::Change(change)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(FeedEvent::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
