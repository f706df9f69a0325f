//! Ephemeral session store access for shapesync.
//!
//! The low-latency session store gives every client connection a
//! server-side "write this when I disconnect" hook. shapesync uses it only for
//! the `disconnect-cleanup` namespace: each lease registers a hook carrying a
//! [`CleanupRecord`]; when the holder vanishes the store writes the record and
//! every subscribed monitor hears about it.

pub mod feed;
pub mod memory;

use async_trait::async_trait;

use shapesync_core::{CleanupKey, CleanupRecord, SyncResult};

pub use feed::{CleanupChange, CleanupFeed, FeedEvent};
pub use memory::MemorySessionStore;

/// Disconnect hooks plus the cleanup namespace they write into.
///
/// Registering a hook for a key that already has one replaces its payload,
/// so re-registering the same record is harmless.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Arrange for `record` to be written at `key` if `key.session_id` drops
    async fn register_disconnect_hook(&self, key: &CleanupKey, record: CleanupRecord) -> SyncResult<()>;

    /// Forget the hook at `key`; cancelling a missing hook succeeds
    async fn cancel_disconnect_hook(&self, key: &CleanupKey) -> SyncResult<()>;

    /// Every cleanup record currently written to the namespace
    async fn pending_cleanup(&self) -> SyncResult<Vec<(CleanupKey, CleanupRecord)>>;

    /// Delete a processed cleanup record; deleting a missing record succeeds
    async fn remove_cleanup(&self, key: &CleanupKey) -> SyncResult<()>;

    /// Live feed of writes and removals in the cleanup namespace
    fn watch_cleanup(&self) -> CleanupFeed;
}
