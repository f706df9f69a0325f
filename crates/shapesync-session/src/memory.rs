//! In-process [`SessionStore`] that can simulate abrupt disconnects.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use shapesync_core::{CleanupKey, CleanupRecord, SessionId, SyncError, SyncResult};

use crate::SessionStore;
use crate::feed::{CleanupChange, CleanupFeed};

/// Buffer for the cleanup change feed
const FEED_CAPACITY: usize = 256;

/// Shared in-memory session store. Clones share state.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    feed_tx: broadcast::Sender<CleanupChange>,
}

#[derive(Default)]
struct State {
    /// Registered, not yet fired
    hooks: HashMap<CleanupKey, CleanupRecord>,
    /// Written cleanup records awaiting a monitor
    cleanup: BTreeMap<CleanupKey, CleanupRecord>,
    disconnected: HashSet<SessionId>,
    faults: VecDeque<SyncError>,
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore").finish()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                feed_tx,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, change: CleanupChange) {
        // No receivers just means no monitor is running yet
        let _ = self.inner.feed_tx.send(change);
    }

    /// Make the next hook or cleanup write fail with `error`
    pub fn fail_next(&self, error: SyncError) {
        self.state().faults.push_back(error);
    }

    /// Drop `session` as if the client vanished: every hook it registered is
    /// written into the cleanup namespace. Returns the number of hooks fired.
    pub fn disconnect(&self, session: &SessionId) -> usize {
        let fired: Vec<(CleanupKey, CleanupRecord)> = {
            let mut state = self.state();
            state.disconnected.insert(session.clone());
            let keys: Vec<CleanupKey> = state
                .hooks
                .keys()
                .filter(|k| &k.session_id == session)
                .cloned()
                .collect();
            let mut fired = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(record) = state.hooks.remove(&key) {
                    state.cleanup.insert(key.clone(), record.clone());
                    fired.push((key, record));
                }
            }
            fired
        };

        tracing::debug!(session = %session, hooks = fired.len(), "Session disconnected");
        let count = fired.len();
        for (key, record) in fired {
            self.emit(CleanupChange::Written { key, record });
        }
        count
    }

    /// Bring a dropped session back; its old hooks stay fired
    pub fn reconnect(&self, session: &SessionId) {
        self.state().disconnected.remove(session);
    }

    /// Write a cleanup record directly, e.g. to replay a delivery
    pub fn write_cleanup(&self, key: CleanupKey, record: CleanupRecord) {
        self.state().cleanup.insert(key.clone(), record.clone());
        self.emit(CleanupChange::Written { key, record });
    }

    /// Registered hook payload at `key`, if any
    pub fn hook(&self, key: &CleanupKey) -> Option<CleanupRecord> {
        self.state().hooks.get(key).cloned()
    }

    pub fn hook_count(&self) -> usize {
        self.state().hooks.len()
    }

    fn take_fault(state: &mut State, session: Option<&SessionId>) -> SyncResult<()> {
        if let Some(fault) = state.faults.pop_front() {
            return Err(fault);
        }
        if session.is_some_and(|s| state.disconnected.contains(s)) {
            return Err(SyncError::Offline);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn register_disconnect_hook(&self, key: &CleanupKey, record: CleanupRecord) -> SyncResult<()> {
        let mut state = self.state();
        Self::take_fault(&mut state, Some(&key.session_id))?;
        state.hooks.insert(key.clone(), record);
        Ok(())
    }

    async fn cancel_disconnect_hook(&self, key: &CleanupKey) -> SyncResult<()> {
        let mut state = self.state();
        Self::take_fault(&mut state, Some(&key.session_id))?;
        state.hooks.remove(key);
        Ok(())
    }

    async fn pending_cleanup(&self) -> SyncResult<Vec<(CleanupKey, CleanupRecord)>> {
        let state = self.state();
        Ok(state
            .cleanup
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    async fn remove_cleanup(&self, key: &CleanupKey) -> SyncResult<()> {
        let removed = {
            let mut state = self.state();
            Self::take_fault(&mut state, None)?;
            state.cleanup.remove(key).is_some()
        };
        if removed {
            self.emit(CleanupChange::Removed { key: key.clone() });
        }
        Ok(())
    }

    fn watch_cleanup(&self) -> CleanupFeed {
        CleanupFeed::new(self.inner.feed_tx.subscribe())
    }
}
