//! Listener registries with copy-on-iterate semantics.
//!
//! Notification takes a snapshot of the registered callbacks and releases the
//! lock before invoking any of them, so a callback may add or remove listeners
//! (or call back into the session) without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tremote_core::{RemoteError, SessionSettings};

use crate::transport::{RpcHandle, TorrentListDelta};

/// Identifies a registered listener for later removal.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub type SettingsListener = dyn Fn(&SessionSettings) + Send + Sync;
pub type SpeedListener = dyn Fn(i64, i64) + Send + Sync;
pub type RefreshListener = dyn Fn() + Send + Sync;
pub type ReadyListener = dyn Fn(&Arc<dyn RpcHandle>) + Send + Sync;
pub type TorrentListListener = dyn Fn(&TorrentListDelta) + Send + Sync;
pub type ConnectionErrorListener = dyn Fn(&RemoteError) + Send + Sync;
pub type MessageListener = dyn Fn(&str) + Send + Sync;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An ordered set of callbacks of one kind.
pub struct ListenerRegistry<F: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<F>)>>,
}

impl<F: ?Sized> Default for ListenerRegistry<F> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> ListenerRegistry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<F>) -> ListenerId {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() < before
    }

    /// Copy of the current callbacks, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        lock(&self.entries)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Remove and return every callback (for one-shot registries).
    pub fn take_all(&self) -> Vec<Arc<F>> {
        std::mem::take(&mut *lock(&self.entries))
            .into_iter()
            .map(|(_, listener)| listener)
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every notification registry a session exposes, apart from settings
/// listeners (those live in the settings cache).
#[derive(Default)]
pub struct SessionListeners {
    pub speed: ListenerRegistry<SpeedListener>,
    pub refresh: ListenerRegistry<RefreshListener>,
    /// One-shot: drained when the session becomes ready.
    pub ready: ListenerRegistry<ReadyListener>,
    pub torrent_list: ListenerRegistry<TorrentListListener>,
    pub connection_error: ListenerRegistry<ConnectionErrorListener>,
    pub server_message: ListenerRegistry<MessageListener>,
}

impl SessionListeners {
    pub fn remove(&self, id: ListenerId) -> bool {
        self.speed.remove(id)
            || self.refresh.remove(id)
            || self.ready.remove(id)
            || self.torrent_list.remove(id)
            || self.connection_error.remove(id)
            || self.server_message.remove(id)
    }

    pub fn clear(&self) {
        self.speed.clear();
        self.refresh.clear();
        self.ready.clear();
        self.torrent_list.clear();
        self.connection_error.clear();
        self.server_message.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    type Counter = dyn Fn() + Send + Sync;

    #[test]
    fn add_remove_and_snapshot() {
        let registry: ListenerRegistry<Counter> = ListenerRegistry::new();
        let a = registry.add(Arc::new(|| {}));
        let b = registry.add(Arc::new(|| {}));
        assert_ne!(a, b);
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn listener_may_mutate_registry_while_notified() {
        let registry: Arc<ListenerRegistry<Counter>> = Arc::new(ListenerRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));

        let reg = registry.clone();
        let c = calls.clone();
        registry.add(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            reg.add(Arc::new(|| {}));
        }));

        for listener in registry.snapshot() {
            listener();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn take_all_empties_registry() {
        let registry: ListenerRegistry<Counter> = ListenerRegistry::new();
        registry.add(Arc::new(|| {}));
        registry.add(Arc::new(|| {}));
        assert_eq!(registry.take_all().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn session_listeners_remove_by_id() {
        let listeners = SessionListeners::default();
        let id = listeners.torrent_list.add(Arc::new(|_| {}));
        listeners.speed.add(Arc::new(|_, _| {}));
        assert!(listeners.remove(id));
        assert!(listeners.torrent_list.is_empty());
        listeners.clear();
        assert!(listeners.speed.is_empty());
    }
}
