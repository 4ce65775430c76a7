//! Latest negotiated session settings and capability flags.

use std::sync::{Arc, Mutex};

use tremote_core::{CapabilitySet, SessionSettings};

use crate::listeners::{lock, ListenerId, ListenerRegistry, SettingsListener};

#[derive(Default)]
pub struct SessionSettingsCache {
    settings: Mutex<Option<SessionSettings>>,
    capabilities: Mutex<CapabilitySet>,
    listeners: ListenerRegistry<SettingsListener>,
}

impl SessionSettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot and notify every listener on the calling thread.
    pub fn update(&self, settings: SessionSettings) {
        *lock(&self.settings) = Some(settings.clone());
        self.notify(&settings);
    }

    fn notify(&self, settings: &SessionSettings) {
        for listener in self.listeners.snapshot() {
            listener(settings);
        }
    }

    pub fn current(&self) -> Option<SessionSettings> {
        lock(&self.settings).clone()
    }

    pub fn set_capabilities(&self, capabilities: CapabilitySet) {
        *lock(&self.capabilities) = capabilities;
    }

    /// Last parsed capability set; empty if none was ever received.
    pub fn current_capabilities(&self) -> CapabilitySet {
        lock(&self.capabilities).clone()
    }

    pub fn supports(&self, name: &str) -> bool {
        lock(&self.capabilities).supports(name)
    }

    /// Register a listener; it immediately receives the current snapshot, if any.
    pub fn add_listener(&self, listener: Arc<SettingsListener>) -> ListenerId {
        let id = self.listeners.add(listener.clone());
        if let Some(settings) = self.current() {
            listener(&settings);
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }
}
