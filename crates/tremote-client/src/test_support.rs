//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tremote_core::wire::{to_map, RpcMap};
use tremote_core::{RemoteError, RemoteProfile, RemoteResult};

use crate::listeners::lock;
use crate::providers::{
    BindInfoProvider, EndpointProbe, ErrorReporter, HostResolver, LocalCore, OverlayHelper,
};
use crate::transport::{publish_reply, BoxFuture, RpcConnector, RpcEvent, RpcHandle};

/// Poll `cond` until it holds, sleeping between checks. Returns the final value.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Transport handle with per-method scripted replies.
pub struct FakeRpc {
    queued: Mutex<HashMap<String, VecDeque<RemoteResult<RpcMap>>>>,
    defaults: Mutex<HashMap<String, RpcMap>>,
    calls: Mutex<Vec<(String, RpcMap)>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    events: broadcast::Sender<RpcEvent>,
    next_call: AtomicU64,
    destroyed: AtomicU32,
}

impl FakeRpc {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            queued: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            events,
            next_call: AtomicU64::new(1),
            destroyed: AtomicU32::new(0),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn RpcHandle> {
        self.clone()
    }

    /// Reply used whenever nothing is queued for `method`.
    pub fn set_default(&self, method: &str, reply: Value) {
        lock(&self.defaults).insert(method.to_string(), to_map(reply));
    }

    pub fn push_reply(&self, method: &str, reply: Value) {
        self.push_result(method, Ok(to_map(reply)));
    }

    pub fn push_error(&self, method: &str, message: &str) {
        self.push_result(method, Err(RemoteError::RpcFailure(message.to_string())));
    }

    fn push_result(&self, method: &str, result: RemoteResult<RpcMap>) {
        lock(&self.queued)
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Hold every `method` call until [`FakeRpc::release`].
    pub fn block(&self, method: &str) {
        lock(&self.gates).insert(method.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, method: &str) {
        if let Some(gate) = lock(&self.gates).remove(method) {
            gate.close();
        }
    }

    pub fn calls(&self) -> Vec<(String, RpcMap)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|(m, _)| m == method).count()
    }

    pub fn destroy_count(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn next_reply(&self, method: &str) -> RemoteResult<RpcMap> {
        if let Some(result) = lock(&self.queued).get_mut(method).and_then(VecDeque::pop_front) {
            return result;
        }
        Ok(lock(&self.defaults).get(method).cloned().unwrap_or_default())
    }
}

impl RpcHandle for FakeRpc {
    fn call<'a>(&'a self, method: &'a str, arguments: RpcMap) -> BoxFuture<'a, RemoteResult<RpcMap>> {
        Box::pin(async move {
            lock(&self.calls).push((method.to_string(), arguments));
            let gate = lock(&self.gates).get(method).cloned();
            if let Some(gate) = gate {
                // Closed on release.
                let _ = gate.acquire().await;
            }
            if self.destroy_count() > 0 {
                return Err(RemoteError::Transport("handle destroyed".into()));
            }
            let call_id = self.next_call.fetch_add(1, Ordering::SeqCst).to_string();
            let reply = self.next_reply(method)?;
            publish_reply(&self.events, &call_id, method, &reply);
            Ok(reply)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<RpcEvent> {
        self.events.subscribe()
    }

    fn rpc_version(&self) -> i64 {
        17
    }

    fn rpc_version_az(&self) -> i64 {
        5
    }

    fn client_version(&self) -> Option<String> {
        Some("fake 1.0".into())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out scripted handles in order and records every URL opened.
#[derive(Default)]
pub struct FakeConnector {
    handles: Mutex<VecDeque<Arc<FakeRpc>>>,
    opened: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn with(rpc: Arc<FakeRpc>) -> Arc<Self> {
        let connector = Self::default();
        lock(&connector.handles).push_back(rpc);
        Arc::new(connector)
    }

    pub fn push(&self, rpc: Arc<FakeRpc>) {
        lock(&self.handles).push_back(rpc);
    }

    pub fn fail_with(&self, message: &str) {
        *lock(&self.fail_with) = Some(message.to_string());
    }

    pub fn recover(&self) {
        *lock(&self.fail_with) = None;
    }

    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

impl RpcConnector for FakeConnector {
    fn open<'a>(
        &'a self,
        rpc_url: &'a str,
        _profile: &'a RemoteProfile,
    ) -> BoxFuture<'a, RemoteResult<Arc<dyn RpcHandle>>> {
        Box::pin(async move {
            lock(&self.opened).push(rpc_url.to_string());
            if let Some(message) = lock(&self.fail_with).clone() {
                return Err(RemoteError::Transport(message));
            }
            let rpc = lock(&self.handles)
                .pop_front()
                .ok_or_else(|| RemoteError::Transport("no scripted handle".into()))?;
            Ok(rpc as Arc<dyn RpcHandle>)
        })
    }
}

pub struct FakeDiscovery {
    reply: Mutex<Value>,
    lookups: AtomicU32,
}

impl FakeDiscovery {
    pub fn replying(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            lookups: AtomicU32::new(0),
        })
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl BindInfoProvider for FakeDiscovery {
    fn binding_info<'a>(&'a self, _profile: &'a RemoteProfile) -> BoxFuture<'a, RemoteResult<RpcMap>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(to_map(lock(&self.reply).clone()))
        })
    }
}

#[derive(Default)]
pub struct FakeOverlay {
    pub installed: AtomicBool,
    pub running: AtomicBool,
    pub tunnels: AtomicBool,
    pub binds: AtomicU32,
    pub unbinds: AtomicU32,
}

impl FakeOverlay {
    pub fn new(installed: bool, running: bool, tunnels: bool) -> Arc<Self> {
        let overlay = Self::default();
        overlay.installed.store(installed, Ordering::SeqCst);
        overlay.running.store(running, Ordering::SeqCst);
        overlay.tunnels.store(tunnels, Ordering::SeqCst);
        Arc::new(overlay)
    }
}

impl OverlayHelper for FakeOverlay {
    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    fn bind(&self) -> BoxFuture<'_, ()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn has_active_tunnels(&self) -> bool {
        self.tunnels.load(Ordering::SeqCst)
    }

    fn unbind(&self) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolves only the names it was told about.
#[derive(Default)]
pub struct FakeHosts {
    known: Mutex<HashSet<String>>,
    netbios: Mutex<HashMap<String, String>>,
}

impl FakeHosts {
    pub fn knowing(names: &[&str]) -> Arc<Self> {
        let hosts = Self::default();
        lock(&hosts.known).extend(names.iter().map(|n| n.to_string()));
        Arc::new(hosts)
    }

    pub fn add_netbios(&self, name: &str, address: &str) {
        lock(&self.netbios).insert(name.to_string(), address.to_string());
    }
}

impl HostResolver for FakeHosts {
    fn resolve<'a>(&'a self, host: &'a str, _port: u16) -> BoxFuture<'a, bool> {
        Box::pin(async move { lock(&self.known).contains(host) })
    }

    fn resolve_netbios<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move { lock(&self.netbios).get(host).cloned() })
    }
}

pub struct FakeProbe {
    alive: AtomicBool,
    probed: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn alive(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            probed: Mutex::new(Vec::new()),
        })
    }

    pub fn probed(&self) -> Vec<String> {
        lock(&self.probed).clone()
    }
}

impl EndpointProbe for FakeProbe {
    fn is_alive<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            lock(&self.probed).push(url.to_string());
            self.alive.load(Ordering::SeqCst)
        })
    }
}

#[derive(Default)]
pub struct FakeLocalCore {
    pub allowed: AtomicBool,
    waits: Mutex<Vec<Duration>>,
    pub detaches: AtomicU32,
}

impl FakeLocalCore {
    pub fn allowed() -> Arc<Self> {
        let core = Self::default();
        core.allowed.store(true, Ordering::SeqCst);
        Arc::new(core)
    }

    pub fn waits(&self) -> Vec<Duration> {
        lock(&self.waits).clone()
    }
}

impl LocalCore for FakeLocalCore {
    fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    fn wait_until_ready(&self, timeout: Duration) -> BoxFuture<'_, bool> {
        lock(&self.waits).push(timeout);
        Box::pin(async { true })
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<String> {
        lock(&self.reports).clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, context: &str, message: &str) {
        lock(&self.reports).push(format!("{context}: {message}"));
    }
}
