//! The session orchestrator.
//!
//! A [`Session`] owns one logical connection to a remote daemon. Opening it
//! spawns a bootstrap task that resolves the endpoint and installs a
//! transport handle; the first `session-get` reply (plus the tag list, when
//! supported) makes it ready. From then on a refresh timer pulls statistics
//! and the torrent list while the session is in the foreground.
//!
//! Every method may be called from any thread. Asynchronous work checks the
//! destroyed flag and the transport generation before acting on a result, so
//! late replies are discarded once the session is destroyed or rebound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tremote_core::capabilities::names;
use tremote_core::stats::STATS_FIELDS;
use tremote_core::wire::{to_map, MapExt, RpcMap};
use tremote_core::{
    CapabilitySet, NetworkState, RemoteError, RemoteProfile, RemoteResult, RemoteType,
    SessionConfig, SessionSettings, SessionStats,
};

use crate::foreground::ForegroundContext;
use crate::gate::{PendingCallGate, RpcOp, Submitted};
use crate::listeners::{lock, ListenerId, SessionListeners};
use crate::providers::{
    BindInfoProvider, EndpointProbe, ErrorReporter, HostResolver, LocalCore, NetworkInfo,
    NoDiscovery, NoLocalCore, NoOverlay, OverlayHelper, StaticNetwork, SystemHostResolver,
    TracingReporter,
};
use crate::resolver::{BindResolver, Binding};
use crate::scheduler::RefreshScheduler;
use crate::settings_cache::SessionSettingsCache;
use crate::store::{ProfileStore, PREF_LAST_REMOTE};
use crate::transport::{
    torrent_get_args, HttpProbe, HttpRpcConnector, RpcConnector, RpcEvent, RpcHandle,
    TorrentListDelta, METHOD_SESSION_GET, METHOD_SESSION_SET, METHOD_SESSION_STATS,
    METHOD_TAGS_GET_LIST, METHOD_TORRENT_GET,
};

const KEY_CONTENT_PORT: &str = "az-content-port";
const KEY_SERVER_MESSAGE: &str = "az-message";

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unbound,
    Binding,
    /// Transport installed, waiting for the first session properties.
    Bound,
    Ready,
    Destroyed,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Binding => "binding",
            Self::Bound => "bound",
            Self::Ready => "ready",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn RpcConnector>,
    pub store: Arc<dyn ProfileStore>,
    pub discovery: Arc<dyn BindInfoProvider>,
    pub overlay: Arc<dyn OverlayHelper>,
    pub hosts: Arc<dyn HostResolver>,
    pub probe: Arc<dyn EndpointProbe>,
    pub local_core: Arc<dyn LocalCore>,
    pub network: Arc<dyn NetworkInfo>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub foreground: Arc<ForegroundContext>,
}

impl SessionDeps {
    /// Defaults for everything except the connector and the store.
    pub fn new(connector: Arc<dyn RpcConnector>, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            connector,
            store,
            discovery: Arc::new(NoDiscovery),
            overlay: Arc::new(NoOverlay),
            hosts: Arc::new(SystemHostResolver),
            probe: Arc::new(HttpProbe::new(&SessionConfig::default())),
            local_core: Arc::new(NoLocalCore),
            network: Arc::new(StaticNetwork::default()),
            reporter: Arc::new(TracingReporter),
            foreground: Arc::new(ForegroundContext::new()),
        }
    }

    /// The bundled HTTP transport and probe, configured from `config`.
    pub fn http(config: &SessionConfig, store: Arc<dyn ProfileStore>) -> Self {
        let mut deps = Self::new(Arc::new(HttpRpcConnector::new(config)), store);
        deps.probe = Arc::new(HttpProbe::new(config));
        deps
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn BindInfoProvider>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn OverlayHelper>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_hosts(mut self, hosts: Arc<dyn HostResolver>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn EndpointProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_local_core(mut self, local_core: Arc<dyn LocalCore>) -> Self {
        self.local_core = local_core;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = network;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_foreground(mut self, foreground: Arc<ForegroundContext>) -> Self {
        self.foreground = foreground;
        self
    }

    fn resolver(&self, config: &SessionConfig) -> BindResolver {
        BindResolver::new(config.clone())
            .with_discovery(self.discovery.clone())
            .with_overlay(self.overlay.clone())
            .with_hosts(self.hosts.clone())
            .with_probe(self.probe.clone())
            .with_local_core(self.local_core.clone())
            .with_network(self.network.clone())
    }
}

/// Mutable session state guarded by one lock.
struct SessionState {
    /// Bumped whenever the transport handle is replaced.
    generation: u64,
    rpc: Option<Arc<dyn RpcHandle>>,
    /// Task forwarding the handle's push events.
    pump: Option<JoinHandle<()>>,
    bootstrap: Option<JoinHandle<()>>,
    binding: Option<Binding>,
    /// Why the last bind attempt failed; cleared when a new one starts.
    bind_error: Option<RemoteError>,
    /// Readiness work (tag fetch) started for the current generation.
    readying: bool,
    ready: bool,
    needs_full_refresh: bool,
    tags: Vec<RpcMap>,
    tags_stale: bool,
    stats: Option<SessionStats>,
    content_port: i64,
    visible: bool,
    network: NetworkState,
}

struct SessionInner {
    id: String,
    config: SessionConfig,
    runtime: Handle,
    deps: SessionDeps,
    resolver: BindResolver,
    profile: Mutex<RemoteProfile>,
    state: Mutex<SessionState>,
    lifecycle: watch::Sender<Lifecycle>,
    destroyed: AtomicBool,
    /// Single-flight guard for refresh cycles.
    refreshing: AtomicBool,
    settings: SessionSettingsCache,
    listeners: SessionListeners,
    gate: PendingCallGate,
    scheduler: RefreshScheduler,
}

/// Releases the refresh single-flight flag however the cycle ends.
struct RefreshGuard(Arc<SessionInner>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
    }
}

/// A connection to one remote daemon. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session for `profile` and start binding in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(profile: RemoteProfile, deps: SessionDeps, config: SessionConfig) -> RemoteResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| RemoteError::Config(format!("a tokio runtime is required: {e}")))?;

        let settings = SessionSettingsCache::new();
        if let Some(properties) = &profile.last_session_properties {
            settings.set_capabilities(CapabilitySet::from_session_properties(properties));
        }

        let state = SessionState {
            generation: 0,
            rpc: None,
            pump: None,
            bootstrap: None,
            binding: None,
            bind_error: None,
            readying: false,
            ready: false,
            needs_full_refresh: true,
            tags: Vec::new(),
            tags_stale: false,
            stats: None,
            content_port: -1,
            visible: false,
            network: deps.network.state(),
        };
        let (lifecycle, _) = watch::channel(Lifecycle::Unbound);

        let inner = Arc::new(SessionInner {
            id: profile.id.clone(),
            resolver: deps.resolver(&config),
            gate: PendingCallGate::new(deps.reporter.clone()),
            scheduler: RefreshScheduler::new(runtime.clone()),
            config,
            runtime,
            deps,
            profile: Mutex::new(profile),
            state: Mutex::new(state),
            lifecycle,
            destroyed: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
            settings,
            listeners: SessionListeners::default(),
        });

        info!(profile = %inner.id, "session opened");
        inner.start_bootstrap();
        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Snapshot of the profile as currently known.
    pub fn profile(&self) -> RemoteProfile {
        self.inner.ensure_not_destroyed("profile");
        self.inner.profile_clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    /// Wait until the session is ready. Fails if binding fails or the
    /// session is destroyed first.
    pub async fn wait_ready(&self) -> RemoteResult<()> {
        let mut rx = self.inner.lifecycle.subscribe();
        loop {
            match *rx.borrow_and_update() {
                Lifecycle::Ready => return Ok(()),
                Lifecycle::Destroyed => return Err(RemoteError::Destroyed),
                Lifecycle::Unbound => {
                    let failure = lock(&self.inner.state).bind_error.clone();
                    return Err(failure.unwrap_or(RemoteError::NotReady));
                }
                Lifecycle::Binding | Lifecycle::Bound => {}
            }
            if rx.changed().await.is_err() {
                return Err(RemoteError::Destroyed);
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ensure_not_destroyed("is_ready");
        lock(&self.inner.state).ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// `protocol://host` of the bound endpoint.
    pub fn base_url(&self) -> Option<String> {
        self.inner.ensure_not_destroyed("base_url");
        lock(&self.inner.state).binding.as_ref().map(|b| b.base_url.clone())
    }

    pub fn rpc_url(&self) -> Option<String> {
        lock(&self.inner.state).binding.as_ref().map(|b| b.rpc_url.clone())
    }

    /// Port of the daemon's content server, -1 when not advertised.
    pub fn content_port(&self) -> i64 {
        lock(&self.inner.state).content_port
    }

    /// Transmission RPC version, -1 when not bound.
    pub fn rpc_version(&self) -> i64 {
        self.inner.ensure_not_destroyed("rpc_version");
        self.inner.current_rpc().map_or(-1, |rpc| rpc.rpc_version())
    }

    /// Vendor RPC version, -1 when not bound or not a Vuze/BiglyBT daemon.
    pub fn rpc_version_az(&self) -> i64 {
        self.inner.ensure_not_destroyed("rpc_version_az");
        self.inner.current_rpc().map_or(-1, |rpc| rpc.rpc_version_az())
    }

    pub fn client_version(&self) -> Option<String> {
        self.inner.current_rpc().and_then(|rpc| rpc.client_version())
    }

    /// Whether the daemon advertised capability `name`. False until known.
    pub fn supports(&self, name: &str) -> bool {
        self.inner.settings.supports(name)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.inner.settings.current_capabilities()
    }

    /// A copy of the current settings, if any were received.
    pub fn settings_clone(&self) -> Option<SessionSettings> {
        self.inner.ensure_not_destroyed("settings_clone");
        self.inner.settings.current()
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        lock(&self.inner.state).stats
    }

    pub fn tags(&self) -> Vec<RpcMap> {
        lock(&self.inner.state).tags.clone()
    }

    /// Mark the tag list stale; the next refresh fetches it again.
    pub fn invalidate_tags(&self) {
        lock(&self.inner.state).tags_stale = true;
    }

    /// Force the next torrent-list fetch to be a full one.
    pub fn request_full_refresh(&self) {
        lock(&self.inner.state).needs_full_refresh = true;
    }

    pub fn needs_full_refresh(&self) -> bool {
        lock(&self.inner.state).needs_full_refresh
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    pub fn is_visible(&self) -> bool {
        self.inner.is_visible()
    }

    /// Start a refresh cycle. Returns false if it was skipped.
    pub fn trigger_refresh(&self, recent_only: bool) -> bool {
        self.inner.trigger_refresh(recent_only)
    }

    /// Run `op` against the transport once the session is ready.
    pub fn execute_rpc(&self, op: RpcOp) -> RemoteResult<Submitted> {
        if self.inner.is_destroyed() {
            warn!(profile = %self.inner.id, "execute_rpc ignored, session destroyed");
            return Err(RemoteError::Destroyed);
        }
        Ok(self.inner.gate.submit(op))
    }

    /// The transport handle, once the session is ready.
    pub async fn rpc(&self) -> RemoteResult<Arc<dyn RpcHandle>> {
        let (tx, rx) = oneshot::channel();
        self.execute_rpc(Box::new(move |rpc| {
            let _ = tx.send(rpc.clone());
            Ok(())
        }))?;
        rx.await.map_err(|_| RemoteError::Destroyed)
    }

    /// Apply user-edited settings: only changed fields are sent.
    pub fn update_settings(&self, settings: SessionSettings) -> RemoteResult<()> {
        self.inner.update_settings(settings)
    }

    pub fn move_data_history_changed(&self, history: Vec<String>) {
        if !self.inner.ensure_not_destroyed("move_data_history_changed") {
            return;
        }
        lock(&self.inner.profile).save_path_history = history;
        self.inner.save_profile();
    }

    /// The UI surface showing this session came to the foreground.
    pub fn resumed(&self) {
        self.inner.resumed();
    }

    /// The UI surface showing this session lost the foreground.
    pub fn lost_foreground(&self) {
        let inner = &self.inner;
        inner.deps.foreground.clear_if(&inner.id);
        lock(&inner.state).visible = false;
        debug!(profile = %inner.id, "lost foreground");
    }

    pub fn online_state_changed(&self, online: bool, mobile: bool) {
        if !self.inner.ensure_not_destroyed("online_state_changed") {
            return;
        }
        let ready = {
            let mut state = lock(&self.inner.state);
            state.network = NetworkState { online, mobile };
            state.ready
        };
        if ready {
            self.inner.schedule_next();
        }
    }

    /// Bind again from scratch. Returns false if a bind is already running.
    pub fn reconnect(&self) -> RemoteResult<bool> {
        if self.inner.is_destroyed() {
            return Err(RemoteError::Destroyed);
        }
        {
            let mut state = lock(&self.inner.state);
            if state.bootstrap.as_ref().is_some_and(|task| !task.is_finished()) {
                return Ok(false);
            }
            state.needs_full_refresh = true;
        }
        info!(profile = %self.inner.id, "reconnecting");
        self.inner.teardown_transport();
        self.inner.start_bootstrap();
        Ok(true)
    }

    /// Tear the session down. Safe to call any number of times.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn add_settings_listener(
        &self,
        listener: impl Fn(&SessionSettings) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.ensure_not_destroyed("add_settings_listener");
        self.inner.settings.add_listener(Arc::new(listener))
    }

    pub fn add_speed_listener(&self, listener: impl Fn(i64, i64) + Send + Sync + 'static) -> ListenerId {
        self.inner.ensure_not_destroyed("add_speed_listener");
        self.inner.listeners.speed.add(Arc::new(listener))
    }

    /// The listener is invoked once right away, then on every timer refresh.
    pub fn add_refresh_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.ensure_not_destroyed("add_refresh_listener");
        listener();
        self.inner.listeners.refresh.add(Arc::new(listener))
    }

    /// Called once with the transport handle when the session becomes ready,
    /// or right away if it already is (then `None` is returned).
    pub fn on_ready(
        &self,
        listener: impl Fn(&Arc<dyn RpcHandle>) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.inner.ensure_not_destroyed("on_ready");
        let listener = Arc::new(listener);
        let rpc = {
            // Registering under the state lock orders this against the
            // readiness transition, which flips `ready` before draining.
            let state = lock(&self.inner.state);
            match state.rpc.clone().filter(|_| state.ready) {
                Some(rpc) => rpc,
                None => return Some(self.inner.listeners.ready.add(listener)),
            }
        };
        listener(&rpc);
        None
    }

    pub fn add_torrent_list_listener(
        &self,
        listener: impl Fn(&TorrentListDelta) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.torrent_list.add(Arc::new(listener))
    }

    /// If the last bind attempt already failed, the listener is called with
    /// that failure right away.
    pub fn add_connection_error_listener(
        &self,
        listener: impl Fn(&RemoteError) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener = Arc::new(listener);
        let (id, failure) = {
            let state = lock(&self.inner.state);
            let id = self.inner.listeners.connection_error.add(listener.clone());
            (id, state.bind_error.clone())
        };
        if let Some(e) = failure {
            listener(&e);
        }
        id
    }

    pub fn add_server_message_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.server_message.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id) || self.inner.settings.remove_listener(id)
    }
}

impl SessionInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Log access to a destroyed session. Returns whether the session is alive.
    fn ensure_not_destroyed(&self, operation: &str) -> bool {
        if self.is_destroyed() {
            warn!(profile = %self.id, operation, "accessing destroyed session");
            return false;
        }
        true
    }

    fn profile_clone(&self) -> RemoteProfile {
        lock(&self.profile).clone()
    }

    fn current_rpc(&self) -> Option<Arc<dyn RpcHandle>> {
        lock(&self.state).rpc.clone()
    }

    /// The handle of `generation`, if it is still installed.
    fn rpc_for(&self, generation: u64) -> Option<Arc<dyn RpcHandle>> {
        let state = lock(&self.state);
        if state.generation == generation {
            state.rpc.clone()
        } else {
            None
        }
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let previous = self.lifecycle.send_replace(lifecycle);
        if previous != lifecycle {
            debug!(profile = %self.id, from = previous.as_str(), to = lifecycle.as_str(), "lifecycle");
        }
    }

    fn is_visible(&self) -> bool {
        lock(&self.state).visible && self.deps.foreground.is_current(&self.id)
    }

    fn save_profile(&self) {
        let profile = self.profile_clone();
        if let Err(e) = self.deps.store.persist(&profile) {
            warn!(profile = %self.id, error = %e, "failed to persist profile");
            self.deps.reporter.report("persist profile", &e.to_string());
        }
    }

    fn start_bootstrap(self: &Arc<Self>) {
        lock(&self.state).bind_error = None;
        self.set_lifecycle(Lifecycle::Binding);
        let inner = self.clone();
        let task = self.runtime.spawn(async move { inner.bootstrap().await });
        lock(&self.state).bootstrap = Some(task);
    }

    /// Resolve, open the transport and request the first session properties.
    async fn bootstrap(self: Arc<Self>) {
        let mut profile = self.profile_clone();
        let resolved = self.resolver.resolve(&mut profile).await;
        if self.is_destroyed() {
            debug!(profile = %self.id, "bind finished after destroy, discarded");
            return;
        }
        let binding = match resolved {
            Ok(binding) => binding,
            Err(e) => return self.fail_bind(e),
        };

        {
            let mut live = lock(&self.profile);
            live.last_binding_info = profile.last_binding_info.clone();
            live.last_used_on = profile.last_used_on;
        }
        self.save_profile();
        if let Err(e) = self.deps.store.set(PREF_LAST_REMOTE, json!(self.id)) {
            warn!(error = %e, "failed to record last remote");
        }

        let rpc = match self.deps.connector.open(&binding.rpc_url, &profile).await {
            Ok(rpc) => rpc,
            Err(e) => return self.fail_bind(e),
        };
        let Some(generation) = self.install(rpc.clone(), binding) else {
            return;
        };

        if let Err(e) = rpc.call(METHOD_SESSION_GET, RpcMap::new()).await {
            if self.rpc_for(generation).is_some() && !self.is_destroyed() {
                self.fail_bind(e);
            }
        }
    }

    fn fail_bind(&self, e: RemoteError) {
        error!(profile = %self.id, error = %e, "bind failed");
        if matches!(e, RemoteError::Transport(_)) {
            self.deps.reporter.report("bind", &e.to_string());
        }
        self.teardown_transport();
        let listeners = {
            let mut state = lock(&self.state);
            state.bind_error = Some(e.clone());
            self.listeners.connection_error.snapshot()
        };
        self.set_lifecycle(Lifecycle::Unbound);
        for listener in listeners {
            listener(&e);
        }
    }

    /// Make `rpc` the session's transport, replacing any previous handle.
    /// Returns the new generation, or `None` if the session was destroyed.
    fn install(self: &Arc<Self>, rpc: Arc<dyn RpcHandle>, binding: Binding) -> Option<u64> {
        self.teardown_transport();

        let events = rpc.subscribe();
        let mut state = lock(&self.state);
        if self.is_destroyed() {
            drop(state);
            rpc.destroy();
            return None;
        }
        state.generation += 1;
        let generation = state.generation;
        state.pump = Some(self.runtime.spawn(pump_events(Arc::downgrade(self), generation, events)));
        state.rpc = Some(rpc);
        state.binding = Some(binding);
        drop(state);

        self.set_lifecycle(Lifecycle::Bound);
        info!(profile = %self.id, generation, "transport installed");
        Some(generation)
    }

    /// Detach and release the current handle; queued calls stay queued.
    fn teardown_transport(&self) {
        let (rpc, pump) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.ready = false;
            state.readying = false;
            state.stats = None;
            (state.rpc.take(), state.pump.take())
        };
        self.gate.close();
        self.scheduler.cancel();
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(rpc) = rpc {
            rpc.destroy();
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: RpcEvent) {
        match event {
            RpcEvent::SessionProperties(properties) => self.on_session_properties(generation, properties),
            RpcEvent::TorrentList(delta) => {
                for listener in self.listeners.torrent_list.snapshot() {
                    listener(&delta);
                }
            }
        }
    }

    fn on_session_properties(self: &Arc<Self>, generation: u64, properties: RpcMap) {
        let settings = SessionSettings::from_rpc(&properties);
        let content_port = properties.get_i64(KEY_CONTENT_PORT, -1);
        let message = properties
            .get_str(KEY_SERVER_MESSAGE)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        self.settings
            .set_capabilities(CapabilitySet::from_session_properties(&properties));
        lock(&self.profile).last_session_properties = Some(properties);
        self.save_profile();

        let start_readying = {
            let mut state = lock(&self.state);
            state.content_port = content_port;
            let start = state.generation == generation && !state.ready && !state.readying;
            if start {
                state.readying = true;
            }
            start
        };

        self.settings.update(settings);

        if start_readying {
            let inner = self.clone();
            self.runtime
                .spawn(async move { inner.complete_readiness(generation).await });
        }

        if let Some(message) = message {
            info!(profile = %self.id, message = %message, "message from remote client");
            for listener in self.listeners.server_message.snapshot() {
                listener(&message);
            }
        }
    }

    async fn complete_readiness(self: Arc<Self>, generation: u64) {
        let Some(rpc) = self.rpc_for(generation) else {
            return;
        };
        if self.settings.supports(names::TAGS) {
            self.fetch_tags(&rpc).await;
        }
        self.become_ready(generation, rpc);
    }

    /// Fetch the tag list. A failure leaves the previous list in place.
    async fn fetch_tags(&self, rpc: &Arc<dyn RpcHandle>) {
        match rpc.call(METHOD_TAGS_GET_LIST, RpcMap::new()).await {
            Ok(reply) => {
                let tags: Vec<RpcMap> = reply
                    .get_list("tags")
                    .map(|list| list.iter().filter_map(|t| t.as_object().cloned()).collect())
                    .unwrap_or_default();
                debug!(profile = %self.id, count = tags.len(), "tags received");
                let mut state = lock(&self.state);
                state.tags = tags;
                state.tags_stale = false;
            }
            Err(e) => warn!(profile = %self.id, error = %e, "tag list fetch failed"),
        }
    }

    fn become_ready(self: &Arc<Self>, generation: u64, rpc: Arc<dyn RpcHandle>) {
        if self.is_destroyed() {
            return;
        }
        let full_refresh = {
            let mut state = lock(&self.state);
            if state.generation != generation || state.ready {
                return;
            }
            state.ready = true;
            state.readying = false;
            state.needs_full_refresh
        };

        let client = rpc.client_version().unwrap_or_else(|| "unknown".to_string());
        info!(
            profile = %self.id,
            rpc_version = rpc.rpc_version(),
            rpc_version_az = rpc.rpc_version_az(),
            client = %client,
            "session ready"
        );

        self.schedule_next();
        if full_refresh {
            self.trigger_refresh(false);
        }
        self.gate.open(rpc.clone());
        for listener in self.listeners.ready.take_all() {
            listener(&rpc);
        }
        if !self.is_destroyed() {
            self.set_lifecycle(Lifecycle::Ready);
        }
    }

    fn schedule_next(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }
        let network = lock(&self.state).network;
        let interval = lock(&self.profile).calc_update_interval(network);
        let weak = Arc::downgrade(self);
        self.scheduler.schedule_next(interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer_fired();
            }
        });
    }

    fn on_timer_fired(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }
        if !self.is_visible() {
            debug!(profile = %self.id, "refresh timer fired while hidden");
            return;
        }
        self.trigger_refresh(true);
        for listener in self.listeners.refresh.snapshot() {
            listener();
        }
    }

    fn trigger_refresh(self: &Arc<Self>, recent_only: bool) -> bool {
        if !self.ensure_not_destroyed("trigger_refresh") {
            return false;
        }
        let (rpc, refresh_tags) = {
            let state = lock(&self.state);
            let Some(rpc) = state.rpc.clone() else {
                return false;
            };
            if !state.ready {
                debug!(profile = %self.id, "refresh requested before ready");
                return false;
            }
            (rpc, state.tags_stale)
        };

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(profile = %self.id, "refresh skipped, already refreshing");
            return false;
        }
        let guard = RefreshGuard(self.clone());

        if refresh_tags && self.settings.supports(names::TAGS) {
            let inner = self.clone();
            let tags_rpc = rpc.clone();
            self.runtime
                .spawn(async move { inner.fetch_tags(&tags_rpc).await });
        }

        let inner = self.clone();
        self.runtime
            .spawn(async move { inner.refresh_cycle(rpc, recent_only, guard).await });
        true
    }

    async fn refresh_cycle(self: Arc<Self>, rpc: Arc<dyn RpcHandle>, recent_only: bool, guard: RefreshGuard) {
        let stats = rpc
            .call(METHOD_SESSION_STATS, to_map(json!({ "fields": STATS_FIELDS })))
            .await;
        match stats {
            Ok(reply) => {
                self.on_session_stats(&reply);
                if !self.is_destroyed() {
                    self.refresh_torrents(&rpc, recent_only).await;
                }
            }
            // The torrent list is skipped for this cycle; the next one retries.
            Err(e) => warn!(profile = %self.id, error = %e, "session stats refresh failed"),
        }

        drop(guard);
        self.schedule_next();
    }

    async fn refresh_torrents(&self, rpc: &Arc<dyn RpcHandle>, recent_only: bool) {
        let full = lock(&self.state).needs_full_refresh;
        let request = rpc.call(METHOD_TORRENT_GET, torrent_get_args(recent_only && !full));
        if full {
            // Cleared once issued, whether or not the fetch succeeds.
            lock(&self.state).needs_full_refresh = false;
        }
        if let Err(e) = request.await {
            warn!(profile = %self.id, error = %e, "torrent list refresh failed");
        }
    }

    fn on_session_stats(&self, reply: &RpcMap) {
        let current = SessionStats::from_rpc(reply);
        let previous = lock(&self.state).stats.replace(current);
        if let Some((down, up)) = SessionStats::speed_delta(previous.as_ref(), &current) {
            for listener in self.listeners.speed.snapshot() {
                listener(down, up);
            }
        }
    }

    fn update_settings(self: &Arc<Self>, settings: SessionSettings) -> RemoteResult<()> {
        if !self.ensure_not_destroyed("update_settings") {
            return Err(RemoteError::Destroyed);
        }
        let Some(current) = self.settings.current() else {
            error!(profile = %self.id, "cannot update settings before they are received");
            return Err(RemoteError::NotReady);
        };

        self.save_profile();
        self.schedule_next();

        let changes = settings.to_rpc(Some(&current));
        if !changes.is_empty() {
            debug!(profile = %self.id, fields = changes.len(), "sending settings changes");
            let runtime = self.runtime.clone();
            let reporter = self.deps.reporter.clone();
            self.gate.submit(Box::new(move |rpc| {
                let rpc = rpc.clone();
                runtime.spawn(async move {
                    if let Err(e) = rpc.call(METHOD_SESSION_SET, changes).await {
                        warn!(error = %e, "settings update failed");
                        reporter.report("update settings", &e.to_string());
                    }
                });
                Ok(())
            }));
        }

        self.settings.update(settings);
        Ok(())
    }

    fn resumed(self: &Arc<Self>) {
        if !self.ensure_not_destroyed("resumed") {
            return;
        }
        self.deps.foreground.set_current(&self.id);
        let full = {
            let mut state = lock(&self.state);
            state.visible = true;
            state.needs_full_refresh
        };
        debug!(profile = %self.id, full_refresh = full, "resumed");

        if full {
            self.trigger_refresh(false);
            return;
        }
        if lock(&self.profile).remote_type == RemoteType::LocalCore {
            let inner = self.clone();
            let wait = self.config.local_core_resume_wait();
            self.runtime.spawn(async move {
                let _ = tokio::time::timeout(wait, inner.deps.local_core.wait_until_ready(wait)).await;
                inner.trigger_refresh(false);
            });
        }
        self.schedule_next();
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            debug!(profile = %self.id, "destroy called again");
            return;
        }
        info!(profile = %self.id, "destroying session");

        self.scheduler.cancel();
        let (rpc, pump) = {
            let mut state = lock(&self.state);
            state.ready = false;
            state.readying = false;
            (state.rpc.take(), state.pump.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(rpc) = rpc {
            rpc.destroy();
        }
        self.gate.clear();
        self.listeners.clear();
        self.settings.clear_listeners();
        self.deps.foreground.clear_if(&self.id);
        self.set_lifecycle(Lifecycle::Destroyed);

        if lock(&self.profile).remote_type == RemoteType::LocalCore {
            self.deps.local_core.detach();
        }
    }
}

/// Forward a handle's push events to the session until the handle is replaced.
async fn pump_events(session: Weak<SessionInner>, generation: u64, mut events: broadcast::Receiver<RpcEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = session.upgrade() else { break };
                if inner.is_destroyed() || inner.rpc_for(generation).is_none() {
                    break;
                }
                inner.handle_event(generation, event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "rpc event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
