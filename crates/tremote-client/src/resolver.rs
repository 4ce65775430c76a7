//! Turns a remote profile into a concrete, reachable RPC endpoint.
//!
//! Strategies are tried in priority order: an overlay host named by the
//! profile, the profile's explicit host, then the discovery provider (which may
//! offer an overlay address with the plain host as fallback). A bind failure
//! is terminal for the attempt; nothing here retries.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use tremote_core::profile::{is_loopback, is_overlay_host, DEFAULT_PROTOCOL};
use tremote_core::wire::MapExt;
use tremote_core::{
    BindingInfo, RemoteError, RemoteProfile, RemoteResult, RemoteType, SessionConfig,
};

use crate::providers::{
    BindInfoProvider, EndpointProbe, HostResolver, LocalCore, NetworkInfo, NoDiscovery,
    NoLocalCore, NoOverlay, OverlayHelper, StaticNetwork, SystemHostResolver,
};
use crate::transport::HttpProbe;

const UNKNOWN_ERROR: &str = "Unknown Error";

/// A successfully resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub protocol: String,
    pub uses_overlay: bool,
    /// Plain host offered alongside an overlay address.
    pub fallback_host: Option<String>,
    pub overlay_address: Option<String>,
    /// `protocol://host:port/`
    pub rpc_root: String,
    pub rpc_url: String,
    /// `protocol://host`, with loopback replaced by the active address.
    pub base_url: String,
}

/// Plain endpoint to try when the overlay cannot be used.
struct Fallback {
    host: String,
    protocol: String,
}

pub struct BindResolver {
    config: SessionConfig,
    discovery: Arc<dyn BindInfoProvider>,
    overlay: Arc<dyn OverlayHelper>,
    hosts: Arc<dyn HostResolver>,
    probe: Arc<dyn EndpointProbe>,
    local_core: Arc<dyn LocalCore>,
    network: Arc<dyn NetworkInfo>,
}

impl BindResolver {
    /// Resolver with the bundled defaults: no discovery, no overlay, system
    /// DNS, HTTP probe and no embedded daemon.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            probe: Arc::new(HttpProbe::new(&config)),
            config,
            discovery: Arc::new(NoDiscovery),
            overlay: Arc::new(NoOverlay),
            hosts: Arc::new(SystemHostResolver),
            local_core: Arc::new(NoLocalCore),
            network: Arc::new(StaticNetwork::default()),
        }
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

    /// Resolve `profile` to a live endpoint.
    ///
    /// On success the binding is written back into the profile
    /// (`last_binding_info`, `last_used_on`); persisting it is the caller's job.
    pub async fn resolve(&self, profile: &mut RemoteProfile) -> RemoteResult<Binding> {
        let binding = self.locate(profile).await?;
        remember(profile, &binding);
        info!(
            profile = %profile.id,
            url = %binding.rpc_url,
            overlay = binding.uses_overlay,
            "remote bound"
        );
        Ok(binding)
    }

    async fn locate(&self, profile: &RemoteProfile) -> RemoteResult<Binding> {
        if let Some(host) = profile.host() {
            // An overlay destination is only reachable through the overlay,
            // whatever the profile's overlay flag says.
            if is_overlay_host(host) {
                return self.bind_overlay(host, profile.port, None, true).await;
            }
            if profile.remote_type != RemoteType::Lookup {
                return self
                    .open_endpoint(&profile.protocol, host, profile.port)
                    .await;
            }
        }

        self.discover(profile, profile.overlay_only).await
    }

    async fn discover(&self, profile: &RemoteProfile, mandatory: bool) -> RemoteResult<Binding> {
        let info = self.discovery.binding_info(profile).await?;

        if let Some(error) = info.get_map("error") {
            let message = error.get_str("msg").unwrap_or(UNKNOWN_ERROR);
            debug!(message, "discovery answered with an error");
            return Err(RemoteError::BindingInfo(message.to_string()));
        }

        let port = info.get_i64("port", 0);
        if port == 0 {
            return Err(RemoteError::NoListener);
        }
        let port = u16::try_from(port)
            .map_err(|_| RemoteError::BindingInfo(format!("invalid port {port}")))?;
        let host = info
            .get_str("ip")
            .ok_or_else(|| RemoteError::BindingInfo(UNKNOWN_ERROR.to_string()))?;
        let protocol = info.get_str("protocol").unwrap_or_default();

        match info.get_str("i2p") {
            Some(overlay) => {
                let fallback = Fallback {
                    host: host.to_string(),
                    protocol: protocol.to_string(),
                };
                self.bind_overlay(overlay, port, Some(fallback), mandatory).await
            }
            None if mandatory => Err(RemoteError::OverlayNotOffered),
            None => self.open_endpoint(protocol, host, port).await,
        }
    }

    /// Open `overlay_host` through the overlay helper, or `fallback` if the
    /// overlay is unusable and not mandatory.
    async fn bind_overlay(
        &self,
        overlay_host: &str,
        port: u16,
        fallback: Option<Fallback>,
        mandatory: bool,
    ) -> RemoteResult<Binding> {
        let failure = self.check_overlay(mandatory).await;
        let overlay_error = match failure {
            Ok(()) => match self.open_endpoint(DEFAULT_PROTOCOL, overlay_host, port).await {
                Ok(mut binding) => {
                    binding.fallback_host = fallback.map(|f| f.host);
                    return Ok(binding);
                }
                Err(e) => e,
            },
            Err(e) if mandatory => return Err(e),
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            return Err(overlay_error);
        };
        debug!(error = %overlay_error, host = %fallback.host, "overlay unusable, using fallback host");
        let mut binding = self.open_endpoint(&fallback.protocol, &fallback.host, port).await?;
        binding.overlay_address = Some(overlay_host.to_string());
        binding.fallback_host = Some(fallback.host);
        Ok(binding)
    }

    /// Bring the helper up and check its preconditions. The helper is always
    /// unbound again before returning.
    async fn check_overlay(&self, mandatory: bool) -> RemoteResult<()> {
        if !self.overlay.is_installed() {
            return Err(RemoteError::OverlayUnavailable);
        }
        self.overlay.bind().await;
        let running = self.overlay.is_running();
        let tunnels = self.overlay.has_active_tunnels();
        self.overlay.unbind();
        debug!(running, tunnels, "overlay helper bound");

        if !running {
            return Err(RemoteError::OverlayNotRunning);
        }
        if !tunnels && mandatory {
            return Err(RemoteError::OverlayNoTunnels);
        }
        Ok(())
    }

    /// Resolve the host name, build the RPC URLs and make sure something is
    /// listening there.
    async fn open_endpoint(&self, protocol: &str, host: &str, port: u16) -> RemoteResult<Binding> {
        let protocol = if protocol.is_empty() {
            DEFAULT_PROTOCOL
        } else {
            protocol
        };
        let overlay = is_overlay_host(host);

        let mut target = host.to_string();
        if !overlay && !self.hosts.resolve(host, port).await {
            if let Some(address) = self.hosts.resolve_netbios(host).await {
                debug!(host, address = %address, "resolved through NetBIOS");
                target = address;
            }
        }

        let rpc_root = format!("{protocol}://{target}:{port}/");
        let rpc_url = format!("{rpc_root}{}", self.config.rpc_path);
        debug!(rpc_root = %rpc_root, "rpc root");

        if host == "localhost" && port == self.config.local_core_port && self.local_core.is_allowed()
        {
            let wait = self.config.local_core_wait();
            let ready = tokio::time::timeout(wait, self.local_core.wait_until_ready(wait))
                .await
                .unwrap_or(false);
            if !ready {
                warn!(wait_secs = wait.as_secs(), "local core not ready, continuing");
            }
        }

        if !overlay {
            let alive = tokio::time::timeout(self.config.probe_timeout(), self.probe.is_alive(&rpc_url))
                .await
                .unwrap_or(false);
            if !alive {
                return Err(RemoteError::EndpointUnreachable(rpc_url));
            }
        }

        let base_host = if is_loopback(&target) {
            self.network.active_ip_address().unwrap_or_else(|| target.clone())
        } else {
            target.clone()
        };

        Ok(Binding {
            base_url: format!("{protocol}://{base_host}"),
            endpoint_host: target,
            endpoint_port: port,
            protocol: protocol.to_string(),
            uses_overlay: overlay,
            fallback_host: None,
            overlay_address: overlay.then(|| host.to_string()),
            rpc_root,
            rpc_url,
        })
    }
}

fn remember(profile: &mut RemoteProfile, binding: &Binding) {
    let ip = binding
        .fallback_host
        .clone()
        .unwrap_or_else(|| binding.endpoint_host.clone());
    profile.last_binding_info = Some(BindingInfo {
        ip,
        overlay_address: binding.overlay_address.clone(),
        port: binding.endpoint_port,
        protocol: binding.protocol.clone(),
    });
    profile.last_used_on = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64);
}
