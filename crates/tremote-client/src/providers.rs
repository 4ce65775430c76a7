//! External collaborators consumed by the bind resolver and the session.
//!
//! Each trait is object-safe so the host application can inject its own
//! implementation. The defaults here cover a plain desktop environment with
//! no discovery service, no overlay network and no embedded daemon.

use std::time::Duration;

use serde_json::json;
use tracing::error;
use tremote_core::wire::{to_map, RpcMap};
use tremote_core::{NetworkState, RemoteProfile, RemoteResult};

use crate::transport::BoxFuture;

/// Looks up the current endpoint of a remote by its access code.
///
/// Replies `{ip, protocol, i2p, port}` or `{error: {msg}}`.
pub trait BindInfoProvider: Send + Sync {
    fn binding_info<'a>(&'a self, profile: &'a RemoteProfile) -> BoxFuture<'a, RemoteResult<RpcMap>>;
}

/// Helper runtime that tunnels connections through the I2P overlay.
pub trait OverlayHelper: Send + Sync {
    fn is_installed(&self) -> bool;
    /// Completes once the helper reports it is bound.
    fn bind(&self) -> BoxFuture<'_, ()>;
    fn is_running(&self) -> bool;
    fn has_active_tunnels(&self) -> bool;
    fn unbind(&self);
}

/// Name resolution used before building the endpoint URL.
pub trait HostResolver: Send + Sync {
    /// Standard (DNS) resolution; `true` when the name resolves.
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool>;
    /// NetBIOS lookup, returning an address to use instead of the name.
    fn resolve_netbios<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Option<String>>;
}

/// Lightweight reachability check for an RPC URL.
pub trait EndpointProbe: Send + Sync {
    fn is_alive<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool>;
}

/// The daemon embedded in the host application.
pub trait LocalCore: Send + Sync {
    /// Whether the host application permits attaching to the embedded daemon.
    fn is_allowed(&self) -> bool;
    /// Wait up to `timeout` for the daemon to finish initializing.
    fn wait_until_ready(&self, timeout: Duration) -> BoxFuture<'_, bool>;
    fn detach(&self);
}

/// Host network information.
pub trait NetworkInfo: Send + Sync {
    fn state(&self) -> NetworkState;
    /// Address of the active interface, used in place of loopback hosts.
    fn active_ip_address(&self) -> Option<String>;
}

/// Error-tracking sink.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, message: &str);
}

/// Discovery is not available; every lookup answers with an error payload.
pub struct NoDiscovery;

impl BindInfoProvider for NoDiscovery {
    fn binding_info<'a>(&'a self, _profile: &'a RemoteProfile) -> BoxFuture<'a, RemoteResult<RpcMap>> {
        Box::pin(async { Ok(to_map(json!({"error": {"msg": "remote discovery is not configured"}}))) })
    }
}

/// No overlay helper installed.
pub struct NoOverlay;

impl OverlayHelper for NoOverlay {
    fn is_installed(&self) -> bool {
        false
    }

    fn bind(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn is_running(&self) -> bool {
        false
    }

    fn has_active_tunnels(&self) -> bool {
        false
    }

    fn unbind(&self) {}
}

/// DNS through the tokio resolver; no NetBIOS.
pub struct SystemHostResolver;

impl HostResolver for SystemHostResolver {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match tokio::net::lookup_host((host, port)).await {
                Ok(mut addrs) => addrs.next().is_some(),
                Err(_) => false,
            }
        })
    }

    fn resolve_netbios<'a>(&'a self, _host: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async { None })
    }
}

/// No embedded daemon.
pub struct NoLocalCore;

impl LocalCore for NoLocalCore {
    fn is_allowed(&self) -> bool {
        false
    }

    fn wait_until_ready(&self, _timeout: Duration) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    fn detach(&self) {}
}

/// Fixed network information.
#[derive(Default)]
pub struct StaticNetwork {
    pub state: NetworkState,
    pub active_ip: Option<String>,
}

impl NetworkInfo for StaticNetwork {
    fn state(&self) -> NetworkState {
        self.state
    }

    fn active_ip_address(&self) -> Option<String> {
        self.active_ip.clone()
    }
}

/// Reports errors through `tracing`.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, message: &str) {
        error!(context, message, "reported error");
    }
}
