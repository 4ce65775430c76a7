//! Remote profiles: everything needed to find and reconnect to one daemon.

use serde::{Deserialize, Serialize};

use crate::wire::RpcMap;

/// Host suffix that marks an I2P overlay address.
pub const OVERLAY_SUFFIX: &str = ".i2p";

/// Scheme used when a binding does not name one.
pub const DEFAULT_PROTOCOL: &str = "http";

/// How a profile's endpoint is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteType {
    /// A daemon embedded on this device, reached over loopback.
    LocalCore,
    /// Host and port are given explicitly.
    #[default]
    Direct,
    /// Host and port come from the discovery provider.
    Lookup,
}

/// The endpoint of the last successful bind, kept for fast reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_address: Option<String>,
    pub port: u16,
    pub protocol: String,
}

/// Connectivity as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub online: bool,
    pub mobile: bool,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            online: true,
            mobile: false,
        }
    }
}

/// User-chosen refresh cadence. Intervals are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIntervalPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: i64,
    /// Use the mobile settings below while on a metered connection.
    #[serde(default)]
    pub mobile_separate: bool,
    #[serde(default = "default_true")]
    pub mobile_enabled: bool,
    #[serde(default = "default_interval")]
    pub mobile_interval_secs: i64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> i64 {
    30
}

impl Default for UpdateIntervalPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            mobile_separate: false,
            mobile_enabled: true,
            mobile_interval_secs: default_interval(),
        }
    }
}

impl UpdateIntervalPolicy {
    /// Refresh interval for the given network state; `<= 0` means disabled.
    pub fn interval_for(&self, network: NetworkState) -> i64 {
        if network.mobile && self.mobile_separate {
            return if self.mobile_enabled {
                self.mobile_interval_secs
            } else {
                0
            };
        }
        if self.enabled {
            self.interval_secs
        } else {
            0
        }
    }
}

/// A saved connection to one remote daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProfile {
    pub id: String,
    #[serde(default)]
    pub nick: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub remote_type: RemoteType,
    /// Refuse to connect unless the I2P overlay can be used.
    #[serde(default)]
    pub overlay_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password, or access code for discovery-based remotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_binding_info: Option<BindingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_properties: Option<RpcMap>,
    #[serde(default)]
    pub save_path_history: Vec<String>,
    #[serde(default)]
    pub update_interval: UpdateIntervalPolicy,
    /// Epoch millis of the last successful bind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_on: Option<u64>,
}

fn default_port() -> u16 {
    9091
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

impl RemoteProfile {
    pub fn new(id: impl Into<String>, remote_type: RemoteType) -> Self {
        let id = id.into();
        Self {
            nick: id.clone(),
            id,
            host: None,
            port: default_port(),
            protocol: default_protocol(),
            remote_type,
            overlay_only: false,
            user: None,
            password: None,
            last_binding_info: None,
            last_session_properties: None,
            save_path_history: Vec::new(),
            update_interval: UpdateIntervalPolicy::default(),
            last_used_on: None,
        }
    }

    /// Profile for an explicit `host:port` endpoint.
    pub fn direct(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let mut profile = Self::new(id, RemoteType::Direct);
        profile.host = Some(host.into());
        profile.port = port;
        profile
    }

    /// The configured host, if non-empty.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_local_host(&self) -> bool {
        self.remote_type == RemoteType::LocalCore
            || matches!(self.host(), Some(h) if is_loopback(h))
    }

    pub fn calc_update_interval(&self, network: NetworkState) -> i64 {
        self.update_interval.interval_for(network)
    }
}

/// Whether `host` names an I2P destination.
pub fn is_overlay_host(host: &str) -> bool {
    host.ends_with(OVERLAY_SUFFIX)
}

pub fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1"
}
