//! Session tuning knobs, loadable from a TOML file.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port the embedded daemon listens on over loopback.
    #[serde(default = "default_local_core_port")]
    pub local_core_port: u16,

    /// How long a bind waits for the embedded daemon to initialize.
    #[serde(default = "default_local_core_wait")]
    pub local_core_wait_secs: u64,

    /// How long a foreground resume waits for the embedded daemon.
    #[serde(default = "default_local_core_resume_wait")]
    pub local_core_resume_wait_secs: u64,

    /// Liveness probe timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Per-call timeout of the bundled HTTP transport.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Path of the RPC endpoint below the RPC root.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,

    /// Buffer size of the transport push-event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_local_core_port() -> u16 {
    9093
}

fn default_local_core_wait() -> u64 {
    45
}

fn default_local_core_resume_wait() -> u64 {
    20
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_rpc_path() -> String {
    "transmission/rpc".to_string()
}

fn default_event_capacity() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_core_port: default_local_core_port(),
            local_core_wait_secs: default_local_core_wait(),
            local_core_resume_wait_secs: default_local_core_resume_wait(),
            probe_timeout_secs: default_probe_timeout(),
            rpc_timeout_secs: default_rpc_timeout(),
            rpc_path: default_rpc_path(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionConfig {
    /// Load from a TOML file, returning defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> RemoteResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| RemoteError::Config(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> RemoteResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| RemoteError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RemoteResult<()> {
        if self.event_capacity == 0 {
            return Err(RemoteError::Config("event_capacity must be > 0".into()));
        }
        if self.probe_timeout_secs == 0 {
            return Err(RemoteError::Config("probe_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn local_core_wait(&self) -> Duration {
        Duration::from_secs(self.local_core_wait_secs)
    }

    pub fn local_core_resume_wait(&self) -> Duration {
        Duration::from_secs(self.local_core_resume_wait_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.local_core_port, 9093);
        assert_eq!(cfg.local_core_wait(), Duration::from_secs(45));
        assert_eq!(cfg.rpc_path, "transmission/rpc");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SessionConfig::from_toml("local_core_wait_secs = 5\n").unwrap();
        assert_eq!(cfg.local_core_wait_secs, 5);
        assert_eq!(cfg.probe_timeout_secs, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(SessionConfig::from_toml("event_capacity = 0\n").is_err());
        assert!(SessionConfig::from_toml("probe_timeout_secs = \"soon\"\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionConfig::load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "rpc_path = \"vuze/rpc\"\n").unwrap();
        let cfg = SessionConfig::load(&path).unwrap();
        assert_eq!(cfg.rpc_path, "vuze/rpc");
    }
}
