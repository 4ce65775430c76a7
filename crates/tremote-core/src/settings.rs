//! Server-reported session configuration and its minimal change-set encoding.

use serde_json::Value;

use crate::wire::{MapExt, RpcMap};

pub const KEY_DOWNLOAD_DIR: &str = "download-dir";
pub const KEY_DOWNLOAD_LIMITED: &str = "speed-limit-down-enabled";
pub const KEY_DOWNLOAD_LIMIT: &str = "speed-limit-down";
pub const KEY_UPLOAD_LIMITED: &str = "speed-limit-up-enabled";
pub const KEY_UPLOAD_LIMIT: &str = "speed-limit-up";
pub const KEY_PEER_PORT: &str = "peer-port";
pub const KEY_RANDOM_PORT: &str = "peer-port-random-on-start";
pub const KEY_ALT_SPEED: &str = "alt-speed-enabled";

/// Snapshot of the daemon's session configuration. Speed limits are in kB/s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub download_dir: Option<String>,
    pub download_limited: bool,
    pub download_limit: i64,
    pub upload_limited: bool,
    pub upload_limit: i64,
    pub peer_port: i64,
    pub random_port: bool,
    pub alt_speed_enabled: bool,
}

impl SessionSettings {
    /// Build from a `session-get` reply; unknown or malformed keys take defaults.
    pub fn from_rpc(map: &RpcMap) -> Self {
        Self {
            download_dir: map.get_str(KEY_DOWNLOAD_DIR).map(str::to_string),
            download_limited: map.get_bool(KEY_DOWNLOAD_LIMITED, false),
            download_limit: map.get_i64(KEY_DOWNLOAD_LIMIT, 0),
            upload_limited: map.get_bool(KEY_UPLOAD_LIMITED, false),
            upload_limit: map.get_i64(KEY_UPLOAD_LIMIT, 0),
            peer_port: map.get_i64(KEY_PEER_PORT, 0),
            random_port: map.get_bool(KEY_RANDOM_PORT, false),
            alt_speed_enabled: map.get_bool(KEY_ALT_SPEED, false),
        }
    }

    /// Encode for `session-set`.
    ///
    /// With `previous`, only fields that differ from it are emitted; without,
    /// every field is emitted.
    pub fn to_rpc(&self, previous: Option<&SessionSettings>) -> RpcMap {
        let mut map = RpcMap::new();
        let changed = |f: fn(&SessionSettings) -> Value| match previous {
            Some(prev) => {
                let value = f(self);
                (value != f(prev)).then_some(value)
            }
            None => Some(f(self)),
        };

        let fields: [(&str, fn(&SessionSettings) -> Value); 8] = [
            (KEY_DOWNLOAD_DIR, |s| {
                s.download_dir.clone().map(Value::String).unwrap_or(Value::Null)
            }),
            (KEY_DOWNLOAD_LIMITED, |s| Value::Bool(s.download_limited)),
            (KEY_DOWNLOAD_LIMIT, |s| Value::from(s.download_limit)),
            (KEY_UPLOAD_LIMITED, |s| Value::Bool(s.upload_limited)),
            (KEY_UPLOAD_LIMIT, |s| Value::from(s.upload_limit)),
            (KEY_PEER_PORT, |s| Value::from(s.peer_port)),
            (KEY_RANDOM_PORT, |s| Value::Bool(s.random_port)),
            (KEY_ALT_SPEED, |s| Value::Bool(s.alt_speed_enabled)),
        ];

        for (key, f) in fields {
            if let Some(value) = changed(f) {
                if !value.is_null() {
                    map.insert(key.to_string(), value);
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::to_map;
    use serde_json::json;

    fn reply() -> RpcMap {
        to_map(json!({
            "download-dir": "/data",
            "speed-limit-down-enabled": true,
            "speed-limit-down": 500,
            "speed-limit-up-enabled": false,
            "speed-limit-up": 50,
            "peer-port": 51413,
            "peer-port-random-on-start": false,
            "alt-speed-enabled": false,
            "version": "3.00"
        }))
    }

    #[test]
    fn parses_session_get_reply() {
        let s = SessionSettings::from_rpc(&reply());
        assert_eq!(s.download_dir.as_deref(), Some("/data"));
        assert!(s.download_limited);
        assert_eq!(s.download_limit, 500);
        assert_eq!(s.upload_limit, 50);
        assert_eq!(s.peer_port, 51413);
    }

    #[test]
    fn missing_keys_default() {
        let s = SessionSettings::from_rpc(&RpcMap::new());
        assert_eq!(s, SessionSettings::default());
    }

    #[test]
    fn change_set_contains_only_differing_fields() {
        let old = SessionSettings::from_rpc(&reply());
        let mut new = old.clone();
        new.upload_limited = true;
        new.upload_limit = 75;

        let changes = new.to_rpc(Some(&old));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["speed-limit-up-enabled"], json!(true));
        assert_eq!(changes["speed-limit-up"], json!(75));
    }

    #[test]
    fn identical_snapshots_produce_empty_change_set() {
        let s = SessionSettings::from_rpc(&reply());
        assert!(s.to_rpc(Some(&s)).is_empty());
    }

    #[test]
    fn full_encoding_round_trips_through_from_rpc() {
        let s = SessionSettings::from_rpc(&reply());
        let full = s.to_rpc(None);
        assert_eq!(full.len(), 8);
        assert_eq!(SessionSettings::from_rpc(&full), s);
    }
}
