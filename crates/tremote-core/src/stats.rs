//! Transient transfer statistics from `session-stats`.

use crate::wire::{MapExt, RpcMap};

pub const KEY_DOWNLOAD_SPEED: &str = "downloadSpeed";
pub const KEY_UPLOAD_SPEED: &str = "uploadSpeed";

/// Fields requested on every refresh.
pub const STATS_FIELDS: [&str; 2] = [KEY_DOWNLOAD_SPEED, KEY_UPLOAD_SPEED];

/// Current transfer rates in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub download_speed: i64,
    pub upload_speed: i64,
}

impl SessionStats {
    pub fn from_rpc(map: &RpcMap) -> Self {
        Self {
            download_speed: map.get_i64(KEY_DOWNLOAD_SPEED, 0),
            upload_speed: map.get_i64(KEY_UPLOAD_SPEED, 0),
        }
    }

    /// The new speeds if they differ from `previous` (absent counts as zero).
    pub fn speed_delta(previous: Option<&SessionStats>, current: &SessionStats) -> Option<(i64, i64)> {
        let previous = previous.copied().unwrap_or_default();
        (previous != *current).then_some((current.download_speed, current.upload_speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::to_map;
    use serde_json::json;

    #[test]
    fn equal_speeds_produce_no_delta() {
        let a = SessionStats::from_rpc(&to_map(json!({"downloadSpeed": 100, "uploadSpeed": 5})));
        let b = SessionStats::from_rpc(&to_map(json!({"downloadSpeed": 100, "uploadSpeed": 5})));
        assert_eq!(SessionStats::speed_delta(Some(&a), &b), None);
    }

    #[test]
    fn changed_speed_produces_delta() {
        let a = SessionStats::from_rpc(&to_map(json!({"downloadSpeed": 100})));
        let b = SessionStats::from_rpc(&to_map(json!({"downloadSpeed": 250})));
        assert_eq!(SessionStats::speed_delta(Some(&a), &b), Some((250, 0)));
    }

    #[test]
    fn first_snapshot_compares_against_zero() {
        let idle = SessionStats::default();
        assert_eq!(SessionStats::speed_delta(None, &idle), None);
        let busy = SessionStats {
            download_speed: 1,
            upload_speed: 0,
        };
        assert_eq!(SessionStats::speed_delta(None, &busy), Some((1, 0)));
    }
}
