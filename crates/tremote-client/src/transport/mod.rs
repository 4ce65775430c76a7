//! RPC transport seam.
//!
//! A [`RpcConnector`] opens a [`RpcHandle`] for a resolved endpoint URL. The
//! session only ever talks to the daemon through a handle. The HTTP
//! implementation lives in [`http`]; tests substitute scripted fakes.

pub mod http;

pub use http::{HttpProbe, HttpRpcConnector, HttpRpcHandle};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tremote_core::wire::{to_map, MapExt, RpcMap};
use tremote_core::{RemoteProfile, RemoteResult};

/// Boxed future used by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const METHOD_SESSION_GET: &str = "session-get";
pub const METHOD_SESSION_SET: &str = "session-set";
pub const METHOD_SESSION_STATS: &str = "session-stats";
pub const METHOD_TORRENT_GET: &str = "torrent-get";
pub const METHOD_TAGS_GET_LIST: &str = "tags-get-list";

/// Torrent fields requested on every list refresh.
pub const TORRENT_FIELDS: &[&str] = &[
    "id",
    "hashString",
    "name",
    "status",
    "percentDone",
    "rateDownload",
    "rateUpload",
    "eta",
    "sizeWhenDone",
    "error",
    "errorString",
];

/// Torrents added/updated and removed by one `torrent-get` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TorrentListDelta {
    pub call_id: String,
    pub added: Vec<RpcMap>,
    pub removed: Vec<i64>,
}

/// Replies a handle publishes to its standing listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    SessionProperties(RpcMap),
    TorrentList(TorrentListDelta),
}

/// A live connection to one daemon endpoint.
///
/// Every successful `session-get` reply must be published as
/// [`RpcEvent::SessionProperties`] and every successful `torrent-get` reply as
/// [`RpcEvent::TorrentList`] (see [`publish_reply`]), whoever made the call.
pub trait RpcHandle: Send + Sync {
    /// Perform one RPC call, resolving to the reply's `arguments` object.
    fn call<'a>(&'a self, method: &'a str, arguments: RpcMap) -> BoxFuture<'a, RemoteResult<RpcMap>>;

    /// Subscribe to published replies.
    fn subscribe(&self) -> broadcast::Receiver<RpcEvent>;

    /// Transmission RPC version, -1 before the first `session-get`.
    fn rpc_version(&self) -> i64;

    /// Vendor extension version, -1 when the daemon is not Vuze/BiglyBT.
    fn rpc_version_az(&self) -> i64;

    fn client_version(&self) -> Option<String>;

    /// Release the connection. Calls made afterwards fail.
    fn destroy(&self);
}

/// Opens handles for resolved endpoints.
pub trait RpcConnector: Send + Sync {
    fn open<'a>(
        &'a self,
        rpc_url: &'a str,
        profile: &'a RemoteProfile,
    ) -> BoxFuture<'a, RemoteResult<Arc<dyn RpcHandle>>>;
}

/// Publish the standing-listener event for a successful reply, if any.
pub fn publish_reply(
    events: &broadcast::Sender<RpcEvent>,
    call_id: &str,
    method: &str,
    reply: &RpcMap,
) {
    let event = match method {
        METHOD_SESSION_GET => RpcEvent::SessionProperties(reply.clone()),
        METHOD_TORRENT_GET => RpcEvent::TorrentList(parse_torrent_list(call_id, reply)),
        _ => return,
    };
    // No receivers is fine: nobody is listening yet.
    let _ = events.send(event);
}

/// Split a `torrent-get` reply into added/updated torrents and removed ids.
pub fn parse_torrent_list(call_id: &str, reply: &RpcMap) -> TorrentListDelta {
    let added = reply
        .get_list("torrents")
        .map(|list| list.iter().filter_map(|t| t.as_object().cloned()).collect())
        .unwrap_or_default();
    let removed = reply
        .get_list("removed")
        .map(|list| list.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    TorrentListDelta {
        call_id: call_id.to_string(),
        added,
        removed,
    }
}

/// Arguments for a `torrent-get`, either the full list or recently changed ones.
pub fn torrent_get_args(recent_only: bool) -> RpcMap {
    if recent_only {
        to_map(json!({ "ids": "recently-active", "fields": TORRENT_FIELDS }))
    } else {
        to_map(json!({ "fields": TORRENT_FIELDS }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_list_reply_is_split() {
        let reply = to_map(json!({
            "torrents": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}, 3],
            "removed": [7, "x", 9]
        }));
        let delta = parse_torrent_list("c1", &reply);
        assert_eq!(delta.call_id, "c1");
        assert_eq!(delta.added.len(), 2);
        assert_eq!(delta.removed, vec![7, 9]);
    }

    #[test]
    fn only_properties_and_torrent_replies_are_published() {
        let (tx, mut rx) = broadcast::channel(8);
        publish_reply(&tx, "1", METHOD_SESSION_STATS, &RpcMap::new());
        publish_reply(&tx, "2", METHOD_SESSION_GET, &to_map(json!({"version": "1"})));
        publish_reply(&tx, "3", METHOD_TORRENT_GET, &to_map(json!({"torrents": []})));

        assert!(matches!(rx.try_recv(), Ok(RpcEvent::SessionProperties(_))));
        match rx.try_recv() {
            Ok(RpcEvent::TorrentList(delta)) => assert_eq!(delta.call_id, "3"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn recent_fetch_asks_for_recently_active() {
        assert_eq!(torrent_get_args(true)["ids"], json!("recently-active"));
        assert!(torrent_get_args(false).get("ids").is_none());
    }
}
