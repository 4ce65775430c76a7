//! Transmission-RPC over HTTP.
//!
//! Requests are JSON envelopes `{"method", "arguments", "tag"}` POSTed to the
//! RPC URL. The daemon rejects the first request with `409 Conflict` and an
//! `X-Transmission-Session-Id` header, which must be echoed on every request
//! after that.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use tremote_core::wire::{MapExt, RpcMap};
use tremote_core::{RemoteError, RemoteProfile, RemoteResult, SessionConfig};

use super::{publish_reply, BoxFuture, RpcConnector, RpcEvent, RpcHandle, METHOD_SESSION_GET};
use crate::listeners::lock;
use crate::providers::EndpointProbe;

pub const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// User name sent with an access code when the profile names no user.
const DEFAULT_USER: &str = "vuze";

/// Opens [`HttpRpcHandle`]s.
pub struct HttpRpcConnector {
    timeout: Duration,
    event_capacity: usize,
}

impl HttpRpcConnector {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            timeout: config.rpc_timeout(),
            event_capacity: config.event_capacity,
        }
    }
}

impl RpcConnector for HttpRpcConnector {
    fn open<'a>(
        &'a self,
        rpc_url: &'a str,
        profile: &'a RemoteProfile,
    ) -> BoxFuture<'a, RemoteResult<Arc<dyn RpcHandle>>> {
        Box::pin(async move {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| RemoteError::Transport(e.to_string()))?;

            let credentials = match (&profile.user, &profile.password) {
                (Some(user), password) => Some((user.clone(), password.clone())),
                (None, Some(password)) => Some((DEFAULT_USER.to_string(), Some(password.clone()))),
                (None, None) => None,
            };

            debug!(url = %rpc_url, "opening rpc handle");
            let handle: Arc<dyn RpcHandle> = Arc::new(HttpRpcHandle::new(
                client,
                rpc_url.to_string(),
                credentials,
                self.event_capacity,
            ));
            Ok(handle)
        })
    }
}

/// One HTTP RPC endpoint plus its negotiated session id.
pub struct HttpRpcHandle {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, Option<String>)>,
    session_id: Mutex<Option<String>>,
    events: broadcast::Sender<RpcEvent>,
    next_tag: AtomicU64,
    rpc_version: AtomicI64,
    rpc_version_az: AtomicI64,
    client_version: Mutex<Option<String>>,
    destroyed: AtomicBool,
}

impl HttpRpcHandle {
    pub fn new(
        client: reqwest::Client,
        url: String,
        credentials: Option<(String, Option<String>)>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            client,
            url,
            credentials,
            session_id: Mutex::new(None),
            events,
            next_tag: AtomicU64::new(1),
            rpc_version: AtomicI64::new(-1),
            rpc_version_az: AtomicI64::new(-1),
            client_version: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn execute(&self, method: &str, arguments: RpcMap) -> RemoteResult<RpcMap> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RemoteError::Transport("rpc handle destroyed".into()));
        }

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let body = request_body(method, arguments, tag);

        // Second attempt only happens after a 409 hands us a fresh session id.
        for _ in 0..2 {
            let mut request = self.client.post(&self.url).json(&body);
            let session_id = lock(&self.session_id).clone();
            if let Some(id) = session_id {
                request = request.header(SESSION_ID_HEADER, id);
            }
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, password.as_ref());
            }

            let response = request
                .send()
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::CONFLICT {
                let id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| RemoteError::Transport("409 without session id".into()))?;
                trace!(session_id = %id, "negotiated rpc session id");
                *lock(&self.session_id) = Some(id);
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(RemoteError::Transport("unauthorized".into()));
            }
            if !status.is_success() {
                return Err(RemoteError::Transport(format!("HTTP {status}")));
            }

            let value: Value = response
                .json()
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            let reply = parse_response(value)?;

            if method == METHOD_SESSION_GET {
                self.record_versions(&reply);
            }
            publish_reply(&self.events, &tag.to_string(), method, &reply);
            return Ok(reply);
        }

        Err(RemoteError::Transport("rpc session id negotiation failed".into()))
    }

    fn record_versions(&self, reply: &RpcMap) {
        self.rpc_version
            .store(reply.get_i64("rpc-version", -1), Ordering::Release);
        self.rpc_version_az
            .store(reply.get_i64("az-rpc-version", -1), Ordering::Release);
        if let Some(version) = reply.get_str("version") {
            *lock(&self.client_version) = Some(version.to_string());
        }
    }
}

impl RpcHandle for HttpRpcHandle {
    fn call<'a>(&'a self, method: &'a str, arguments: RpcMap) -> BoxFuture<'a, RemoteResult<RpcMap>> {
        Box::pin(self.execute(method, arguments))
    }

    fn subscribe(&self) -> broadcast::Receiver<RpcEvent> {
        self.events.subscribe()
    }

    fn rpc_version(&self) -> i64 {
        self.rpc_version.load(Ordering::Acquire)
    }

    fn rpc_version_az(&self) -> i64 {
        self.rpc_version_az.load(Ordering::Acquire)
    }

    fn client_version(&self) -> Option<String> {
        lock(&self.client_version).clone()
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Reachability check: any HTTP answer, even an error status, means alive.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.probe_timeout())
                .build()
                .unwrap_or_default(),
        }
    }
}

impl EndpointProbe for HttpProbe {
    fn is_alive<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.client.get(url).send().await {
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "endpoint answered");
                    true
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "endpoint probe failed");
                    false
                }
            }
        })
    }
}

fn request_body(method: &str, arguments: RpcMap, tag: u64) -> Value {
    json!({
        "method": method,
        "arguments": Value::Object(arguments),
        "tag": tag,
    })
}

/// Unwrap `{"result": "success", "arguments": {...}}`.
fn parse_response(value: Value) -> RemoteResult<RpcMap> {
    let Value::Object(mut envelope) = value else {
        return Err(RemoteError::Transport("rpc reply is not an object".into()));
    };
    match envelope.get_str("result") {
        Some("success") => Ok(match envelope.remove("arguments") {
            Some(Value::Object(arguments)) => arguments,
            _ => RpcMap::new(),
        }),
        Some(result) => Err(RemoteError::RpcFailure(result.to_string())),
        None => Err(RemoteError::RpcFailure("missing result".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tremote_core::wire::to_map;

    #[test]
    fn request_envelope_shape() {
        let body = request_body("session-get", to_map(json!({"fields": ["version"]})), 7);
        assert_eq!(body["method"], "session-get");
        assert_eq!(body["arguments"]["fields"][0], "version");
        assert_eq!(body["tag"], 7);
    }

    #[test]
    fn success_reply_yields_arguments() {
        let reply = parse_response(json!({"result": "success", "arguments": {"a": 1}})).unwrap();
        assert_eq!(reply.get_i64("a", 0), 1);

        let empty = parse_response(json!({"result": "success"})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn failure_reply_carries_result_text() {
        match parse_response(json!({"result": "no such method"})) {
            Err(RemoteError::RpcFailure(msg)) => assert_eq!(msg, "no such method"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(parse_response(json!([1])).is_err());
        assert!(parse_response(json!({})).is_err());
    }

    #[tokio::test]
    async fn versions_are_recorded_from_session_get() {
        let handle = HttpRpcHandle::new(reqwest::Client::new(), "http://h:1/rpc".into(), None, 4);
        assert_eq!(handle.rpc_version(), -1);
        handle.record_versions(&to_map(json!({
            "rpc-version": 15, "az-rpc-version": 5, "version": "BiglyBT 3.0"
        })));
        assert_eq!(handle.rpc_version(), 15);
        assert_eq!(handle.rpc_version_az(), 5);
        assert_eq!(handle.client_version().as_deref(), Some("BiglyBT 3.0"));
    }

    #[tokio::test]
    async fn destroyed_handle_refuses_calls() {
        let handle = HttpRpcHandle::new(reqwest::Client::new(), "http://h:1/rpc".into(), None, 4);
        handle.destroy();
        assert!(matches!(
            handle.call("session-get", RpcMap::new()).await,
            Err(RemoteError::Transport(_))
        ));
    }
}
