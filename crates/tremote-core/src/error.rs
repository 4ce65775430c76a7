use thiserror::Error;

/// Errors produced while binding to, or talking with, a remote daemon.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The discovery provider answered with an error payload.
    #[error("{0}")]
    BindingInfo(String),

    #[error("remote client is not listening")]
    NoListener,

    #[error("overlay network helper is not installed")]
    OverlayUnavailable,

    #[error("overlay network helper is not running")]
    OverlayNotRunning,

    #[error("overlay network has no active tunnels")]
    OverlayNoTunnels,

    #[error("remote client does not offer an overlay address")]
    OverlayNotOffered,

    #[error("remote endpoint not reachable: {0}")]
    EndpointUnreachable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc failure: {0}")]
    RpcFailure(String),

    #[error("session destroyed")]
    Destroyed,

    #[error("session not ready")]
    NotReady,

    #[error("config error: {0}")]
    Config(String),

    #[error("profile store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether this error terminates a bind attempt and should be shown to the user.
    pub fn is_bind_failure(&self) -> bool {
        matches!(
            self,
            Self::BindingInfo(_)
                | Self::NoListener
                | Self::OverlayUnavailable
                | Self::OverlayNotRunning
                | Self::OverlayNoTunnels
                | Self::OverlayNotOffered
                | Self::EndpointUnreachable(_)
                | Self::Transport(_)
        )
    }

    /// Message suitable for a connection-error dialog.
    pub fn user_message(&self) -> String {
        match self {
            Self::BindingInfo(msg) => msg.clone(),
            Self::NoListener => "The remote client is not running or not accepting connections.".into(),
            Self::OverlayUnavailable => "I2P is required for this remote, but it is not installed.".into(),
            Self::OverlayNotRunning => "I2P is required for this remote, but it is not running.".into(),
            Self::OverlayNoTunnels => "I2P is running, but has no active tunnels.".into(),
            Self::OverlayNotOffered => {
                "This remote requires I2P, but the remote client does not have I2P enabled.".into()
            }
            Self::EndpointUnreachable(_) => "Could not find the remote client. Is it running?".into(),
            other => other.to_string(),
        }
    }
}

// io and json errors are rebuilt from their text.
impl Clone for RemoteError {
    fn clone(&self) -> Self {
        match self {
            Self::BindingInfo(msg) => Self::BindingInfo(msg.clone()),
            Self::NoListener => Self::NoListener,
            Self::OverlayUnavailable => Self::OverlayUnavailable,
            Self::OverlayNotRunning => Self::OverlayNotRunning,
            Self::OverlayNoTunnels => Self::OverlayNoTunnels,
            Self::OverlayNotOffered => Self::OverlayNotOffered,
            Self::EndpointUnreachable(url) => Self::EndpointUnreachable(url.clone()),
            Self::Transport(msg) => Self::Transport(msg.clone()),
            Self::RpcFailure(msg) => Self::RpcFailure(msg.clone()),
            Self::Destroyed => Self::Destroyed,
            Self::NotReady => Self::NotReady,
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Store(msg) => Self::Store(msg.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::Json(<serde_json::Error as serde::de::Error>::custom(e)),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_info_message_is_verbatim() {
        let err = RemoteError::BindingInfo("auth failed".into());
        assert_eq!(err.to_string(), "auth failed");
        assert_eq!(err.user_message(), "auth failed");
        assert!(err.is_bind_failure());
    }

    #[test]
    fn overlay_failures_have_distinct_messages() {
        let messages = [
            RemoteError::OverlayUnavailable.user_message(),
            RemoteError::OverlayNotRunning.user_message(),
            RemoteError::OverlayNoTunnels.user_message(),
            RemoteError::OverlayNotOffered.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn cloned_errors_keep_their_message() {
        let err = RemoteError::BindingInfo("auth failed".into());
        assert_eq!(err.clone().user_message(), "auth failed");

        let io = RemoteError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let copy = io.clone();
        assert_eq!(copy.to_string(), io.to_string());
        assert!(matches!(copy, RemoteError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn runtime_errors_are_not_bind_failures() {
        assert!(!RemoteError::RpcFailure("nope".into()).is_bind_failure());
        assert!(!RemoteError::Destroyed.is_bind_failure());
        assert!(!RemoteError::NotReady.is_bind_failure());
    }
}
