//! tremote-client: session coordinator for Transmission-RPC compatible
//! download daemons.
//!
//! A [`Session`] binds to a remote profile (directly, through discovery, or
//! over the I2P overlay), waits for the daemon's session properties, holds
//! RPC work submitted before that point, and keeps statistics and the
//! torrent list fresh while the session is in the foreground.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tremote_client::{FileProfileStore, Session, SessionDeps};
//! use tremote_core::{RemoteProfile, SessionConfig};
//!
//! # async fn example() -> tremote_core::RemoteResult<()> {
//! let config = SessionConfig::default();
//! let store = Arc::new(FileProfileStore::default_location()?);
//! let deps = SessionDeps::http(&config, store);
//!
//! let profile = RemoteProfile::direct("nas", "nas.local", 9091);
//! let session = Session::open(profile, deps, config)?;
//! session.add_speed_listener(|down, up| println!("down {down} B/s, up {up} B/s"));
//! session.wait_ready().await?;
//! session.resumed();
//! # Ok(())
//! # }
//! ```

pub mod foreground;
pub mod gate;
pub mod listeners;
pub mod providers;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod settings_cache;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export primary public types.
pub use foreground::ForegroundContext;
pub use gate::{PendingCallGate, RpcOp, Submitted};
pub use listeners::ListenerId;
pub use resolver::{BindResolver, Binding};
pub use scheduler::RefreshScheduler;
pub use session::{Lifecycle, Session, SessionDeps};
pub use settings_cache::SessionSettingsCache;
pub use store::{FileProfileStore, MemoryProfileStore, ProfileStore};
pub use transport::{HttpProbe, HttpRpcConnector, RpcConnector, RpcEvent, RpcHandle, TorrentListDelta};

// Re-export tremote-core error types for convenience.
pub use tremote_core::{RemoteError, RemoteResult};
