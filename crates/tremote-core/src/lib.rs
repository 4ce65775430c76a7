//! tremote-core: shared domain types for the tremote session coordinator.
//!
//! Provides remote profiles, session settings and their change-set encoding,
//! capability flags, transfer statistics, typed accessors over RPC maps,
//! session configuration, and the crate-wide error type.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod profile;
pub mod settings;
pub mod stats;
pub mod wire;

// Re-export commonly used items at crate root.
pub use capabilities::CapabilitySet;
pub use config::SessionConfig;
pub use error::{RemoteError, RemoteResult};
pub use profile::{BindingInfo, NetworkState, RemoteProfile, RemoteType, UpdateIntervalPolicy};
pub use settings::SessionSettings;
pub use stats::SessionStats;
pub use wire::{MapExt, RpcMap};
