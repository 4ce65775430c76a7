//! Feature flags advertised in the `supports` object of `session-get`.

use std::collections::HashMap;

use crate::wire::{MapExt, RpcMap};

/// Key of the capability object inside session properties.
pub const SUPPORTS_KEY: &str = "supports";

/// Well-known capability names.
pub mod names {
    pub const TAGS: &str = "rpc:tags";
    pub const SUBSCRIPTIONS: &str = "rpc:subscriptions";
    pub const RCM: &str = "rpc:rcm";
    pub const FIELD_ID_BY_HASH: &str = "field:id-by-hash";
    pub const METHOD_TORRENT_RENAME: &str = "method:torrent-rename";
}

/// Capability-name to boolean mapping. Unknown names are unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    flags: HashMap<String, bool>,
}

impl CapabilitySet {
    /// Parse the `supports` object of a session-properties payload.
    pub fn from_session_properties(properties: &RpcMap) -> Self {
        properties
            .get_map(SUPPORTS_KEY)
            .map(Self::from_supports)
            .unwrap_or_default()
    }

    pub fn from_supports(supports: &RpcMap) -> Self {
        let flags = supports
            .keys()
            .map(|name| (name.clone(), supports.get_bool(name, false)))
            .collect();
        Self { flags }
    }

    pub fn supports(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::to_map;
    use serde_json::json;

    #[test]
    fn empty_set_supports_nothing() {
        let caps = CapabilitySet::default();
        assert!(!caps.supports(names::TAGS));
        assert!(!caps.supports("anything"));
    }

    #[test]
    fn parses_supports_object() {
        let props = to_map(json!({
            "supports": {"rpc:tags": true, "rpc:rcm": false, "field:id-by-hash": 1}
        }));
        let caps = CapabilitySet::from_session_properties(&props);
        assert!(caps.supports(names::TAGS));
        assert!(!caps.supports(names::RCM));
        assert!(caps.supports(names::FIELD_ID_BY_HASH));
        assert!(!caps.supports(names::SUBSCRIPTIONS));
    }

    #[test]
    fn missing_supports_object_is_empty() {
        let caps = CapabilitySet::from_session_properties(&to_map(json!({"supports": 5})));
        assert!(caps.is_empty());
    }
}
