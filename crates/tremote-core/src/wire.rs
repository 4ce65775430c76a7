//! Typed accessors over the untyped JSON maps the daemon sends back.
//!
//! Every getter takes a default that is returned when the key is missing or
//! holds a value of an incompatible type.

use serde_json::Value;

/// A decoded RPC `arguments` object.
pub type RpcMap = serde_json::Map<String, Value>;

/// Accessors with "missing key -> default" semantics.
pub trait MapExt {
    fn get_i64(&self, key: &str, default: i64) -> i64;
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_map(&self, key: &str) -> Option<&RpcMap>;
    fn get_list(&self, key: &str) -> Option<&Vec<Value>>;
}

impl MapExt for RpcMap {
    fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
            Some(Value::String(s)) => match s.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_map(&self, key: &str) -> Option<&RpcMap> {
        self.get(key).and_then(Value::as_object)
    }

    fn get_list(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }
}

/// Convert a `json!({...})` literal into an [`RpcMap`]; non-objects become empty.
pub fn to_map(value: Value) -> RpcMap {
    match value {
        Value::Object(map) => map,
        _ => RpcMap::new(),
    }
}
