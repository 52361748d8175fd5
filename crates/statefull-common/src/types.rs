//! Core types shared across Statefull components.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A registered backend instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Registry-assigned identifier, never reused
    pub id: u64,

    /// Address browsers are sent to
    pub url: String,

    /// Last heartbeat (epoch millis)
    pub heartbeat: i64,
}

impl Node {
    pub fn new(id: u64, url: impl Into<String>, heartbeat: i64) -> Self {
        Self {
            id,
            url: url.into(),
            heartbeat,
        }
    }

    /// Milliseconds since the last heartbeat (zero if the clock is behind)
    pub fn silence_ms(&self, now: i64) -> u64 {
        now.saturating_sub(self.heartbeat).max(0) as u64
    }

    /// True once the node has been silent for longer than `timeout_ms`
    pub fn is_expired(&self, now: i64, timeout_ms: u64) -> bool {
        self.silence_ms(now) > timeout_ms
    }

    /// Move the heartbeat forward; never backwards
    pub fn tick(&mut self, now: i64) {
        self.heartbeat = self.heartbeat.max(now);
    }
}

/// Session fields the wire format owns; never stored in `extra`
pub const RESERVED_SESSION_KEYS: [&str; 2] = ["id", "new"];

/// Client-held session identity carried in a signed token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier, stable for the session's lifetime
    pub id: String,

    /// True iff this session was not derived from a valid token
    #[serde(rename = "new")]
    pub is_new: bool,

    /// Arbitrary JSON fields attached by handlers
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// A brand-new session for a first-time visitor
    pub fn fresh(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_new: true,
            extra: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Attach a field. Reserved keys (`id`, `new`) are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if RESERVED_SESSION_KEYS.contains(&key.as_str()) {
            return None;
        }
        self.extra.insert(key, value.into())
    }

    /// Drop reserved keys written into `extra` directly
    pub fn strip_reserved(&mut self) {
        for key in RESERVED_SESSION_KEYS {
            self.extra.remove(key);
        }
    }
}

/// Salted key-derivation output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHash {
    pub salt: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_expiry_is_strict() {
        let node = Node::new(1, "http://n1", 1_000);
        assert!(!node.is_expired(1_500, 500));
        assert!(node.is_expired(1_501, 500));
    }

    #[test]
    fn test_node_clock_behind_is_not_expired() {
        let node = Node::new(1, "http://n1", 10_000);
        assert_eq!(node.silence_ms(5_000), 0);
        assert!(!node.is_expired(5_000, 0));
    }

    #[test]
    fn test_tick_never_moves_backwards() {
        let mut node = Node::new(1, "http://n1", 2_000);
        node.tick(1_000);
        assert_eq!(node.heartbeat, 2_000);
        node.tick(3_000);
        assert_eq!(node.heartbeat, 3_000);
    }

    #[test]
    fn test_session_wire_shape() {
        let mut session = Session::fresh("abc");
        session.insert("cart", 3);

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["new"], true);
        assert_eq!(json["cart"], 3);
    }

    #[test]
    fn test_session_reserved_keys_stay_out_of_extra() {
        let mut session = Session::fresh("abc");
        assert!(session.insert("id", "other").is_none());
        assert!(session.insert("new", false).is_none());
        assert!(session.extra.is_empty());

        session.extra.insert("id".into(), Value::from("other"));
        session.extra.insert("cart".into(), Value::from(1));
        session.strip_reserved();
        assert_eq!(session.extra.len(), 1);

        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(json.matches("\"id\"").count(), 1);
    }

    #[test]
    fn test_session_requires_typed_fields() {
        let missing_new = serde_json::json!({ "id": "abc" });
        assert!(serde_json::from_value::<Session>(missing_new).is_err());

        let numeric_id = serde_json::json!({ "id": 7, "new": false });
        assert!(serde_json::from_value::<Session>(numeric_id).is_err());
    }
}
