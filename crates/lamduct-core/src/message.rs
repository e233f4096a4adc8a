//! Protocol messages.
//!
//! Both sides of the duct speak the same unit: a JSON object whose key order
//! is significant. The duct only interprets a handful of reserved keys; every
//! other field passes through untouched.

use crate::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key carrying the offline client's opaque session state.
pub const STATE_KEY: &str = "state";
/// Key of a server keepalive/deadline notice.
pub const TIMEOUT_KEY: &str = "timeout";
/// Key of the server's end-of-game message.
pub const STOP_KEY: &str = "stop";

/// An ordered JSON object exchanged with the server or the offline client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a field. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field, keeping the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Whether this is a server timeout notice rather than a game message.
    pub fn is_timeout(&self) -> bool {
        self.contains_key(TIMEOUT_KEY)
    }

    /// Whether this is the server's final `stop` message.
    pub fn is_stop(&self) -> bool {
        self.contains_key(STOP_KEY)
    }

    /// Detach the session state. A missing key reads as `null`.
    pub fn take_state(&mut self) -> Value {
        self.remove(STATE_KEY).unwrap_or(Value::Null)
    }

    /// Attach `state` as the last field, replacing any previous value.
    pub fn with_state(mut self, state: Value) -> Self {
        self.remove(STATE_KEY);
        self.0.insert(STATE_KEY.to_string(), state);
        self
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = TransportError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(TransportError::NotAnObject),
        }
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        Value::Object(message.0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}
