//! Handshake messages.
//!
//! The same two-step dialogue appears on both sides of the duct:
//!
//! - `{"me": name}` - a participant introduces itself
//! - `{"you": name}` - the peer acknowledges the name
//!
//! Towards the server the duct says `me`; towards the offline client the duct
//! answers `you`.

use crate::{Message, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A participant introducing itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Me {
    pub me: String,
}

/// Acknowledgement of a [`Me`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct You {
    pub you: String,
}

impl Me {
    /// Introduce `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { me: name.into() }
    }

    /// Read the name from a message, if it carries a string `me`.
    pub fn from_message(message: &Message) -> Option<Self> {
        match message.get("me") {
            Some(Value::String(name)) => Some(Self::new(name.clone())),
            _ => None,
        }
    }
}

impl You {
    /// Acknowledge `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { you: name.into() }
    }

    /// Read the name from a message, if it carries a string `you`.
    pub fn from_message(message: &Message) -> Option<Self> {
        match message.get("you") {
            Some(Value::String(name)) => Some(Self::new(name.clone())),
            _ => None,
        }
    }
}

impl TryFrom<Me> for Message {
    type Error = TransportError;

    fn try_from(me: Me) -> Result<Self, Self::Error> {
        Message::try_from(serde_json::to_value(me)?)
    }
}

impl TryFrom<You> for Message {
    type Error = TransportError;

    fn try_from(you: You) -> Result<Self, Self::Error> {
        Message::try_from(serde_json::to_value(you)?)
    }
}
