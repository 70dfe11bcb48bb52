//! Relay events: the two payloads that travel over an open stream.
//!
//! A `Message` carries chat data toward its `target` address; an `Error`
//! carries a message that could not be delivered back along the author
//! chain. Both are plain data: routing decisions live in the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message addressed with `@`-joined segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Remaining delivery path, e.g. `bob` or `remote@bob`.
    #[serde(default)]
    pub target: String,
    /// Author chain, one segment prepended per hop.
    #[serde(default)]
    pub author: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub data: String,
}

/// An event on a relay stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(Message),
    /// Delivery failure, routed back toward `target` and wrapping the
    /// event that could not be delivered.
    Error { target: String, event: Box<Event> },
    /// Any event type this relay does not understand. Never forwarded.
    #[serde(other)]
    Unknown,
}

impl Event {
    /// Build a message event stamped with the current time.
    pub fn message(target: impl Into<String>, data: impl Into<String>) -> Self {
        Event::Message(Message {
            target: target.into(),
            author: String::new(),
            time: Utc::now(),
            data: data.into(),
        })
    }

    /// Length of this event's JSON encoding, in bytes.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(usize::MAX, |json| json.len())
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Message(_) => "message",
            Event::Error { .. } => "error",
            Event::Unknown => "unknown",
        }
    }
}
