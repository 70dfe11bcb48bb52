//! Relay wire protocol: tagged JSON frames, one per line.
//!
//! A TCP connection starts in request/reply mode (`signup`, `login`,
//! `whoami`) and switches to a duplex event stream after a successful
//! `open`. Every frame is one `Frame` value.

use serde::{Deserialize, Serialize};

use super::event::Event;

/// Username/password pair sent with `signup` and `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // ── client → server ──────────────────────────────────────────
    /// Create an account and start a session.
    Signup(Credentials),
    /// Start a new session for an existing account.
    Login(Credentials),
    /// Resolve a token to its identity.
    Whoami { token: String },
    /// Bind this connection to the token's identity and start streaming.
    Open { token: String },

    // ── server → client ──────────────────────────────────────────
    /// Reply to `signup`/`login`.
    Auth { token: String },
    /// Reply to `whoami`.
    User { name: String },
    /// Reply to a successful `open`; events follow.
    Opened { identity: String },
    /// Any request failed.
    Failure { reason: String },

    // ── both directions, after open ──────────────────────────────
    Event { event: Event },
}

impl Frame {
    pub fn failure(reason: impl ToString) -> Self {
        Frame::Failure {
            reason: reason.to_string(),
        }
    }
}

impl From<Event> for Frame {
    fn from(event: Event) -> Self {
        Frame::Event { event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn signup_json_shape() {
        let frame = Frame::Signup(Credentials::new("alice", "pw"));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::json!({"type": "signup", "username": "alice", "password": "pw"})
        );
    }

    #[test]
    fn event_frame_nests_tagged_event() {
        let frame: Frame = serde_json::from_str(
            r#"{"type":"event","event":{"type":"message","target":"bob","author":"","time":"2024-05-01T12:00:00Z","data":"hi"}}"#,
        )
        .unwrap();
        let Frame::Event { event: Event::Message(msg) } = frame else {
            panic!("expected message event frame");
        };
        assert_eq!(msg.target, "bob");
        assert_eq!(msg.data, "hi");
    }

    #[test]
    fn failure_helper_formats_reason() {
        assert_eq!(
            Frame::failure("session not found"),
            Frame::Failure {
                reason: "session not found".into()
            }
        );
    }

    #[test]
    fn unknown_frame_type_fails() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"logout"}"#).is_err());
    }
}
