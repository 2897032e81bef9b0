//! Data carried over the Pulse realtime socket.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

// --- Connection ---

/// Lifecycle of the underlying socket as reported by the transport.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    /// `open()` has nothing to do in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionStatus::Open | ConnectionStatus::Connecting)
    }

    /// `close()` has nothing to do in these states.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, ConnectionStatus::Closing | ConnectionStatus::Closed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Open => "OPEN",
            ConnectionStatus::Closing => "CLOSING",
            ConnectionStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

// --- Envelopes ---

/// A typed unit of application traffic: `{ "type": ..., "payload": ... }`.
///
/// `type` is either one of the protocol vocabulary strings in
/// [`crate::protocol`] or an application-defined name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| ProtocolError::Payload {
            message_type: self.message_type.clone(),
            source,
        })
    }
}

/// Control frames the client writes. Serialized flat, e.g.
/// `{"type":"subscribe","topic":"project:1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

impl ClientFrame {
    pub fn auth(token: impl Into<String>) -> Self {
        ClientFrame::Auth {
            token: token.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        ClientFrame::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe {
            topic: topic.into(),
        }
    }
}

/// Server payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
}

/// Server payload of a `subscribed` / `unsubscribed` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPayload {
    pub topic: String,
}
