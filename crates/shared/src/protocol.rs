//! Pulse realtime protocol vocabulary and frame codec.

use crate::error::ProtocolError;
use crate::models::{ClientFrame, Envelope, ErrorPayload, TopicPayload};

/// Client -> server: present a session credential.
pub const TYPE_AUTH: &str = "auth";
/// Server -> client: the credential was accepted.
pub const TYPE_AUTH_SUCCESS: &str = "auth_success";
pub const TYPE_SUBSCRIBE: &str = "subscribe";
pub const TYPE_UNSUBSCRIBE: &str = "unsubscribe";
pub const TYPE_SUBSCRIBED: &str = "subscribed";
pub const TYPE_UNSUBSCRIBED: &str = "unsubscribed";
pub const TYPE_ERROR: &str = "error";

/// Handler key that receives every envelope regardless of type.
pub const WILDCARD: &str = "*";

/// Message used when an `error` envelope carries no text.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Parse one inbound text frame.
///
/// The frame must be a JSON object with a string `type`; a missing `payload`
/// becomes `null`.
pub fn parse_frame(text: &str) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(mut map) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let message_type = match map.remove("type") {
        Some(serde_json::Value::String(t)) => t,
        _ => return Err(ProtocolError::MissingType),
    };
    let payload = map.remove("payload").unwrap_or(serde_json::Value::Null);

    Ok(Envelope {
        message_type,
        payload,
    })
}

/// Encode a control frame.
pub fn encode_frame(frame: &ClientFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Encode an application envelope.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Protocol-level meaning of an inbound envelope, if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    AuthSuccess,
    Error { message: String },
    Subscribed { topic: String },
    Unsubscribed { topic: String },
}

impl SystemEvent {
    /// Classify an envelope. Application types, and acknowledgements that
    /// carry no `topic`, yield `None`.
    pub fn classify(envelope: &Envelope) -> Option<Self> {
        match envelope.message_type.as_str() {
            TYPE_AUTH_SUCCESS => Some(SystemEvent::AuthSuccess),
            TYPE_ERROR => {
                let message = envelope
                    .payload_as::<ErrorPayload>()
                    .ok()
                    .and_then(|p| p.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                Some(SystemEvent::Error { message })
            }
            TYPE_SUBSCRIBED => topic_of(envelope).map(|topic| SystemEvent::Subscribed { topic }),
            TYPE_UNSUBSCRIBED => {
                topic_of(envelope).map(|topic| SystemEvent::Unsubscribed { topic })
            }
            _ => None,
        }
    }
}

fn topic_of(envelope: &Envelope) -> Option<String> {
    envelope
        .payload_as::<TopicPayload>()
        .ok()
        .map(|p| p.topic)
        .filter(|t| !t.is_empty())
}

/// Whether a server error message concerns authentication.
pub fn is_auth_error(message: &str) -> bool {
    message.contains("auth") || message.contains("token")
}
