//! Protocol-level error types.

use thiserror::Error;

/// Failure to turn an inbound text frame into an [`Envelope`](crate::Envelope),
/// or to read a typed payload out of one.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("payload of `{message_type}` does not match the expected shape: {source}")]
    Payload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Whether the frame could not be read as JSON at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}
