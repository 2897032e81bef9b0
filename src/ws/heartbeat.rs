//! Liveness frames sent on a fixed interval while the socket is open.
//!
//! The client never times out on a missing reply; dead sockets are left to the
//! transport to detect.

use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30000);
pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "ping";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Raw text frame written on every beat.
    pub message: String,
    /// Server reply to swallow instead of dispatching. Defaults to `message`.
    pub response_message: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            message: DEFAULT_HEARTBEAT_MESSAGE.to_string(),
            response_message: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response_message = Some(response.into());
        self
    }

    pub fn response(&self) -> &str {
        self.response_message.as_deref().unwrap_or(&self.message)
    }

    /// Whether an inbound frame is just the heartbeat echo.
    pub fn is_response(&self, frame: &str) -> bool {
        frame == self.response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_defaults_to_message() {
        let hb = HeartbeatConfig::default();
        assert!(hb.is_response("ping"));
        assert!(!hb.is_response("pong"));
    }

    #[test]
    fn explicit_response_replaces_default() {
        let hb = HeartbeatConfig::every(Duration::from_secs(5)).with_response("pong");
        assert!(hb.is_response("pong"));
        assert!(!hb.is_response("ping"));
        assert_eq!(hb.message, "ping");
    }
}
