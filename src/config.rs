//! Client configuration, from code or from environment variables.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use pulse_shared::Envelope;
use thiserror::Error;

use crate::ws::heartbeat::{HeartbeatConfig, DEFAULT_HEARTBEAT_MESSAGE};
use crate::ws::reconnect::{
    ReconnectDelay, ReconnectOption, ReconnectPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY,
    DEFAULT_RETRIES,
};

pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid WebSocket URL {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
}

/// Connection behaviour. Callbacks are configured separately in
/// [`ClientCallbacks`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    /// Open as soon as the client is built.
    pub immediate: bool,
    pub auto_reconnect: ReconnectOption,
    /// `None` disables the heartbeat.
    pub heartbeat: Option<HeartbeatConfig>,
    /// Topics declared up front and subscribed once authenticated.
    pub auto_subscribe: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            immediate: true,
            auto_reconnect: ReconnectOption::default(),
            heartbeat: Some(HeartbeatConfig::default()),
            auto_subscribe: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Replace the endpoint, rejecting anything but `ws://` and `wss://`.
    pub fn with_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        validate_url(&url)?;
        self.url = url;
        Ok(self)
    }

    /// Parse options from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `PULSE_WS_URL`: endpoint (default: `ws://localhost:8080/ws`)
    /// - `PULSE_WS_IMMEDIATE`: `true` | `false` (default: `true`)
    /// - `PULSE_WS_RECONNECT`: `off` | `fixed` | `exponential` (default: `exponential`)
    /// - `PULSE_WS_RETRIES`: max attempts, `0` for unlimited (default: 5)
    /// - `PULSE_WS_RECONNECT_DELAY_MS`: fixed delay or backoff base (default: 1000)
    /// - `PULSE_WS_RECONNECT_CAP_MS`: backoff cap (default: 30000)
    /// - `PULSE_WS_HEARTBEAT_MS`: interval, `0` disables (default: 30000)
    /// - `PULSE_WS_HEARTBEAT_MESSAGE`: liveness frame (default: `ping`)
    /// - `PULSE_WS_TOPICS`: comma separated topics to auto-subscribe
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Some(url) = lookup("PULSE_WS_URL") {
            options.url = url;
        }
        validate_url(&options.url)?;

        if let Some(raw) = lookup("PULSE_WS_IMMEDIATE") {
            options.immediate = parse_bool("PULSE_WS_IMMEDIATE", &raw)?;
        }

        let retries = match lookup("PULSE_WS_RETRIES") {
            Some(raw) => match parse_u64("PULSE_WS_RETRIES", &raw)? {
                0 => None,
                n => Some(u32::try_from(n).map_err(|_| invalid("PULSE_WS_RETRIES", &raw))?),
            },
            None => Some(DEFAULT_RETRIES),
        };
        let base = lookup("PULSE_WS_RECONNECT_DELAY_MS")
            .map(|raw| parse_millis("PULSE_WS_RECONNECT_DELAY_MS", &raw))
            .transpose()?
            .unwrap_or(DEFAULT_BASE_DELAY);
        let cap = lookup("PULSE_WS_RECONNECT_CAP_MS")
            .map(|raw| parse_millis("PULSE_WS_RECONNECT_CAP_MS", &raw))
            .transpose()?
            .unwrap_or(DEFAULT_MAX_DELAY);

        let mode = lookup("PULSE_WS_RECONNECT")
            .unwrap_or_else(|| "exponential".to_string())
            .to_lowercase();
        options.auto_reconnect = match mode.as_str() {
            "off" | "false" | "disabled" => ReconnectOption::Disabled,
            "fixed" => ReconnectOption::Enabled(ReconnectPolicy {
                retries,
                delay: ReconnectDelay::Fixed(base),
            }),
            "exponential" | "true" => ReconnectOption::Enabled(ReconnectPolicy {
                retries,
                delay: ReconnectDelay::Exponential { base, cap },
            }),
            _ => return Err(invalid("PULSE_WS_RECONNECT", &mode)),
        };

        let message = lookup("PULSE_WS_HEARTBEAT_MESSAGE")
            .unwrap_or_else(|| DEFAULT_HEARTBEAT_MESSAGE.to_string());
        options.heartbeat = match lookup("PULSE_WS_HEARTBEAT_MS") {
            Some(raw) => match parse_millis("PULSE_WS_HEARTBEAT_MS", &raw)? {
                d if d.is_zero() => None,
                d => Some(HeartbeatConfig::every(d).with_message(message)),
            },
            None => Some(HeartbeatConfig::default().with_message(message)),
        };

        if let Some(raw) = lookup("PULSE_WS_TOPICS") {
            options.auto_subscribe = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(options)
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_u64(key, raw).map(Duration::from_millis)
}

fn validate_url(value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

type Callback = Rc<dyn Fn()>;
type TextCallback = Rc<dyn Fn(&str)>;
type EnvelopeCallback = Rc<dyn Fn(&Envelope)>;

/// Named callbacks fired by the client. Each one is optional.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub(crate) on_auth_success: Option<Callback>,
    pub(crate) on_auth_error: Option<TextCallback>,
    pub(crate) on_subscribed: Option<TextCallback>,
    pub(crate) on_unsubscribed: Option<TextCallback>,
    pub(crate) on_error: Option<TextCallback>,
    pub(crate) on_message: Option<EnvelopeCallback>,
    pub(crate) on_failed: Option<Callback>,
}

impl ClientCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server accepted our credential.
    pub fn on_auth_success(mut self, f: impl Fn() + 'static) -> Self {
        self.on_auth_success = Some(Rc::new(f));
        self
    }

    /// A server `error` mentioning "auth" or "token".
    pub fn on_auth_error(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_auth_error = Some(Rc::new(f));
        self
    }

    pub fn on_subscribed(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_subscribed = Some(Rc::new(f));
        self
    }

    pub fn on_unsubscribed(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_unsubscribed = Some(Rc::new(f));
        self
    }

    /// Every server `error` envelope.
    pub fn on_error(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_error = Some(Rc::new(f));
        self
    }

    /// Every parsed envelope, after all registered handlers.
    pub fn on_message(mut self, f: impl Fn(&Envelope) + 'static) -> Self {
        self.on_message = Some(Rc::new(f));
        self
    }

    /// Reconnection gave up; the client stays closed until `open()`.
    pub fn on_failed(mut self, f: impl Fn() + 'static) -> Self {
        self.on_failed = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("on_auth_success", &self.on_auth_success.is_some())
            .field("on_auth_error", &self.on_auth_error.is_some())
            .field("on_subscribed", &self.on_subscribed.is_some())
            .field("on_unsubscribed", &self.on_unsubscribed.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .finish()
    }
}
