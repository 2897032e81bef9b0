//! Pulse realtime client.
//!
//! An authenticated publish/subscribe client over a single WebSocket: it keeps
//! the connection alive, authenticates with the current session token, restores
//! topic subscriptions after every reconnect, and routes inbound envelopes to
//! handlers registered by message type.

#[macro_use]
pub mod logging;

pub mod config;
pub mod ws;

pub use config::{ClientCallbacks, ClientOptions, ConfigError};
pub use pulse_shared::{ClientFrame, ConnectionStatus, Envelope, ProtocolError};
pub use ws::{
    native_client, ClientDriver, ClientScope, HandlerHandle, HandlerId, HandlerResult,
    PulseClient, StaticToken, TokenProvider, Transport, TransportEvent,
};
