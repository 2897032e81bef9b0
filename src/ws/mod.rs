//! Realtime pub/sub client over a WebSocket.
//!
//! This module provides:
//! - Connection management with auto-reconnect and heartbeat
//! - Token authentication, re-sent whenever a new session credential appears
//! - Topic subscriptions that survive reconnects
//! - Typed and wildcard message handlers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  TransportEvent  ┌──────────────┐
//! │  Transport   │ ───────────────▶ │ ClientDriver │ ◀── token watch, timers
//! │ (tungstenite)│                  └──────────────┘
//! └──────────────┘                         │
//!         ▲                                ▼
//!         │ frames               ┌──────────────────┐
//!         └───────────────────── │   PulseClient    │
//!                                │ auth · subs ·    │
//!                                │ handlers · timers│
//!                                └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let (client, driver) = native_client(options, ClientCallbacks::new(), token_rx.clone());
//!     let driver = driver.with_token_watch(token_rx);
//!     let scope = ClientScope::new(client);
//!
//!     scope.on("chat:message", |env| {
//!         println!("{}", env.payload);
//!         Ok(())
//!     });
//!     scope.subscribe("project:123");
//!
//!     tokio::task::spawn_local(driver.run());
//! }).await;
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod driver;
pub mod heartbeat;
pub mod reconnect;
pub mod scope;
pub mod subscriptions;
pub mod timers;

pub use auth::{StaticToken, TokenProvider};
pub use client::{HandlerHandle, PulseClient};
pub use connection::{
    event_channel, ConnectionStatus, NativeTransport, Transport, TransportError, TransportEvent,
};
pub use dispatcher::{HandlerId, HandlerResult, ReceivedEnvelope};
pub use driver::{native_client, ClientDriver};
pub use heartbeat::HeartbeatConfig;
pub use reconnect::{ReconnectDelay, ReconnectOption, ReconnectPolicy};
pub use scope::ClientScope;
pub use subscriptions::TopicSet;
pub use timers::{ConnectionEpoch, TimerKind};
