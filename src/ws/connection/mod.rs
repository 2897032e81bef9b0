//! The duplex channel the client rides on.
//!
//! A transport owns the [`ConnectionStatus`]; the client only observes it. All
//! non-deterministic input (status changes and inbound text frames) arrives
//! through one ordered [`TransportEvent`] channel handed to the transport when
//! it is built, so the client sees frames in delivery order and never between
//! an `Open` and the frames that follow it.

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use thiserror::Error;

pub use pulse_shared::ConnectionStatus;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Status(ConnectionStatus),
    Frame(String),
}

/// Sending half given to a transport.
pub type TransportEvents = UnboundedSender<TransportEvent>;

/// Receiving half consumed by [`ClientDriver`](crate::ws::ClientDriver).
pub type TransportEventStream = UnboundedReceiver<TransportEvent>;

/// Create the event channel connecting a transport to a client driver.
pub fn event_channel() -> (TransportEvents, TransportEventStream) {
    unbounded()
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket is not open (status {0})")]
    NotOpen(ConnectionStatus),

    #[error("socket task is no longer running")]
    ChannelClosed,

    #[error("failed to encode frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A raw text-frame channel over a single URL.
///
/// Implementations must report every status change as a
/// [`TransportEvent::Status`] in order, and must never call back into the
/// client synchronously from these methods.
pub trait Transport {
    /// Current status as known to the transport itself.
    fn status(&self) -> ConnectionStatus;

    /// Start connecting. A no-op while `Open` or `Connecting`.
    fn open(&mut self);

    /// Start a graceful shutdown. A no-op while `Closing` or `Closed`.
    fn close(&mut self);

    /// Write one text frame. Never queues: fails unless `Open`.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn open(&mut self) {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}

mod connection_native;
pub use connection_native::NativeTransport;
