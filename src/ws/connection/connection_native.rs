//! Native WebSocket transport using tokio-tungstenite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ConnectionStatus, Transport, TransportError, TransportEvent, TransportEvents};

/// How long to wait for the server's close reply after we send ours.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A WebSocket transport backed by a background tokio task per connection.
///
/// Status lives in a watch channel shared with the socket task, so `status()`
/// is always current even before the client has drained the event channel.
pub struct NativeTransport {
    /// Endpoint, e.g. `ws://localhost:8080/ws`
    url: String,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: TransportEvents,
    /// Bumped for every attempt; a socket task only reports while it is current.
    generation: Arc<AtomicU64>,
    /// Outbound frames for the running socket task
    outbound: Option<UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl NativeTransport {
    /// Must be called within a tokio runtime before `open()` is used.
    pub fn new(url: impl Into<String>, events: TransportEvents) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        Self {
            url: url.into(),
            status: Arc::new(status),
            events,
            generation: Arc::new(AtomicU64::new(0)),
            outbound: None,
            task: None,
        }
    }

    /// Retire the running socket task, if any, and start a new generation.
    fn retire(&mut self) -> Link {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let attempt = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Link {
            status: self.status.clone(),
            events: self.events.clone(),
            generation: self.generation.clone(),
            attempt,
        }
    }
}

impl Transport for NativeTransport {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn open(&mut self) {
        if self.status().is_active() {
            return;
        }

        // A previous socket may still be draining its close handshake; it
        // will never report, so report its Closed here.
        let link = self.retire();
        link.publish(ConnectionStatus::Closed);

        let (sender, receiver) = unbounded();
        self.outbound = Some(sender);
        link.publish(ConnectionStatus::Connecting);

        self.task = Some(tokio::spawn(run_socket(self.url.clone(), link, receiver)));
    }

    fn close(&mut self) {
        match self.status() {
            ConnectionStatus::Closing | ConnectionStatus::Closed => {}
            ConnectionStatus::Connecting => {
                // Nothing to hand-shake with yet.
                self.retire().publish(ConnectionStatus::Closed);
            }
            ConnectionStatus::Open => {
                let _ = self.status.send_if_modified(|current| {
                    if *current != ConnectionStatus::Open {
                        return false;
                    }
                    *current = ConnectionStatus::Closing;
                    let _ = self
                        .events
                        .unbounded_send(TransportEvent::Status(ConnectionStatus::Closing));
                    true
                });
                if let Some(sender) = self.outbound.take() {
                    let _ = sender.unbounded_send(Message::Close(None));
                }
            }
        }
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let status = self.status();
        if !status.is_open() {
            return Err(TransportError::NotOpen(status));
        }
        let sender = self.outbound.as_ref().ok_or(TransportError::ChannelClosed)?;
        sender
            .unbounded_send(Message::text(frame.to_owned()))
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One connection attempt's handle on the shared status and event channel.
struct Link {
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: TransportEvents,
    generation: Arc<AtomicU64>,
    attempt: u64,
}

impl Link {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.attempt
    }

    /// Move to `next` when `from` accepts the current status. The event is
    /// queued under the status lock so events arrive in status order.
    fn transition(&self, from: impl Fn(ConnectionStatus) -> bool, next: ConnectionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if *current == next || !from(*current) || !self.is_current() {
                return false;
            }
            *current = next;
            let _ = self.events.unbounded_send(TransportEvent::Status(next));
            true
        })
    }

    fn publish(&self, next: ConnectionStatus) -> bool {
        self.transition(|_| true, next)
    }

    /// Returns `false` once this attempt is superseded or nobody is listening.
    fn forward(&self, frame: String) -> bool {
        if !self.is_current() {
            return false;
        }
        self.events
            .unbounded_send(TransportEvent::Frame(frame))
            .is_ok()
    }
}

/// Connect, then pump frames both ways until either side goes away.
async fn run_socket(url: String, link: Link, mut outbound: UnboundedReceiver<Message>) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_warn!("WebSocket connect to {} failed: {}", url, e);
            link.publish(ConnectionStatus::Closed);
            return;
        }
    };

    // close() may have won the race while we were hand-shaking.
    if !link.transition(|s| s == ConnectionStatus::Connecting, ConnectionStatus::Open) {
        return;
    }
    crate::log_info!("WebSocket connected to {}", url);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let frame = text.as_str().to_owned();
                    crate::log_debug!("WebSocket received: {}", crate::logging::preview(&frame));
                    if !link.forward(frame) {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    crate::log_info!("WebSocket to {} received close frame: {:?}", url, frame);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping is answered by tungstenite; binary and pong are ignored.
                }
                Some(Err(e)) => {
                    crate::log_warn!("WebSocket read error on {}: {}", url, e);
                    break;
                }
                None => break,
            },
            outgoing = outbound.next() => match outgoing {
                Some(Message::Close(frame)) => {
                    if let Err(e) = write.send(Message::Close(frame)).await {
                        crate::log_warn!("WebSocket close to {} failed: {}", url, e);
                        break;
                    }
                    // Keep reading until the server answers, but not forever.
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(msg)) = read.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    break;
                }
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        crate::log_warn!("Send to {} failed: {}", url, e);
                        break;
                    }
                }
                None => {
                    // Transport dropped its sender.
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    link.transition(|s| s == ConnectionStatus::Open, ConnectionStatus::Closing);
    link.publish(ConnectionStatus::Closed);
    crate::log_info!("WebSocket to {} closed", url);
}
