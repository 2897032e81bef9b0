#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pulse_realtime::ws::{event_channel, TransportError, TransportEvent};
use pulse_realtime::ws::connection::{TransportEventStream, TransportEvents};
use pulse_realtime::{ClientCallbacks, ClientOptions, ConnectionStatus, PulseClient, Transport};
use pulse_shared::protocol::{TYPE_AUTH, TYPE_SUBSCRIBE, TYPE_UNSUBSCRIBE};
use serde_json::Value;
use tokio::sync::watch;

/// State shared between the transport owned by the client and the test.
pub struct Wire {
    status: Cell<ConnectionStatus>,
    sent: RefCell<Vec<String>>,
    opens: Cell<u32>,
    closes: Cell<u32>,
    events: TransportEvents,
}

impl Wire {
    fn set(&self, status: ConnectionStatus) {
        if self.status.replace(status) != status {
            let _ = self.events.unbounded_send(TransportEvent::Status(status));
        }
    }
}

/// In-memory transport that records every frame written to it.
pub struct MockTransport {
    wire: Rc<Wire>,
}

impl Transport for MockTransport {
    fn status(&self) -> ConnectionStatus {
        self.wire.status.get()
    }

    fn open(&mut self) {
        if self.wire.status.get().is_active() {
            return;
        }
        self.wire.opens.set(self.wire.opens.get() + 1);
        self.wire.set(ConnectionStatus::Connecting);
    }

    fn close(&mut self) {
        if self.wire.status.get().is_shutting_down() {
            return;
        }
        self.wire.closes.set(self.wire.closes.get() + 1);
        self.wire.set(ConnectionStatus::Closing);
        self.wire.set(ConnectionStatus::Closed);
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let status = self.wire.status.get();
        if !status.is_open() {
            return Err(TransportError::NotOpen(status));
        }
        self.wire.sent.borrow_mut().push(frame.to_string());
        Ok(())
    }
}

/// The server side of a [`MockTransport`].
#[derive(Clone)]
pub struct Remote {
    wire: Rc<Wire>,
}

impl Remote {
    pub fn accept(&self) {
        self.wire.set(ConnectionStatus::Open);
    }

    pub fn refuse(&self) {
        self.wire.set(ConnectionStatus::Closed);
    }

    /// Connection dropped without a close handshake.
    pub fn drop_connection(&self) {
        self.wire.set(ConnectionStatus::Closed);
    }

    pub fn push(&self, frame: &str) {
        let _ = self
            .wire
            .events
            .unbounded_send(TransportEvent::Frame(frame.to_string()));
    }

    pub fn push_json(&self, value: Value) {
        self.push(&value.to_string());
    }

    pub fn status(&self) -> ConnectionStatus {
        self.wire.status.get()
    }

    pub fn opens(&self) -> u32 {
        self.wire.opens.get()
    }

    pub fn closes(&self) -> u32 {
        self.wire.closes.get()
    }

    pub fn sent(&self) -> Vec<String> {
        self.wire.sent.borrow().clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut *self.wire.sent.borrow_mut())
    }

    /// Sent frames that parse as JSON.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Topics of every `subscribe` frame sent, in order.
    pub fn subscribe_frames(&self) -> Vec<String> {
        self.frames_of(TYPE_SUBSCRIBE)
    }

    pub fn unsubscribe_frames(&self) -> Vec<String> {
        self.frames_of(TYPE_UNSUBSCRIBE)
    }

    pub fn auth_frames(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .filter(|v| v["type"] == TYPE_AUTH)
            .filter_map(|v| v["token"].as_str().map(str::to_string))
            .collect()
    }

    fn frames_of(&self, kind: &str) -> Vec<String> {
        self.sent_json()
            .iter()
            .filter(|v| v["type"] == kind)
            .filter_map(|v| v["topic"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn mock_transport() -> (MockTransport, Remote, TransportEventStream) {
    let (events, stream) = event_channel();
    let wire = Rc::new(Wire {
        status: Cell::new(ConnectionStatus::Closed),
        sent: RefCell::new(Vec::new()),
        opens: Cell::new(0),
        closes: Cell::new(0),
        events,
    });
    (MockTransport { wire: wire.clone() }, Remote { wire }, stream)
}

/// A client over a mock transport, driven synchronously.
pub struct Harness {
    pub client: PulseClient,
    pub remote: Remote,
    pub token: watch::Sender<Option<String>>,
    events: TransportEventStream,
}

impl Harness {
    pub fn new(options: ClientOptions, callbacks: ClientCallbacks) -> Self {
        Self::with_token(options, callbacks, Some("secret"))
    }

    pub fn with_token(
        options: ClientOptions,
        callbacks: ClientCallbacks,
        token: Option<&str>,
    ) -> Self {
        let (transport, remote, events) = mock_transport();
        let (token, token_rx) = watch::channel(token.map(str::to_string));
        let client = PulseClient::new(options, callbacks, transport, token_rx);
        let mut harness = Self {
            client,
            remote,
            token,
            events,
        };
        harness.pump();
        harness
    }

    /// Deliver every queued transport event to the client.
    #[allow(deprecated)]
    pub fn pump(&mut self) {
        while let Ok(Some(event)) = self.events.try_next() {
            self.client.handle_transport_event(event);
        }
    }

    pub fn accept(&mut self) {
        self.remote.accept();
        self.pump();
    }

    pub fn drop_connection(&mut self) {
        self.remote.drop_connection();
        self.pump();
    }

    pub fn receive(&mut self, value: Value) {
        self.remote.push_json(value);
        self.pump();
    }

    pub fn receive_raw(&mut self, frame: &str) {
        self.remote.push(frame);
        self.pump();
    }

    /// Accept the connection and confirm the auth frame.
    pub fn connect_and_authenticate(&mut self) {
        self.accept();
        self.receive(serde_json::json!({ "type": "auth_success" }));
    }

    pub fn open(&mut self) {
        self.client.open();
        self.pump();
    }

    pub fn close(&mut self) {
        self.client.close();
        self.pump();
    }

    pub fn set_token(&mut self, token: Option<&str>) {
        self.token.send_replace(token.map(str::to_string));
        self.client.notify_token_changed();
        self.pump();
    }

    /// Fire whatever timer is next, as if its deadline had passed.
    pub fn fire_next_timer(&mut self) -> bool {
        match self.client.next_deadline() {
            Some(deadline) => {
                self.client.fire_due_timers(deadline);
                self.pump();
                true
            }
            None => false,
        }
    }
}

/// Options for tests: heartbeat off so only protocol frames are sent.
pub fn quiet_options() -> ClientOptions {
    ClientOptions {
        heartbeat: None,
        ..ClientOptions::default()
    }
}
