//! The client facade.
//!
//! [`PulseClient`] is a cheap, clonable, single-threaded handle. Every state
//! change happens in response to a [`TransportEvent`], a due timer, a token
//! change, or a facade call, all on one thread, so plain `Cell`/`RefCell` are
//! enough. No borrow is held while caller code (handlers, callbacks) runs;
//! handlers may call back into the client freely.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pulse_shared::{
    encode_envelope, encode_frame, is_auth_error, parse_frame, ClientFrame, Envelope, SystemEvent,
};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use super::auth::{AuthSequencer, TokenProvider};
use super::connection::{ConnectionStatus, Transport, TransportEvent};
use super::dispatcher::{
    fan_out, invoke_isolated, typed_handler, HandlerFn, HandlerId, HandlerRegistry,
    HandlerResult, ReceivedEnvelope,
};
use super::reconnect::{ReconnectDecision, RetryState};
use super::subscriptions::{SubscriptionRegistry, TopicSet};
use super::timers::{ConnectionEpoch, TimerKind, Timers};
use crate::config::{ClientCallbacks, ClientOptions};

struct ClientInner {
    options: ClientOptions,
    callbacks: ClientCallbacks,
    transport: RefCell<Box<dyn Transport>>,
    /// Last status reported by the transport's event stream.
    status: watch::Sender<ConnectionStatus>,
    auth: AuthSequencer,
    subscriptions: RefCell<SubscriptionRegistry>,
    handlers: RefCell<HandlerRegistry>,
    last_message: watch::Sender<Option<ReceivedEnvelope>>,
    retry: Cell<RetryState>,
    epoch: Cell<ConnectionEpoch>,
    timers: RefCell<Timers>,
    /// Set by `close()`, cleared by `open()`. Suppresses reconnection.
    explicitly_closed: Cell<bool>,
    /// A caller-initiated close whose `Closed` has not been seen yet. Survives
    /// `open()`, so a late `Closed` is never taken for a dropped connection.
    pending_close: Cell<bool>,
    disposed: Cell<bool>,
    disposal: Notify,
}

/// Authenticated pub/sub client over a [`Transport`].
#[derive(Clone)]
pub struct PulseClient {
    inner: Rc<ClientInner>,
}

/// Returned by [`PulseClient::on`]; `remove()` unregisters the handler.
#[derive(Clone)]
pub struct HandlerHandle {
    client: std::rc::Weak<ClientInner>,
    message_type: String,
    id: HandlerId,
}

impl HandlerHandle {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Unregister. Returns `false` if it was already gone.
    pub fn remove(&self) -> bool {
        match self.client.upgrade() {
            Some(inner) => inner
                .handlers
                .borrow_mut()
                .remove(&self.message_type, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for HandlerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerHandle")
            .field("message_type", &self.message_type)
            .field("id", &self.id)
            .finish()
    }
}

impl PulseClient {
    /// Build a client. Opens the transport right away when
    /// `options.immediate` is set.
    pub fn new(
        options: ClientOptions,
        callbacks: ClientCallbacks,
        transport: impl Transport + 'static,
        tokens: impl TokenProvider + 'static,
    ) -> Self {
        let (status, _) = watch::channel(transport.status());
        let (last_message, _) = watch::channel(None);
        let subscriptions = SubscriptionRegistry::new(options.auto_subscribe.iter().cloned());
        let immediate = options.immediate;

        let client = Self {
            inner: Rc::new(ClientInner {
                options,
                callbacks,
                transport: RefCell::new(Box::new(transport)),
                status,
                auth: AuthSequencer::new(tokens),
                subscriptions: RefCell::new(subscriptions),
                handlers: RefCell::new(HandlerRegistry::default()),
                last_message,
                retry: Cell::new(RetryState::default()),
                epoch: Cell::new(ConnectionEpoch::default()),
                timers: RefCell::new(Timers::default()),
                explicitly_closed: Cell::new(false),
                pending_close: Cell::new(false),
                disposed: Cell::new(false),
                disposal: Notify::new(),
            }),
        };

        if immediate {
            client.open();
        }
        client
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    // --- Lifecycle ---

    /// Request a connection. Resets the retry budget; a no-op while already
    /// open or connecting.
    pub fn open(&self) {
        let inner = &self.inner;
        if inner.disposed.get() {
            crate::log_warn!("Client has been disposed. Cannot open.");
            return;
        }

        inner.explicitly_closed.set(false);
        inner.retry.set(RetryState::default());
        inner.timers.borrow_mut().cancel(TimerKind::Reconnect);

        let status = inner.transport.borrow().status();
        if status.is_active() {
            crate::log_debug!("open() ignored, socket is {}", status);
            return;
        }
        self.start_attempt();
    }

    /// Graceful shutdown. Cancels pending heartbeat and reconnect timers and
    /// suppresses reconnection until the next `open()`.
    pub fn close(&self) {
        let inner = &self.inner;
        inner.explicitly_closed.set(true);
        inner.timers.borrow_mut().cancel_all();
        inner.epoch.set(inner.epoch.get().next());

        let status = inner.transport.borrow().status();
        if status.is_shutting_down() {
            crate::log_debug!("close() ignored, socket is {}", status);
            return;
        }
        inner.pending_close.set(true);
        inner.transport.borrow_mut().close();
    }

    /// Unsubscribe everything, drop all handlers, and close. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.get() {
            return;
        }
        self.clear_subscriptions();
        self.clear_handlers(None);
        self.close();
        self.inner.disposed.set(true);
        self.inner.disposal.notify_one();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Resolves once `dispose()` has been called.
    pub async fn disposed(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.disposal.notified().await;
    }

    fn start_attempt(&self) {
        let inner = &self.inner;
        inner.epoch.set(inner.epoch.get().next());
        crate::log_info!(
            "Connecting to {} (epoch {})",
            inner.options.url,
            inner.epoch.get().get()
        );
        inner.transport.borrow_mut().open();
    }

    // --- Outbound ---

    /// Send an application envelope. A logged no-op unless open.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match encode_envelope(envelope) {
            Ok(frame) => self.send_text(&frame, "message"),
            Err(e) => {
                crate::log_error!("Failed to encode {} envelope: {}", envelope.message_type, e);
                false
            }
        }
    }

    /// Send a raw text frame. A logged no-op unless open.
    pub fn send_raw(&self, frame: &str) -> bool {
        self.send_text(frame, "frame")
    }

    fn send_frame(&self, frame: &ClientFrame, what: &str) -> bool {
        match encode_frame(frame) {
            Ok(text) => self.send_text(&text, what),
            Err(e) => {
                crate::log_error!("Failed to encode {} frame: {}", what, e);
                false
            }
        }
    }

    fn send_text(&self, frame: &str, what: &str) -> bool {
        let mut transport = self.inner.transport.borrow_mut();
        let status = transport.status();
        if !status.is_open() {
            crate::log_warn!("WebSocket is not open ({}). Cannot send {}.", status, what);
            return false;
        }
        match transport.send(frame) {
            Ok(()) => {
                crate::log_debug!("Sent {}: {}", what, crate::logging::preview(frame));
                true
            }
            Err(e) => {
                crate::log_warn!("Failed to send {}: {}", what, e);
                false
            }
        }
    }

    /// Present `token` to the server. A logged no-op unless open.
    pub fn authenticate(&self, token: &str) -> bool {
        if !self.is_open() {
            crate::log_warn!("WebSocket is not open. Cannot authenticate.");
            return false;
        }
        self.send_frame(&ClientFrame::auth(token), "auth")
    }

    // --- Subscriptions ---

    /// Declare interest in `topic` and, if authenticated, ask the server for
    /// it now. Declared topics are re-requested after every authentication.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.inner.subscriptions.borrow_mut().declare(topic);

        if !self.is_authenticated() {
            crate::log_warn!("Not authenticated. Cannot subscribe to topic: {}", topic);
            return false;
        }
        if !self.is_open() {
            crate::log_warn!("WebSocket is not open. Cannot subscribe to topic: {}", topic);
            return false;
        }
        self.send_frame(&ClientFrame::subscribe(topic), "subscribe")
    }

    /// Withdraw interest in `topic` and, if open, tell the server.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.subscriptions.borrow_mut().withdraw(topic);

        if !self.is_open() {
            crate::log_warn!("WebSocket is not open. Cannot unsubscribe from topic: {}", topic);
            return false;
        }
        self.send_frame(&ClientFrame::unsubscribe(topic), "unsubscribe")
    }

    /// Subscribe per topic; no rollback if some fail. Returns how many frames
    /// were sent.
    pub fn subscribe_many<I, S>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        topics
            .into_iter()
            .filter(|t| self.subscribe(t.as_ref()))
            .count()
    }

    pub fn unsubscribe_many<I, S>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        topics
            .into_iter()
            .filter(|t| self.unsubscribe(t.as_ref()))
            .count()
    }

    /// Whether the server has acknowledged `topic` on this connection.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.subscriptions.borrow().is_acknowledged(topic)
    }

    /// Unsubscribe from every declared or acknowledged topic.
    pub fn clear_subscriptions(&self) {
        let topics = self.inner.subscriptions.borrow().tracked();
        self.unsubscribe_many(topics);
    }

    /// Request `topics`, skipping any withdrawn since they were captured.
    fn resubscribe(&self, topics: Vec<String>) {
        let topics: Vec<String> = {
            let subscriptions = self.inner.subscriptions.borrow();
            topics
                .into_iter()
                .filter(|t| subscriptions.is_declared(t))
                .collect()
        };
        if topics.is_empty() {
            return;
        }
        crate::log_info!("Subscribing to {} topic(s)", topics.len());
        for topic in topics {
            self.send_frame(&ClientFrame::subscribe(topic.as_str()), "subscribe");
        }
    }

    // --- Handlers ---

    /// Register `handler` for `message_type` (or `"*"` for every message).
    pub fn on(
        &self,
        message_type: &str,
        handler: impl Fn(&Envelope) -> HandlerResult + 'static,
    ) -> HandlerHandle {
        self.register(message_type, Rc::new(handler), false)
    }

    /// Register a handler that receives the decoded payload.
    pub fn on_payload<T, F>(&self, message_type: &str, handler: F) -> HandlerHandle
    where
        T: DeserializeOwned,
        F: Fn(T) -> HandlerResult + 'static,
    {
        self.register(message_type, typed_handler(handler), false)
    }

    /// Register a handler that removes itself after its first call.
    pub fn once(
        &self,
        message_type: &str,
        handler: impl Fn(&Envelope) -> HandlerResult + 'static,
    ) -> HandlerHandle {
        self.register(message_type, Rc::new(handler), true)
    }

    pub fn off(&self, message_type: &str, id: HandlerId) -> bool {
        self.inner.handlers.borrow_mut().remove(message_type, id)
    }

    /// Drop the handlers of one type, or all of them.
    pub fn clear_handlers(&self, message_type: Option<&str>) {
        self.inner.handlers.borrow_mut().clear(message_type);
    }

    pub fn has_handler(&self, message_type: &str, id: HandlerId) -> bool {
        self.inner.handlers.borrow().contains(message_type, id)
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.inner.handlers.borrow().handler_count(message_type)
    }

    fn register(&self, message_type: &str, handler: HandlerFn, once: bool) -> HandlerHandle {
        let id = self
            .inner
            .handlers
            .borrow_mut()
            .insert(message_type, handler, once);
        HandlerHandle {
            client: Rc::downgrade(&self.inner),
            message_type: message_type.to_string(),
            id,
        }
    }

    // --- Observables ---

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.auth.is_authenticated()
    }

    /// Acknowledged topics, in acknowledgement order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.borrow().acknowledged()
    }

    /// Declared topics, in declaration order.
    pub fn desired_subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.borrow().declared()
    }

    pub fn last_message(&self) -> Option<ReceivedEnvelope> {
        self.inner.last_message.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.inner.auth.watch()
    }

    pub fn watch_subscriptions(&self) -> watch::Receiver<TopicSet> {
        self.inner.subscriptions.borrow().watch()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<ReceivedEnvelope>> {
        self.inner.last_message.subscribe()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.inner.retry.get().attempts()
    }

    pub fn epoch(&self) -> ConnectionEpoch {
        self.inner.epoch.get()
    }

    // --- Event processing ---

    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Status(status) => self.handle_status(status),
            TransportEvent::Frame(frame) => self.handle_frame(&frame),
        }
    }

    fn handle_status(&self, status: ConnectionStatus) {
        let inner = &self.inner;
        let previous = inner.status.send_replace(status);
        if previous == status {
            return;
        }
        crate::log_debug!("Status {} -> {}", previous, status);

        if status != ConnectionStatus::Open {
            inner.auth.reset();
            inner.timers.borrow_mut().cancel(TimerKind::Heartbeat);
        }

        match status {
            ConnectionStatus::Open => self.on_opened(),
            ConnectionStatus::Closed => self.on_closed(),
            ConnectionStatus::Connecting
                if matches!(previous, ConnectionStatus::Open | ConnectionStatus::Closing) =>
            {
                // The previous socket never reported Closed.
                crate::log_warn!("Socket went {} -> {} without closing", previous, status);
                inner.pending_close.set(false);
                inner.subscriptions.borrow().clear_acknowledged();
            }
            ConnectionStatus::Connecting | ConnectionStatus::Closing => {}
        }
    }

    fn on_opened(&self) {
        let inner = &self.inner;
        inner.retry.set(RetryState::default());
        {
            let mut timers = inner.timers.borrow_mut();
            timers.cancel(TimerKind::Reconnect);
            if let Some(heartbeat) = &inner.options.heartbeat {
                timers.schedule(
                    TimerKind::Heartbeat,
                    inner.epoch.get(),
                    Instant::now() + heartbeat.interval,
                );
            }
        }

        match inner.auth.on_open() {
            Some(frame) => {
                self.send_frame(&frame, "auth");
            }
            None => crate::log_debug!("No token available, staying unauthenticated"),
        }
    }

    fn on_closed(&self) {
        let inner = &self.inner;
        inner.subscriptions.borrow().clear_acknowledged();

        let requested = inner.pending_close.replace(false);
        if requested || inner.explicitly_closed.get() || inner.disposed.get() {
            return;
        }
        let Some(policy) = inner.options.auto_reconnect.policy() else {
            return;
        };

        let mut retry = inner.retry.get();
        let decision = policy.decide(&mut retry);
        inner.retry.set(retry);

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                crate::log_info!(
                    "Reconnecting to {} in {}ms (attempt {})",
                    inner.options.url,
                    delay.as_millis(),
                    attempt
                );
                inner.timers.borrow_mut().schedule(
                    TimerKind::Reconnect,
                    inner.epoch.get(),
                    Instant::now() + delay,
                );
            }
            ReconnectDecision::GiveUp { attempts } => {
                crate::log_error!(
                    "WebSocket connection to {} failed after {} retries",
                    inner.options.url,
                    attempts
                );
                if let Some(cb) = inner.callbacks.on_failed.clone() {
                    invoke_isolated("on_failed callback", || {
                        cb();
                        Ok(())
                    });
                }
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        if let Some(heartbeat) = &self.inner.options.heartbeat {
            if heartbeat.is_response(frame) {
                return;
            }
        }

        match parse_frame(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => crate::log_error!(
                "Failed to parse WebSocket message: {} ({})",
                e,
                crate::logging::preview(frame)
            ),
        }
    }

    /// System state first, then exact-type handlers, then wildcard handlers,
    /// then `on_message`.
    fn dispatch(&self, envelope: Envelope) {
        let inner = &self.inner;
        inner
            .last_message
            .send_replace(Some(ReceivedEnvelope::now(envelope.clone())));

        if let Some(event) = SystemEvent::classify(&envelope) {
            self.apply_system_event(event);
        }

        fan_out(&inner.handlers, &envelope);

        if let Some(cb) = inner.callbacks.on_message.clone() {
            invoke_isolated("on_message callback", || {
                cb(&envelope);
                Ok(())
            });
        }
    }

    fn apply_system_event(&self, event: SystemEvent) {
        let inner = &self.inner;
        let callbacks = &inner.callbacks;

        match event {
            SystemEvent::AuthSuccess => {
                if !inner.auth.accept(self.status()) {
                    crate::log_warn!("Ignoring auth_success while socket is {}", self.status());
                    return;
                }
                crate::log_info!("WebSocket authenticated");
                // Topics the callback subscribes to are sent by that call.
                let declared = inner.subscriptions.borrow().declared();
                if let Some(cb) = callbacks.on_auth_success.clone() {
                    invoke_isolated("on_auth_success callback", || {
                        cb();
                        Ok(())
                    });
                }
                self.resubscribe(declared);
            }
            SystemEvent::Error { message } => {
                crate::log_warn!("Server error: {}", message);
                if let Some(cb) = callbacks.on_error.clone() {
                    invoke_isolated("on_error callback", || {
                        cb(&message);
                        Ok(())
                    });
                }
                if is_auth_error(&message) {
                    if let Some(cb) = callbacks.on_auth_error.clone() {
                        invoke_isolated("on_auth_error callback", || {
                            cb(&message);
                            Ok(())
                        });
                    }
                }
            }
            SystemEvent::Subscribed { topic } => {
                if !inner.subscriptions.borrow().is_declared(&topic) {
                    crate::log_debug!("Server acknowledged undeclared topic {}", topic);
                }
                inner.subscriptions.borrow().acknowledge(&topic);
                if let Some(cb) = callbacks.on_subscribed.clone() {
                    invoke_isolated("on_subscribed callback", || {
                        cb(&topic);
                        Ok(())
                    });
                }
            }
            SystemEvent::Unsubscribed { topic } => {
                inner.subscriptions.borrow().release(&topic);
                if let Some(cb) = callbacks.on_unsubscribed.clone() {
                    invoke_isolated("on_unsubscribed callback", || {
                        cb(&topic);
                        Ok(())
                    });
                }
            }
        }
    }

    /// Re-check authentication after the token source changed.
    pub fn notify_token_changed(&self) {
        if let Some(frame) = self.inner.auth.on_token_changed(self.status()) {
            crate::log_info!("Token changed, authenticating");
            self.send_frame(&frame, "auth");
        }
    }

    // --- Timers ---

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.timers.borrow().next_deadline()
    }

    pub fn timer_pending(&self, kind: TimerKind) -> bool {
        self.inner.timers.borrow().is_pending(kind)
    }

    /// Fire every timer due at `now`. Timers from an older epoch are dropped.
    pub fn fire_due_timers(&self, now: Instant) {
        let due = self.inner.timers.borrow_mut().take_due(now);
        for timer in due {
            if timer.epoch != self.inner.epoch.get() {
                crate::log_debug!(
                    "Dropping stale {:?} timer from epoch {}",
                    timer.kind,
                    timer.epoch.get()
                );
                continue;
            }
            match timer.kind {
                TimerKind::Heartbeat => self.beat(now),
                TimerKind::Reconnect => self.reconnect_now(),
            }
        }
    }

    fn beat(&self, now: Instant) {
        let inner = &self.inner;
        let Some(heartbeat) = &inner.options.heartbeat else {
            return;
        };
        if !self.is_open() {
            return;
        }
        self.send_text(&heartbeat.message, "heartbeat");
        inner
            .timers
            .borrow_mut()
            .schedule(TimerKind::Heartbeat, inner.epoch.get(), now + heartbeat.interval);
    }

    fn reconnect_now(&self) {
        let inner = &self.inner;
        if inner.explicitly_closed.get() || inner.disposed.get() {
            return;
        }
        let status = inner.transport.borrow().status();
        if status.is_active() {
            return;
        }
        self.start_attempt();
    }
}

impl std::fmt::Debug for PulseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseClient")
            .field("url", &self.inner.options.url)
            .field("status", &self.status())
            .field("authenticated", &self.is_authenticated())
            .field("epoch", &self.inner.epoch.get())
            .finish_non_exhaustive()
    }
}
