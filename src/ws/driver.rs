//! The event loop feeding a [`PulseClient`].

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use super::auth::TokenProvider;
use super::client::PulseClient;
use super::connection::{event_channel, ConnectionStatus, NativeTransport, TransportEventStream};
use crate::config::{ClientCallbacks, ClientOptions};

/// Owns the receiving end of the transport event channel and runs the client's
/// single processing context.
///
/// `run()` must be polled on the thread that owns the client, either awaited
/// directly or via `tokio::task::spawn_local` inside a `LocalSet`.
pub struct ClientDriver {
    client: PulseClient,
    events: TransportEventStream,
    tokens: Option<watch::Receiver<Option<String>>>,
    /// Open when a token appears, close when it goes away.
    open_on_token: bool,
}

impl ClientDriver {
    pub fn new(client: PulseClient, events: TransportEventStream) -> Self {
        Self {
            client,
            events,
            tokens: None,
            open_on_token: false,
        }
    }

    /// Re-check authentication whenever this watch changes.
    pub fn with_token_watch(mut self, tokens: watch::Receiver<Option<String>>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Follow the token watch with the connection itself: open whenever a
    /// token is present and the socket is down, close on logout. Pair with
    /// `options.immediate = false`.
    pub fn open_on_token(mut self, enabled: bool) -> Self {
        self.open_on_token = enabled;
        self
    }

    pub fn client(&self) -> &PulseClient {
        &self.client
    }

    /// Process events until the transport's event channel ends, or until the
    /// client has been disposed and its socket is closed.
    pub async fn run(self) {
        let Self {
            client,
            mut events,
            mut tokens,
            open_on_token,
        } = self;

        let has_token = tokens.as_ref().is_some_and(|rx| rx.borrow().is_some());
        if open_on_token && has_token {
            follow_token(&client, true);
        }

        loop {
            if client.is_disposed() && client.status() == ConnectionStatus::Closed {
                break;
            }
            let deadline = client.next_deadline();

            tokio::select! {
                event = events.next() => match event {
                    Some(event) => client.handle_transport_event(event),
                    None => {
                        crate::log_debug!("Transport event channel closed, driver stopping");
                        break;
                    }
                },
                changed = token_changed(&mut tokens) => match changed {
                    Ok(present) => {
                        if open_on_token {
                            follow_token(&client, present);
                        }
                        client.notify_token_changed();
                    }
                    Err(_) => tokens = None,
                },
                _ = wait_until(deadline) => client.fire_due_timers(Instant::now()),
                _ = client.disposed(), if !client.is_disposed() => {}
            }
        }
    }
}

/// Resolves with whether a token is now present.
async fn token_changed(
    tokens: &mut Option<watch::Receiver<Option<String>>>,
) -> Result<bool, watch::error::RecvError> {
    match tokens {
        Some(rx) => {
            rx.changed().await?;
            Ok(rx.borrow_and_update().is_some())
        }
        None => std::future::pending().await,
    }
}

fn follow_token(client: &PulseClient, present: bool) {
    if client.is_disposed() {
        return;
    }
    if present {
        if !client.status().is_active() {
            crate::log_info!("Session token available, connecting");
            client.open();
        }
    } else {
        // Also cancels a pending reconnect.
        crate::log_info!("Session token cleared, disconnecting");
        client.close();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Build a client over a [`NativeTransport`] plus the driver that runs it.
///
/// Must be called inside a tokio runtime when `options.immediate` is set.
pub fn native_client(
    options: ClientOptions,
    callbacks: ClientCallbacks,
    tokens: impl TokenProvider + 'static,
) -> (PulseClient, ClientDriver) {
    let (sender, events) = event_channel();
    let transport = NativeTransport::new(options.url.clone(), sender);
    let client = PulseClient::new(options, callbacks, transport, tokens);
    let driver = ClientDriver::new(client.clone(), events);
    (client, driver)
}
