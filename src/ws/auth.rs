//! Authentication sequencing: which credential to present, and when.

use pulse_shared::ClientFrame;
use tokio::sync::watch;

use super::connection::ConnectionStatus;

/// Source of the current session credential.
pub trait TokenProvider {
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String>,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A watch channel is the reactive token source: the driver awaits its
/// changes and asks the client to re-check authentication.
impl TokenProvider for watch::Receiver<Option<String>> {
    fn token(&self) -> Option<String> {
        self.borrow().clone()
    }
}

/// A token that never changes (or `None` for an anonymous client).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Tracks whether the server has accepted our credential on this connection.
pub struct AuthSequencer {
    provider: Box<dyn TokenProvider>,
    authenticated: watch::Sender<bool>,
}

impl AuthSequencer {
    pub fn new(provider: impl TokenProvider + 'static) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            provider: Box::new(provider),
            authenticated,
        }
    }

    pub fn current_token(&self) -> Option<String> {
        self.provider.token()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Frame to send when the socket opens; `None` stays silent.
    pub fn on_open(&self) -> Option<ClientFrame> {
        self.current_token().map(ClientFrame::auth)
    }

    /// Frame to send after the token source changed.
    ///
    /// Only retried while open and not yet authenticated; an accepted session
    /// keeps its credential until the connection cycles.
    pub fn on_token_changed(&self, status: ConnectionStatus) -> Option<ClientFrame> {
        if !status.is_open() || self.is_authenticated() {
            return None;
        }
        self.current_token().map(ClientFrame::auth)
    }

    /// Record `auth_success`. Refused unless the socket is open.
    pub fn accept(&self, status: ConnectionStatus) -> bool {
        if !status.is_open() {
            return false;
        }
        self.authenticated.send_replace(true);
        true
    }

    pub fn reset(&self) {
        self.authenticated.send_if_modified(|auth| std::mem::replace(auth, false));
    }
}

impl std::fmt::Debug for AuthSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSequencer")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
