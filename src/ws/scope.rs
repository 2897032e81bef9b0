//! Scoped acquisition of a client.

use std::ops::Deref;

use super::client::PulseClient;

/// Disposes the client when dropped: every tracked topic is unsubscribed, all
/// handlers are cleared, and the transport is closed. This runs on every exit
/// path of the owning scope, including early returns and unwinding.
#[derive(Debug)]
pub struct ClientScope {
    client: PulseClient,
}

impl ClientScope {
    pub fn new(client: PulseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &PulseClient {
        &self.client
    }
}

impl Deref for ClientScope {
    type Target = PulseClient;

    fn deref(&self) -> &PulseClient {
        &self.client
    }
}

impl From<PulseClient> for ClientScope {
    fn from(client: PulseClient) -> Self {
        Self::new(client)
    }
}

impl Drop for ClientScope {
    fn drop(&mut self) {
        crate::log_debug!("Client scope ended, disposing");
        self.client.dispose();
    }
}
