//! pulse-listen - connect, authenticate, subscribe, and log every envelope.
//!
//! Connection settings come from `PULSE_WS_*` environment variables (see
//! `ClientOptions::from_env`). Ctrl-C unsubscribes and closes the socket.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_realtime::{native_client, ClientCallbacks, ClientOptions, ClientScope, StaticToken};

/// Upper bound on waiting for the close handshake after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pulse-listen", about = "Listen to topics on a Pulse realtime server")]
struct Args {
    /// WebSocket endpoint, overrides PULSE_WS_URL
    #[arg(long)]
    url: Option<String>,

    /// Session token presented after connecting
    #[arg(long, env = "PULSE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Topics to subscribe to, in addition to PULSE_WS_TOPICS
    topics: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_realtime=info,pulse_listen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut options = ClientOptions::from_env()?;
    if let Some(url) = args.url {
        options = options.with_url(url)?;
    }
    for topic in args.topics {
        if !options.auto_subscribe.contains(&topic) {
            options.auto_subscribe.push(topic);
        }
    }
    if args.token.is_none() {
        tracing::warn!("No token given; the server will not accept subscriptions");
    }

    LocalSet::new().run_until(listen(options, args.token)).await
}

async fn listen(options: ClientOptions, token: Option<String>) -> Result<()> {
    let failed = Rc::new(Notify::new());

    let callbacks = ClientCallbacks::new()
        .on_auth_success(|| tracing::info!("Authenticated"))
        .on_auth_error(|message| tracing::error!("Authentication rejected: {}", message))
        .on_error(|message| tracing::warn!("Server error: {}", message))
        .on_subscribed(|topic| tracing::info!(topic, "Subscribed"))
        .on_unsubscribed(|topic| tracing::info!(topic, "Unsubscribed"))
        .on_message(|envelope| {
            tracing::info!(
                message_type = %envelope.message_type,
                payload = %envelope.payload,
                "Message"
            )
        })
        .on_failed({
            let failed = failed.clone();
            move || failed.notify_one()
        });

    tracing::info!("Connecting to {}", options.url);
    let (client, driver) = native_client(options, callbacks, StaticToken(token));
    let scope = ClientScope::new(client);
    let driver = tokio::task::spawn_local(driver.run());

    let gave_up = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down");
            false
        }
        _ = failed.notified() => true,
    };

    drop(scope);
    if tokio::time::timeout(SHUTDOWN_GRACE, driver).await.is_err() {
        tracing::warn!("Socket did not close within {:?}", SHUTDOWN_GRACE);
    }

    if gave_up {
        bail!("gave up reconnecting");
    }
    Ok(())
}
