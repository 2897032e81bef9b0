mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use common::{quiet_options, Harness};
use pulse_realtime::ws::{ReconnectDelay, ReconnectOption, ReconnectPolicy, TimerKind};
use pulse_realtime::{ClientCallbacks, ClientOptions, ConnectionStatus};
use tokio::time::Instant;

fn with_policy(policy: ReconnectPolicy) -> ClientOptions {
    ClientOptions {
        auto_reconnect: ReconnectOption::Enabled(policy),
        ..quiet_options()
    }
}

// Paused clock: `Instant::now()` stays put unless the test awaits.
#[tokio::test(start_paused = true)]
async fn backoff_doubles_up_to_the_cap() {
    let policy = ReconnectPolicy {
        retries: Some(6),
        delay: ReconnectDelay::Exponential {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30000),
        },
    };
    let mut h = Harness::new(with_policy(policy), ClientCallbacks::new());
    h.accept();
    h.drop_connection();

    let mut delays = Vec::new();
    for _ in 0..6 {
        let deadline = h.client.next_deadline().expect("reconnect scheduled");
        delays.push((deadline - Instant::now()).as_millis());
        assert!(h.fire_next_timer());
        assert_eq!(h.client.status(), ConnectionStatus::Connecting);
        h.remote.refuse();
        h.pump();
    }
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
}

#[test]
fn gives_up_after_retries_and_fires_on_failed() {
    let failed = Rc::new(Cell::new(0));
    let callbacks = ClientCallbacks::new().on_failed({
        let failed = failed.clone();
        move || failed.set(failed.get() + 1)
    });
    let mut h = Harness::new(
        with_policy(ReconnectPolicy::fixed(2, Duration::from_millis(10))),
        callbacks,
    );
    h.accept();
    h.drop_connection();

    assert!(h.fire_next_timer());
    h.remote.refuse();
    h.pump();
    assert_eq!(h.client.retry_attempts(), 2);

    assert!(h.fire_next_timer());
    h.remote.refuse();
    h.pump();

    assert_eq!(failed.get(), 1);
    assert_eq!(h.remote.opens(), 3);
    assert!(!h.client.timer_pending(TimerKind::Reconnect));
    assert_eq!(h.client.status(), ConnectionStatus::Closed);

    // Stays closed until asked again, with a fresh budget.
    h.open();
    assert_eq!(h.remote.opens(), 4);
    assert_eq!(h.client.retry_attempts(), 0);
}

#[test]
fn successful_open_resets_the_budget() {
    let mut h = Harness::new(
        with_policy(ReconnectPolicy::fixed(2, Duration::from_millis(10))),
        ClientCallbacks::new(),
    );
    h.accept();

    for _ in 0..5 {
        h.drop_connection();
        assert_eq!(h.client.retry_attempts(), 1);
        assert!(h.fire_next_timer());
        h.accept();
        assert_eq!(h.client.retry_attempts(), 0);
    }
    assert_eq!(h.remote.opens(), 6);
}

#[test]
fn disabled_reconnect_stays_closed() {
    let failed = Rc::new(Cell::new(false));
    let callbacks = ClientCallbacks::new().on_failed({
        let failed = failed.clone();
        move || failed.set(true)
    });
    let options = ClientOptions {
        auto_reconnect: ReconnectOption::Disabled,
        ..quiet_options()
    };
    let mut h = Harness::new(options, callbacks);
    h.accept();
    h.drop_connection();

    assert!(h.client.next_deadline().is_none());
    assert!(!failed.get());
    assert_eq!(h.client.status(), ConnectionStatus::Closed);
}

#[test]
fn refused_first_connect_is_retried() {
    let mut h = Harness::new(
        with_policy(ReconnectPolicy::fixed(3, Duration::from_millis(10))),
        ClientCallbacks::new(),
    );
    h.remote.refuse();
    h.pump();

    assert!(h.client.timer_pending(TimerKind::Reconnect));
    assert!(h.fire_next_timer());
    h.accept();
    assert!(h.client.is_open());
    assert_eq!(h.remote.auth_frames(), vec!["secret"]);
}

#[test]
fn reconnect_attempts_advance_the_epoch() {
    let mut h = Harness::new(
        with_policy(ReconnectPolicy::fixed(3, Duration::from_millis(10))),
        ClientCallbacks::new(),
    );
    let first = h.client.epoch();
    h.accept();
    h.drop_connection();
    assert_eq!(h.client.epoch(), first);

    h.fire_next_timer();
    assert!(h.client.epoch() > first);
}
