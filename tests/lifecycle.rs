mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use common::{quiet_options, Harness};
use pulse_realtime::ws::{HeartbeatConfig, ReconnectOption, ReconnectPolicy, TimerKind};
use pulse_realtime::{ClientCallbacks, ClientOptions, ClientScope, ConnectionStatus, Envelope};
use serde_json::json;

#[test]
fn immediate_client_connects_and_sends_auth_on_open() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    assert_eq!(h.client.status(), ConnectionStatus::Connecting);
    assert_eq!(h.remote.opens(), 1);

    h.accept();
    assert!(h.client.is_open());
    assert_eq!(h.remote.auth_frames(), vec!["secret"]);
    assert!(!h.client.is_authenticated());

    h.receive(json!({ "type": "auth_success" }));
    assert!(h.client.is_authenticated());
}

#[test]
fn deferred_client_waits_for_open() {
    let options = ClientOptions {
        immediate: false,
        ..quiet_options()
    };
    let mut h = Harness::new(options, ClientCallbacks::new());
    assert_eq!(h.client.status(), ConnectionStatus::Closed);
    assert_eq!(h.remote.opens(), 0);

    h.open();
    assert_eq!(h.client.status(), ConnectionStatus::Connecting);
    assert_eq!(h.remote.opens(), 1);
}

#[test]
fn open_and_close_are_idempotent() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.open();
    h.open();
    assert_eq!(h.remote.opens(), 1);

    h.accept();
    h.open();
    assert_eq!(h.remote.opens(), 1);

    h.close();
    h.close();
    assert_eq!(h.remote.closes(), 1);
    assert_eq!(h.client.status(), ConnectionStatus::Closed);
}

#[test]
fn no_token_means_no_auth_frame() {
    let mut h = Harness::with_token(quiet_options(), ClientCallbacks::new(), None);
    h.accept();
    assert!(h.remote.sent().is_empty());
    assert!(!h.client.is_authenticated());
}

#[test]
fn token_appearing_while_open_triggers_auth() {
    let mut h = Harness::with_token(quiet_options(), ClientCallbacks::new(), None);
    h.accept();

    h.set_token(Some("fresh"));
    assert_eq!(h.remote.auth_frames(), vec!["fresh"]);

    h.receive(json!({ "type": "auth_success" }));
    h.set_token(Some("rotated"));
    assert_eq!(h.remote.auth_frames(), vec!["fresh"]);
}

#[test]
fn token_change_while_closed_is_ignored() {
    let options = ClientOptions {
        immediate: false,
        ..quiet_options()
    };
    let mut h = Harness::with_token(options, ClientCallbacks::new(), None);
    h.set_token(Some("later"));
    assert!(h.remote.sent().is_empty());

    h.open();
    h.accept();
    assert_eq!(h.remote.auth_frames(), vec!["later"]);
}

#[test]
fn leaving_open_always_clears_authentication() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.connect_and_authenticate();
    let auth = h.client.watch_authenticated();
    assert!(*auth.borrow());

    h.close();
    assert!(!h.client.is_authenticated());
    assert!(!*auth.borrow());

    h.open();
    h.connect_and_authenticate();
    assert!(h.client.is_authenticated());
    h.drop_connection();
    assert!(!h.client.is_authenticated());
}

#[test]
fn auth_success_is_ignored_unless_open() {
    let options = ClientOptions {
        immediate: false,
        ..quiet_options()
    };
    let mut h = Harness::new(options, ClientCallbacks::new());
    h.receive(json!({ "type": "auth_success" }));
    assert!(!h.client.is_authenticated());
}

#[test]
fn authenticate_requires_open_socket() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    assert!(!h.client.authenticate("manual"));
    h.accept();
    h.remote.take_sent();

    assert!(h.client.authenticate("manual"));
    assert_eq!(h.remote.auth_frames(), vec!["manual"]);
}

#[test]
fn send_is_a_no_op_until_open() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    let envelope = Envelope::new("chat:message", json!({ "text": "hi" }));
    assert!(!h.client.send(&envelope));
    assert!(h.remote.sent().is_empty());

    h.accept();
    h.remote.take_sent();
    assert!(h.client.send(&envelope));
    assert_eq!(
        h.remote.sent_json(),
        vec![json!({ "type": "chat:message", "payload": { "text": "hi" } })]
    );
}

#[test]
fn explicit_close_does_not_reconnect() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.connect_and_authenticate();
    h.close();

    assert!(!h.client.timer_pending(TimerKind::Reconnect));
    assert!(h.client.next_deadline().is_none());
    assert_eq!(h.remote.opens(), 1);

    h.open();
    assert_eq!(h.remote.opens(), 2);
}

#[test]
fn reopen_before_close_is_delivered_keeps_the_budget() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.connect_and_authenticate();

    // Both calls land before the driver sees the Closed from `close()`.
    h.client.close();
    h.client.open();
    h.pump();

    assert_eq!(h.client.status(), ConnectionStatus::Connecting);
    assert_eq!(h.client.retry_attempts(), 0);
    assert!(!h.client.timer_pending(TimerKind::Reconnect));
    assert_eq!(h.remote.opens(), 2);

    // The next drop is unplanned again.
    h.accept();
    h.drop_connection();
    assert_eq!(h.client.retry_attempts(), 1);
    assert!(h.client.timer_pending(TimerKind::Reconnect));
}

#[test]
fn heartbeat_sends_ping_while_open() {
    let options = ClientOptions {
        heartbeat: Some(HeartbeatConfig::every(Duration::from_secs(30))),
        ..ClientOptions::default()
    };
    let mut h = Harness::new(options, ClientCallbacks::new());
    assert!(!h.client.timer_pending(TimerKind::Heartbeat));

    h.accept();
    h.remote.take_sent();
    assert!(h.client.timer_pending(TimerKind::Heartbeat));

    assert!(h.fire_next_timer());
    assert!(h.fire_next_timer());
    assert_eq!(h.remote.sent(), vec!["ping", "ping"]);
    assert!(h.client.timer_pending(TimerKind::Heartbeat));

    h.close();
    assert!(!h.client.timer_pending(TimerKind::Heartbeat));
}

#[test]
fn heartbeat_reply_is_swallowed() {
    let seen = Rc::new(Cell::new(0));
    let callbacks = ClientCallbacks::new().on_message({
        let seen = seen.clone();
        move |_| seen.set(seen.get() + 1)
    });
    let options = ClientOptions {
        heartbeat: Some(HeartbeatConfig::default().with_response("pong")),
        ..ClientOptions::default()
    };
    let mut h = Harness::new(options, callbacks);
    h.accept();

    h.receive_raw("pong");
    assert_eq!(seen.get(), 0);
    assert!(h.client.last_message().is_none());

    // Not the configured reply, so it is a malformed frame.
    h.receive_raw("ping");
    assert_eq!(seen.get(), 0);

    h.receive(json!({ "type": "hello" }));
    assert_eq!(seen.get(), 1);
}

#[test]
fn stale_timer_after_close_does_nothing() {
    let options = ClientOptions {
        auto_reconnect: ReconnectOption::Enabled(ReconnectPolicy::fixed(3, Duration::from_millis(10))),
        ..quiet_options()
    };
    let mut h = Harness::new(options, ClientCallbacks::new());
    h.accept();
    h.drop_connection();
    let deadline = h.client.next_deadline().expect("reconnect scheduled");

    h.close();
    h.client.fire_due_timers(deadline + Duration::from_secs(60));
    h.pump();
    assert_eq!(h.remote.opens(), 1);
    assert_eq!(h.client.status(), ConnectionStatus::Closed);
}

#[test]
fn dispose_unsubscribes_clears_and_closes() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.connect_and_authenticate();
    h.client.subscribe("project:1");
    h.receive(json!({ "type": "subscribed", "payload": { "topic": "project:1" } }));
    h.client.on("chat:message", |_| Ok(()));
    h.remote.take_sent();

    h.client.dispose();
    h.pump();
    assert_eq!(h.remote.unsubscribe_frames(), vec!["project:1"]);
    assert_eq!(h.client.handler_count("chat:message"), 0);
    assert_eq!(h.remote.closes(), 1);
    assert!(h.client.is_disposed());

    h.open();
    assert_eq!(h.remote.opens(), 1);

    h.client.dispose();
    assert_eq!(h.remote.closes(), 1);
}

#[test]
fn scope_disposes_on_drop() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.connect_and_authenticate();
    {
        let scope = ClientScope::new(h.client.clone());
        scope.subscribe("room:7");
        assert!(!scope.is_disposed());
    }
    h.pump();

    assert!(h.client.is_disposed());
    assert_eq!(h.remote.subscribe_frames(), vec!["room:7"]);
    assert_eq!(h.remote.unsubscribe_frames(), vec!["room:7"]);
    assert_eq!(h.client.status(), ConnectionStatus::Closed);
}

#[test]
fn scope_disposes_when_unwinding() {
    let mut h = Harness::new(quiet_options(), ClientCallbacks::new());
    h.accept();
    let client = h.client.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _scope = ClientScope::new(client);
        panic!("owner failed");
    }));
    assert!(result.is_err());

    h.pump();
    assert!(h.client.is_disposed());
    assert_eq!(h.remote.closes(), 1);
}
