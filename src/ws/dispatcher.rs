//! Handler registry and fault-isolated invocation.
//!
//! Handlers are keyed by message type (or [`WILDCARD`]) and run in
//! registration order. Each call is isolated: an `Err` or a panic is logged with
//! the type it was registered for and never reaches sibling handlers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use pulse_shared::{Envelope, WILDCARD};
use serde::de::DeserializeOwned;

pub type HandlerResult = anyhow::Result<()>;

pub(crate) type HandlerFn = Rc<dyn Fn(&Envelope) -> HandlerResult>;

/// Identifies one registration; returned by `on`/`once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    once: bool,
    handler: HandlerFn,
}

/// The most recent successfully parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEnvelope {
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
}

impl ReceivedEnvelope {
    pub fn now(envelope: Envelope) -> Self {
        Self {
            envelope,
            received_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    handlers: HashMap<String, Vec<HandlerEntry>>,
}

impl HandlerRegistry {
    pub(crate) fn insert(&mut self, message_type: &str, handler: HandlerFn, once: bool) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers
            .entry(message_type.to_string())
            .or_default()
            .push(HandlerEntry { id, once, handler });
        id
    }

    /// Remove one registration. The type's entry goes away with its last handler.
    pub fn remove(&mut self, message_type: &str, id: HandlerId) -> bool {
        let Some(entries) = self.handlers.get_mut(message_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.handlers.remove(message_type);
        }
        removed
    }

    /// Clear one type, or everything when `message_type` is `None`.
    pub fn clear(&mut self, message_type: Option<&str>) {
        match message_type {
            Some(t) => {
                self.handlers.remove(t);
            }
            None => self.handlers.clear(),
        }
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.handlers.get(message_type).map_or(0, Vec::len)
    }

    pub fn contains(&self, message_type: &str, id: HandlerId) -> bool {
        self.handlers
            .get(message_type)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Snapshot the handlers for `message_type` for one dispatch.
    ///
    /// `once` registrations are removed here, before they run, so they fire at
    /// most once even if a handler re-enters the client.
    pub(crate) fn take_for_dispatch(&mut self, message_type: &str) -> Vec<HandlerFn> {
        let Some(entries) = self.handlers.get_mut(message_type) else {
            return Vec::new();
        };
        let snapshot = entries.iter().map(|e| e.handler.clone()).collect();
        entries.retain(|e| !e.once);
        if entries.is_empty() {
            self.handlers.remove(message_type);
        }
        snapshot
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(t, entries)| (t.as_str(), entries.len()))
            .collect();
        f.debug_struct("HandlerRegistry").field("handlers", &counts).finish()
    }
}

/// Wrap a payload-typed handler into an envelope handler.
pub(crate) fn typed_handler<T, F>(handler: F) -> HandlerFn
where
    T: DeserializeOwned,
    F: Fn(T) -> HandlerResult + 'static,
{
    Rc::new(move |envelope: &Envelope| -> HandlerResult {
        let payload = envelope.payload_as::<T>()?;
        handler(payload)
    })
}

/// Run `f`, logging an error or a panic against `label`. Returns whether it
/// completed successfully.
pub(crate) fn invoke_isolated(label: &str, f: impl FnOnce() -> HandlerResult) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            crate::log_error!("Error in {}: {:#}", label, e);
            false
        }
        Err(panic) => {
            crate::log_error!("Panic in {}: {}", label, panic_message(panic.as_ref()));
            false
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Steps 2 and 3 of dispatch: exact-type handlers, then wildcard handlers.
///
/// Handlers are snapshotted first so that they may register or remove
/// handlers, or call back into the client, while running.
pub(crate) fn fan_out(
    registry: &std::cell::RefCell<HandlerRegistry>,
    envelope: &Envelope,
) -> usize {
    let mut failures = 0;

    let typed = registry.borrow_mut().take_for_dispatch(&envelope.message_type);
    let label = format!("message handler for type \"{}\"", envelope.message_type);
    for handler in typed {
        if !invoke_isolated(&label, || handler(envelope)) {
            failures += 1;
        }
    }

    let wildcard = registry.borrow_mut().take_for_dispatch(WILDCARD);
    for handler in wildcard {
        if !invoke_isolated("wildcard message handler", || handler(envelope)) {
            failures += 1;
        }
    }

    failures
}
