//! Epoch-tagged timer slots for the heartbeat and reconnect timers.
//!
//! Timers are not tasks: the driver sleeps until [`Timers::next_deadline`] and
//! then collects what is due. Each slot remembers the connection epoch it was
//! scheduled in, and the client drops firings from an older epoch.

use tokio::time::Instant;

/// Identifies one connection attempt. Advanced on every open attempt and on
/// every caller-initiated close.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionEpoch(u64);

impl ConnectionEpoch {
    pub fn next(self) -> Self {
        ConnectionEpoch(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Heartbeat,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerSlot {
    epoch: ConnectionEpoch,
    deadline: Instant,
}

/// A timer that came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimer {
    pub kind: TimerKind,
    pub epoch: ConnectionEpoch,
}

#[derive(Debug, Default)]
pub struct Timers {
    heartbeat: Option<TimerSlot>,
    reconnect: Option<TimerSlot>,
}

impl Timers {
    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<TimerSlot> {
        match kind {
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    /// Replaces any pending timer of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, epoch: ConnectionEpoch, deadline: Instant) {
        *self.slot_mut(kind) = Some(TimerSlot { epoch, deadline });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        *self.slot_mut(kind) = None;
    }

    pub fn cancel_all(&mut self) {
        self.heartbeat = None;
        self.reconnect = None;
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Heartbeat => self.heartbeat.is_some(),
            TimerKind::Reconnect => self.reconnect.is_some(),
        }
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        match kind {
            TimerKind::Heartbeat => self.heartbeat.map(|s| s.deadline),
            TimerKind::Reconnect => self.reconnect.map(|s| s.deadline),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.heartbeat, self.reconnect]
            .into_iter()
            .flatten()
            .map(|s| s.deadline)
            .min()
    }

    /// Remove and return every timer whose deadline is at or before `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueTimer> {
        let mut due = Vec::new();
        for kind in [TimerKind::Reconnect, TimerKind::Heartbeat] {
            let slot = self.slot_mut(kind);
            if let Some(timer) = *slot {
                if timer.deadline <= now {
                    *slot = None;
                    due.push(DueTimer {
                        kind,
                        epoch: timer.epoch,
                    });
                }
            }
        }
        due
    }
}
