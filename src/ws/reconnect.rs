//! Reconnection policy: whether, and after how long, to reopen the transport
//! after an unplanned close.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30000);

/// Delay function, keyed by the 1-based attempt number.
#[derive(Clone)]
pub enum ReconnectDelay {
    Fixed(Duration),
    /// `min(base * 2^(attempt - 1), cap)`
    Exponential { base: Duration, cap: Duration },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl ReconnectDelay {
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        ReconnectDelay::Custom(Arc::new(f))
    }

    /// Calculate delay for a given attempt number (1 = first retry)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            ReconnectDelay::Fixed(delay) => *delay,
            ReconnectDelay::Exponential { base, cap } => {
                let exponent = attempt.saturating_sub(1);
                2u32.checked_pow(exponent)
                    .and_then(|factor| base.checked_mul(factor))
                    .map_or(*cap, |delay| delay.min(*cap))
            }
            ReconnectDelay::Custom(f) => f(attempt),
        }
    }
}

impl Default for ReconnectDelay {
    fn default() -> Self {
        ReconnectDelay::Exponential {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_MAX_DELAY,
        }
    }
}

impl fmt::Debug for ReconnectDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            ReconnectDelay::Exponential { base, cap } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("cap", cap)
                .finish(),
            ReconnectDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnect attempts (`None` = unlimited)
    pub retries: Option<u32>,
    pub delay: ReconnectDelay,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retries: Some(DEFAULT_RETRIES),
            delay: ReconnectDelay::default(),
        }
    }
}

/// What to do about an unplanned close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

impl ReconnectPolicy {
    pub fn exponential(retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            retries: Some(retries),
            delay: ReconnectDelay::Exponential { base, cap },
        }
    }

    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries: Some(retries),
            delay: ReconnectDelay::Fixed(delay),
        }
    }

    /// Consume one attempt from `state`, or give up once the budget is spent.
    pub fn decide(&self, state: &mut RetryState) -> ReconnectDecision {
        if let Some(max) = self.retries {
            if state.attempts >= max {
                return ReconnectDecision::GiveUp {
                    attempts: state.attempts,
                };
            }
        }
        state.attempts += 1;
        ReconnectDecision::Retry {
            attempt: state.attempts,
            delay: self.delay.delay_for_attempt(state.attempts),
        }
    }
}

/// Reconnection mode selected by configuration.
#[derive(Debug, Clone)]
pub enum ReconnectOption {
    Disabled,
    Enabled(ReconnectPolicy),
}

impl ReconnectOption {
    pub fn policy(&self) -> Option<&ReconnectPolicy> {
        match self {
            ReconnectOption::Disabled => None,
            ReconnectOption::Enabled(policy) => Some(policy),
        }
    }
}

impl Default for ReconnectOption {
    fn default() -> Self {
        ReconnectOption::Enabled(ReconnectPolicy::default())
    }
}

impl From<bool> for ReconnectOption {
    fn from(enabled: bool) -> Self {
        if enabled {
            ReconnectOption::default()
        } else {
            ReconnectOption::Disabled
        }
    }
}

impl From<ReconnectPolicy> for ReconnectOption {
    fn from(policy: ReconnectPolicy) -> Self {
        ReconnectOption::Enabled(policy)
    }
}

/// Attempts made since the last successful open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
