//! Logging macros used throughout the client.
//!
//! Everything goes to `tracing` under the `pulse_realtime` target, so a host
//! application can quiet client chatter with `RUST_LOG=pulse_realtime=warn`.

use tracing::Level;

/// Longest frame excerpt written to the log.
const PREVIEW_CHARS: usize = 200;

/// Emit a preformatted message at `level`.
pub fn emit(level: Level, msg: &str) {
    match level {
        Level::ERROR => tracing::error!(target: "pulse_realtime", "{}", msg),
        Level::WARN => tracing::warn!(target: "pulse_realtime", "{}", msg),
        Level::INFO => tracing::info!(target: "pulse_realtime", "{}", msg),
        Level::DEBUG => tracing::debug!(target: "pulse_realtime", "{}", msg),
        _ => tracing::trace!(target: "pulse_realtime", "{}", msg),
    }
}

/// Shorten a raw frame for logging, on a char boundary.
pub fn preview(frame: &str) -> std::borrow::Cow<'_, str> {
    match frame.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &frame[..idx]).into(),
        None => frame.into(),
    }
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::emit(::tracing::Level::INFO, &format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::emit(::tracing::Level::ERROR, &format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::emit(::tracing::Level::WARN, &format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::emit(::tracing::Level::DEBUG, &format!($($arg)*))
    };
}
