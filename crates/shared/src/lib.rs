//! Shared wire types for the Pulse realtime pub/sub protocol.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
