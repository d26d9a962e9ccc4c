//! TCP session lifecycle and the serialized outbound command queue.

mod queue;
pub mod session;

pub use session::{ConnectOptions, EiscpSession, SessionConfig};
