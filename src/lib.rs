//! # eiscp
//!
//! Async client for the eISCP control protocol spoken by networked A/V
//! receivers:
//!
//! * **Discovery** over UDP broadcast — find devices and learn their
//!   model/address without prior configuration
//! * **Persistent TCP sessions** with optional automatic reconnection
//! * **Byte-exact framing** of the binary envelope and its ASCII payload
//! * **Serialized sending** — strict FIFO with a mandatory inter-command
//!   delay, because receivers cannot process back-to-back commands
//!
//! ## Quick Start
//!
//! ```no_run
//! use eiscp::{ConnectOptions, EiscpSession, Event};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), eiscp::EiscpError> {
//!     let session = EiscpSession::new();
//!     let mut events = session.subscribe();
//!
//!     // Host and model omitted: resolved via UDP discovery.
//!     session.connect(ConnectOptions::default()).await?;
//!
//!     // Raw protocol codes; command-name translation is up to the caller.
//!     session.command("PWR", "01").await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let Event::Data(msg) = event {
//!             println!("{} -> {}", msg.code, msg.argument);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! Every message travels in a fixed-header frame (multi-byte integers
//! big-endian):
//!
//! - MAGIC (4B): ASCII `ISCP`
//! - HEADER LEN (4B BE): always 16
//! - PAYLOAD LEN (4B BE): exact byte length of the payload
//! - VERSION (1B): `0x01`
//! - RESERVED (3B): zero
//! - PAYLOAD: ASCII message + CR LF
//!
//! The message itself is a start marker (`!` plus a device-type character,
//! `!1` for receivers), a 3-character command code and an argument, e.g.
//! `!1PWR01`. Messages queued without a marker get `!1` prepended.
//!
//! Discovery broadcasts `ECNQSTN` under two vendor markers to port 60128;
//! devices answer with `ECN` plus `model/port/area/mac`.
//!
//! ## Guarantees and non-guarantees
//!
//! Completion of a send acknowledges transmission only — the crate never
//! verifies that a command produced the intended device behavior. Inbound
//! messages that fail to parse are logged and dropped without affecting the
//! session.

pub mod codec;
pub mod frame;
pub mod message;
pub mod tcp;
pub mod types;
pub mod udp;

// Re-export the main surface for convenience.
pub use codec::EiscpCodec;
pub use frame::{encode_frame, try_decode_frame};
pub use message::Message;
pub use tcp::{ConnectOptions, EiscpSession, SessionConfig};
pub use types::{
    ConnectionState, DiscoveredDevice, EiscpError, Event, ReceivedMessage, DEFAULT_PORT,
    HEADER_SIZE, ISCP_MAGIC, ISCP_VERSION,
};
pub use udp::{discover, DiscoveryOptions};
