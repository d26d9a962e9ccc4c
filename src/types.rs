//! Shared protocol types, constants and the crate error type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame: ASCII "ISCP".
pub const ISCP_MAGIC: [u8; 4] = *b"ISCP";

/// The fixed header is always 16 bytes; the header-length field repeats this.
pub const HEADER_SIZE: usize = 16;

/// Protocol version carried in every frame.
pub const ISCP_VERSION: u8 = 0x01;

/// Default TCP/UDP control port receivers listen on.
pub const DEFAULT_PORT: u16 = 60128;

/// Message-start marker; messages without it get [`DEFAULT_UNIT`] prepended.
pub const START_MARKER: char = '!';

/// Default device-type marker for receivers (`!1...`).
pub const DEFAULT_UNIT: char = '1';

/// Device-type markers probed during discovery (two device families).
pub const DISCOVERY_UNITS: [char; 2] = ['1', 'p'];

/// Command code carried by discovery responses.
pub const DISCOVERY_CODE: &str = "ECN";

/// Upper bound on a single frame payload. Control messages are tiny; anything
/// larger means a corrupt length field.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Default pause enforced between consecutive outbound commands.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(500);

/// Default wait before re-attempting a dropped connection.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors surfaced by framing, discovery and session operations.
#[derive(Debug, thiserror::Error)]
pub enum EiscpError {
    /// An I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame header does not start with the `ISCP` magic.
    #[error("invalid frame magic (expected ASCII \"ISCP\")")]
    InvalidMagic,

    /// The declared payload length exceeds the decode cap.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload is not a well-formed ASCII control message.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A send was attempted without an established session.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a session is already connecting or connected.
    #[error("session already connecting or connected")]
    AlreadyConnected,

    /// Discovery was required to resolve the target but found no devices.
    #[error("no devices discovered")]
    NoDevicesFound,

    /// The command queue worker is gone and can no longer accept sends.
    #[error("command queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, EiscpError>;

/// A device that answered a discovery probe.
///
/// Built transiently from each `ECN` response; repeated answers from the same
/// device are not deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Source address the response came from.
    pub host: String,
    /// Control port advertised in the response payload.
    pub port: u16,
    /// Model identifier, e.g. `TX-NR616`.
    pub model: String,
    /// Area/region code.
    pub area: String,
    /// Device identifier, trailing NUL padding stripped, first 12 characters.
    pub mac: String,
    /// The raw response message as decoded off the wire.
    pub raw: String,
}

/// Lifecycle state of a TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A decoded inbound control message together with its session context.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Full message text (code + argument) as decoded.
    pub raw: String,
    /// 3-character command code.
    pub code: String,
    /// Argument portion after the code.
    pub argument: String,
    /// Host the session is connected to.
    pub host: String,
    /// Port the session is connected to.
    pub port: u16,
    /// Device model, when known.
    pub model: Option<String>,
}

/// Events published on the session's broadcast channel.
#[derive(Debug, Clone)]
pub enum Event {
    /// The TCP session reached the connected state.
    Connect {
        host: String,
        port: u16,
        model: Option<String>,
    },
    /// The TCP session closed (remote drop, error teardown or disconnect).
    Close,
    /// A transport or send failure, as descriptive text.
    Error(String),
    /// Diagnostic chatter mirrored from the tracing output.
    Debug(String),
    /// A decoded inbound message.
    Data(ReceivedMessage),
}
