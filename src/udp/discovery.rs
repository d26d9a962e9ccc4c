//! Broadcast discovery client.
//!
//! Sends the discovery query under both known vendor markers, then collects
//! `ECN` responses until enough devices answered or the timeout elapses.

use std::time::Duration;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::frame::{encode_frame, try_decode_frame};
use crate::message::Message;
use crate::types::{DiscoveredDevice, Result, DEFAULT_PORT, DISCOVERY_UNITS, START_MARKER};

/// Limited-broadcast address probed when no target is given.
pub const BROADCAST_ADDRESS: &str = "255.255.255.255";

/// Query sent to every device family marker.
const DISCOVERY_QUERY: &str = "ECNQSTN";

/// Options for a discovery cycle.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Stop early once this many responses have been collected.
    pub device_count: usize,
    /// Give up after this long, returning whatever was collected.
    pub timeout: Duration,
    /// Probe target; the limited-broadcast address by default, or a known
    /// host to query one device directly.
    pub address: String,
    /// Probe target port.
    pub port: u16,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            device_count: 1,
            timeout: Duration::from_secs(10),
            address: BROADCAST_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl DiscoveryOptions {
    /// Options targeting a single known host instead of the whole segment.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            address: host.into(),
            ..Self::default()
        }
    }
}

/// Run one discovery cycle and return the devices that answered.
///
/// Returns as soon as `device_count` responses were collected or the timeout
/// passed, whichever comes first. A timeout with nothing collected is an
/// empty list, not an error; socket failures short-circuit with `Err`.
/// Repeated responses from the same device are all kept.
pub async fn discover(options: DiscoveryOptions) -> Result<Vec<DiscoveredDevice>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    info!(
        address = %options.address,
        port = options.port,
        "sending discovery probes"
    );

    for unit in DISCOVERY_UNITS {
        let query = format!("{START_MARKER}{unit}{DISCOVERY_QUERY}");
        let probe = encode_frame(&query)?;
        socket
            .send_to(&probe, (options.address.as_str(), options.port))
            .await?;
    }

    let deadline = Instant::now() + options.timeout;
    let mut devices = Vec::new();
    let mut buf = [0u8; 1024];

    while devices.len() < options.device_count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, from) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break, // deadline passed
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(received)) => received,
        };

        let mut datagram = BytesMut::from(&buf[..len]);
        let text = match try_decode_frame(&mut datagram) {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(%from, len, "truncated discovery datagram");
                continue;
            }
            Err(e) => {
                warn!(%from, error = %e, "undecodable discovery datagram");
                continue;
            }
        };

        let message = match Message::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                debug!(%from, error = %e, "discovery payload too short");
                continue;
            }
        };
        if let Some(device) = DiscoveredDevice::from_message(&message, from.ip()) {
            info!(host = %device.host, model = %device.model, "device discovered");
            devices.push(device);
        }
    }

    debug!(count = devices.len(), "discovery finished");
    Ok(devices)
}
