//! Control-message parsing: command-code/argument split and discovery
//! response fields.

use std::net::IpAddr;

use tracing::debug;

use crate::types::{DiscoveredDevice, EiscpError, Result, DISCOVERY_CODE};

/// Number of characters in a command code.
const CODE_LEN: usize = 3;

/// Discovery MAC field length after stripping padding.
const MAC_LEN: usize = 12;

/// A decoded control message: 3-character command code plus argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: String,
    pub argument: String,
}

impl Message {
    /// Split decoded payload text into code and argument.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() < CODE_LEN || !text.is_char_boundary(CODE_LEN) {
            return Err(EiscpError::InvalidPayload(format!(
                "message too short for a command code: {text:?}"
            )));
        }
        let (code, argument) = text.split_at(CODE_LEN);
        Ok(Self {
            code: code.to_string(),
            argument: argument.to_string(),
        })
    }
}

impl DiscoveredDevice {
    /// Build a device record from a discovery response.
    ///
    /// Returns `None` for non-`ECN` messages and for responses whose
    /// argument does not carry the expected `model/port/area/mac` fields;
    /// both are ignored (not errors) during discovery listening.
    pub fn from_message(message: &Message, source: IpAddr) -> Option<Self> {
        if message.code != DISCOVERY_CODE {
            debug!(code = %message.code, "ignoring non-discovery message");
            return None;
        }
        let fields: Vec<&str> = message.argument.split('/').collect();
        let &[model, port, area, mac] = fields.as_slice() else {
            debug!(argument = %message.argument, "malformed discovery response");
            return None;
        };
        let port: u16 = match port.parse() {
            Ok(port) => port,
            Err(_) => {
                debug!(%port, "discovery response carries unparseable port");
                return None;
            }
        };
        let mac: String = mac.trim_end_matches('\0').chars().take(MAC_LEN).collect();
        Some(Self {
            host: source.to_string(),
            port,
            model: model.to_string(),
            area: area.to_string(),
            mac,
            raw: format!("{}{}", message.code, message.argument),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn parse_splits_code_and_argument() {
        let msg = Message::parse("MVL32").unwrap();
        assert_eq!(msg.code, "MVL");
        assert_eq!(msg.argument, "32");

        let msg = Message::parse("PWRQSTN").unwrap();
        assert_eq!(msg.code, "PWR");
        assert_eq!(msg.argument, "QSTN");
    }

    #[test]
    fn parse_allows_empty_argument() {
        let msg = Message::parse("PWR").unwrap();
        assert_eq!(msg.code, "PWR");
        assert_eq!(msg.argument, "");
    }

    #[test]
    fn parse_rejects_short_payload() {
        assert!(matches!(
            Message::parse("PW"),
            Err(EiscpError::InvalidPayload(_))
        ));
    }

    #[test]
    fn discovery_response_parses_fields() {
        let msg = Message::parse("ECNTX-NR616/60128/DX/0009B0123456\0\0\0").unwrap();
        let device = DiscoveredDevice::from_message(&msg, localhost()).unwrap();
        assert_eq!(device.host, "127.0.0.1");
        assert_eq!(device.port, 60128);
        assert_eq!(device.model, "TX-NR616");
        assert_eq!(device.area, "DX");
        assert_eq!(device.mac, "0009B0123456");
    }

    #[test]
    fn discovery_mac_truncates_to_twelve_chars() {
        let msg = Message::parse("ECNHT-R693/60128/XX/0009B0AABBCCDDEE").unwrap();
        let device = DiscoveredDevice::from_message(&msg, localhost()).unwrap();
        assert_eq!(device.mac, "0009B0AABBCC");
    }

    #[test]
    fn non_discovery_code_is_ignored() {
        let msg = Message::parse("PWR01").unwrap();
        assert!(DiscoveredDevice::from_message(&msg, localhost()).is_none());
    }

    #[test]
    fn wrong_field_count_is_ignored() {
        let msg = Message::parse("ECNTX-NR616/60128/DX").unwrap();
        assert!(DiscoveredDevice::from_message(&msg, localhost()).is_none());

        let msg = Message::parse("ECNTX-NR616/60128/DX/MAC/extra").unwrap();
        assert!(DiscoveredDevice::from_message(&msg, localhost()).is_none());
    }

    #[test]
    fn unparseable_port_is_ignored() {
        let msg = Message::parse("ECNTX-NR616/highport/DX/0009B0123456").unwrap();
        assert!(DiscoveredDevice::from_message(&msg, localhost()).is_none());
    }
}
