//! Pure frame encoding and decoding. No I/O happens here.
//!
//! Wire format (all multi-byte integers big-endian):
//!
//! ```text
//! ┌────────────┬─────────────┬──────────────┬─────┬──────────┬──────────────────┐
//! │ Magic (4B) │ Header len  │ Payload len  │ Ver │ Reserved │ Payload          │
//! │ "ISCP"     │ (4B BE)=16  │ (4B BE)      │ 0x01│ 3 x 0x00 │ ASCII msg + CRLF │
//! └────────────┴─────────────┴──────────────┴─────┴──────────┴──────────────────┘
//! ```
//!
//! The payload-length field always equals the exact byte length of the
//! payload, terminator included. Decoding trusts the header's own length
//! fields rather than assuming fixed offsets, so frames from devices that
//! pad the header differently still parse.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{
    EiscpError, Result, DEFAULT_UNIT, HEADER_SIZE, ISCP_MAGIC, ISCP_VERSION, MAX_PAYLOAD,
    START_MARKER,
};

/// Bytes devices append after the message proper: EOF, CR, LF and NUL padding.
const TERMINATORS: [u8; 4] = [0x1A, b'\r', b'\n', 0x00];

/// Prepend the default receiver marker when the message lacks one.
fn normalize(message: &str) -> Cow<'_, str> {
    if message.starts_with(START_MARKER) {
        Cow::Borrowed(message)
    } else {
        Cow::Owned(format!("{START_MARKER}{DEFAULT_UNIT}{message}"))
    }
}

/// Encode a control message into a complete frame.
///
/// Messages without the `!` start marker get the default `!1` receiver
/// marker prepended. Rejects non-ASCII input; the protocol payload is ASCII
/// by definition.
pub fn encode_frame(message: &str) -> Result<Bytes> {
    if !message.is_ascii() {
        return Err(EiscpError::InvalidPayload(format!(
            "message is not ASCII: {message:?}"
        )));
    }
    let message = normalize(message);
    let payload_len = message.len() + 2; // CR LF

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_len);
    buf.put_slice(&ISCP_MAGIC);
    buf.put_u32(HEADER_SIZE as u32);
    buf.put_u32(payload_len as u32);
    buf.put_u8(ISCP_VERSION);
    buf.put_slice(&[0, 0, 0]);
    buf.put_slice(message.as_bytes());
    buf.put_slice(b"\r\n");
    Ok(buf.freeze())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` until a complete frame (header plus declared payload)
/// is buffered; on success the frame's bytes are consumed and the message
/// text is returned with terminators trimmed and the leading device-type
/// marker stripped.
pub fn try_decode_frame(src: &mut BytesMut) -> Result<Option<String>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..4] != ISCP_MAGIC {
        return Err(EiscpError::InvalidMagic);
    }

    let header_len = u32::from_be_bytes(src[4..8].try_into().unwrap()) as usize;
    let payload_len = u32::from_be_bytes(src[8..12].try_into().unwrap()) as usize;

    if header_len < HEADER_SIZE {
        return Err(EiscpError::InvalidPayload(format!(
            "declared header length {header_len} is shorter than the fixed header"
        )));
    }
    if payload_len > MAX_PAYLOAD {
        return Err(EiscpError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD,
        });
    }

    let total = header_len + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(header_len);
    let payload = src.split_to(payload_len);

    let mut end = payload.len();
    while end > 0 && TERMINATORS.contains(&payload[end - 1]) {
        end -= 1;
    }
    let mut body = &payload[..end];
    if body.first() == Some(&(START_MARKER as u8)) && body.len() >= 2 {
        body = &body[2..];
    }

    if !body.is_ascii() {
        return Err(EiscpError::InvalidPayload(
            "payload contains non-ASCII bytes".into(),
        ));
    }
    // Safe: just verified ASCII.
    Ok(Some(String::from_utf8(body.to_vec()).unwrap()))
}
