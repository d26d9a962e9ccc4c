//! `tokio_util` codec bridging the pure frame functions onto async streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{encode_frame, try_decode_frame};
use crate::types::EiscpError;

/// Frame codec for use with [`tokio_util::codec::FramedRead`] and
/// [`FramedWrite`](tokio_util::codec::FramedWrite).
///
/// Incoming bytes are buffered until a complete frame is available, so TCP
/// deliveries that split or coalesce frames decode correctly.
#[derive(Debug, Default, Clone, Copy)]
pub struct EiscpCodec;

impl Decoder for EiscpCodec {
    type Item = String;
    type Error = EiscpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, EiscpError> {
        try_decode_frame(src)
    }
}

impl Encoder<String> for EiscpCodec {
    type Error = EiscpError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), EiscpError> {
        dst.extend_from_slice(&encode_frame(&item)?);
        Ok(())
    }
}

impl Encoder<&str> for EiscpCodec {
    type Error = EiscpError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), EiscpError> {
        dst.extend_from_slice(&encode_frame(item)?);
        Ok(())
    }
}
