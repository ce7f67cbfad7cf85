// src/core/protocol/codec.rs

//! Implements the length-prefixed document framing and the corresponding
//! `Encoder` and `Decoder` for network communication.

use super::{ReplyMessage, RequestMessage};
use crate::core::ClientError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the big-endian length prefix that precedes every message.
const LEN_PREFIX: usize = 4;

// Protocol-level limit to prevent unbounded allocation from a malformed
// or hostile peer.
const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// A `tokio_util::codec` implementation framing JSON-encoded messages with a
/// 4-byte length prefix. The client encodes requests and decodes replies.
#[derive(Debug, Default)]
pub struct WireCodec;

impl Encoder<RequestMessage> for WireCodec {
    type Error = ClientError;

    fn encode(&mut self, item: RequestMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ClientError::Protocol(format!(
                "request of {} bytes exceeds the maximum message size",
                payload.len()
            )));
        }
        dst.reserve(LEN_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = ReplyMessage;
    type Error = ClientError;

    /// Returns `Ok(None)` while the buffer does not yet hold a full message,
    /// letting the read loop wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ClientError::Protocol(format!(
                "reply of {len} bytes exceeds the maximum message size"
            )));
        }
        if src.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}
