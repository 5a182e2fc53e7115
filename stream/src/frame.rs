//! Framing of the byte stream.
//!
//! Decoding happens in two stages. [FrameDecoder::next_frame] isolates complete frames by the
//! length field of the header and leaves partial frames buffered until more bytes arrive.
//! [WireCodec::decode_message] then validates the header, decompresses and deserializes the body.
//!
//! Every [FrameError] from decoding is fatal to the connection, there is no resync.

use crate::proto::*;
use bytes::{BufMut, BytesMut};
use kestrel_rpc_core::codec::CodecError;
use kestrel_rpc_core::error::{ExtensionError, RpcIntErr};
use kestrel_rpc_core::extension::Extensions;
use kestrel_rpc_core::message::{BodyShape, MessageBody};
use std::{io, sync::Arc};
use zerocopy::AsBytes;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("wrong magic {0:?}")]
    Magic([u8; 4]),
    #[error("version {0} not supported")]
    Version(u8),
    #[error("frame length {len} out of range [16, {max}]")]
    Length { len: usize, max: usize },
    #[error("unknown message type {0}")]
    MessageType(u8),
    #[error("{0:?} frame without body")]
    EmptyBody(MessageType),
    #[error("{0:?} message with a mismatched body")]
    BodyMismatch(MessageType),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("compressor: {0}")]
    Compress(io::Error),
    #[error("serializer: {0}")]
    Codec(#[from] CodecError),
}

impl FrameError {
    /// The kind when the error comes from decoding. Encoding failures are all `Encode`.
    pub fn kind(&self) -> RpcIntErr {
        match self {
            Self::Magic(_) | Self::Length { .. } | Self::MessageType(_) => RpcIntErr::Protocol,
            Self::Version(_) => RpcIntErr::Version,
            _ => RpcIntErr::Decode,
        }
    }
}

#[inline]
fn check_prefix(buf: &[u8]) -> Result<(), FrameError> {
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != RPC_MAGIC {
        return Err(FrameError::Magic(magic));
    }
    if buf[4] != RPC_VERSION {
        return Err(FrameError::Version(buf[4]));
    }
    Ok(())
}

/// Turns [RpcMessage] into frame bytes and back, resolving serializer and compressor by the
/// wire ids in the header.
#[derive(Clone)]
pub struct WireCodec {
    ext: Arc<Extensions>,
    max_frame_len: usize,
}

impl WireCodec {
    pub fn new(ext: Arc<Extensions>, max_frame_len: usize) -> Self {
        Self { ext, max_frame_len }
    }

    #[inline]
    pub fn extensions(&self) -> &Arc<Extensions> {
        &self.ext
    }

    #[inline]
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Append one frame to `dst`. On error nothing is appended.
    pub fn encode(&self, msg: &RpcMessage, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = match (msg.msg_type, &msg.body) {
            (MessageType::Ping | MessageType::Pong, _) => None,
            (MessageType::Request, MessageBody::Request(_)) | (MessageType::Response, MessageBody::Response(_)) => {
                Some(self.encode_body(msg)?)
            }
            _ => return Err(FrameError::BodyMismatch(msg.msg_type)),
        };
        let full_len = RPC_HEAD_LEN + body.as_ref().map(|b| b.len()).unwrap_or(0);
        if full_len > self.max_frame_len {
            return Err(FrameError::Length { len: full_len, max: self.max_frame_len });
        }
        let head = FrameHead::new(msg.msg_type, msg.codec, msg.compress, msg.request_id, full_len as u32);
        dst.reserve(full_len);
        dst.put_slice(head.as_bytes());
        if let Some(body) = body {
            dst.put_slice(&body);
        }
        Ok(())
    }

    fn encode_body(&self, msg: &RpcMessage) -> Result<Vec<u8>, FrameError> {
        let serializer = self.ext.serializer_by_id(msg.codec)?;
        let compressor = self.ext.compressor_by_id(msg.compress)?;
        let raw = serializer.serialize(&msg.body)?;
        compressor.compress(&raw).map_err(FrameError::Compress)
    }

    /// Decode one complete frame, as returned by [FrameDecoder::next_frame].
    pub fn decode_message(&self, frame: &[u8]) -> Result<RpcMessage, FrameError> {
        let Some(head) = FrameHead::parse(frame) else {
            return Err(FrameError::Length { len: frame.len(), max: self.max_frame_len });
        };
        check_prefix(frame)?;
        if head.full_len() != frame.len() {
            return Err(FrameError::Length { len: head.full_len(), max: self.max_frame_len });
        }
        let msg_type = MessageType::try_from(head.msg_type).map_err(FrameError::MessageType)?;
        let body = &frame[RPC_HEAD_LEN..];
        let body = if msg_type.is_heartbeat() {
            MessageBody::Empty
        } else {
            if body.is_empty() {
                return Err(FrameError::EmptyBody(msg_type));
            }
            let compressor = self.ext.compressor_by_id(head.compress)?;
            let serializer = self.ext.serializer_by_id(head.codec)?;
            let raw = compressor.decompress(body).map_err(FrameError::Compress)?;
            let shape =
                if msg_type == MessageType::Request { BodyShape::Request } else { BodyShape::Response };
            serializer.deserialize(&raw, shape)?
        };
        Ok(RpcMessage {
            msg_type,
            codec: head.codec,
            compress: head.compress,
            request_id: head.request_id(),
            body,
        })
    }
}

/// Accumulates bytes read from the connection.
pub struct FrameDecoder {
    codec: WireCodec,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new(codec: WireCodec) -> Self {
        Self { codec, buf: BytesMut::with_capacity(8 * 1024) }
    }

    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// For reading from the socket straight into the buffer
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes received but not yet returned as a frame
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Split the next complete frame off the buffer, or `None` until more bytes arrive.
    ///
    /// Magic, version and length are checked as soon as the first 9 bytes are buffered, so
    /// garbage is rejected without waiting for a bogus length to fill up.
    pub fn next_frame(&mut self) -> Result<Option<BytesMut>, FrameError> {
        if self.buf.len() < RPC_LEN_FIELD_END {
            return Ok(None);
        }
        check_prefix(&self.buf)?;
        let full_len = u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]) as usize;
        if full_len < RPC_HEAD_LEN || full_len > self.codec.max_frame_len {
            return Err(FrameError::Length { len: full_len, max: self.codec.max_frame_len });
        }
        if self.buf.len() < full_len {
            self.buf.reserve(full_len - self.buf.len());
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(full_len)))
    }

    #[inline]
    pub fn decode_message(&self, frame: &[u8]) -> Result<RpcMessage, FrameError> {
        self.codec.decode_message(frame)
    }

    pub fn next_message(&mut self) -> Result<Option<RpcMessage>, FrameError> {
        match self.next_frame()? {
            None => Ok(None),
            Some(frame) => self.codec.decode_message(&frame).map(Some),
        }
    }
}
