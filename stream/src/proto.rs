use kestrel_rpc_core::message::{MessageBody, RpcRequest, RpcResponse};
use std::fmt;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub const RPC_MAGIC: [u8; 4] = *b"grpc";
pub const RPC_VERSION: u8 = 1;

/// Frame:
///
/// Fixed len of FrameHead = 16B, all integers big-endian
/// | 4B   | 1B | 4B       | 1B      | 1B    | 1B       | 4B        |
/// | magic| ver| full_len | msg_type| codec | compress | request_id|
///
/// followed by `full_len - 16` bytes of body, absent for heartbeats.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, PartialEq, Clone, Copy)]
#[repr(C)]
pub struct FrameHead {
    pub magic: [u8; 4],
    pub ver: u8,
    /// header + body
    pub full_len: U32<BigEndian>,
    pub msg_type: u8,
    /// serializer id
    pub codec: u8,
    /// compressor id
    pub compress: u8,
    pub request_id: U32<BigEndian>,
}

pub const RPC_HEAD_LEN: usize = std::mem::size_of::<FrameHead>();

/// The prefix the frame length can be read from
pub const RPC_LEN_FIELD_END: usize = 9;

impl FrameHead {
    #[inline]
    pub fn new(msg_type: MessageType, codec: u8, compress: u8, request_id: u32, full_len: u32) -> Self {
        Self {
            magic: RPC_MAGIC,
            ver: RPC_VERSION,
            full_len: U32::new(full_len),
            msg_type: msg_type as u8,
            codec,
            compress,
            request_id: U32::new(request_id),
        }
    }

    /// `buf` must hold at least [RPC_HEAD_LEN] bytes
    #[inline]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from_prefix(buf)
    }

    #[inline(always)]
    pub fn full_len(&self) -> usize {
        self.full_len.get() as usize
    }

    #[inline(always)]
    pub fn request_id(&self) -> u32 {
        self.request_id.get()
    }
}

impl fmt::Display for FrameHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[type:{}, id:{}, len:{}, codec:{}, compress:{}]",
            self.msg_type,
            self.request_id.get(),
            self.full_len.get(),
            self.codec,
            self.compress
        )
    }
}

impl fmt::Debug for FrameHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    Ping = 3,
    Pong = 4,
}

impl MessageType {
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            _ => Err(v),
        }
    }
}

/// One frame on the wire, before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    pub msg_type: MessageType,
    pub codec: u8,
    pub compress: u8,
    pub request_id: u32,
    pub body: MessageBody,
}

impl RpcMessage {
    #[inline]
    pub fn request(codec: u8, compress: u8, request_id: u32, req: RpcRequest) -> Self {
        Self { msg_type: MessageType::Request, codec, compress, request_id, body: MessageBody::Request(req) }
    }

    #[inline]
    pub fn response(codec: u8, compress: u8, resp: RpcResponse) -> Self {
        Self {
            msg_type: MessageType::Response,
            codec,
            compress,
            request_id: resp.request_id,
            body: MessageBody::Response(resp),
        }
    }

    #[inline]
    pub fn ping(codec: u8, compress: u8, request_id: u32) -> Self {
        Self { msg_type: MessageType::Ping, codec, compress, request_id, body: MessageBody::Empty }
    }

    /// Echo the request id of the ping
    #[inline]
    pub fn pong(ping: &RpcMessage) -> Self {
        Self {
            msg_type: MessageType::Pong,
            codec: ping.codec,
            compress: ping.compress,
            request_id: ping.request_id,
            body: MessageBody::Empty,
        }
    }
}

impl fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.msg_type, self.request_id)
    }
}
