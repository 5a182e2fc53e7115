use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const RPC_ERR_PREFIX: &'static str = "rpc_";

/// "rpc_" prefix is reserved for internal error
///
/// NOTE Retriable error: RpcIntErr as u8 < RpcIntErr::Method
#[derive(
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    PartialEq,
    Eq,
    PartialOrd,
    Clone,
    Copy,
    thiserror::Error,
)]
#[repr(u8)]
pub enum RpcIntErr {
    /// Ping or connect error
    #[strum(serialize = "rpc_unreachable")]
    Unreachable = 0,
    /// IO error
    #[strum(serialize = "rpc_io_err")]
    IO = 1,
    /// Task timeout
    #[strum(serialize = "rpc_timeout")]
    Timeout = 2,
    /// The connection is closed, or closed while the call was pending
    #[strum(serialize = "rpc_closed")]
    Closed = 3,
    /// Discovery returned no endpoint for the service
    #[strum(serialize = "rpc_no_instance")]
    NoInstance = 4,
    /// Discovery backend unavailable
    #[strum(serialize = "rpc_discovery")]
    Discovery = 5,
    /// Server worker queue is full
    #[strum(serialize = "rpc_overloaded")]
    Overloaded = 6,
    /// Method not found
    #[strum(serialize = "rpc_method_notfound")]
    Method = 7,
    /// service notfound
    #[strum(serialize = "rpc_service_notfound")]
    Service = 8,
    /// The service implementation returned an error
    #[strum(serialize = "rpc_invocation")]
    Invocation = 9,
    /// Encode Error
    #[strum(serialize = "rpc_encode")]
    Encode = 10,
    /// Decode Error
    #[strum(serialize = "rpc_decode")]
    Decode = 11,
    /// Bad magic number, bad frame length or unknown message type
    #[strum(serialize = "rpc_protocol")]
    Protocol = 12,
    /// invalid version number in rpc header
    #[strum(serialize = "rpc_invalid_ver")]
    Version = 13,
    /// No extension registered under the name
    #[strum(serialize = "rpc_extension_notfound")]
    Extension = 14,
    /// Internal error
    #[strum(serialize = "rpc_internal_err")]
    Internal = 15,
}

// The default Debug derive just ignore strum customized string, by strum only have a Display derive
impl fmt::Debug for RpcIntErr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl RpcIntErr {
    #[inline]
    pub fn as_bytes<'a>(&'a self) -> &'a [u8] {
        self.as_ref().as_bytes()
    }

    /// Whether the call might succeed on another connection or a later attempt.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        *self < Self::Method
    }
}

impl From<std::io::Error> for RpcIntErr {
    #[inline(always)]
    fn from(_e: std::io::Error) -> Self {
        Self::IO
    }
}

/// The failure descriptor carried in a response frame.
///
/// `code` is the string form of a [RpcIntErr], so the client can parse the kind back.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RpcFault {
    pub code: String,
    pub message: String,
}

impl RpcFault {
    #[inline]
    pub fn new(kind: RpcIntErr, message: impl Into<String>) -> Self {
        Self { code: kind.as_ref().to_string(), message: message.into() }
    }

    /// Codes without the reserved prefix, or unknown to this version, count as invocation failure.
    pub fn kind(&self) -> RpcIntErr {
        if self.code.starts_with(RPC_ERR_PREFIX) {
            if let Ok(kind) = RpcIntErr::from_str(&self.code) {
                return kind;
            }
        }
        RpcIntErr::Invocation
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl fmt::Debug for RpcFault {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The kinds of extension the registry can resolve.
#[derive(strum::Display, strum::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum ExtensionKind {
    Serializer,
    Compressor,
    LoadBalance,
    ServiceDiscovery,
    ServiceRegistration,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("no {kind} extension named {name:?}")]
    NotFound { kind: ExtensionKind, name: String },
    #[error("no {kind} extension with wire id {id}")]
    UnknownId { kind: ExtensionKind, id: u8 },
}

/// Returned by a discovery or registration backend that cannot be reached.
///
/// An empty lookup result is not an error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("discovery backend unavailable: {0}")]
pub struct DiscoveryError(pub String);

/// Error returned by a service implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("method {0:?} not found")]
    NoMethod(String),
    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    pub fn into_fault(self) -> RpcFault {
        match self {
            Self::NoMethod(_) => RpcFault::new(RpcIntErr::Method, self.to_string()),
            Self::Failed(msg) => RpcFault::new(RpcIntErr::Invocation, msg),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    #[inline]
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(format!("bad params: {}", e))
    }
}

/// The error a caller sees.
#[derive(thiserror::Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("{0}")]
    Rpc(#[from] RpcIntErr),
    /// The server answered with a failure descriptor
    #[error("remote {0}")]
    Remote(RpcFault),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("rpc_discovery: {0}")]
    Discovery(String),
}

impl RpcError {
    pub fn kind(&self) -> RpcIntErr {
        match self {
            Self::Rpc(e) => *e,
            Self::Remote(f) => f.kind(),
            Self::Extension(_) => RpcIntErr::Extension,
            Self::Discovery(_) => RpcIntErr::Discovery,
        }
    }
}

impl fmt::Debug for RpcError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::cmp::PartialEq<RpcIntErr> for RpcError {
    #[inline]
    fn eq(&self, other: &RpcIntErr) -> bool {
        self.kind() == *other
    }
}

impl From<DiscoveryError> for RpcError {
    #[inline]
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e.0)
    }
}

impl From<RpcFault> for RpcError {
    #[inline]
    fn from(f: RpcFault) -> Self {
        Self::Remote(f)
    }
}
