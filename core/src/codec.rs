use crate::message::{BodyShape, MessageBody};
use std::io;

/// Error from a serializer, the message goes to logs and the failure kind is Encode or Decode
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Turns a message body into bytes and back.
///
/// The serializer is shared by all connections, if need changing (like setting up cipher),
/// should have inner mutablilty
pub trait Serializer: Send + Sync + 'static {
    /// Serialize a request or response body. `MessageBody::Empty` encodes to nothing.
    fn serialize(&self, body: &MessageBody) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, buf: &[u8], shape: BodyShape) -> Result<MessageBody, CodecError>;
}

/// Compress the serialized body
pub trait Compressor: Send + Sync + 'static {
    fn compress(&self, buf: &[u8]) -> io::Result<Vec<u8>>;

    fn decompress(&self, buf: &[u8]) -> io::Result<Vec<u8>>;
}
