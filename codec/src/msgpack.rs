use kestrel_rpc_core::codec::{CodecError, Serializer};
use kestrel_rpc_core::message::{BodyShape, MessageBody};

/// MessagePack with named struct fields
#[derive(Default)]
pub struct MsgpSerializer();

impl MsgpSerializer {
    pub const NAME: &'static str = "msgpack";
    pub const ID: u8 = 1;
}

impl Serializer for MsgpSerializer {
    fn serialize(&self, body: &MessageBody) -> Result<Vec<u8>, CodecError> {
        let r = match body {
            MessageBody::Empty => return Ok(Vec::new()),
            MessageBody::Request(req) => rmp_serde::encode::to_vec_named(req),
            MessageBody::Response(resp) => rmp_serde::encode::to_vec_named(resp),
        };
        r.map_err(|e| {
            log::error!("encode error: {:?}", e);
            CodecError(e.to_string())
        })
    }

    fn deserialize(&self, buf: &[u8], shape: BodyShape) -> Result<MessageBody, CodecError> {
        let r = match shape {
            BodyShape::Request => rmp_serde::decode::from_slice(buf).map(MessageBody::Request),
            BodyShape::Response => rmp_serde::decode::from_slice(buf).map(MessageBody::Response),
        };
        r.map_err(|e| {
            log::warn!("decode error: {:?}", e);
            CodecError(e.to_string())
        })
    }
}
