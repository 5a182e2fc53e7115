use kestrel_rpc_core::codec::{CodecError, Serializer};
use kestrel_rpc_core::message::{BodyShape, MessageBody};

#[derive(Default)]
pub struct JsonSerializer();

impl JsonSerializer {
    pub const NAME: &'static str = "json";
    pub const ID: u8 = 2;
}

impl Serializer for JsonSerializer {
    fn serialize(&self, body: &MessageBody) -> Result<Vec<u8>, CodecError> {
        let r = match body {
            MessageBody::Empty => return Ok(Vec::new()),
            MessageBody::Request(req) => serde_json::to_vec(req),
            MessageBody::Response(resp) => serde_json::to_vec(resp),
        };
        r.map_err(|e| {
            log::error!("encode error: {:?}", e);
            CodecError(e.to_string())
        })
    }

    fn deserialize(&self, buf: &[u8], shape: BodyShape) -> Result<MessageBody, CodecError> {
        let r = match shape {
            BodyShape::Request => serde_json::from_slice(buf).map(MessageBody::Request),
            BodyShape::Response => serde_json::from_slice(buf).map(MessageBody::Response),
        };
        r.map_err(|e| {
            log::warn!("decode error: {:?}", e);
            CodecError(e.to_string())
        })
    }
}
