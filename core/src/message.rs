use crate::error::RpcFault;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The logical identity of a published service.
///
/// Rendered as `service + group + version`, which is the key for discovery, provider lookup
/// and per-service balancer state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ServiceKey {
    pub service: String,
    pub group: String,
    pub version: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, group: impl Into<String>, version: impl Into<String>) -> Self {
        Self { service: service.into(), group: group.into(), version: version.into() }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.service, self.group, self.version)
    }
}

/// The body of a request frame
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcRequest {
    pub service: String,
    pub group: String,
    pub version: String,
    pub method: String,
    pub param_types: Vec<String>,
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Parameter descriptors are derived from the json kind of each value.
    pub fn new(key: &ServiceKey, method: impl Into<String>, params: Vec<Value>) -> Self {
        let param_types = params.iter().map(|v| value_type(v).to_string()).collect();
        Self {
            service: key.service.clone(),
            group: key.group.clone(),
            version: key.version.clone(),
            method: method.into(),
            param_types,
            params,
        }
    }

    #[inline]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.service.as_str(), self.group.as_str(), self.version.as_str())
    }

    /// Same as `service_key().to_string()` without the intermediate clones
    #[inline]
    pub fn service_name(&self) -> String {
        format!("{}{}{}", self.service, self.group, self.version)
    }
}

fn value_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The body of a response frame, echoing the request id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RpcResponse {
    pub request_id: u32,
    pub result: Result<Value, RpcFault>,
}

impl RpcResponse {
    #[inline]
    pub fn ok(request_id: u32, value: Value) -> Self {
        Self { request_id, result: Ok(value) }
    }

    #[inline]
    pub fn fault(request_id: u32, fault: RpcFault) -> Self {
        Self { request_id, result: Err(fault) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    /// Heartbeats carry no body
    Empty,
    Request(RpcRequest),
    Response(RpcResponse),
}

/// What a serializer should decode a body into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyShape {
    Request,
    Response,
}
