use super::RpcClient;
use kestrel_rpc_core::error::{RpcError, RpcIntErr};
use kestrel_rpc_core::message::{RpcRequest, ServiceKey};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A call-site stub bound to one service.
///
/// # Example
///
/// ```no_run
/// # async fn demo(client: std::sync::Arc<kestrel_rpc_stream::client::RpcClient>) {
/// use kestrel_rpc_core::message::ServiceKey;
/// use kestrel_rpc_stream::client::ServiceProxy;
/// use serde_json::json;
///
/// let hello = ServiceProxy::new(client, ServiceKey::new("Hello", "test1", "version1"));
/// let reply: String = hello
///     .call_as("hello", vec![json!({"message": "111", "description": "222"})])
///     .await
///     .expect("call");
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceProxy {
    client: Arc<RpcClient>,
    key: ServiceKey,
    timeout: Option<Duration>,
}

impl ServiceProxy {
    pub fn new(client: Arc<RpcClient>, key: ServiceKey) -> Self {
        Self { client, key, timeout: None }
    }

    /// Override `task_timeout` of the client config for calls through this proxy
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = RpcRequest::new(&self.key, method, params);
        let timeout = self.timeout.unwrap_or(self.client.get_config().task_timeout);
        self.client.send_request_timeout(req, timeout).await
    }

    /// Decode the return value, a value of another shape fails with `rpc_decode`
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            log::warn!("{}.{} returns unexpected value: {}", self.key, method, e);
            RpcError::Rpc(RpcIntErr::Decode)
        })
    }
}
