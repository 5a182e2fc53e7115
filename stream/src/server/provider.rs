use futures::future::BoxFuture;
use kestrel_rpc_core::error::{RpcIntErr, ServiceError};
use kestrel_rpc_core::message::ServiceKey;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A service implementation published on the server.
///
/// # Example
///
/// ```rust
/// use futures::future::BoxFuture;
/// use kestrel_rpc_core::error::ServiceError;
/// use kestrel_rpc_stream::server::RpcService;
/// use serde_json::{json, Value};
///
/// struct Hello;
///
/// impl RpcService for Hello {
///     fn invoke<'a>(&'a self, method: &'a str, params: Vec<Value>) -> BoxFuture<'a, Result<Value, ServiceError>> {
///         Box::pin(async move {
///             match method {
///                 "hello" => Ok(json!(format!("Hello {}", params[0]))),
///                 _ => Err(ServiceError::NoMethod(method.to_string())),
///             }
///         })
///     }
/// }
/// ```
pub trait RpcService: Send + Sync + 'static {
    fn invoke<'a>(&'a self, method: &'a str, params: Vec<Value>) -> BoxFuture<'a, Result<Value, ServiceError>>;
}

/// Wraps a closure `(method, params) -> future` as a service.
pub struct ServiceFn<H>(H);

/// Build a service from a closure, convenient for small services and tests
pub fn service_fn<H, F>(handler: H) -> ServiceFn<H>
where
    H: Fn(String, Vec<Value>) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    ServiceFn(handler)
}

impl<H, F> RpcService for ServiceFn<H>
where
    H: Fn(String, Vec<Value>) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    #[inline]
    fn invoke<'a>(&'a self, method: &'a str, params: Vec<Value>) -> BoxFuture<'a, Result<Value, ServiceError>> {
        Box::pin((self.0)(method.to_string(), params))
    }
}

/// Service key -> local implementation. Publishing a key twice replaces the implementation.
#[derive(Default)]
pub struct ServiceProvider {
    services: RwLock<FxHashMap<String, Arc<dyn RpcService>>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key the service is published under
    pub fn publish(&self, service: Arc<dyn RpcService>, key: &ServiceKey) -> String {
        let name = key.to_string();
        if self.services.write().insert(name.clone(), service).is_some() {
            log::info!("service {} is replaced", name);
        } else {
            log::info!("service {} is published", name);
        }
        name
    }

    pub fn get(&self, service_key: &str) -> Result<Arc<dyn RpcService>, RpcIntErr> {
        match self.services.read().get(service_key) {
            Some(s) => Ok(s.clone()),
            None => Err(RpcIntErr::Service),
        }
    }

    pub fn service_keys(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
