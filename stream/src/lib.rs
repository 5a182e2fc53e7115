#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # kestrel-rpc-stream
//!
//! The TCP transport of `kestrel-rpc`: framing, the client that correlates responses to calls,
//! and the server that dispatches requests to published services.
//!
//! ## Components
//!
//! - [`kestrel-rpc-core`](https://docs.rs/kestrel-rpc-core): error types, config, messages and
//! the extension traits.
//! - [`kestrel-rpc-codec`](https://docs.rs/kestrel-rpc-codec): the `msgpack` and `json`
//! serializers, the `gzip` compressor.
//! - `kestrel-rpc-stream` (this crate): wire protocol, balancers, the local registry, client and server.
//!
//! ## Example
//!
//! ```no_run
//! use kestrel_rpc_core::message::ServiceKey;
//! use kestrel_rpc_stream::client::{ClientConfig, RpcClient, ServiceProxy};
//! use kestrel_rpc_stream::server::{service_fn, RpcServer, ServerConfig};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let ext = kestrel_rpc_stream::default_extensions();
//! let mut server = RpcServer::new(ServerConfig::default(), ext.clone()).unwrap();
//! let key = ServiceKey::new("Hello", "test1", "version1");
//! let hello = service_fn(|_method: String, params: Vec<Value>| async move {
//!     Ok(json!(format!("Hello {}", params[0])))
//! });
//! server.publish(Arc::new(hello), &key).await.unwrap();
//! server.listen().await.unwrap();
//!
//! let client = Arc::new(RpcClient::new(ClientConfig::default(), ext).unwrap());
//! let proxy = ServiceProxy::new(client, key);
//! let reply = proxy.call("hello", vec![json!("world")]).await.unwrap();
//! # }
//! ```

#[macro_use]
extern crate captains_log;

pub mod balance;
pub mod client;
pub mod frame;
pub mod proto;
pub mod registry;
pub mod server;
pub use kestrel_rpc_core::error;

use balance::{ConsistentHashLoadBalance, RandomLoadBalance, RoundRobinLoadBalance};
use kestrel_rpc_core::extension::{Extensions, ExtensionsBuilder};
use registry::LocalRegistry;
use std::sync::Arc;

/// All the built-in extensions, with a fresh [LocalRegistry] behind `local`.
pub fn default_extensions() -> Arc<Extensions> {
    default_extensions_with(Arc::new(LocalRegistry::default()))
}

/// All the built-in extensions, `local` discovery and registration both backed by `local`.
pub fn default_extensions_with(local: Arc<LocalRegistry>) -> Arc<Extensions> {
    let mut builder = ExtensionsBuilder::new();
    register_builtin(&mut builder, local);
    Arc::new(builder.build())
}

/// Fill `builder` with the built-in extensions, to be extended with custom ones before build.
pub fn register_builtin(builder: &mut ExtensionsBuilder, local: Arc<LocalRegistry>) {
    kestrel_rpc_codec::register_codecs(builder);
    builder
        .balancer(RandomLoadBalance::NAME, || Arc::new(RandomLoadBalance::default()))
        .balancer(RoundRobinLoadBalance::NAME, || Arc::new(RoundRobinLoadBalance::default()))
        .balancer(ConsistentHashLoadBalance::NAME, || Arc::new(ConsistentHashLoadBalance::default()));
    let discovery = local.clone();
    builder.discovery(LocalRegistry::NAME, move || discovery.clone());
    builder.registration(LocalRegistry::NAME, move || local.clone());
}
