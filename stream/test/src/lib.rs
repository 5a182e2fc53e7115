extern crate kestrel_rpc_stream;


extern crate captains_log;
extern crate log;
pub use captains_log::logfn;

use captains_log::*;
use kestrel_rpc_core::extension::Extensions;
use kestrel_rpc_core::message::ServiceKey;
use kestrel_rpc_stream::client::{ClientConfig, RpcClient};
use kestrel_rpc_stream::server::{RpcServer, ServerConfig};
use rstest::*;
use service::HelloService;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

pub struct TestRunner {
    rt: Runtime,
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/rpc_test.log", Level::Trace).test().build().expect("log");
        Self {
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(8)
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    pub fn block_on<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        self.rt.block_on(f);
    }
}

pub fn hello_key() -> ServiceKey {
    ServiceKey::new("Hello", "test1", "version1")
}

/// A server on an ephemeral port of 127.0.0.1, with [HelloService] published under
/// [hello_key] and announced to the `local` registration of `ext`.
pub async fn init_server(
    config: ServerConfig, ext: Arc<Extensions>,
) -> (RpcServer, Arc<HelloService>, SocketAddr) {
    let mut server = RpcServer::new(config, ext).expect("new server");
    let hello = Arc::new(HelloService::default());
    server.publish(hello.clone(), &hello_key()).await.expect("publish");
    let addr = server.listen_on("127.0.0.1:0".parse().unwrap()).await.expect("server listen");
    log::debug!("server listening on {}", addr);
    (server, hello, addr)
}

pub fn init_client(config: ClientConfig, ext: Arc<Extensions>) -> Arc<RpcClient> {
    Arc::new(RpcClient::new(config, ext).expect("new client"))
}

#[cfg(test)]
pub mod tests;
