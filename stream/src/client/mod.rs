//! The module contains the client-side of the transport.
//!
//! - [ClientStream]: one connection, correlating responses to calls by request id
//! - [RpcClient]: discovery, load balancing and a connection per endpoint
//! - [ServiceProxy]: a call-site stub bound to one service key

pub use kestrel_rpc_core::ClientConfig;

mod pending;
pub use pending::{CallResult, PendingCalls};
mod stream;
pub use stream::ClientStream;
mod proxy;
pub use proxy::ServiceProxy;

use captains_log::LogFilter;
use kestrel_rpc_core::balance::LoadBalance;
use kestrel_rpc_core::error::RpcError;
use kestrel_rpc_core::extension::Extensions;
use kestrel_rpc_core::message::RpcRequest;
use kestrel_rpc_core::registry::ServiceDiscovery;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// The caller-facing transport.
///
/// Every call looks up the endpoints of its service, lets the balancer pick one, then invokes
/// on the cached connection to that endpoint. A closed connection is replaced on the next call.
pub struct RpcClient {
    config: ClientConfig,
    ext: Arc<Extensions>,
    discovery: Arc<dyn ServiceDiscovery>,
    balancer: Arc<dyn LoadBalance>,
    conns: Mutex<FxHashMap<SocketAddr, Arc<ClientStream>>>,
    logger: Arc<LogFilter>,
}

impl RpcClient {
    /// Resolve the discovery and balancer extensions named in `config`.
    ///
    /// Serializer and compressor are resolved on the first connection.
    pub fn new(config: ClientConfig, ext: Arc<Extensions>) -> Result<Self, RpcError> {
        let discovery = ext.discovery(&config.discovery)?;
        let balancer = ext.balancer(&config.balancer)?;
        Ok(Self {
            config,
            ext,
            discovery,
            balancer,
            conns: Mutex::new(FxHashMap::default()),
            logger: Arc::new(LogFilter::new()),
        })
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.logger.set_level(level);
    }

    #[inline]
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call with the default `task_timeout` of the config
    #[inline]
    pub async fn send_request(&self, req: RpcRequest) -> Result<Value, RpcError> {
        self.send_request_timeout(req, self.config.task_timeout).await
    }

    pub async fn send_request_timeout(&self, req: RpcRequest, task_timeout: Duration) -> Result<Value, RpcError> {
        let service_key = req.service_name();
        let addrs = self.discovery.lookup(&service_key).await?;
        let addr = self.balancer.select(&addrs, &service_key)?;
        let conn = self.get_conn(addr).await?;
        logger_trace!(self.logger, "{:?} call {}.{} on {}", self, service_key, req.method, addr);
        let resp = conn.invoke(req, task_timeout).await?;
        resp.result.map_err(RpcError::Remote)
    }

    /// The live connection to `addr`, connecting if there is none.
    pub async fn get_conn(&self, addr: SocketAddr) -> Result<Arc<ClientStream>, RpcError> {
        let cached = self.conns.lock().get(&addr).cloned();
        if let Some(conn) = cached {
            if !conn.is_closed() {
                return Ok(conn);
            }
        }
        let conn = ClientStream::connect(addr, &self.config, self.ext.clone(), self.logger.clone()).await?;
        let conn = Arc::new(conn);
        let mut conns = self.conns.lock();
        // Keep the one another call may have connected meanwhile
        if let Some(exists) = conns.get(&addr) {
            if !exists.is_closed() {
                return Ok(exists.clone());
            }
        }
        conns.retain(|_, c| !c.is_closed());
        conns.insert(addr, conn.clone());
        Ok(conn)
    }

    /// Close every cached connection, calls in flight fail with `rpc_closed`
    pub fn close(&self) {
        let conns = std::mem::take(&mut *self.conns.lock());
        logger_debug!(self.logger, "{:?} close {} connections", self, conns.len());
        for conn in conns.values() {
            conn.close();
        }
    }

    /// Connections currently cached, closed ones are dropped from the cache
    pub fn conn_count(&self) -> usize {
        let mut conns = self.conns.lock();
        conns.retain(|_, c| !c.is_closed());
        conns.len()
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RpcClient")
    }
}
