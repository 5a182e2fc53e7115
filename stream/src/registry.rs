pub use kestrel_rpc_core::registry::{ServiceDiscovery, ServiceRegistration};
use futures::future::BoxFuture;
use kestrel_rpc_core::error::DiscoveryError;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;

/// In-process discovery backend, registered under the name `local`.
///
/// Servers and clients sharing one `Extensions` table see each other's registrations, which
/// covers single-process deployments and tests.
#[derive(Default)]
pub struct LocalRegistry {
    services: RwLock<FxHashMap<String, Vec<SocketAddr>>>,
}

impl LocalRegistry {
    pub const NAME: &'static str = "local";

    pub fn add(&self, service_key: &str, addr: SocketAddr) {
        let mut services = self.services.write();
        let addrs = services.entry(service_key.to_string()).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    pub fn remove(&self, service_key: &str, addr: SocketAddr) {
        let mut services = self.services.write();
        if let Some(addrs) = services.get_mut(service_key) {
            addrs.retain(|a| *a != addr);
            if addrs.is_empty() {
                services.remove(service_key);
            }
        }
    }

    pub fn get(&self, service_key: &str) -> Vec<SocketAddr> {
        self.services.read().get(service_key).cloned().unwrap_or_default()
    }
}

impl ServiceDiscovery for LocalRegistry {
    fn lookup<'a>(&'a self, service_key: &'a str) -> BoxFuture<'a, Result<Vec<SocketAddr>, DiscoveryError>> {
        Box::pin(async move { Ok(self.get(service_key)) })
    }
}

impl ServiceRegistration for LocalRegistry {
    fn register<'a>(&'a self, service_key: &'a str, addr: SocketAddr) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async move {
            self.add(service_key, addr);
            Ok(())
        })
    }

    fn unregister<'a>(&'a self, service_key: &'a str, addr: SocketAddr) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async move {
            self.remove(service_key, addr);
            Ok(())
        })
    }
}
