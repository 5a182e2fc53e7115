use crate::error::DiscoveryError;
use futures::future::BoxFuture;
use std::net::SocketAddr;

/// Map a service key to the endpoints currently serving it.
pub trait ServiceDiscovery: Send + Sync + 'static {
    /// An empty list means no instance is registered, an `Err` means the backend is unavailable.
    fn lookup<'a>(&'a self, service_key: &'a str) -> BoxFuture<'a, Result<Vec<SocketAddr>, DiscoveryError>>;
}

/// Announce the endpoint of a published service, the server side counterpart of [ServiceDiscovery].
pub trait ServiceRegistration: Send + Sync + 'static {
    fn register<'a>(&'a self, service_key: &'a str, addr: SocketAddr) -> BoxFuture<'a, Result<(), DiscoveryError>>;

    fn unregister<'a>(&'a self, service_key: &'a str, addr: SocketAddr) -> BoxFuture<'a, Result<(), DiscoveryError>>;
}
