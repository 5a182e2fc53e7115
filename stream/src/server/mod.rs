//! The server-side of the transport.
//!
//! - [RpcServer]: listeners, per-connection reader and writer tasks, registration
//! - [ServiceProvider]: the table of published services
//! - [WorkerPool]: the bounded queue and the tasks running invocations

pub use kestrel_rpc_core::ServerConfig;

mod provider;
pub use provider::{service_fn, RpcService, ServiceFn, ServiceProvider};

mod dispatch;
pub use dispatch::{Job, RespNoti, WorkerPool};

mod server;
pub use server::{local_host_addr, RpcServer};
