use std::net::IpAddr;
use std::time::Duration;

/// 8 MiB
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

pub const DEFAULT_SERVER_PORT: u16 = 9998;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Default timeout of a call waiting for its response, can be overridden per call
    pub task_timeout: Duration,
    /// connect timeout
    pub connect_timeout: Duration,
    /// Socket write timeout
    pub write_timeout: Duration,
    /// Send a ping when nothing was written to the connection for this long.
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    pub max_frame_len: usize,
    /// Name of the serializer extension used for requests
    pub serializer: String,
    /// Name of the compressor extension used for requests
    pub compressor: String,
    /// Name of the load balance extension
    pub balancer: String,
    /// Name of the service discovery extension
    pub discovery: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            serializer: "msgpack".to_string(),
            compressor: "gzip".to_string(),
            balancer: "random".to_string(),
            discovery: "local".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind, `None` for the address the machine hostname resolves to
    pub host: Option<IpAddr>,
    pub port: u16,
    /// Size of the worker pool running service invocations, 0 for twice the cpu count
    pub worker_count: usize,
    /// How many decoded requests may wait for a worker before the server answers overloaded
    pub worker_queue: usize,
    /// Socket idle time to be close.
    pub idle_timeout: Duration,
    /// Socket write timeout
    pub write_timeout: Duration,
    /// listen backlog
    pub backlog: u32,
    pub max_frame_len: usize,
    /// How long close() waits for open connections to finish
    pub server_close_wait: Duration,
    /// Name of the registration extension to announce published services, `None` to skip.
    pub registration: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SERVER_PORT,
            worker_count: 0,
            worker_queue: 1024,
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            backlog: 128,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            server_close_wait: Duration::from_secs(10),
            registration: Some("local".to_string()),
        }
    }
}

impl ServerConfig {
    pub fn worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        cpus * 2
    }
}

/// The machine hostname, resolved to the default bind address by the server
pub fn local_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => name.into_string().ok(),
        Err(e) => {
            log::warn!("gethostname failed: {}", e);
            None
        }
    }
}
