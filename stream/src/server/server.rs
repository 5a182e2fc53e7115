use super::dispatch::{Job, RespNoti, WorkerPool};
use super::provider::{RpcService, ServiceProvider};
use crate::frame::{FrameDecoder, WireCodec};
use crate::proto::{MessageType, RpcMessage};
use bytes::BytesMut;
use captains_log::LogFilter;
use crossfire::*;
use futures::future::{AbortHandle, Abortable};
use kestrel_rpc_core::error::{RpcError, RpcFault, RpcIntErr};
use kestrel_rpc_core::extension::Extensions;
use kestrel_rpc_core::message::{MessageBody, RpcRequest, RpcResponse, ServiceKey};
use kestrel_rpc_core::registry::ServiceRegistration;
use kestrel_rpc_core::{local_hostname, ServerConfig};
use nix::sys::socket::{setsockopt, sockopt};
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

/// An RpcServer that listen, accept, and serve connections.
///
/// Each connection has a reader task and a writer task. The reader answers pings directly and
/// queues requests to the shared [WorkerPool]. The writer batches the responses.
pub struct RpcServer {
    config: ServerConfig,
    ext: Arc<Extensions>,
    provider: Arc<ServiceProvider>,
    workers: WorkerPool,
    registration: Option<Arc<dyn ServiceRegistration>>,
    /// The first address listened on, announced to the registration backend
    local_addr: Option<SocketAddr>,
    /// Service keys announced at `local_addr`
    registered: Mutex<Vec<String>>,
    listeners_abort: Vec<(AbortHandle, String)>,
    logger: Arc<LogFilter>,
    conn_ref_count: Arc<()>,
    server_close_tx: Mutex<Option<MTx<()>>>,
    server_close_rx: MAsyncRx<()>,
}

impl RpcServer {
    /// Must be called within a tokio runtime, the worker pool is spawned here.
    pub fn new(config: ServerConfig, ext: Arc<Extensions>) -> Result<Self, RpcError> {
        let registration = match config.registration.as_deref() {
            Some(name) => Some(ext.registration(name)?),
            None => None,
        };
        let provider = Arc::new(ServiceProvider::new());
        let workers = WorkerPool::new(provider.clone(), config.worker_count(), config.worker_queue);
        let (tx, rx) = mpmc::unbounded_async();
        Ok(Self {
            config,
            ext,
            provider,
            workers,
            registration,
            local_addr: None,
            registered: Mutex::new(Vec::new()),
            listeners_abort: Vec::new(),
            logger: Arc::new(LogFilter::new()),
            conn_ref_count: Arc::new(()),
            server_close_tx: Mutex::new(Some(tx)),
            server_close_rx: rx,
        })
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.logger.set_level(level);
    }

    #[inline]
    pub fn get_config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Publish a service. Once the server listens, the service is also announced to the
    /// registration backend.
    pub async fn publish(&self, service: Arc<dyn RpcService>, key: &ServiceKey) -> Result<(), RpcError> {
        let name = self.provider.publish(service, key);
        if let Some(addr) = self.local_addr {
            self.register(name, addr).await?;
        }
        Ok(())
    }

    async fn register(&self, name: String, addr: SocketAddr) -> Result<(), RpcError> {
        let Some(registration) = self.registration.as_ref() else {
            return Ok(());
        };
        if self.registered.lock().contains(&name) {
            return Ok(());
        }
        registration.register(&name, addr).await?;
        logger_info!(self.logger, "service {} registered at {}", name, addr);
        self.registered.lock().push(name);
        Ok(())
    }

    /// Listen on the host and port of the config
    pub async fn listen(&mut self) -> io::Result<SocketAddr> {
        let host = match self.config.host {
            Some(host) => host,
            None => local_host_addr().await,
        };
        self.listen_on(SocketAddr::new(host, self.config.port)).await
    }

    /// Listen on `addr`, port 0 picks a free port. Returns the bound address.
    ///
    /// The first listener announces the published services before accepting. If an
    /// announcement fails, the ones already made are withdrawn and nothing is left listening.
    pub async fn listen_on(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        let listener = match bind_listener(addr, self.config.backlog) {
            Ok(l) => l,
            Err(e) => {
                log::error!("bind addr {:?} err: {}", addr, e);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;
        if self.local_addr.is_none() {
            if let Err(e) = self.register_all(local_addr).await {
                logger_error!(self.logger, "register on {} err: {}", local_addr, e);
                return Err(io::Error::new(io::ErrorKind::Other, e.to_string()));
            }
            self.local_addr = Some(local_addr);
        }
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let listener_info = format!("listener {}", local_addr);
        let ctx = ConnCtx {
            codec: WireCodec::new(self.ext.clone(), self.config.max_frame_len),
            workers: self.workers.clone(),
            idle_timeout: self.config.idle_timeout,
            write_timeout: self.config.write_timeout,
            server_close_rx: self.server_close_rx.clone(),
            conn_ref_count: Arc::downgrade(&self.conn_ref_count),
            logger: self.logger.clone(),
        };
        logger_debug!(self.logger, "listening on {}", local_addr);
        let abrt = Abortable::new(
            async move {
                loop {
                    match listener.accept().await {
                        Err(e) => {
                            log::warn!("{} accept error: {}", local_addr, e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Ok((stream, peer)) => ctx.serve_conn(stream, peer, local_addr),
                    }
                }
            },
            abort_registration,
        );
        tokio::spawn(abrt);
        self.listeners_abort.push((abort_handle, listener_info));
        Ok(local_addr)
    }

    /// Announce every published service at `addr`, all or nothing
    async fn register_all(&self, addr: SocketAddr) -> Result<(), RpcError> {
        for name in self.provider.service_keys() {
            if let Err(e) = self.register(name, addr).await {
                self.unregister_all(addr).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn unregister_all(&self, addr: SocketAddr) {
        let Some(registration) = self.registration.as_ref() else {
            return;
        };
        let names = std::mem::take(&mut *self.registered.lock());
        for name in names {
            if let Err(e) = registration.unregister(&name, addr).await {
                logger_warn!(self.logger, "unregister {} err: {}", name, e);
            }
        }
    }

    #[inline]
    pub fn get_alive_conn(&self) -> usize {
        Arc::strong_count(&self.conn_ref_count) - 1
    }

    /// Gracefully close the server
    ///
    /// Steps:
    /// - listeners task is abort
    /// - the registered services are unregistered
    /// - drop the close channel to notify connection readers.
    /// - the writers exit after all the reference of RespNoti channel drop to 0
    /// - wait for connections to exit with a timeout defined by
    /// ServerConfig.server_close_wait
    pub async fn close(&mut self) {
        for h in &self.listeners_abort {
            h.0.abort();
            logger_info!(self.logger, "{} has closed", h.1);
        }
        self.listeners_abort.clear();
        if let Some(addr) = self.local_addr {
            self.unregister_all(addr).await;
        }
        // Notify all reader connection exit, then the reader will notify writer
        let _ = self.server_close_tx.lock().take();

        let mut exists_count = self.get_alive_conn();
        let start_ts = Instant::now();
        while exists_count > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            exists_count = self.get_alive_conn();
            if Instant::now().duration_since(start_ts) > self.config.server_close_wait {
                logger_warn!(
                    self.logger,
                    "closed as wait too long for all conn closed voluntarily({} conn left)",
                    exists_count,
                );
                break;
            }
        }
        logger_info!(self.logger, "server closed with alive conn {}", exists_count);
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// The machine hostname resolved to an address, IPv4 preferred, loopback when unresolvable.
pub async fn local_host_addr() -> IpAddr {
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let Some(name) = local_hostname() else {
        return loopback;
    };
    let resolved = match tokio::net::lookup_host((name.as_str(), 0u16)).await {
        Ok(addrs) => {
            let mut first = None;
            for addr in addrs {
                if addr.is_ipv4() {
                    return addr.ip();
                }
                first.get_or_insert(addr.ip());
            }
            first.unwrap_or(loopback)
        }
        Err(e) => {
            log::warn!("cannot resolve hostname {}: {}", name, e);
            loopback
        }
    };
    resolved
}

/// Let the kernel detect half-open peers
fn set_keepalive(stream: &TcpStream) -> nix::Result<()> {
    setsockopt(stream, sockopt::KeepAlive, &true)
}

/// What every connection of one listener shares
#[derive(Clone)]
struct ConnCtx {
    codec: WireCodec,
    workers: WorkerPool,
    idle_timeout: Duration,
    write_timeout: Duration,
    server_close_rx: MAsyncRx<()>,
    /// Only connection writers hold a strong reference
    conn_ref_count: Weak<()>,
    logger: Arc<LogFilter>,
}

impl ConnCtx {
    fn serve_conn(&self, stream: TcpStream, peer: SocketAddr, local: SocketAddr) {
        let Some(conn_ref) = self.conn_ref_count.upgrade() else {
            // The server is gone
            return;
        };
        if let Err(e) = stream.set_nodelay(true) {
            logger_warn!(self.logger, "set_nodelay for {} err: {}", peer, e);
        }
        if let Err(e) = set_keepalive(&stream) {
            logger_warn!(self.logger, "set keepalive for {} err: {}", peer, e);
        }
        let conn_id = format!("{}<-{}", local, peer);
        logger_debug!(self.logger, "server({}) accepted", conn_id);
        let (reader, writer) = stream.into_split();
        let (done_tx, done_rx) = mpsc::unbounded_async();
        let reader = Reader {
            conn_id: conn_id.clone(),
            reader,
            decoder: FrameDecoder::new(self.codec.clone()),
            noti: RespNoti::new(done_tx),
            workers: self.workers.clone(),
            idle_timeout: self.idle_timeout,
            server_close_rx: self.server_close_rx.clone(),
            logger: self.logger.clone(),
        };
        tokio::spawn(async move { reader.run().await });
        let writer = Writer {
            conn_id,
            writer,
            done_rx,
            codec: self.codec.clone(),
            write_timeout: self.write_timeout,
            logger: self.logger.clone(),
            _conn_ref: conn_ref,
        };
        tokio::spawn(async move { writer.run().await });
    }
}

struct Reader {
    conn_id: String,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    noti: RespNoti,
    workers: WorkerPool,
    idle_timeout: Duration,
    server_close_rx: MAsyncRx<()>,
    logger: Arc<LogFilter>,
}

impl Reader {
    async fn run(mut self) {
        loop {
            loop {
                match self.decoder.next_message() {
                    Ok(Some(msg)) => {
                        if self.handle(msg).is_err() {
                            logger_warn!(self.logger, "server({}) reader abort due to writer has err", self.conn_id);
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        logger_warn!(self.logger, "server({}) decode err, close: {}", self.conn_id, e);
                        return;
                    }
                }
            }
            self.decoder.buffer_mut().reserve(4096);
            tokio::select! {
                r = timeout(self.idle_timeout, self.reader.read_buf(self.decoder.buffer_mut())) => match r {
                    Err(_) => {
                        logger_info!(self.logger, "server({}) idle for {:?}, close", self.conn_id, self.idle_timeout);
                        return;
                    }
                    Ok(Ok(0)) => {
                        logger_debug!(self.logger, "server({}) closed by peer", self.conn_id);
                        return;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        logger_debug!(self.logger, "server({}) read err: {}", self.conn_id, e);
                        return;
                    }
                },
                _ = self.server_close_rx.recv() => {
                    logger_trace!(self.logger, "server({}) reader exits on server close", self.conn_id);
                    return;
                }
            }
        }
    }

    fn handle(&self, msg: RpcMessage) -> Result<(), ()> {
        match msg.msg_type {
            MessageType::Ping => {
                logger_trace!(self.logger, "server({}) ping {}", self.conn_id, msg.request_id);
                self.noti.send(RpcMessage::pong(&msg))
            }
            MessageType::Request => {
                let MessageBody::Request(req) = msg.body else {
                    return Ok(());
                };
                self.submit(msg.request_id, msg.codec, msg.compress, req);
                Ok(())
            }
            MessageType::Response | MessageType::Pong => {
                logger_trace!(self.logger, "server({}) ignore {}", self.conn_id, msg);
                Ok(())
            }
        }
    }

    fn submit(&self, request_id: u32, codec: u8, compress: u8, req: RpcRequest) {
        let job = Job { request_id, codec, compress, req, noti: self.noti.clone() };
        if let Err(job) = self.workers.try_submit(job) {
            logger_warn!(self.logger, "server({}) worker queue full, reject request {}", self.conn_id, request_id);
            let message = format!("worker queue of {} is full", self.workers.queue_size());
            job.reject(RpcIntErr::Overloaded, &message);
        }
    }
}

struct Writer {
    conn_id: String,
    writer: OwnedWriteHalf,
    done_rx: AsyncRx<RpcMessage>,
    codec: WireCodec,
    write_timeout: Duration,
    logger: Arc<LogFilter>,
    _conn_ref: Arc<()>,
}

impl Writer {
    async fn run(mut self) {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        while let Ok(msg) = self.done_rx.recv().await {
            self.encode(&msg, &mut buf);
            while let Ok(msg) = self.done_rx.try_recv() {
                self.encode(&msg, &mut buf);
            }
            if buf.is_empty() {
                continue;
            }
            let r = timeout(self.write_timeout, async {
                self.writer.write_all(&buf).await?;
                self.writer.flush().await
            })
            .await;
            buf.clear();
            match r {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    logger_warn!(self.logger, "server({}) write err: {}", self.conn_id, e);
                    break;
                }
                Err(_) => {
                    logger_warn!(self.logger, "server({}) write timeout", self.conn_id);
                    break;
                }
            }
        }
        let _ = self.writer.shutdown().await;
        logger_trace!(self.logger, "server({}) writer exits", self.conn_id);
    }

    fn encode(&self, msg: &RpcMessage, buf: &mut BytesMut) {
        let Err(e) = self.codec.encode(msg, buf) else {
            return;
        };
        logger_error!(self.logger, "server({}) encode {} err: {}", self.conn_id, msg, e);
        if msg.msg_type != MessageType::Response {
            return;
        }
        // Tell the caller instead of letting it wait for the timeout
        let fault = RpcFault::new(RpcIntErr::Encode, e.to_string());
        let resp = RpcResponse::fault(msg.request_id, fault);
        if let Err(e) = self.codec.encode(&RpcMessage::response(msg.codec, msg.compress, resp), buf) {
            logger_error!(self.logger, "server({}) encode fault err: {}", self.conn_id, e);
        }
    }
}
