//! [ClientStream] represents a client-side connection.
//!
//! Requests are encoded on the calling task and queued to a writer task, which batches the
//! queued frames into one write. A reader task decodes responses and resolves the matching
//! pending call. When either side fails, every pending call fails and the stream is closed.
//!
//! On Drop, both tasks exit and the connection is closed.

use super::pending::PendingCalls;
use crate::frame::{FrameDecoder, WireCodec};
use crate::proto::{MessageType, RpcMessage};
use bytes::{Bytes, BytesMut};
use captains_log::LogFilter;
use crossfire::*;
use kestrel_rpc_core::error::{RpcError, RpcIntErr};
use kestrel_rpc_core::extension::Extensions;
use kestrel_rpc_core::message::{MessageBody, RpcRequest, RpcResponse};
use kestrel_rpc_core::ClientConfig;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant, Interval, MissedTickBehavior};

/// One connection to a server.
pub struct ClientStream {
    close_tx: Mutex<Option<MTx<()>>>,
    inner: Arc<ClientStreamInner>,
}

impl ClientStream {
    /// Make a connection to the server, encoding requests with the serializer and compressor
    /// named in `config`.
    pub async fn connect(
        addr: SocketAddr, config: &ClientConfig, ext: Arc<Extensions>, logger: Arc<LogFilter>,
    ) -> Result<Self, RpcError> {
        let codec_id = ext.serializers().id_of(&config.serializer)?;
        let compress_id = ext.compressors().id_of(&config.compressor)?;
        // Fail early on a name registered without a wire id
        ext.serializer(&config.serializer)?;
        ext.compressor(&config.compressor)?;
        let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                logger_warn!(logger, "connect to {} err: {}", addr, e);
                return Err(RpcIntErr::Unreachable.into());
            }
            Err(_) => {
                logger_warn!(logger, "connect to {} timeout", addr);
                return Err(RpcIntErr::Unreachable.into());
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            logger_warn!(logger, "set_nodelay on {} err: {}", addr, e);
        }
        let local = stream.local_addr().map_err(RpcIntErr::from)?;
        let (reader, writer) = stream.into_split();
        let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
        let (write_tx, write_rx) = mpsc::unbounded_async::<Bytes>();
        let inner = Arc::new(ClientStreamInner {
            conn_id: format!("{}->{}", local, addr),
            peer: addr,
            pending: PendingCalls::new(),
            closed: AtomicBool::new(false),
            ping_seq: AtomicU32::new(1),
            codec: WireCodec::new(ext, config.max_frame_len),
            codec_id,
            compress_id,
            write_tx,
            logger,
        });
        logger_debug!(inner.logger, "{:?} connected", inner);
        let _inner = inner.clone();
        let _close_rx = close_rx.clone();
        let write_timeout = config.write_timeout;
        let heartbeat = config.heartbeat_interval;
        tokio::spawn(async move {
            _inner.write_loop(writer, write_rx, _close_rx, write_timeout, heartbeat).await;
        });
        let _inner = inner.clone();
        tokio::spawn(async move {
            _inner.receive_loop(reader, close_rx).await;
        });
        Ok(Self { close_tx: Mutex::new(Some(close_tx)), inner })
    }

    /// Send the request and wait for its response at most `task_timeout`.
    ///
    /// On timeout the call is forgotten, a late response is dropped. The server side is not
    /// cancelled.
    pub async fn invoke(&self, req: RpcRequest, task_timeout: Duration) -> Result<RpcResponse, RpcError> {
        let inner = &self.inner;
        let (id, mut rx) = inner.pending.register()?;
        let msg = RpcMessage::request(inner.codec_id, inner.compress_id, id, req);
        let mut buf = BytesMut::new();
        if let Err(e) = inner.codec.encode(&msg, &mut buf) {
            inner.pending.remove(id);
            logger_warn!(inner.logger, "{:?} encode {} err: {}", inner, msg, e);
            return Err(RpcIntErr::Encode.into());
        }
        if inner.write_tx.send(buf.freeze()).is_err() {
            inner.pending.remove(id);
            return Err(RpcIntErr::Closed.into());
        }
        logger_trace!(inner.logger, "{:?} sent {}", inner, msg);
        let r = match timeout(task_timeout, &mut rx).await {
            Ok(Ok(r)) => r,
            // The slot is dropped without a value only when the stream is torn down
            Ok(Err(_)) => Err(RpcIntErr::Closed),
            Err(_) => {
                if inner.pending.remove(id) {
                    logger_warn!(inner.logger, "{:?} request {} timeout", inner, id);
                    return Err(RpcIntErr::Timeout.into());
                }
                // Resolved while the timer fired
                match rx.try_recv() {
                    Ok(r) => r,
                    Err(_) => Err(RpcIntErr::Timeout),
                }
            }
        };
        let resp = r?;
        if resp.request_id != id {
            logger_error!(
                inner.logger,
                "{:?} response id {} does not match request {}",
                inner,
                resp.request_id,
                id
            );
            return Err(RpcIntErr::Decode.into());
        }
        Ok(resp)
    }

    /// Queue a heartbeat ping, returns false when the stream is closed
    pub fn ping(&self) -> bool {
        self.inner.send_ping()
    }

    /// Since reader and writer are two tasks, might be close on either side
    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Calls sent but not yet resolved
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Close the connection, failing the pending calls with [RpcIntErr::Closed]
    pub fn close(&self) {
        if self.close_tx.lock().take().is_some() {
            self.inner.set_closed(RpcIntErr::Closed);
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

struct ClientStreamInner {
    conn_id: String,
    peer: SocketAddr,
    pending: PendingCalls,
    closed: AtomicBool, // flag set by either reader or writer on their exit
    ping_seq: AtomicU32,
    codec: WireCodec,
    codec_id: u8,
    compress_id: u8,
    write_tx: MTx<Bytes>,
    logger: Arc<LogFilter>,
}

impl fmt::Debug for ClientStreamInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client({})", self.conn_id)
    }
}

impl ClientStreamInner {
    fn set_closed(&self, e: RpcIntErr) {
        self.closed.store(true, Ordering::SeqCst);
        let count = self.pending.fail_all(e);
        if count > 0 {
            logger_debug!(self.logger, "{:?} failed {} pending calls: {}", self, count, e);
        }
    }

    fn queue_msg(&self, msg: &RpcMessage) -> bool {
        let mut buf = BytesMut::with_capacity(32);
        if let Err(e) = self.codec.encode(msg, &mut buf) {
            logger_warn!(self.logger, "{:?} encode {} err: {}", self, msg, e);
            return false;
        }
        self.write_tx.send(buf.freeze()).is_ok()
    }

    fn send_ping(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            logger_warn!(self.logger, "{:?} send_ping skip as conn closed", self);
            return false;
        }
        let seq = self.ping_seq.fetch_add(1, Ordering::Relaxed);
        self.queue_msg(&RpcMessage::ping(self.codec_id, self.compress_id, seq))
    }

    async fn write_loop(
        &self, mut writer: OwnedWriteHalf, write_rx: AsyncRx<Bytes>, close_rx: MAsyncRx<()>,
        write_timeout: Duration, heartbeat: Duration,
    ) {
        let mut ticker = if heartbeat.is_zero() {
            None
        } else {
            let mut inv = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
            inv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(inv)
        };
        let mut written = false;
        let mut batch = BytesMut::with_capacity(4096);
        let r: Result<(), RpcIntErr> = loop {
            tokio::select! {
                r = write_rx.recv() => {
                    let Ok(frame) = r else {
                        break Ok(());
                    };
                    batch.extend_from_slice(&frame);
                    while let Ok(frame) = write_rx.try_recv() {
                        batch.extend_from_slice(&frame);
                    }
                    if let Err(e) = write_batch(&mut writer, &mut batch, write_timeout).await {
                        logger_warn!(self.logger, "{:?} write err: {}", self, e);
                        break Err(RpcIntErr::Closed);
                    }
                    written = true;
                }
                _ = tick(&mut ticker) => {
                    if self.closed.load(Ordering::Acquire) {
                        break Ok(());
                    }
                    if !written {
                        logger_trace!(self.logger, "{:?} idle, send ping", self);
                        self.send_ping();
                    }
                    written = false;
                }
                _ = close_rx.recv() => {
                    break Ok(());
                }
            }
        };
        if let Err(e) = r {
            self.set_closed(e);
        }
        let _ = writer.shutdown().await;
        logger_trace!(self.logger, "{:?} writer exits", self);
    }

    async fn receive_loop(&self, mut reader: OwnedReadHalf, close_rx: MAsyncRx<()>) {
        let mut decoder = FrameDecoder::new(self.codec.clone());
        let e = 'outer: loop {
            loop {
                match decoder.next_message() {
                    Ok(Some(msg)) => self.handle_msg(msg),
                    Ok(None) => break,
                    Err(e) => {
                        logger_error!(self.logger, "{:?} decode err: {}", self, e);
                        break 'outer e.kind();
                    }
                }
            }
            decoder.buffer_mut().reserve(4096);
            tokio::select! {
                r = reader.read_buf(decoder.buffer_mut()) => match r {
                    Ok(0) => {
                        logger_debug!(self.logger, "{:?} closed by peer", self);
                        break RpcIntErr::Closed;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logger_debug!(self.logger, "{:?} read err: {}", self, e);
                        break RpcIntErr::Closed;
                    }
                },
                _ = close_rx.recv() => {
                    break RpcIntErr::Closed;
                }
            }
        };
        self.set_closed(e);
        logger_trace!(self.logger, "{:?} receiver exits", self);
    }

    fn handle_msg(&self, msg: RpcMessage) {
        match msg.msg_type {
            MessageType::Response => {
                let id = msg.request_id;
                if let MessageBody::Response(resp) = msg.body {
                    if !self.pending.resolve(id, Ok(resp)) {
                        logger_debug!(self.logger, "{:?} drop response {} without pending call", self, id);
                    }
                }
            }
            MessageType::Ping => {
                self.queue_msg(&RpcMessage::pong(&msg));
            }
            MessageType::Pong => {
                logger_trace!(self.logger, "{:?} pong {}", self, msg.request_id);
            }
            MessageType::Request => {
                logger_warn!(self.logger, "{:?} unexpected request {} from server", self, msg.request_id);
            }
        }
    }
}

async fn write_batch(
    writer: &mut OwnedWriteHalf, batch: &mut BytesMut, write_timeout: Duration,
) -> Result<(), RpcIntErr> {
    let r = timeout(write_timeout, async {
        writer.write_all(batch).await?;
        writer.flush().await
    })
    .await;
    batch.clear();
    match r {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(RpcIntErr::IO),
        Err(_) => Err(RpcIntErr::Timeout),
    }
}

/// Pending forever without a ticker
pub(crate) async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(inv) => {
            inv.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
