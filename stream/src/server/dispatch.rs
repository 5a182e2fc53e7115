use super::provider::ServiceProvider;
use crate::proto::RpcMessage;
use crossfire::*;
use futures::FutureExt;
use kestrel_rpc_core::error::{RpcFault, RpcIntErr};
use kestrel_rpc_core::message::{RpcRequest, RpcResponse};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A writer channel to send response to the connection writer.
///
/// It can be cloned anywhere. The writer exits after every clone is dropped.
pub struct RespNoti(pub(crate) MTx<RpcMessage>);

impl Clone for RespNoti {
    #[inline]
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl RespNoti {
    pub fn new(tx: MTx<RpcMessage>) -> Self {
        Self(tx)
    }

    /// Returns Err when the writer has exited
    #[inline]
    pub fn send(&self, msg: RpcMessage) -> Result<(), ()> {
        if self.0.send(msg).is_err() {
            Err(())
        } else {
            Ok(())
        }
    }
}

/// A decoded request waiting for a worker.
pub struct Job {
    pub request_id: u32,
    /// Serializer and compressor ids the request arrived with, reused for the response
    pub codec: u8,
    pub compress: u8,
    pub req: RpcRequest,
    pub noti: RespNoti,
}

impl Job {
    fn reply(self, result: Result<serde_json::Value, RpcFault>) {
        let resp = RpcResponse { request_id: self.request_id, result };
        // The connection may be gone meanwhile
        let _ = self.noti.send(RpcMessage::response(self.codec, self.compress, resp));
    }

    /// Answer without invoking, used when the queue is full
    pub fn reject(self, kind: RpcIntErr, message: &str) {
        self.reply(Err(RpcFault::new(kind, message)));
    }
}

/// A fixed number of tokio tasks running service invocations, fed by a bounded queue shared by
/// all connections.
pub struct WorkerPool {
    tx: MAsyncTx<Job>,
    queue_size: usize,
}

impl WorkerPool {
    /// Spawns the workers, must be called within a tokio runtime.
    ///
    /// Workers exit after every sender of the queue is dropped and the queue is drained.
    pub fn new(provider: Arc<ServiceProvider>, worker_count: usize, queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        let (tx, rx) = mpmc::bounded_async::<Job>(queue_size);
        for worker_id in 0..worker_count.max(1) {
            let rx = rx.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                while let Ok(job) = rx.recv().await {
                    run_job(&provider, job).await;
                }
                log::trace!("worker {} exits", worker_id);
            });
        }
        Self { tx, queue_size }
    }

    /// Queue the job, or hand it back when the queue is full
    #[inline]
    pub fn try_submit(&self, job: Job) -> Result<(), Job> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(job),
            Err(TrySendError::Disconnected(job)) => Err(job),
        }
    }

    #[inline]
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), queue_size: self.queue_size }
    }
}

async fn run_job(provider: &ServiceProvider, mut job: Job) {
    let service_key = job.req.service_name();
    let service = match provider.get(&service_key) {
        Ok(s) => s,
        Err(kind) => {
            log::warn!("request {} for unknown service {}", job.request_id, service_key);
            job.reject(kind, &format!("no provider for {}", service_key));
            return;
        }
    };
    let method = std::mem::take(&mut job.req.method);
    let params = std::mem::take(&mut job.req.params);
    // A panicking service must not take the worker down
    let r = AssertUnwindSafe(service.invoke(&method, params)).catch_unwind().await;
    let result = match r {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            log::debug!("{}.{} returns err: {}", service_key, method, e);
            Err(e.into_fault())
        }
        Err(_) => {
            log::error!("{}.{} panicked", service_key, method);
            Err(RpcFault::new(RpcIntErr::Invocation, format!("{}.{} panicked", service_key, method)))
        }
    };
    job.reply(result);
}
