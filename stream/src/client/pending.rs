use kestrel_rpc_core::error::RpcIntErr;
use kestrel_rpc_core::message::RpcResponse;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

pub type CallResult = Result<RpcResponse, RpcIntErr>;

/// Calls sent on one connection and still waiting for their response.
///
/// Every entry is resolved exactly once: by its response, by [PendingCalls::remove] on timeout,
/// or by [PendingCalls::fail_all] when the connection goes away. After `fail_all` no new call
/// can register.
pub struct PendingCalls {
    inner: Mutex<PendingInner>,
}

struct PendingInner {
    calls: FxHashMap<u32, oneshot::Sender<CallResult>>,
    next_id: u32,
    closed: bool,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self { inner: Mutex::new(PendingInner { calls: FxHashMap::default(), next_id: 1, closed: false }) }
    }

    /// Allocate a request id and the slot its result will be delivered to.
    ///
    /// Ids increase and wrap around, skipping the ones still pending.
    pub fn register(&self) -> Result<(u32, oneshot::Receiver<CallResult>), RpcIntErr> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RpcIntErr::Closed);
        }
        if inner.calls.len() > u32::MAX as usize {
            return Err(RpcIntErr::Internal);
        }
        let mut id = inner.next_id;
        while inner.calls.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        inner.next_id = id.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        inner.calls.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver a result. Returns false for an id nobody waits for, which is dropped.
    pub fn resolve(&self, request_id: u32, result: CallResult) -> bool {
        let tx = self.inner.lock().calls.remove(&request_id);
        match tx {
            // The receiver may be gone with a cancelled caller
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Forget a call, returns false if it was already resolved
    #[inline]
    pub fn remove(&self, request_id: u32) -> bool {
        self.inner.lock().calls.remove(&request_id).is_some()
    }

    /// Fail every pending call and refuse new ones, returns how many were failed
    pub fn fail_all(&self, e: RpcIntErr) -> usize {
        let calls = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.calls)
        };
        let count = calls.len();
        for (_, tx) in calls {
            let _ = tx.send(Err(e));
        }
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
