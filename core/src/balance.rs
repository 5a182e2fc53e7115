use crate::error::RpcIntErr;
use std::net::SocketAddr;

/// Pick one endpoint per call from the candidates discovery returned.
///
/// Implementations must be stateless across service keys, or key their state by
/// `service_key`. The candidate slice is never mutated.
pub trait LoadBalance: Send + Sync + 'static {
    /// Fails with [RpcIntErr::NoInstance] when there is no candidate.
    ///
    /// Duplicated endpoints are removed, keeping the order of first occurrence, before
    /// delegating to [LoadBalance::do_select].
    fn select(&self, candidates: &[SocketAddr], service_key: &str) -> Result<SocketAddr, RpcIntErr> {
        match candidates.len() {
            0 => Err(RpcIntErr::NoInstance),
            1 => Ok(candidates[0]),
            _ => {
                let uniq = dedup(candidates);
                if uniq.len() == 1 {
                    return Ok(uniq[0]);
                }
                Ok(self.do_select(&uniq, service_key))
            }
        }
    }

    /// `candidates` holds at least two distinct endpoints
    fn do_select(&self, candidates: &[SocketAddr], service_key: &str) -> SocketAddr;
}

pub fn dedup(candidates: &[SocketAddr]) -> Vec<SocketAddr> {
    let mut uniq: Vec<SocketAddr> = Vec::with_capacity(candidates.len());
    for addr in candidates {
        if !uniq.contains(addr) {
            uniq.push(*addr);
        }
    }
    uniq
}
