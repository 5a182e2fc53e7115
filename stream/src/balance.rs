//! Built-in [LoadBalance] strategies: `random`, `round_robin` and `consistent_hash`.

pub use kestrel_rpc_core::balance::LoadBalance;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Uniform pick per call
#[derive(Default)]
pub struct RandomLoadBalance();

impl RandomLoadBalance {
    pub const NAME: &'static str = "random";
}

impl LoadBalance for RandomLoadBalance {
    fn do_select(&self, candidates: &[SocketAddr], _service_key: &str) -> SocketAddr {
        candidates[rand::thread_rng().gen_range(0..candidates.len())]
    }
}

/// Cycles through the candidates, with one counter per service key
#[derive(Default)]
pub struct RoundRobinLoadBalance {
    counters: Mutex<FxHashMap<String, Arc<AtomicUsize>>>,
}

impl RoundRobinLoadBalance {
    pub const NAME: &'static str = "round_robin";

    fn counter(&self, service_key: &str) -> Arc<AtomicUsize> {
        let mut counters = self.counters.lock();
        if let Some(c) = counters.get(service_key) {
            return c.clone();
        }
        let c = Arc::new(AtomicUsize::new(0));
        counters.insert(service_key.to_string(), c.clone());
        c
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn do_select(&self, candidates: &[SocketAddr], service_key: &str) -> SocketAddr {
        let seq = self.counter(service_key).fetch_add(1, Ordering::Relaxed);
        candidates[seq % candidates.len()]
    }
}

pub const VIRTUAL_NODES: usize = 160;

struct HashRing {
    /// candidates the ring was built from, in order
    members: Vec<SocketAddr>,
    ring: BTreeMap<u64, SocketAddr>,
}

impl HashRing {
    fn build(candidates: &[SocketAddr]) -> Self {
        let mut ring = BTreeMap::new();
        for addr in candidates {
            for replica in 0..VIRTUAL_NODES {
                ring.insert(fx_hash(&(addr, replica)), *addr);
            }
        }
        Self { members: candidates.to_vec(), ring }
    }

    fn locate(&self, hash: u64) -> SocketAddr {
        match self.ring.range(hash..).next() {
            Some((_, addr)) => *addr,
            // wrap around, the ring is never empty
            None => self.ring.values().next().copied().unwrap_or(self.members[0]),
        }
    }
}

#[inline]
fn fx_hash<T: Hash + ?Sized>(v: &T) -> u64 {
    let mut hasher = FxHasher::default();
    v.hash(&mut hasher);
    hasher.finish()
}

/// Maps the service key onto a ring of virtual nodes.
///
/// The ring of a service key is rebuilt when its candidate list changes.
#[derive(Default)]
pub struct ConsistentHashLoadBalance {
    rings: Mutex<FxHashMap<String, Arc<HashRing>>>,
}

impl ConsistentHashLoadBalance {
    pub const NAME: &'static str = "consistent_hash";

    fn ring(&self, candidates: &[SocketAddr], service_key: &str) -> Arc<HashRing> {
        let mut rings = self.rings.lock();
        if let Some(ring) = rings.get(service_key) {
            if ring.members == candidates {
                return ring.clone();
            }
        }
        log::debug!("rebuild hash ring of {} with {} nodes", service_key, candidates.len());
        let ring = Arc::new(HashRing::build(candidates));
        rings.insert(service_key.to_string(), ring.clone());
        ring
    }
}

impl LoadBalance for ConsistentHashLoadBalance {
    fn do_select(&self, candidates: &[SocketAddr], service_key: &str) -> SocketAddr {
        self.ring(candidates, service_key).locate(fx_hash(service_key))
    }
}
