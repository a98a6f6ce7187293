use std::fmt;
use std::sync::{Arc, Weak};

use resv::ReserveMode;
use tracing::trace;

use crate::bo::BufferObject;
use crate::device::BoGlobal;
use crate::driver::Driver;

/// A buffer object picked off the LRU by the eviction scanner.
///
/// The object is reserved and off the LRU for as long as the candidate
/// lives. Dropping it, or calling [`release`](Self::release), puts it back.
pub struct EvictionCandidate<D: Driver> {
    bo: Arc<BufferObject<D>>,
    idle: bool,
}

impl<D: Driver> EvictionCandidate<D> {
    /// The picked object.
    pub fn bo(&self) -> &Arc<BufferObject<D>> {
        &self.bo
    }

    /// No GPU work was outstanding on the object when it was picked.
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Put the object back on the LRU and release it.
    pub fn release(self) {}
}

impl<D: Driver> Drop for EvictionCandidate<D> {
    fn drop(&mut self) {
        self.bo.unreserve();
    }
}

impl<D: Driver> fmt::Debug for EvictionCandidate<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionCandidate")
            .field("bo", &self.bo.id())
            .field("idle", &self.idle)
            .finish()
    }
}

impl<D: Driver> BoGlobal<D> {
    /// Pick the least recently used object that can be reserved right now.
    ///
    /// Candidates are snapshotted under the LRU lock and tried without it,
    /// never waiting on a reservation.
    pub fn evict_first(&self) -> Option<EvictionCandidate<D>> {
        let candidates: Vec<Weak<BufferObject<D>>> = self.lru().iter().cloned().collect();

        for weak in candidates {
            let Some(bo) = weak.upgrade() else {
                continue;
            };
            if bo.resv().try_reserve(ReserveMode::NoWait, None).is_err() {
                continue;
            }

            let put_count = {
                let mut lru = self.lru();
                lru.contains(&bo).then(|| lru.remove(&bo))
            };
            let Some(put_count) = put_count else {
                // Raced with a reservation that kept it off the LRU
                bo.resv().unreserve();
                continue;
            };
            bo.list_refs().sub(put_count);

            let idle = bo.is_idle();
            trace!(bo = bo.id(), idle, "eviction candidate");
            return Some(EvictionCandidate { bo, idle });
        }
        None
    }
}
