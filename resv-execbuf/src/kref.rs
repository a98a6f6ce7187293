//! List references and deferred drops.
//!
//! Every LRU list a buffer object sits on holds one list reference to it.
//! Taking an object off a list happens under the LRU lock, but dropping the
//! reference it owned must not: releasing may need locks that nest outside
//! the LRU lock. Removal therefore only reports how many references are owed
//! (`put_count`) and the caller drops them once the LRU lock is released.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::error;

use crate::driver::Driver;
use crate::execbuf::ValidateBuffer;

/// Explicit reference count for LRU list membership.
///
/// Starts at one: the base reference owned by the object itself, which keeps
/// the count from ever reaching zero while the object is alive.
#[derive(Debug)]
pub struct ListRef {
    count: AtomicUsize,
}

impl ListRef {
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
        }
    }

    #[inline]
    pub(crate) fn get(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop `n` references.
    ///
    /// Returns false if that would have released the base reference, which is
    /// a reference-counting bug; the count is left at one in that case.
    pub(crate) fn sub(&self, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        let res = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(n).filter(|&left| left > 0));
        match res {
            Ok(_) => true,
            Err(current) => {
                error!(current, n, "list reference underflow");
                debug_assert!(false, "list reference underflow: {current} - {n}");
                false
            }
        }
    }

    /// Current count, base reference included.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Apply and clear every deferred `put_count` in `list`.
///
/// Must be called without the LRU lock held.
pub(crate) fn apply_puts<D: Driver>(list: &mut [ValidateBuffer<D>]) {
    for entry in list.iter_mut() {
        if entry.put_count > 0 {
            entry.bo.list_refs().sub(entry.put_count);
            entry.put_count = 0;
        }
    }
}
