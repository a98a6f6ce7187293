//! Per-thread interrupt signals.
//!
//! Every thread owns one [`Signal`]. Another thread may `raise()` it to
//! interrupt an interruptible wait: the flag is set and the owning thread is
//! unparked so that it re-checks its wait condition.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

struct SignalInner {
    pending: AtomicBool,
    thread: Thread,
}

thread_local! {
    static CURRENT: Arc<SignalInner> = Arc::new(SignalInner {
        pending: AtomicBool::new(false),
        thread: thread::current(),
    });
}

/// Handle to the interrupt signal of one thread.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    /// Returns the signal of the calling thread.
    pub fn current() -> Self {
        Self {
            inner: CURRENT.with(Arc::clone),
        }
    }

    /// Marks the signal pending and wakes the owning thread.
    pub fn raise(&self) {
        self.inner.pending.store(true, Ordering::Release);
        self.inner.thread.unpark();
    }

    /// Returns true if a raised signal has not been consumed yet.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Drops a pending signal without delivering it.
    pub fn clear(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }

    /// The thread this signal belongs to.
    pub fn thread(&self) -> &Thread {
        &self.inner.thread
    }

    /// Consumes a pending signal of the calling thread.
    pub(crate) fn take_current() -> bool {
        CURRENT.with(|inner| inner.pending.swap(false, Ordering::AcqRel))
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("thread", &self.inner.thread.id())
            .field("pending", &self.is_pending())
            .finish()
    }
}
