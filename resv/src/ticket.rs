use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Thread};

use portable_atomic::AtomicU64;
use tracing::{trace, warn};

/// Shared sequence allocator for tickets.
///
/// Every ticket drawn from the same class is totally ordered against every
/// other: a smaller stamp is an older ticket and wins all conflicts.
pub struct TicketClass {
    name: &'static str,
    counter: AtomicU64,
}

impl TicketClass {
    /// Create a class whose first stamp is `1`.
    pub const fn new(name: &'static str) -> Self {
        Self::with_initial(name, 0)
    }

    /// Create a class whose first stamp is `initial + 1`.
    pub const fn with_initial(name: &'static str, initial: u64) -> Self {
        Self {
            name,
            counter: AtomicU64::new(initial),
        }
    }

    /// Class name, used in traces.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get a strictly increasing stamp.
    pub fn next_stamp(&self) -> u64 {
        // Fetch-add ensures strictly increasing stamps
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last stamp handed out (`0` if none).
    pub fn last_stamp(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TicketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketClass")
            .field("name", &self.name)
            .field("last_stamp", &self.last_stamp())
            .finish()
    }
}

/// The process-wide class used for buffer reservations.
pub static RESERVATION_CLASS: TicketClass = TicketClass::new("reservation_ww_class");

/// Lifecycle of a [`Ticket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    /// Never initialized.
    Idle,
    /// Stamped; locks may be acquired on its behalf.
    Acquiring,
    /// Acquisition phase over; locks are only released from now on.
    Done,
    /// Retired. May be initialized again with a fresh stamp.
    Finished,
}

/// Part of a ticket visible to the locks it holds.
pub(crate) struct TicketShared {
    pub(crate) stamp: u64,
    class: usize,
    acquired: AtomicUsize,
    wounded: AtomicBool,
    owner: Thread,
}

impl TicketShared {
    #[inline]
    pub(crate) fn is_older_than(&self, other: &TicketShared) -> bool {
        debug_assert_eq!(self.class, other.class, "tickets from different classes");
        self.stamp < other.stamp
    }

    #[inline]
    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn on_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn on_release(&self) {
        let prev = self.acquired.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "ticket {} released more locks than it took", self.stamp);
    }

    #[inline]
    pub(crate) fn is_wounded(&self) -> bool {
        self.wounded.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn clear_wound(&self) {
        self.wounded.store(false, Ordering::Release);
    }

    /// Mark the ticket wounded and kick its thread out of any park so it
    /// notices.
    pub(crate) fn wound(&self) {
        if !self.wounded.swap(true, Ordering::AcqRel) {
            trace!(stamp = self.stamp, "ticket wounded");
            self.owner.unpark();
        }
    }
}

/// Acquire context of one batch.
///
/// A ticket is stamped by [`init`](Ticket::init), carried through every lock
/// acquisition made for the batch, marked [`done`](Ticket::done) once the
/// whole set is held, and retired by [`fini`](Ticket::fini).
///
/// The thread that calls `init` is the one woken when the ticket is wounded,
/// so initialize it on the thread that does the acquiring.
pub struct Ticket {
    state: TicketState,
    shared: Option<Arc<TicketShared>>,
}

impl Ticket {
    /// An idle, unstamped ticket.
    pub const fn new() -> Self {
        Self {
            state: TicketState::Idle,
            shared: None,
        }
    }

    /// Stamp the ticket from `class` and open the acquisition phase.
    pub fn init(&mut self, class: &TicketClass) {
        debug_assert!(!self.is_live(), "ticket initialized twice");
        let stamp = class.next_stamp();
        self.shared = Some(Arc::new(TicketShared {
            stamp,
            class: class as *const TicketClass as usize,
            acquired: AtomicUsize::new(0),
            wounded: AtomicBool::new(false),
            owner: thread::current(),
        }));
        self.state = TicketState::Acquiring;
        trace!(class = class.name(), stamp, "ticket init");
    }

    /// Close the acquisition phase.
    pub fn done(&mut self) {
        if self.state == TicketState::Acquiring {
            self.state = TicketState::Done;
        }
    }

    /// Retire the ticket. No-op unless the ticket is live.
    pub fn fini(&mut self) {
        if !self.is_live() {
            return;
        }
        if let Some(shared) = &self.shared {
            let held = shared.acquired();
            if held > 0 {
                warn!(stamp = shared.stamp, held, "ticket retired while still holding locks");
            }
            trace!(stamp = shared.stamp, "ticket fini");
        }
        self.state = TicketState::Finished;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TicketState {
        self.state
    }

    /// Initialized and not yet retired.
    pub fn is_live(&self) -> bool {
        matches!(self.state, TicketState::Acquiring | TicketState::Done)
    }

    /// Stamp of the last `init`, if any.
    pub fn stamp(&self) -> Option<u64> {
        self.shared.as_ref().map(|s| s.stamp)
    }

    /// Number of locks currently held on behalf of this ticket.
    pub fn acquired(&self) -> usize {
        self.shared.as_ref().map_or(0, |s| s.acquired())
    }

    /// Whether an older ticket has wounded this one.
    pub fn is_wounded(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_wounded())
    }

    /// True if this ticket is strictly older than `other`.
    pub fn is_older_than(&self, other: &Ticket) -> bool {
        match (&self.shared, &other.shared) {
            (Some(a), Some(b)) => a.is_older_than(b),
            _ => false,
        }
    }

    pub(crate) fn shared(&self) -> Option<&Arc<TicketShared>> {
        self.shared.as_ref()
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("state", &self.state)
            .field("stamp", &self.stamp())
            .field("acquired", &self.acquired())
            .field("wounded", &self.is_wounded())
            .finish()
    }
}
