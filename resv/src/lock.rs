//! Wound/wait reservation lock.
//!
//! # Conflict resolution
//!
//! Callers may present a [`Ticket`]. When a ticketed caller meets a ticketed
//! holder:
//!
//! | caller vs holder | caller holds other locks | outcome                          |
//! |------------------|--------------------------|----------------------------------|
//! | younger          | yes                      | `WouldWound`                     |
//! | younger          | no                       | wait                             |
//! | older            | any                      | wait, holder is wounded          |
//! | same ticket      | any                      | `AlreadyHeld`                    |
//!
//! An older caller in [`ReserveMode::NoWait`] gets `Busy` and wounds nobody.
//! A wounded ticket gets `WouldWound` the next time it runs into contention
//! while holding at least one lock. Waits only ever go from an older ticket to
//! a younger holder, so the wait-for graph has no cycles and the oldest live
//! ticket always makes progress.
//!
//! Acquisitions without a ticket are plain exclusive locking: they never wound
//! and are never wounded.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, Thread};

use crossbeam_utils::Backoff;
use tracing::{trace, warn};

use crate::error::ReserveError;
use crate::signal::Signal;
use crate::ticket::{Ticket, TicketShared, TicketState};
use crate::ttas::TTas;

/// How an acquisition may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveMode {
    /// Fail with [`ReserveError::Busy`] instead of waiting.
    NoWait,
    /// Wait until the lock is free; signals are ignored.
    Uninterruptible,
    /// Wait until the lock is free or a signal is raised.
    Interruptible,
}

impl ReserveMode {
    /// Collapse the classic flag pair. `no_wait` wins over `interruptible`.
    pub const fn from_flags(interruptible: bool, no_wait: bool) -> Self {
        match (no_wait, interruptible) {
            (true, _) => ReserveMode::NoWait,
            (false, true) => ReserveMode::Interruptible,
            (false, false) => ReserveMode::Uninterruptible,
        }
    }

    #[inline]
    fn is_interruptible(self) -> bool {
        self == ReserveMode::Interruptible
    }
}

/// Tuning for [`ReservationLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Backoff snoozes a waiter performs before it parks.
    pub spin_limit: u32,
}

impl LockConfig {
    /// Set the number of snoozes before parking. `0` parks immediately.
    pub const fn spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { spin_limit: 7 }
    }
}

enum Holder {
    Untracked,
    Ticket(Arc<TicketShared>),
}

#[derive(Default)]
struct LockState {
    holder: Option<Holder>,
    waiters: Vec<Thread>,
}

enum Step {
    Spin,
    Park,
}

/// Per-object exclusive lock with ticketed deadlock avoidance.
pub struct ReservationLock {
    state: TTas<LockState>,
    config: LockConfig,
}

impl ReservationLock {
    /// A free lock with default tuning.
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// A free lock with the given tuning.
    pub fn with_config(config: LockConfig) -> Self {
        Self {
            state: TTas::new(LockState::default()),
            config,
        }
    }

    /// Attempt to acquire the lock.
    ///
    /// Without a ticket this is a plain exclusive lock. With one, conflicts
    /// are arbitrated by ticket age (see the module docs) and the call may
    /// return [`ReserveError::WouldWound`].
    pub fn try_reserve(&self, mode: ReserveMode, ticket: Option<&Ticket>) -> Result<(), ReserveError> {
        debug_assert!(
            ticket.is_none_or(|t| t.state() == TicketState::Acquiring),
            "acquiring with a ticket that is not in its acquisition phase"
        );
        self.acquire(mode, ticket.and_then(Ticket::shared), false)
    }

    /// Blocking acquisition on behalf of `ticket` that never reports
    /// `WouldWound`.
    ///
    /// Meant for the retry path after a wound, when the caller has released
    /// every other lock and only waits for the contended one.
    pub fn slow_reserve(&self, ticket: &Ticket, interruptible: bool) -> Result<(), ReserveError> {
        debug_assert_eq!(ticket.state(), TicketState::Acquiring);
        debug_assert_eq!(ticket.acquired(), 0, "slow path entered while holding locks");
        let mode = ReserveMode::from_flags(interruptible, false);
        trace!(stamp = ?ticket.stamp(), "reservation slow path");
        self.acquire(mode, ticket.shared(), true)
    }

    /// Release the lock. The caller must hold it.
    pub fn unreserve(&self) {
        let (holder, waiters) = {
            let mut st = self.state.lock();
            (st.holder.take(), std::mem::take(&mut st.waiters))
        };

        match holder {
            Some(Holder::Ticket(owner)) => owner.on_release(),
            Some(Holder::Untracked) => {}
            None => {
                warn!("unreserve of a reservation that is not held");
                debug_assert!(false, "unreserve of a reservation that is not held");
            }
        }

        for waiter in waiters {
            waiter.unpark();
        }
    }

    /// Whether anybody holds the lock.
    pub fn is_reserved(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// Whether `ticket` holds the lock.
    pub fn is_held_by(&self, ticket: &Ticket) -> bool {
        let Some(ctx) = ticket.shared() else {
            return false;
        };
        matches!(&self.state.lock().holder, Some(Holder::Ticket(owner)) if Arc::ptr_eq(owner, ctx))
    }

    /// Stamp of the holding ticket. `None` when free or held without a ticket.
    pub fn holder_stamp(&self) -> Option<u64> {
        match &self.state.lock().holder {
            Some(Holder::Ticket(owner)) => Some(owner.stamp),
            _ => None,
        }
    }

    /// Number of threads parked on this lock.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn acquire(
        &self,
        mode: ReserveMode,
        ctx: Option<&Arc<TicketShared>>,
        slow: bool,
    ) -> Result<(), ReserveError> {
        let backoff = Backoff::new();
        let mut spins = 0;
        let mut parked = false;
        let me = thread::current();

        let result = loop {
            let step = {
                let mut st = self.state.lock();
                match st.holder.as_ref().map(|holder| check_conflict(holder, ctx, mode, slow)) {
                    None => {
                        st.holder = Some(match ctx {
                            Some(ctx) => {
                                if ctx.acquired() == 0 {
                                    ctx.clear_wound();
                                }
                                ctx.on_acquire();
                                Holder::Ticket(Arc::clone(ctx))
                            }
                            None => Holder::Untracked,
                        });
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e),
                    Some(Ok(())) => {}
                }

                if mode == ReserveMode::NoWait {
                    break Err(ReserveError::Busy);
                }
                if mode.is_interruptible() && Signal::take_current() {
                    break Err(ReserveError::Interrupted);
                }
                if spins < self.config.spin_limit {
                    Step::Spin
                } else {
                    if !st.waiters.iter().any(|t| t.id() == me.id()) {
                        st.waiters.push(me.clone());
                    }
                    Step::Park
                }
            };

            match step {
                Step::Spin => {
                    spins += 1;
                    backoff.snooze();
                }
                Step::Park => {
                    parked = true;
                    thread::park();
                }
            }
        };

        if parked {
            self.state.lock().waiters.retain(|t| t.id() != me.id());
        }
        result
    }
}

fn check_conflict(
    holder: &Holder,
    ctx: Option<&Arc<TicketShared>>,
    mode: ReserveMode,
    slow: bool,
) -> Result<(), ReserveError> {
    let Some(ctx) = ctx else {
        return Ok(());
    };
    let owner = match holder {
        Holder::Ticket(owner) => Some(owner),
        Holder::Untracked => None,
    };

    if owner.is_some_and(|o| Arc::ptr_eq(o, ctx)) {
        return Err(ReserveError::AlreadyHeld);
    }

    // Holding nothing means we cannot be part of a cycle; just wait.
    if !slow && ctx.acquired() > 0 {
        if ctx.is_wounded() {
            trace!(stamp = ctx.stamp, "wounded ticket backs off");
            return Err(ReserveError::WouldWound);
        }
        if let Some(owner) = owner.filter(|o| o.is_older_than(ctx)) {
            trace!(stamp = ctx.stamp, holder = owner.stamp, "younger ticket backs off");
            return Err(ReserveError::WouldWound);
        }
    }

    // Only a caller that is going to wait may wound.
    if mode == ReserveMode::NoWait {
        return Ok(());
    }
    if let Some(owner) = owner.filter(|o| ctx.is_older_than(o)) {
        owner.wound();
    }
    Ok(())
}

impl Default for ReservationLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReservationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        let holder = match &st.holder {
            None => "free".to_string(),
            Some(Holder::Untracked) => "untracked".to_string(),
            Some(Holder::Ticket(owner)) => format!("ticket {}", owner.stamp),
        };
        f.debug_struct("ReservationLock")
            .field("holder", &holder)
            .field("waiters", &st.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketClass;

    #[test]
    fn mode_from_flags() {
        assert_eq!(ReserveMode::from_flags(true, true), ReserveMode::NoWait);
        assert_eq!(ReserveMode::from_flags(false, true), ReserveMode::NoWait);
        assert_eq!(ReserveMode::from_flags(true, false), ReserveMode::Interruptible);
        assert_eq!(ReserveMode::from_flags(false, false), ReserveMode::Uninterruptible);
    }

    #[test]
    fn untracked_no_wait() {
        let lock = ReservationLock::new();
        assert_eq!(lock.try_reserve(ReserveMode::NoWait, None), Ok(()));
        assert!(lock.is_reserved());
        assert_eq!(lock.holder_stamp(), None);
        assert_eq!(lock.try_reserve(ReserveMode::NoWait, None), Err(ReserveError::Busy));
        lock.unreserve();
        assert!(!lock.is_reserved());
    }

    #[test]
    fn ticket_accounting() {
        let class = TicketClass::new("test");
        let mut t = Ticket::new();
        t.init(&class);

        let a = ReservationLock::new();
        let b = ReservationLock::new();
        a.try_reserve(ReserveMode::Interruptible, Some(&t)).unwrap();
        b.try_reserve(ReserveMode::Interruptible, Some(&t)).unwrap();
        assert_eq!(t.acquired(), 2);
        assert!(a.is_held_by(&t));
        assert_eq!(a.holder_stamp(), t.stamp());

        assert_eq!(
            a.try_reserve(ReserveMode::Interruptible, Some(&t)),
            Err(ReserveError::AlreadyHeld)
        );

        a.unreserve();
        b.unreserve();
        assert_eq!(t.acquired(), 0);
        t.fini();
    }

    #[test]
    fn younger_holding_locks_backs_off() {
        let class = TicketClass::new("test");
        let mut old = Ticket::new();
        let mut young = Ticket::new();
        old.init(&class);
        young.init(&class);

        let a = ReservationLock::new();
        let b = ReservationLock::new();
        a.try_reserve(ReserveMode::Interruptible, Some(&old)).unwrap();
        b.try_reserve(ReserveMode::Interruptible, Some(&young)).unwrap();

        assert_eq!(
            a.try_reserve(ReserveMode::Interruptible, Some(&young)),
            Err(ReserveError::WouldWound)
        );
        // The older holder is untouched
        assert!(a.is_held_by(&old));
        assert!(!old.is_wounded());
    }

    #[test]
    fn no_wait_with_ticket_reports_busy() {
        let class = TicketClass::new("test");
        let mut old = Ticket::new();
        let mut young = Ticket::new();
        old.init(&class);
        young.init(&class);

        let a = ReservationLock::new();
        a.try_reserve(ReserveMode::NoWait, Some(&young)).unwrap();
        // Older caller that may not wait: busy, and the holder keeps going
        assert_eq!(a.try_reserve(ReserveMode::NoWait, Some(&old)), Err(ReserveError::Busy));
        assert!(!young.is_wounded());

        let b = ReservationLock::new();
        b.try_reserve(ReserveMode::NoWait, Some(&old)).unwrap();
        assert_eq!(a.try_reserve(ReserveMode::NoWait, Some(&old)), Err(ReserveError::Busy));
        assert!(!young.is_wounded());
    }

    #[test]
    fn pending_signal_interrupts_wait() {
        let lock = ReservationLock::with_config(LockConfig::default().spin_limit(0));
        lock.try_reserve(ReserveMode::NoWait, None).unwrap();

        Signal::current().raise();
        assert_eq!(
            lock.try_reserve(ReserveMode::Interruptible, None),
            Err(ReserveError::Interrupted)
        );
        assert!(!Signal::current().is_pending());
        assert_eq!(lock.waiters(), 0);
    }
}
