//! # resv
//!
//! Ticketed wound/wait reservation locks.
//!
//! A [`ReservationLock`] is an exclusive per-object lock. Callers that need
//! several of them at once stamp a [`Ticket`] from a shared [`TicketClass`]
//! and present it on every acquisition. When two tickets conflict the younger
//! one is told to back off ([`ReserveError::WouldWound`]), drop everything it
//! holds, wait for the contended lock alone with
//! [`slow_reserve`](ReservationLock::slow_reserve) and start over. No global
//! lock order is needed and the oldest ticket always completes.
//!
//! Blocking waits can be interrupted through the waiting thread's [`Signal`].
//!
//! ## Example
//!
//! ```rust
//! use resv::{ReservationLock, ReserveError, ReserveMode, Ticket, RESERVATION_CLASS};
//!
//! let a = ReservationLock::new();
//! let b = ReservationLock::new();
//!
//! let mut ticket = Ticket::new();
//! ticket.init(&RESERVATION_CLASS);
//! a.try_reserve(ReserveMode::Interruptible, Some(&ticket)).unwrap();
//! b.try_reserve(ReserveMode::Interruptible, Some(&ticket)).unwrap();
//! ticket.done();
//!
//! assert_eq!(
//!     a.try_reserve(ReserveMode::NoWait, None),
//!     Err(ReserveError::Busy)
//! );
//!
//! a.unreserve();
//! b.unreserve();
//! ticket.fini();
//! ```

#![warn(missing_docs)]

mod error;
mod lock;
mod signal;
mod ticket;
mod ttas;

pub use error::ReserveError;
pub use lock::{LockConfig, ReservationLock, ReserveMode};
pub use signal::Signal;
pub use ticket::{RESERVATION_CLASS, Ticket, TicketClass, TicketState};
pub use ttas::{TTas, TTasGuard};
