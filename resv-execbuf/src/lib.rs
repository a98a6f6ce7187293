//! # resv-execbuf
//!
//! Deadlock-free reservation of buffer-object sets for command submission.
//!
//! Before a submission can validate and fence its buffer objects it must hold
//! all of them at once. Many submissions do this concurrently over
//! overlapping sets in arbitrary order; [`Execbuf`] settles conflicts with
//! ticketed wound/wait locking (see the `resv` crate) so none of them
//! deadlocks, and keeps the LRU lists of eviction candidates consistent with
//! what is reserved.
//!
//! ## Locking
//!
//! | resource               | protected by           | may block |
//! |------------------------|------------------------|-----------|
//! | reservation state      | per-object reservation | yes       |
//! | LRU lists              | `BoGlobal` LRU lock    | no        |
//! | attached sync objects  | `Device` fence lock    | no        |
//!
//! The LRU lock may be taken while holding reservations; the fence lock only
//! inside the LRU lock. Reservations are never waited for under either.
//!
//! ## Example
//!
//! ```rust
//! use resv::Ticket;
//! use resv_execbuf::{BoGlobal, Device, Driver, Execbuf, ValidateBuffer};
//!
//! struct Gpu;
//! impl Driver for Gpu {
//!     type SyncObj = u64;
//!     fn sync_obj_ref(&self, s: &u64) -> u64 { *s }
//!     fn sync_obj_unref(&self, slot: &mut Option<u64>) { slot.take(); }
//!     fn sync_obj_signaled(&self, _: &u64) -> bool { true }
//! }
//!
//! let device = Device::new(Gpu, BoGlobal::new());
//! let mut list: Vec<_> = (0..3)
//!     .map(|_| ValidateBuffer::new(device.create_bo(false)))
//!     .collect();
//!
//! let execbuf = Execbuf::default();
//! let mut ticket = Ticket::new();
//! execbuf.reserve(Some(&mut ticket), &mut list).unwrap();
//! assert!(list.iter().all(|e| e.is_reserved() && e.is_removed()));
//!
//! // ... validate, submit ...
//!
//! execbuf.fence(Some(&mut ticket), &mut list, &7);
//! assert!(list.iter().all(|e| !e.is_reserved() && e.bo().is_on_lru()));
//! assert_eq!(list[0].bo().sync_obj(), Some(7));
//! ```

#![warn(missing_docs)]

mod bo;
mod config;
mod device;
mod driver;
mod error;
mod evict;
mod execbuf;
mod kref;
mod lru;

pub use bo::BufferObject;
pub use config::ExecbufConfig;
pub use device::{BoGlobal, Device, FenceCell, FenceGuard};
pub use driver::Driver;
pub use error::{BusyReason, ExecbufError};
pub use evict::EvictionCandidate;
pub use execbuf::{Execbuf, ValidateBuffer};
pub use kref::ListRef;
pub use lru::{LruList, LruRegistry};
