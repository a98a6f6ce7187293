//! Reservation engine for validation sets.
//!
//! A command submission lists every buffer object it touches in a validation
//! set, reserves the whole set with [`Execbuf::reserve`], validates, and then
//! either commits with [`Execbuf::fence`] or abandons with
//! [`Execbuf::back_off`].
//!
//! With a ticket, conflicts between batches are settled by ticket age: the
//! younger batch drops everything it holds, waits for the one buffer it lost
//! on, and walks the set again with that buffer already reserved. Without a
//! ticket nothing waits; any held reservation fails the batch as busy.

use std::fmt;
use std::sync::Arc;

use resv::{ReserveError, ReserveMode, Ticket};
use tracing::{debug, trace};

use crate::bo::BufferObject;
use crate::config::ExecbufConfig;
use crate::device::BoGlobal;
use crate::driver::Driver;
use crate::error::{BusyReason, ExecbufError};
use crate::kref::apply_puts;
use crate::lru::LruRegistry;

/// One buffer object of a validation set.
pub struct ValidateBuffer<D: Driver> {
    pub(crate) bo: Arc<BufferObject<D>>,
    pub(crate) reserved: bool,
    pub(crate) removed: bool,
    pub(crate) put_count: usize,
    pub(crate) old_sync_obj: Option<D::SyncObj>,
}

impl<D: Driver> ValidateBuffer<D> {
    /// An entry for `bo`. A set must not name the same object twice.
    pub fn new(bo: Arc<BufferObject<D>>) -> Self {
        Self {
            bo,
            reserved: false,
            removed: false,
            put_count: 0,
            old_sync_obj: None,
        }
    }

    /// The buffer object.
    pub fn bo(&self) -> &Arc<BufferObject<D>> {
        &self.bo
    }

    /// Reserved within the current batch.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Taken off the LRU within the current batch.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// List references still owed to the object.
    pub fn put_count(&self) -> usize {
        self.put_count
    }
}

impl<D: Driver> fmt::Debug for ValidateBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidateBuffer")
            .field("bo", &self.bo.id())
            .field("reserved", &self.reserved)
            .field("removed", &self.removed)
            .field("put_count", &self.put_count)
            .finish()
    }
}

/// Put back and release every reserved entry. LRU lock held.
fn backoff_locked<D: Driver>(lru: &mut LruRegistry<D>, list: &mut [ValidateBuffer<D>]) {
    for entry in list.iter_mut().filter(|e| e.reserved) {
        entry.reserved = false;
        if entry.removed {
            lru.add(&entry.bo);
            entry.removed = false;
        }
        entry.bo.resv().unreserve();
    }
}

/// Take every reserved entry off the LRU. LRU lock held.
fn del_from_lru_locked<D: Driver>(lru: &mut LruRegistry<D>, list: &mut [ValidateBuffer<D>]) {
    for entry in list.iter_mut().filter(|e| e.reserved && !e.removed) {
        entry.put_count += lru.remove(&entry.bo);
        entry.removed = true;
    }
}

/// Back off a whole list, then settle deferred puts outside the LRU lock.
fn backoff<D: Driver>(glob: &BoGlobal<D>, list: &mut [ValidateBuffer<D>]) {
    backoff_locked(&mut glob.lru(), list);
    apply_puts(list);
}

/// In-flight reservation of one set.
///
/// Dropping it without [`commit`](Reservation::commit) rolls everything back
/// and retires the ticket, whichever way the acquisition loop was left.
struct Reservation<'a, D: Driver> {
    glob: Arc<BoGlobal<D>>,
    list: &'a mut [ValidateBuffer<D>],
    ticket: Option<&'a mut Ticket>,
    interruptible: bool,
    armed: bool,
}

impl<D: Driver> Reservation<'_, D> {
    fn acquire_all(&mut self) -> Result<(), ExecbufError> {
        let mode = ReserveMode::from_flags(self.interruptible, self.ticket.is_none());

        'retry: loop {
            for i in 0..self.list.len() {
                // Already reserved by the slow path of a previous round
                if self.list[i].reserved {
                    continue;
                }
                let bo = Arc::clone(&self.list[i].bo);

                match bo.resv().try_reserve(mode, self.ticket.as_deref()) {
                    Ok(()) => {
                        self.list[i].reserved = true;
                        check_cpu_writers(&bo)?;
                    }
                    Err(ReserveError::WouldWound) => {
                        self.slow_path(&bo)?;
                        self.list[i].reserved = true;
                        check_cpu_writers(&bo)?;
                        continue 'retry;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            return Ok(());
        }
    }

    /// Lost a conflict on `bo`: drop everything, then wait for `bo` alone.
    fn slow_path(&mut self, bo: &BufferObject<D>) -> Result<(), ExecbufError> {
        let Some(ticket) = self.ticket.as_deref() else {
            debug_assert!(false, "wounded without a ticket");
            return Err(ExecbufError::Deadlock);
        };
        trace!(stamp = ?ticket.stamp(), bo = bo.id(), "lost reservation conflict, backing off");

        backoff(&self.glob, self.list);
        bo.resv()
            .slow_reserve(ticket, self.interruptible)
            .map_err(ExecbufError::from)
    }

    fn commit(mut self) {
        if let Some(ticket) = self.ticket.as_deref_mut() {
            ticket.done();
        }
        del_from_lru_locked(&mut self.glob.lru(), self.list);
        apply_puts(self.list);
        self.armed = false;
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        backoff(&self.glob, self.list);
        if let Some(ticket) = self.ticket.as_deref_mut() {
            ticket.done();
            ticket.fini();
        }
        debug!(entries = self.list.len(), "validation set rolled back");
    }
}

fn check_cpu_writers<D: Driver>(bo: &BufferObject<D>) -> Result<(), ExecbufError> {
    if bo.cpu_writers() > 0 {
        return Err(ExecbufError::Busy {
            reason: BusyReason::CpuWriters,
        });
    }
    Ok(())
}

/// The reservation engine.
#[derive(Debug, Clone, Default)]
pub struct Execbuf {
    config: ExecbufConfig,
}

impl Execbuf {
    /// An engine using `config`.
    pub fn new(config: ExecbufConfig) -> Self {
        Self { config }
    }

    /// The engine configuration.
    pub fn config(&self) -> &ExecbufConfig {
        &self.config
    }

    /// Reserve every buffer object in `list`.
    ///
    /// With a ticket, `ticket` is initialized here and left live on success;
    /// finish the batch with [`fence`](Self::fence) or
    /// [`back_off`](Self::back_off). On success every entry is reserved and
    /// off the LRU. On failure nothing is reserved, nothing is missing from
    /// the LRU and the ticket is retired.
    ///
    /// All objects of a set must share the same globals.
    pub fn reserve<D: Driver>(
        &self,
        mut ticket: Option<&mut Ticket>,
        list: &mut [ValidateBuffer<D>],
    ) -> Result<(), ExecbufError> {
        let Some(first) = list.first() else {
            return Ok(());
        };
        let glob = Arc::clone(first.bo.glob());

        for entry in list.iter_mut() {
            entry.reserved = false;
            entry.removed = false;
            entry.put_count = 0;
        }
        if let Some(ticket) = ticket.as_deref_mut() {
            ticket.init(self.config.class);
        }

        let mut reservation = Reservation {
            glob,
            list,
            ticket,
            interruptible: self.config.interruptible,
            armed: true,
        };
        match reservation.acquire_all() {
            Ok(()) => {
                reservation.commit();
                Ok(())
            }
            Err(err) => {
                debug!(%err, "reserving validation set failed");
                Err(err)
            }
        }
    }

    /// Release a reserved set without fencing it and retire the ticket.
    ///
    /// Entries that are not reserved are skipped, so backing off a set that
    /// is already rolled back does nothing.
    pub fn back_off<D: Driver>(&self, ticket: Option<&mut Ticket>, list: &mut [ValidateBuffer<D>]) {
        let Some(first) = list.first() else {
            return;
        };
        let glob = Arc::clone(first.bo.glob());
        {
            let mut lru = glob.lru();
            backoff_locked(&mut lru, list);
            // Retire while the LRU lock is still held
            if let Some(ticket) = ticket {
                ticket.fini();
            }
        }
        apply_puts(list);
    }

    /// Attach `sync_obj` to every object in a reserved set, put them back on
    /// the LRU and release them.
    ///
    /// The swap of sync objects happens atomically with the LRU re-insertion,
    /// so anyone who finds an object on the LRU sees its new sync object. The
    /// replaced sync objects are released after all locks are dropped.
    pub fn fence<D: Driver>(
        &self,
        ticket: Option<&mut Ticket>,
        list: &mut [ValidateBuffer<D>],
        sync_obj: &D::SyncObj,
    ) {
        let Some(first) = list.first() else {
            return;
        };
        let device = Arc::clone(first.bo.device());
        let driver = device.driver();

        {
            let mut lru = device.glob().lru();
            let mut fence = device.fence_lock();
            for entry in list.iter_mut() {
                debug_assert!(entry.reserved, "fencing an entry that is not reserved");
                let slot = entry.bo.sync_obj_slot().get_mut(&mut fence);
                entry.old_sync_obj = std::mem::replace(slot, Some(driver.sync_obj_ref(sync_obj)));
                lru.add(&entry.bo);
                entry.bo.resv().unreserve();
                entry.reserved = false;
                entry.removed = false;
            }
        }
        if let Some(ticket) = ticket {
            ticket.fini();
        }

        for entry in list.iter_mut() {
            if entry.old_sync_obj.is_some() {
                driver.sync_obj_unref(&mut entry.old_sync_obj);
            }
        }
        apply_puts(list);
    }
}
