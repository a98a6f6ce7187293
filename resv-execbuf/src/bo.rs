use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use resv::{LockConfig, ReservationLock, ReserveError, ReserveMode, Ticket};
use tracing::trace;

use crate::device::{BoGlobal, Device, FenceCell};
use crate::driver::Driver;
use crate::kref::ListRef;
use crate::lru::LruLink;

/// A buffer object as seen by the reservation engine.
pub struct BufferObject<D: Driver> {
    id: u64,
    device: Arc<Device<D>>,
    resv: ReservationLock,
    cpu_writers: AtomicUsize,
    list_refs: ListRef,
    sync_obj: FenceCell<Option<D::SyncObj>>,
    swappable: bool,
    pub(crate) lru_link: LruLink,
    pub(crate) swap_link: LruLink,
}

impl<D: Driver> BufferObject<D> {
    pub(crate) fn new(
        device: Arc<Device<D>>,
        id: u64,
        swappable: bool,
        lock_config: LockConfig,
        sync_obj: FenceCell<Option<D::SyncObj>>,
    ) -> Self {
        Self {
            id,
            device,
            resv: ReservationLock::with_config(lock_config),
            cpu_writers: AtomicUsize::new(0),
            list_refs: ListRef::new(),
            sync_obj,
            swappable,
            lru_link: LruLink::new(),
            swap_link: LruLink::new(),
        }
    }

    /// Device-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning device.
    pub fn device(&self) -> &Arc<Device<D>> {
        &self.device
    }

    /// Globals whose LRU this object lives on.
    pub fn glob(&self) -> &Arc<BoGlobal<D>> {
        self.device.glob()
    }

    /// The reservation lock.
    pub fn resv(&self) -> &ReservationLock {
        &self.resv
    }

    /// LRU list references, base reference included.
    pub fn list_refs(&self) -> &ListRef {
        &self.list_refs
    }

    /// Whether the object also lives on the swap list.
    pub fn is_swappable(&self) -> bool {
        self.swappable
    }

    /// Number of CPU writers currently claiming the object.
    pub fn cpu_writers(&self) -> usize {
        self.cpu_writers.load(Ordering::Acquire)
    }

    /// Whether the object is on the main LRU list.
    pub fn is_on_lru(&self) -> bool {
        self.lru_link.get().is_some()
    }

    /// Slot holding the last attached sync object.
    pub fn sync_obj_slot(&self) -> &FenceCell<Option<D::SyncObj>> {
        &self.sync_obj
    }

    /// A new reference to the attached sync object, if any.
    pub fn sync_obj(&self) -> Option<D::SyncObj> {
        let driver = self.device.driver();
        let fence = self.device.fence_lock();
        self.sync_obj.get(&fence).as_ref().map(|s| driver.sync_obj_ref(s))
    }

    /// No sync object attached, or the attached one has signaled.
    pub fn is_idle(&self) -> bool {
        let driver = self.device.driver();
        let fence = self.device.fence_lock();
        self.sync_obj
            .get(&fence)
            .as_ref()
            .is_none_or(|s| driver.sync_obj_signaled(s))
    }

    /// Reserve the object and take it off the LRU.
    pub fn reserve(
        &self,
        interruptible: bool,
        no_wait: bool,
        ticket: Option<&Ticket>,
    ) -> Result<(), ReserveError> {
        self.resv
            .try_reserve(ReserveMode::from_flags(interruptible, no_wait), ticket)?;

        let put_count = self.glob().lru().remove(self);
        self.list_refs.sub(put_count);
        Ok(())
    }

    /// Put the object back on the LRU and release the reservation.
    pub fn unreserve(self: &Arc<Self>) {
        let glob = Arc::clone(self.glob());
        let mut lru = glob.lru();
        lru.add(self);
        self.resv.unreserve();
    }

    /// Claim the object for a CPU writer.
    ///
    /// Waits for a current reservation to go away, or fails with
    /// [`ReserveError::Busy`] when `no_wait` is set. While claimed, any
    /// attempt to reserve the object for validation fails as busy.
    pub fn cpu_write_grab(self: &Arc<Self>, no_wait: bool) -> Result<(), ReserveError> {
        self.reserve(true, no_wait, None)?;
        let writers = self.cpu_writers.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(bo = self.id, writers, "cpu write grab");
        self.unreserve();
        Ok(())
    }

    /// Drop a CPU writer claim taken with [`cpu_write_grab`](Self::cpu_write_grab).
    pub fn cpu_write_release(&self) {
        let prev = self.cpu_writers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "cpu write release without grab");
        trace!(bo = self.id, writers = prev - 1, "cpu write release");
    }
}

impl<D: Driver> Drop for BufferObject<D> {
    fn drop(&mut self) {
        if self.lru_link.get().is_some() || self.swap_link.get().is_some() {
            let glob = Arc::clone(self.device.glob());
            glob.lru().unlink(self);
        }
        let device = Arc::clone(&self.device);
        let slot = self.sync_obj.get_mut_unlocked();
        if slot.is_some() {
            device.driver().sync_obj_unref(slot);
        }
    }
}

impl<D: Driver> fmt::Debug for BufferObject<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id)
            .field("resv", &self.resv)
            .field("cpu_writers", &self.cpu_writers())
            .field("list_refs", &self.list_refs.count())
            .field("on_lru", &self.is_on_lru())
            .field("swappable", &self.swappable)
            .finish()
    }
}
