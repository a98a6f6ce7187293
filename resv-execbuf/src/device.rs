use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use resv::{LockConfig, ReserveMode, TTas, TTasGuard};
use tracing::error;

use crate::bo::BufferObject;
use crate::driver::Driver;
use crate::lru::LruRegistry;

/// State shared by every device using the same memory globals.
///
/// Owns the LRU lock. It is a spinlock: nothing that can block may run while
/// it is held, and no reservation is ever waited for under it.
pub struct BoGlobal<D: Driver> {
    lru: TTas<LruRegistry<D>>,
}

impl<D: Driver> BoGlobal<D> {
    /// Fresh globals with empty LRU lists.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lru: TTas::new(LruRegistry::new()),
        })
    }

    /// Take the LRU lock.
    #[inline]
    pub fn lru(&self) -> TTasGuard<'_, LruRegistry<D>> {
        self.lru.lock()
    }

    /// Whether somebody holds the LRU lock right now. Diagnostics only.
    pub fn is_lru_locked(&self) -> bool {
        self.lru.is_locked()
    }
}

impl<D: Driver> fmt::Debug for BoGlobal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoGlobal").field("lru", &self.lru).finish()
    }
}

/// One device: the driver, its fence lock and the globals it allocates from.
pub struct Device<D: Driver> {
    driver: D,
    glob: Arc<BoGlobal<D>>,
    fence_lock: TTas<()>,
    lock_config: LockConfig,
    next_id: AtomicU64,
}

impl<D: Driver> Device<D> {
    /// A device with default reservation tuning.
    pub fn new(driver: D, glob: Arc<BoGlobal<D>>) -> Arc<Self> {
        Self::with_lock_config(driver, glob, LockConfig::default())
    }

    /// A device whose buffer objects use `lock_config` for their reservations.
    pub fn with_lock_config(driver: D, glob: Arc<BoGlobal<D>>, lock_config: LockConfig) -> Arc<Self> {
        Arc::new(Self {
            driver,
            glob,
            fence_lock: TTas::new(()),
            lock_config,
            next_id: AtomicU64::new(1),
        })
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The globals this device allocates from.
    pub fn glob(&self) -> &Arc<BoGlobal<D>> {
        &self.glob
    }

    /// Take the device-wide fence lock.
    ///
    /// Nests inside the LRU lock, never the other way round.
    #[inline]
    pub fn fence_lock(&self) -> FenceGuard<'_> {
        FenceGuard {
            inner: self.fence_lock.lock(),
        }
    }

    /// Whether somebody holds the fence lock right now. Diagnostics only.
    pub fn is_fence_locked(&self) -> bool {
        self.fence_lock.is_locked()
    }

    /// Allocate a buffer object and put it on the LRU.
    pub fn create_bo(self: &Arc<Self>, swappable: bool) -> Arc<BufferObject<D>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bo = Arc::new(BufferObject::new(
            Arc::clone(self),
            id,
            swappable,
            self.lock_config,
            FenceCell::new(&self.fence_lock, None),
        ));
        // Nobody else can see the object yet, so this cannot fail
        let fresh = bo.resv().try_reserve(ReserveMode::NoWait, None);
        debug_assert_eq!(fresh, Ok(()), "new buffer object already reserved");
        if fresh.is_ok() {
            bo.unreserve();
        } else {
            error!(bo = id, "new buffer object could not be put on the LRU");
        }
        bo
    }
}

impl<D: Driver> fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("fence_lock", &self.fence_lock)
            .field("lock_config", &self.lock_config)
            .finish_non_exhaustive()
    }
}

/// Held fence lock of one device.
pub struct FenceGuard<'a> {
    inner: TTasGuard<'a, ()>,
}

/// Data protected by a device fence lock that lives outside the lock.
///
/// Access needs a [`FenceGuard`] of the owning device.
pub struct FenceCell<T> {
    lock: usize,
    value: UnsafeCell<T>,
}

// Only touched with the owning fence lock held.
unsafe impl<T: Send> Sync for FenceCell<T> {}

impl<T> FenceCell<T> {
    pub(crate) fn new(lock: &TTas<()>, value: T) -> Self {
        Self {
            lock: lock as *const TTas<()> as *const () as usize,
            value: UnsafeCell::new(value),
        }
    }

    /// Shared access under the fence lock.
    ///
    /// # Panics
    ///
    /// If `guard` belongs to another device's fence lock.
    pub fn get<'g>(&'g self, guard: &'g FenceGuard<'_>) -> &'g T {
        self.check(guard);
        // SAFETY: the owning fence lock is held for as long as `guard` is
        // borrowed and mutable access needs that guard exclusively.
        unsafe { &*self.value.get() }
    }

    /// Exclusive access under the fence lock.
    ///
    /// # Panics
    ///
    /// If `guard` belongs to another device's fence lock.
    pub fn get_mut<'g>(&'g self, guard: &'g mut FenceGuard<'_>) -> &'g mut T {
        self.check(guard);
        // SAFETY: see `get`; the guard is borrowed mutably so no other
        // reference obtained through it can be alive.
        unsafe { &mut *self.value.get() }
    }

    /// Exclusive access without locking.
    pub(crate) fn get_mut_unlocked(&mut self) -> &mut T {
        self.value.get_mut()
    }

    // `get` and `get_mut` are only sound under the owning lock.
    #[inline]
    fn check(&self, guard: &FenceGuard<'_>) {
        assert_eq!(guard.inner.lock_addr(), self.lock, "fence guard of a different device");
    }
}
