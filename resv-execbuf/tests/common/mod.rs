#![allow(dead_code)]

use resv_execbuf::{BoGlobal, BufferObject, Device, Driver, ValidateBuffer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Completion token handed out by [`MockDriver`].
#[derive(Debug)]
pub struct MockFence {
    pub seqno: u64,
    pub signaled: AtomicBool,
}

pub type Fence = Arc<MockFence>;

pub fn fence(seqno: u64) -> Fence {
    Arc::new(MockFence {
        seqno,
        signaled: AtomicBool::new(false),
    })
}

/// Driver whose sync objects are `Arc`s, so reference counts are observable.
#[derive(Default)]
pub struct MockDriver {
    pub refs: AtomicUsize,
    pub unrefs: AtomicUsize,
    /// Unrefs that ran while an engine lock was held. Only meaningful
    /// while a single thread uses the device.
    pub unrefs_under_lock: AtomicUsize,
    lock_probe: OnceLock<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl Driver for MockDriver {
    type SyncObj = Fence;

    fn sync_obj_ref(&self, sync_obj: &Fence) -> Fence {
        self.refs.fetch_add(1, Ordering::SeqCst);
        Arc::clone(sync_obj)
    }

    fn sync_obj_unref(&self, slot: &mut Option<Fence>) {
        if self.lock_probe.get().is_some_and(|locked| locked()) {
            self.unrefs_under_lock.fetch_add(1, Ordering::SeqCst);
        }
        if slot.take().is_some() {
            self.unrefs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sync_obj_signaled(&self, sync_obj: &Fence) -> bool {
        sync_obj.signaled.load(Ordering::SeqCst)
    }
}

pub type Bo = Arc<BufferObject<MockDriver>>;

pub fn device() -> Arc<Device<MockDriver>> {
    let glob = BoGlobal::new();
    let dev = Device::new(MockDriver::default(), glob.clone());
    let (weak_glob, weak_dev) = (Arc::downgrade(&glob), Arc::downgrade(&dev));
    let _ = dev.driver().lock_probe.set(Box::new(move || {
        weak_glob.upgrade().is_some_and(|g| g.is_lru_locked())
            || weak_dev.upgrade().is_some_and(|d| d.is_fence_locked())
    }));
    dev
}

pub fn bos(dev: &Arc<Device<MockDriver>>, n: usize) -> Vec<Bo> {
    (0..n).map(|_| dev.create_bo(false)).collect()
}

pub fn validation_set(bos: &[Bo]) -> Vec<ValidateBuffer<MockDriver>> {
    bos.iter().cloned().map(ValidateBuffer::new).collect()
}

/// The object is free and back on the LRU.
pub fn assert_released(bo: &Bo) {
    assert!(!bo.resv().is_reserved(), "bo {} still reserved", bo.id());
    assert!(bo.is_on_lru(), "bo {} missing from the LRU", bo.id());
}

pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        thread::sleep(Duration::from_millis(1));
    }
}
