//! TTAS (Test-Test-And-Set) spinlock.
//!
//! Used for the short, never-blocking critical sections of the reservation
//! machinery: the internal state of every reservation lock, the LRU lock and
//! the fence lock. Nothing that can park a thread may run under a [`TTas`].

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

/// A TTAS (Test-Test-And-Set) spinlock wrapping `T`.
pub struct TTas<T: ?Sized> {
    acquired: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for TTas<T> {}
unsafe impl<T: ?Sized + Send> Sync for TTas<T> {}

impl<T> TTas<T> {
    /// Create a new TTAS wrapping `data`.
    pub const fn new(data: T) -> Self {
        Self {
            acquired: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TTas<T> {
    /// Acquire the lock, spinning until it is free.
    #[inline]
    pub fn lock(&self) -> TTasGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            // Test phase: spin on relaxed load (stays in cache)
            while self.acquired.load(Ordering::Relaxed) {
                backoff.snooze();
            }
            // Test-and-set phase: attempt to acquire
            if !self.acquired.swap(true, Ordering::Acquire) {
                return TTasGuard { ttas: self };
            }
        }
    }

    /// Acquire the lock only if it is free right now.
    #[inline]
    pub fn try_lock(&self) -> Option<TTasGuard<'_, T>> {
        if self.acquired.load(Ordering::Relaxed) || self.acquired.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(TTasGuard { ttas: self })
    }

    /// Whether some thread currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for TTas<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for TTas<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TTas")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for the TTAS. Releases the lock on drop.
pub struct TTasGuard<'a, T: ?Sized> {
    ttas: &'a TTas<T>,
}

impl<T: ?Sized> TTasGuard<'_, T> {
    /// Address of the lock this guard belongs to.
    ///
    /// Lets data that lives outside the lock verify it is accessed under the
    /// right instance.
    #[inline]
    pub fn lock_addr(&self) -> usize {
        self.ttas as *const TTas<T> as *const () as usize
    }
}

impl<T: ?Sized> Deref for TTasGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.ttas.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TTasGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ttas.data.get() }
    }
}

impl<T: ?Sized> Drop for TTasGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.ttas.acquired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = TTas::new(0u32);
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn counts_under_contention() {
        const THREADS: usize = 4;
        const WORK: usize = 10_000;

        let lock = Arc::new(TTas::new(0usize));
        let handles = (0..THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..WORK {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(*lock.lock(), THREADS * WORK);
    }
}
