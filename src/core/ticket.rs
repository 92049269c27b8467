//! Ticket lock primitives
//!
//! A ticket lock is a spinlock that grants access in strict request order
//! across processors: each acquirer draws a ticket and spins until the
//! serving counter reaches it. [`TicketLock`] is the raw lock; it exists as
//! a standalone type (rather than only inside [`TicketMutex`]) because the
//! thread queue stores *pointers* to locks and moves a task's wait-state
//! guard between its default lock and a queue's lock.
//!
//! [`TicketMutex`] pairs a lock with the data it guards so the lock
//! discipline is enforced by the borrow checker instead of by convention.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use portable_atomic::{AtomicU32, Ordering};

/// Raw FIFO spinlock
pub struct TicketLock {
    next: AtomicU32,
    serving: AtomicU32,
}

impl TicketLock {
    pub const fn new() -> Self {
        TicketLock {
            next: AtomicU32::new(0),
            serving: AtomicU32::new(0),
        }
    }

    /// Acquire the lock, spinning in ticket order.
    #[inline]
    pub(crate) fn acquire(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
    }

    /// Try to acquire the lock without waiting.
    ///
    /// Fails if any ticket is outstanding, preserving FIFO fairness.
    #[inline]
    pub(crate) fn try_acquire(&self) -> bool {
        let serving = self.serving.load(Ordering::Relaxed);
        self.next
            .compare_exchange(serving, serving.wrapping_add(1), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock.
    ///
    /// Must only be called by the current holder.
    #[inline]
    pub(crate) fn release(&self) {
        self.serving.fetch_add(1, Ordering::Release);
    }

}

impl Default for TicketLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A cell whose contents may only be reached through its ticket lock
pub struct TicketMutex<T> {
    lock: TicketLock,
    value: UnsafeCell<T>,
}

// SAFETY: access to the inner value is serialized by the ticket lock.
unsafe impl<T: Send> Sync for TicketMutex<T> {}
unsafe impl<T: Send> Send for TicketMutex<T> {}

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        TicketMutex {
            lock: TicketLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock and return a guard borrowing the contents.
    #[inline]
    pub fn lock(&self) -> TicketGuard<'_, T> {
        self.lock.acquire();
        TicketGuard { mutex: self }
    }

    /// Try to acquire the lock without waiting.
    #[inline]
    pub fn try_lock(&self) -> Option<TicketGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(TicketGuard { mutex: self })
        } else {
            None
        }
    }
}

/// RAII guard for [`TicketMutex`]
pub struct TicketGuard<'a, T> {
    mutex: &'a TicketMutex<T>,
}

impl<T> Deref for TicketGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for TicketGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for TicketGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
