//! Task Control Block (TCB) definition
//!
//! The TCB carries the task's identity, its base and effective priority,
//! and the wait-state fields used by the thread queues. Scheduler-visible
//! state (node state, ready-queue linkage, processor assignment) lives in
//! the scheduler core instead, under the scheduler lock.
//!
//! Wait-state locking: every TCB owns a default ticket lock, and
//! `wait_lock` names the lock that currently guards the wait-state fields
//! (`pend_obj`, `pend_status`, `wait_gen`, the priority pair). A null
//! pointer means the default lock. While the task is enqueued on a thread
//! queue, `wait_lock` points at that queue's lock, so an operation racing
//! in from another processor serializes against the extraction instead of
//! reading stale state.

use core::cell::Cell;
use core::ptr;

use portable_atomic::{AtomicBool, AtomicPtr, AtomicU16, AtomicU8, Ordering};

use crate::ticket::TicketLock;
use crate::timer::OsTimer;
use crate::types::{OsCpu, OsPendStatus, OsPrio};

/// Task Control Block
pub struct OsTcb {
    // ============ Identification ============
    /// Task name
    name: Cell<&'static str>,
    /// Slot in use
    alive: AtomicBool,

    // ============ Priority ============
    /// Base priority, the one assigned by the application
    base_prio: AtomicU8,
    /// Effective priority, possibly boosted by inheritance
    effective_prio: AtomicU8,

    // ============ Processor ============
    /// Home processor, used to place the timeout timer
    cpu: AtomicU8,

    // ============ Wait state ============
    /// Object this task is pending on (type-erased thread queue)
    pend_obj: AtomicPtr<()>,
    /// Result of the last pend
    pend_status: AtomicU8,
    /// Wait generation; stale timeouts compare against it and stand down
    wait_gen: AtomicU16,

    // ============ Thread-state lock ============
    /// Lock currently guarding the wait state; null means `default_lock`
    wait_lock: AtomicPtr<TicketLock>,
    /// The task's own wait-state lock
    pub(crate) default_lock: TicketLock,

    // ============ Timeout ============
    /// Embedded timeout timer
    pub(crate) timeout_timer: OsTimer,
}

// SAFETY: non-atomic fields are written only before the slot becomes
// visible (under the pool lock) or under the wait-lock discipline above.
unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}

impl OsTcb {
    pub(crate) const fn new() -> Self {
        OsTcb {
            name: Cell::new(""),
            alive: AtomicBool::new(false),
            base_prio: AtomicU8::new(0),
            effective_prio: AtomicU8::new(0),
            cpu: AtomicU8::new(0),
            pend_obj: AtomicPtr::new(ptr::null_mut()),
            pend_status: AtomicU8::new(OsPendStatus::Ok as u8),
            wait_gen: AtomicU16::new(0),
            wait_lock: AtomicPtr::new(ptr::null_mut()),
            default_lock: TicketLock::new(),
            timeout_timer: OsTimer::new(),
        }
    }

    /// Reset the slot for a new task. Called under the pool lock before
    /// the task id is handed out.
    pub(crate) fn init(&self, name: &'static str, prio: OsPrio, cpu: OsCpu) {
        self.name.set(name);
        self.base_prio.store(prio, Ordering::Relaxed);
        self.effective_prio.store(prio, Ordering::Relaxed);
        self.cpu.store(cpu, Ordering::Relaxed);
        self.pend_obj.store(ptr::null_mut(), Ordering::Relaxed);
        self.pend_status.store(OsPendStatus::Ok as u8, Ordering::Relaxed);
        self.wait_lock.store(ptr::null_mut(), Ordering::Relaxed);
        self.alive.store(true, Ordering::Release);
    }

    pub(crate) fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }

    // ============ Accessors ============

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    #[inline]
    pub fn base_prio(&self) -> OsPrio {
        self.base_prio.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_base_prio(&self, prio: OsPrio) {
        self.base_prio.store(prio, Ordering::Relaxed);
    }

    #[inline]
    pub fn effective_prio(&self) -> OsPrio {
        self.effective_prio.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_effective_prio(&self, prio: OsPrio) {
        self.effective_prio.store(prio, Ordering::Relaxed);
    }

    #[inline]
    pub fn cpu(&self) -> OsCpu {
        self.cpu.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pend_status(&self) -> OsPendStatus {
        match self.pend_status.load(Ordering::Acquire) {
            0 => OsPendStatus::Ok,
            1 => OsPendStatus::Abort,
            2 => OsPendStatus::Timeout,
            _ => OsPendStatus::Deadlock,
        }
    }

    #[inline]
    pub(crate) fn set_pend_status(&self, status: OsPendStatus) {
        self.pend_status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn pend_obj(&self) -> *mut () {
        self.pend_obj.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_pend_obj(&self, obj: *mut ()) {
        self.pend_obj.store(obj, Ordering::Release);
    }

    #[inline]
    pub(crate) fn wait_gen(&self) -> u16 {
        self.wait_gen.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn bump_wait_gen(&self) -> u16 {
        self.wait_gen.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    // ============ Thread-state lock handoff ============

    /// The lock currently guarding this task's wait state, as a raw
    /// pointer (null resolved to the default lock).
    #[inline]
    pub(crate) fn wait_lock_target(&self) -> *const TicketLock {
        let raw = self.wait_lock.load(Ordering::Acquire);
        if raw.is_null() {
            &self.default_lock
        } else {
            raw
        }
    }

    /// Point the wait-state guard at a queue's lock.
    ///
    /// Must be called with the default lock held, before the task is
    /// inserted into the queue.
    #[inline]
    pub(crate) fn wait_lock_redirect(&self, lock: *const TicketLock) {
        self.wait_lock.store(lock as *mut TicketLock, Ordering::Release);
    }

    /// Restore the wait-state guard to the default lock.
    ///
    /// Must be called with the queue's lock held, after the extraction is
    /// complete. This store is what lets a priority change blocked on the
    /// queue lock proceed against fresh state.
    #[inline]
    pub(crate) fn wait_lock_restore(&self) {
        self.wait_lock.store(ptr::null_mut(), Ordering::Release);
    }

    /// Acquire whichever lock currently guards the wait state.
    ///
    /// Re-reads the pointer after acquiring and retries if the guard moved
    /// in the meantime, so exactly one of the two racing orders is ever
    /// observed.
    ///
    /// Returns the acquired lock; release it with [`OsTcb::wait_lock_release`].
    pub(crate) fn wait_lock_acquire(&self) -> *const TicketLock {
        loop {
            let target = self.wait_lock_target();
            // SAFETY: a queue whose lock is installed here outlives the
            // wait (caller contract on queue lifetime).
            unsafe { (*target).acquire() };
            if core::ptr::eq(self.wait_lock_target(), target) {
                return target;
            }
            unsafe { (*target).release() };
        }
    }

    /// Try-acquire variant used by the ownership-chain walk.
    pub(crate) fn wait_lock_try_acquire(&self) -> Option<*const TicketLock> {
        let target = self.wait_lock_target();
        // SAFETY: as in `wait_lock_acquire`.
        if !unsafe { (*target).try_acquire() } {
            return None;
        }
        if core::ptr::eq(self.wait_lock_target(), target) {
            Some(target)
        } else {
            unsafe { (*target).release() };
            None
        }
    }

    /// Release a lock obtained from one of the acquire methods.
    #[inline]
    pub(crate) fn wait_lock_release(&self, lock: *const TicketLock) {
        // SAFETY: `lock` was returned by an acquire above and is held.
        unsafe { (*lock).release() };
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}
