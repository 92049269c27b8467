//! Semaphore implementation
//!
//! Counting semaphores for task synchronization and resource counting.
//! Waiters queue on the same thread-queue mechanism as mutexes but there
//! is no ownership, hence no inheritance and no deadlock chain.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicU32, Ordering};

use crate::critical::is_isr_context;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sync::threadq::{self, ThreadQueue};
use crate::types::{opt, OsObjType, OsOpt, OsPendStatus, OsSemCtr, OsTaskId, OsTick};

/// Counting semaphore
pub struct OsSem {
    /// Object type marker
    obj_type: AtomicU32,
    /// Wait queue; never has an owner
    queue: ThreadQueue,
    /// Current count, guarded by the queue lock
    count: UnsafeCell<OsSemCtr>,
}

// SAFETY: `count` is only touched while the queue lock is held.
unsafe impl Send for OsSem {}
unsafe impl Sync for OsSem {}

impl OsSem {
    /// Create a new semaphore with an initial count
    pub const fn new(count: OsSemCtr) -> Self {
        OsSem {
            obj_type: AtomicU32::new(OsObjType::Sem as u32),
            queue: ThreadQueue::new(),
            count: UnsafeCell::new(count),
        }
    }

    #[inline]
    fn check_type(&self) -> OsResult<()> {
        if self.obj_type.load(Ordering::Relaxed) != OsObjType::Sem as u32 {
            return Err(OsError::ObjType);
        }
        Ok(())
    }

    /// Wait on (pend) the semaphore.
    ///
    /// # Returns
    /// * `Ok(count)` - Semaphore acquired, remaining count
    /// * `Err(OsError::Timeout)` - Timeout expired
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not available
    pub fn pend(
        &self,
        kernel: &Kernel,
        task: OsTaskId,
        timeout: OsTick,
        pend_opt: OsOpt,
    ) -> OsResult<OsSemCtr> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }
        self.check_type()?;
        kernel.tcb_checked(task)?;

        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let count = unsafe { &mut *self.count.get() };
        if *count > 0 {
            *count -= 1;
            let remaining = *count;
            self.queue.lock.release();
            return Ok(remaining);
        }

        if pend_opt & opt::PEND_NON_BLOCKING != 0 {
            self.queue.lock.release();
            return Err(OsError::PendWouldBlock);
        }

        // claim the wait state, re-acquire and re-check: a post may have
        // slipped in while the lock was dropped
        self.queue.lock.release();
        threadq::claim_wait(kernel, &self.queue, task);
        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let count = unsafe { &mut *self.count.get() };
        if *count > 0 {
            *count -= 1;
            let remaining = *count;
            threadq::unclaim_locked(kernel, task);
            self.queue.lock.release();
            return Ok(remaining);
        }

        threadq::enqueue_locked(kernel, &self.queue, task, timeout)?;

        match kernel.tcb(task).pend_status() {
            // a post handed the count straight to this waiter
            OsPendStatus::Ok => Ok(0),
            OsPendStatus::Timeout => Err(OsError::Timeout),
            OsPendStatus::Abort => Err(OsError::PendAbort),
            OsPendStatus::Deadlock => Err(OsError::PendDeadlock),
        }
    }

    /// Signal (post) the semaphore.
    ///
    /// Wakes the highest-priority waiter (FIFO among equals), or bumps the
    /// count when nobody waits.
    pub fn post(&self, kernel: &Kernel) -> OsResult<OsSemCtr> {
        self.check_type()?;

        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let st = unsafe { self.queue.state_mut() };
        if let Some(waiter) = st.min_waiter() {
            st.remove_waiter(waiter);
            threadq::wake_locked(kernel, waiter, OsPendStatus::Ok);
            // SAFETY: queue lock held.
            let count = unsafe { *self.count.get() };
            self.queue.lock.release();
            Ok(count)
        } else {
            // SAFETY: queue lock held.
            let count = unsafe { &mut *self.count.get() };
            if *count == OsSemCtr::MAX {
                self.queue.lock.release();
                return Err(OsError::SemOvf);
            }
            *count += 1;
            let new_count = *count;
            self.queue.lock.release();
            Ok(new_count)
        }
    }

    /// Get the current count
    pub fn count(&self) -> OsSemCtr {
        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let count = unsafe { *self.count.get() };
        self.queue.lock.release();
        count
    }

    /// Set the count
    pub fn set(&self, count: OsSemCtr) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::AcceptIsr);
        }
        self.check_type()?;
        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        unsafe { *self.count.get() = count };
        self.queue.lock.release();
        Ok(())
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0)
    }
}
