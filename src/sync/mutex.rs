//! Mutex implementation with priority inheritance
//!
//! Mutexes provide mutual exclusion with automatic priority boosting to
//! prevent priority inversion, and refuse acquisitions that would close a
//! cyclic ownership chain across processors.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicU32, Ordering};

use crate::critical::is_isr_context;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sync::threadq::{self, ThreadQueue};
use crate::types::{opt, OsNestingCtr, OsObjType, OsOpt, OsPendStatus, OsPrio, OsTaskId, OsTick};

/// Mutex with priority inheritance
pub struct OsMutex {
    /// Object type marker
    obj_type: AtomicU32,
    /// Wait queue; its owner field is the mutex owner
    queue: ThreadQueue,
    /// Nesting counter, guarded by the queue lock
    nesting: UnsafeCell<OsNestingCtr>,
}

// SAFETY: `nesting` is only touched while the queue lock is held.
unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

impl OsMutex {
    pub const fn new() -> Self {
        OsMutex {
            obj_type: AtomicU32::new(OsObjType::Mutex as u32),
            queue: ThreadQueue::new(),
            nesting: UnsafeCell::new(0),
        }
    }

    #[inline]
    fn check_type(&self) -> OsResult<()> {
        if self.obj_type.load(Ordering::Relaxed) != OsObjType::Mutex as u32 {
            return Err(OsError::ObjType);
        }
        Ok(())
    }

    /// Acquire the mutex.
    ///
    /// If the mutex is owned by a task of worse effective priority, the
    /// owner (and transitively whatever it waits on) inherits the caller's
    /// priority. If acquiring would complete a cyclic ownership chain the
    /// call fails with [`OsError::PendDeadlock`] instead of blocking.
    ///
    /// # Arguments
    /// * `task` - The calling task
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `pend_opt` - Pend options
    pub fn pend(
        &self,
        kernel: &Kernel,
        task: OsTaskId,
        timeout: OsTick,
        pend_opt: OsOpt,
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }
        self.check_type()?;
        kernel.tcb_checked(task)?;

        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let st = unsafe { self.queue.state_mut() };
        match st.owner {
            None => {
                st.owner = Some(task);
                // SAFETY: queue lock held.
                unsafe { *self.nesting.get() = 1 };
                self.queue.lock.release();
                return Ok(());
            }
            Some(owner) if owner == task => {
                // SAFETY: queue lock held.
                let nesting = unsafe { &mut *self.nesting.get() };
                if *nesting == OsNestingCtr::MAX {
                    self.queue.lock.release();
                    return Err(OsError::MutexOvf);
                }
                *nesting += 1;
                self.queue.lock.release();
                return Ok(());
            }
            Some(_) => {}
        }

        if pend_opt & opt::PEND_NON_BLOCKING != 0 {
            self.queue.lock.release();
            return Err(OsError::PendWouldBlock);
        }

        // Contended. Claim the wait state (this redirects the thread-state
        // lock to the queue), re-acquire, and re-check: the owner may have
        // released in the window.
        self.queue.lock.release();
        threadq::claim_wait(kernel, &self.queue, task);
        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let st = unsafe { self.queue.state_mut() };
        if st.owner.is_none() {
            st.owner = Some(task);
            // SAFETY: queue lock held.
            unsafe { *self.nesting.get() = 1 };
            threadq::unclaim_locked(kernel, task);
            self.queue.lock.release();
            return Ok(());
        }

        threadq::enqueue_locked(kernel, &self.queue, task, timeout)?;

        // On hardware this point is reached again when the task resumes.
        match kernel.tcb(task).pend_status() {
            OsPendStatus::Ok => Ok(()),
            OsPendStatus::Timeout => Err(OsError::Timeout),
            OsPendStatus::Abort => Err(OsError::PendAbort),
            OsPendStatus::Deadlock => Err(OsError::PendDeadlock),
        }
    }

    /// Release the mutex.
    ///
    /// Any inherited priority boost is dropped, the highest-priority
    /// waiter (FIFO among equals) is woken and becomes the new owner.
    pub fn post(&self, kernel: &Kernel, task: OsTaskId) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::AcceptIsr);
        }
        self.check_type()?;
        kernel.tcb_checked(task)?;

        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let st = unsafe { self.queue.state_mut() };
        if st.owner != Some(task) {
            self.queue.lock.release();
            return Err(OsError::MutexNotOwner);
        }

        // SAFETY: queue lock held.
        let nesting = unsafe { &mut *self.nesting.get() };
        if *nesting > 1 {
            *nesting -= 1;
            self.queue.lock.release();
            return Ok(());
        }
        *nesting = 0;

        if threadq::surrender_locked(kernel, &self.queue, task).is_some() {
            // SAFETY: queue lock held.
            unsafe { *self.nesting.get() = 1 };
        }
        self.queue.lock.release();
        Ok(())
    }

    /// Check if the mutex is owned
    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<OsTaskId> {
        self.queue.lock.acquire();
        // SAFETY: queue lock held.
        let owner = unsafe { self.queue.state_mut() }.owner;
        self.queue.lock.release();
        owner
    }

    /// Effective priority of the current owner
    pub fn owner_prio(&self, kernel: &Kernel) -> Option<OsPrio> {
        self.owner().map(|t| kernel.tcb(t).effective_prio())
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}
