//! Thread queue: the priority-ordered wait list behind every blocking
//! synchronization object
//!
//! A [`ThreadQueue`] pairs a raw ticket lock with the queue state it
//! guards. The lock is raw (not a `TicketMutex`) because the thread-state
//! lock handoff stores a pointer to it in the waiter's TCB: while a task
//! is enqueued here, this queue's lock *is* the lock guarding that task's
//! wait state. See [`crate::task::OsTcb`] for the handoff rules.
//!
//! Lock order: thread-queue locks in ownership-chain order, then task
//! default locks, then the scheduler lock. Watchdog locks are leaves and
//! are never held across any of the others.

use core::cell::UnsafeCell;
use core::ptr;

use crate::config::CFG_TASK_MAX;
use crate::error::{OsError, OsResult};
use crate::kernel::{pack_wait, unpack_wait, Kernel};
use crate::rbtree::{RbNode, RbTree};
use crate::ticket::TicketLock;
use crate::timer;
use crate::types::{OsPendStatus, OsPlacement, OsPrio, OsTaskId, OsTick};

/// Queue state guarded by the queue's ticket lock
pub(crate) struct ThreadQueueState {
    tree: RbTree,
    rb: [RbNode<u64>; CFG_TASK_MAX],
    /// Owning task, for objects with ownership semantics
    pub(crate) owner: Option<OsTaskId>,
    seq_back: u32,
}

impl ThreadQueueState {
    const fn new() -> Self {
        ThreadQueueState {
            tree: RbTree::new(),
            rb: [RbNode::zeroed(); CFG_TASK_MAX],
            owner: None,
            seq_back: 0,
        }
    }

    /// Insert ordered by effective priority, FIFO among equals.
    pub(crate) fn insert_waiter(&mut self, task: OsTaskId, prio: OsPrio) {
        let seq = self.seq_back;
        self.seq_back = self.seq_back.wrapping_add(1);
        self.rb[task.index()].key = ((prio as u64) << 32) | seq as u64;
        self.tree.insert(&mut self.rb, task.0, |a, b| a < b);
    }

    pub(crate) fn remove_waiter(&mut self, task: OsTaskId) {
        self.tree.extract(&mut self.rb, task.0);
    }

    #[inline]
    pub(crate) fn is_waiter(&self, task: OsTaskId) -> bool {
        self.rb[task.index()].is_linked()
    }

    /// The highest-priority waiter (smallest key).
    #[inline]
    pub(crate) fn min_waiter(&self) -> Option<OsTaskId> {
        self.tree.minimum(&self.rb).map(OsTaskId)
    }

    /// Re-position a waiter after its effective priority changed. A task
    /// that has claimed the queue but is not inserted yet is left alone;
    /// its insertion will pick up the new priority.
    pub(crate) fn requeue(&mut self, task: OsTaskId, prio: OsPrio) {
        if self.is_waiter(task) {
            self.remove_waiter(task);
            self.insert_waiter(task, prio);
        }
    }

}

/// A wait queue attached to a synchronization object
pub struct ThreadQueue {
    pub(crate) lock: TicketLock,
    state: UnsafeCell<ThreadQueueState>,
}

// SAFETY: `state` is only reached through `state_mut` while `lock` is held.
unsafe impl Send for ThreadQueue {}
unsafe impl Sync for ThreadQueue {}

impl ThreadQueue {
    pub const fn new() -> Self {
        ThreadQueue {
            lock: TicketLock::new(),
            state: UnsafeCell::new(ThreadQueueState::new()),
        }
    }

    #[inline]
    pub(crate) fn lock_ptr(&self) -> *const TicketLock {
        &self.lock
    }

    /// # Safety
    /// The queue lock must be held.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn state_mut(&self) -> &mut ThreadQueueState {
        unsafe { &mut *self.state.get() }
    }
}

impl Default for ThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Enqueue ============

/// Claim the calling task's wait state for `q`.
///
/// Redirects the thread-state lock to the queue's lock *before* the task
/// appears in the waiter tree, so a concurrent priority change serializes
/// on the queue lock rather than proceeding against stale state. Must be
/// called without the queue lock held.
pub(crate) fn claim_wait(kernel: &Kernel, q: &ThreadQueue, task: OsTaskId) {
    let tcb = kernel.tcb(task);
    tcb.default_lock.acquire();
    tcb.bump_wait_gen();
    tcb.set_pend_status(OsPendStatus::Ok);
    tcb.set_pend_obj(q as *const ThreadQueue as *mut ());
    tcb.wait_lock_redirect(q.lock_ptr());
    tcb.default_lock.release();
}

/// Undo a claim while holding the queue lock (the contended case resolved
/// itself before blocking was necessary).
pub(crate) fn unclaim_locked(kernel: &Kernel, task: OsTaskId) {
    let tcb = kernel.tcb(task);
    tcb.set_pend_obj(ptr::null_mut());
    tcb.wait_lock_restore();
}

/// Enqueue a claimed task and block it.
///
/// Entered with the queue lock held; returns with it released. The waiter
/// is inserted by effective priority, the ownership chain is walked for
/// deadlocks and priority inheritance, and the task transitions to
/// BLOCKED while the queue lock is still held so a racing release cannot
/// lose the wakeup. The timeout timer is armed last.
pub(crate) fn enqueue_locked(
    kernel: &Kernel,
    q: &ThreadQueue,
    task: OsTaskId,
    timeout: OsTick,
) -> OsResult<()> {
    let tcb = kernel.tcb(task);
    debug_assert!(ptr::eq(tcb.pend_obj() as *const ThreadQueue, q), "enqueue without claim");

    let eff = tcb.effective_prio();
    let gen = tcb.wait_gen();
    {
        // SAFETY: queue lock held.
        let st = unsafe { q.state_mut() };
        debug_assert_ne!(st.owner, Some(task), "task enqueueing on its own object");
        st.insert_waiter(task, eff);
    }

    if let Err(e) = chain_walk(kernel, q, task, eff) {
        crate::warn!("deadlock detected, pend refused");
        // SAFETY: queue lock held.
        unsafe { q.state_mut() }.remove_waiter(task);
        tcb.set_pend_status(OsPendStatus::Deadlock);
        unclaim_locked(kernel, task);
        q.lock.release();
        return Err(e);
    }

    let outcome = { kernel.sched.lock().block(task) };
    q.lock.release();
    kernel.apply_outcome(outcome);

    if timeout > 0 {
        timer::arm_after(
            kernel,
            Kernel::timeout_timer_id(task),
            tcb.cpu(),
            timeout,
            timeout_expired,
            pack_wait(task, gen),
        );
    }
    Ok(())
}

// ============ Ownership chain walk ============

#[derive(Clone, Copy)]
struct ChainEntry {
    owner: OsTaskId,
    lock: *const TicketLock,
    /// Queue the owner is blocked on, null if it is runnable
    obj: *mut (),
}

impl ChainEntry {
    const EMPTY: ChainEntry = ChainEntry {
        owner: OsTaskId(0),
        lock: ptr::null(),
        obj: ptr::null_mut(),
    };
}

/// Walk the "task X waits for task Y" chain starting at `q`'s owner,
/// holding each queue lock along the way.
///
/// Detects cycles back to `waiter` (deadlock) and applies priority
/// inheritance to every owner in the chain that runs at a worse effective
/// priority than `waiter`. Chain links are read only under the respective
/// queue locks; the walk rides links other processors created. A failed
/// try-acquire releases the whole chain (never the caller's own queue
/// lock) and restarts, so two concurrent walks cannot block each other.
fn chain_walk(kernel: &Kernel, q: &ThreadQueue, waiter: OsTaskId, boost: OsPrio) -> OsResult<()> {
    'restart: loop {
        let mut chain = [ChainEntry::EMPTY; CFG_TASK_MAX];
        let mut chain_len = 0usize;
        let mut visited: u32 = 1 << waiter.0;
        let mut deadlock = false;

        // SAFETY: caller holds q's lock.
        let mut cur_owner = unsafe { q.state_mut() }.owner;

        while let Some(owner) = cur_owner {
            if owner == waiter {
                deadlock = true;
                break;
            }
            if visited & (1 << owner.0) != 0 {
                // a cycle that does not involve the waiter; someone
                // else's problem, and the walk must still terminate
                break;
            }
            visited |= 1 << owner.0;

            let otcb = kernel.tcb(owner);
            let target = otcb.wait_lock_target();
            if ptr::eq(target, q.lock_ptr()) {
                // would re-enter the lock the caller already holds; the
                // invariants make this unreachable, but never spin on it
                debug_assert!(false, "ownership chain re-entered the origin queue");
                break;
            }
            let lock = match otcb.wait_lock_try_acquire() {
                Some(lock) => lock,
                None => {
                    release_chain(&chain[..chain_len]);
                    core::hint::spin_loop();
                    continue 'restart;
                }
            };

            let obj = otcb.pend_obj();
            chain[chain_len] = ChainEntry { owner, lock, obj };
            chain_len += 1;

            if obj.is_null() {
                // first owner that is not itself blocked: chain ends
                break;
            }
            let oq = obj as *const ThreadQueue;
            // SAFETY: the owner's wait lock is that queue's lock and we
            // hold it, per the handoff.
            cur_owner = unsafe { (*oq).state_mut() }.owner;
        }

        if deadlock {
            release_chain(&chain[..chain_len]);
            return Err(OsError::PendDeadlock);
        }

        // Inheritance pass over the captured chain: boost every owner
        // running at a worse effective priority; stop once nothing
        // changes, since deeper owners already inherit through their own
        // waiters.
        for entry in &chain[..chain_len] {
            let otcb = kernel.tcb(entry.owner);
            if otcb.effective_prio() <= boost {
                break;
            }
            otcb.set_effective_prio(boost);
            if entry.obj.is_null() {
                let outcome = {
                    kernel
                        .sched
                        .lock()
                        .update_priority(entry.owner, boost, OsPlacement::Head)
                };
                kernel.apply_outcome(outcome);
            } else {
                let oq = entry.obj as *const ThreadQueue;
                // SAFETY: this queue's lock is held via the chain.
                unsafe { (*oq).state_mut() }.requeue(entry.owner, boost);
            }
        }

        release_chain(&chain[..chain_len]);
        return Ok(());
    }
}

fn release_chain(chain: &[ChainEntry]) {
    for entry in chain.iter().rev() {
        // SAFETY: every recorded lock is held by this walk.
        unsafe { (*entry.lock).release() };
    }
}

// ============ Wakeup paths ============

/// Wake a task that was just removed from `q`'s waiter tree.
///
/// Called with the queue lock held. Restores the thread-state lock to the
/// task's default lock (the signal that lets a parked priority change
/// proceed), invalidates stale timeouts, cancels the timeout timer, and
/// unblocks the task through the scheduler.
pub(crate) fn wake_locked(kernel: &Kernel, task: OsTaskId, status: OsPendStatus) {
    let tcb = kernel.tcb(task);
    tcb.set_pend_status(status);
    tcb.set_pend_obj(ptr::null_mut());
    tcb.bump_wait_gen();
    tcb.wait_lock_restore();
    timer::cancel(kernel, Kernel::timeout_timer_id(task));
    let outcome = { kernel.sched.lock().unblock(task) };
    kernel.apply_outcome(outcome);
}

/// Release an owned object: wake the highest-priority waiter and transfer
/// ownership to it.
///
/// Called with the queue lock held; the caller must be the owner. The
/// releasing task's effective priority reverts to its base priority.
pub(crate) fn surrender_locked(
    kernel: &Kernel,
    q: &ThreadQueue,
    releasing: OsTaskId,
) -> Option<OsTaskId> {
    // SAFETY: queue lock held.
    let st = unsafe { q.state_mut() };
    debug_assert_eq!(st.owner, Some(releasing), "surrender by non-owner");

    // drop any inherited boost
    let tcb = kernel.tcb(releasing);
    tcb.default_lock.acquire();
    let base = tcb.base_prio();
    if tcb.effective_prio() != base {
        tcb.set_effective_prio(base);
        let outcome = { kernel.sched.lock().update_priority(releasing, base, OsPlacement::Tail) };
        kernel.apply_outcome(outcome);
    }
    tcb.default_lock.release();

    match st.min_waiter() {
        Some(next) => {
            st.remove_waiter(next);
            st.owner = Some(next);
            wake_locked(kernel, next, OsPendStatus::Ok);
            Some(next)
        }
        None => {
            st.owner = None;
            None
        }
    }
}

/// Forced extraction of a task from whatever queue it waits on (task
/// deletion, signal delivery). Safe to call when the task is not waiting;
/// it becomes a no-op. Returns whether the task was extracted.
///
/// `resume` selects whether the task is unblocked afterwards; deletion
/// passes false and disposes of the scheduler node itself.
pub(crate) fn extract_task(
    kernel: &Kernel,
    task: OsTaskId,
    status: OsPendStatus,
    resume: bool,
) -> bool {
    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();
    let obj = tcb.pend_obj();
    if obj.is_null() {
        tcb.wait_lock_release(lockp);
        return false;
    }
    let q = obj as *const ThreadQueue;
    // the handoff guarantees the lock we hold is the queue's lock
    debug_assert!(ptr::eq(lockp, unsafe { (*q).lock_ptr() }));

    // SAFETY: queue lock held (via the handoff).
    let st = unsafe { (*q).state_mut() };
    if st.is_waiter(task) {
        st.remove_waiter(task);
    }
    if resume {
        wake_locked(kernel, task, status);
    } else {
        tcb.set_pend_status(status);
        tcb.set_pend_obj(ptr::null_mut());
        tcb.bump_wait_gen();
        tcb.wait_lock_restore();
        timer::cancel(kernel, Kernel::timeout_timer_id(task));
    }
    tcb.wait_lock_release(lockp);
    true
}

/// Re-position a blocked task in its queue after a priority change, then
/// push the new priority down the ownership chain.
///
/// Called from the priority-change path with the task's wait lock held,
/// which for a blocked task is exactly the queue's lock.
pub(crate) fn reposition_waiter(kernel: &Kernel, obj: *mut (), task: OsTaskId, prio: OsPrio) {
    let q = obj as *const ThreadQueue;
    // SAFETY: the caller holds the queue lock via the wait-lock handoff.
    unsafe { (*q).state_mut() }.requeue(task, prio);
    // a failed walk here means the chain is being torn down concurrently;
    // the inheritance it would have applied is applied by the tearing-down
    // side instead
    let _ = chain_walk(kernel, unsafe { &*q }, task, prio);
}

/// Timeout routine armed by [`enqueue_locked`]. The generation check makes
/// a stale firing (the task was already released and moved on) stand down.
fn timeout_expired(kernel: &Kernel, arg: usize) {
    let (task, gen) = unpack_wait(arg);
    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();
    if tcb.wait_gen() != gen {
        tcb.wait_lock_release(lockp);
        return;
    }
    let obj = tcb.pend_obj();
    if obj.is_null() {
        tcb.wait_lock_release(lockp);
        return;
    }
    let q = obj as *const ThreadQueue;
    // SAFETY: queue lock held via the handoff.
    let st = unsafe { (*q).state_mut() };
    if st.is_waiter(task) {
        st.remove_waiter(task);
    }
    wake_locked(kernel, task, OsPendStatus::Timeout);
    tcb.wait_lock_release(lockp);
}
