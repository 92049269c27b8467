//! Task management module
//!
//! Provides task creation, deletion, and control functions. Every
//! operation takes the kernel context explicitly; the calling task is
//! named rather than implied so the same code drives any processor.

mod tcb;

pub use tcb::OsTcb;

use crate::config::{CFG_CPU_MAX, CFG_PRIO_MAX, CFG_TASK_MAX};
use crate::critical::is_isr_context;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::sync::threadq;
use crate::timer;
use crate::types::{OsCpu, OsPendStatus, OsPlacement, OsPrio, OsTaskId};

/// Create a new task
///
/// Allocates a TCB slot, initializes the scheduler node and enqueues the
/// task, which may immediately displace a scheduled task on some
/// processor.
///
/// # Arguments
/// * `name` - Task name for debugging
/// * `prio` - Task priority (0 = highest)
/// * `cpu` - Home processor, used to place the task's timeout timer
pub fn os_task_create(
    kernel: &Kernel,
    name: &'static str,
    prio: OsPrio,
    cpu: OsCpu,
) -> OsResult<OsTaskId> {
    if is_isr_context() {
        return Err(OsError::TaskCreateIsr);
    }
    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }
    if cpu as usize >= CFG_CPU_MAX {
        return Err(OsError::CpuInvalid);
    }

    let slot = {
        let mut pool = kernel.pool.lock();
        let free = !pool.task_alive & (((1u64 << CFG_TASK_MAX) - 1) as u32);
        if free == 0 {
            return Err(OsError::TaskNoMoreTcb);
        }
        let slot = free.trailing_zeros() as u16;
        pool.task_alive |= 1 << slot;
        // initialize before the id escapes the pool lock
        kernel.tcbs[slot as usize].init(name, prio, cpu);
        slot
    };
    let task = OsTaskId(slot);

    let outcome = {
        let mut sched = kernel.sched.lock();
        sched.node_init(task, prio);
        sched.enqueue(task, OsPlacement::Tail)
    };
    kernel.apply_outcome(outcome);

    crate::trace!("task created: prio {}", prio);
    Ok(task)
}

/// Delete a task
///
/// The task is pulled off any thread queue it waits on, its timeout timer
/// is canceled, and its scheduler node is removed. Safe against the
/// deadline-timer and ready-queue walks: every removal happens under the
/// corresponding lock.
pub fn os_task_del(kernel: &Kernel, task: OsTaskId) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskDelIsr);
    }
    kernel.tcb_checked(task)?;

    // forced extraction from whatever it waits on; does not resume it
    threadq::extract_task(kernel, task, OsPendStatus::Abort, false);

    // invalidate a plain delay that may still be armed
    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();
    tcb.bump_wait_gen();
    tcb.wait_lock_release(lockp);
    timer::cancel(kernel, Kernel::timeout_timer_id(task));

    let outcome = { kernel.sched.lock().node_destroy(task) };
    kernel.apply_outcome(outcome);

    tcb.retire();
    kernel.pool.lock().task_alive &= !(1 << task.0);

    crate::trace!("task deleted");
    Ok(())
}

/// Change a task's base priority
///
/// The effective priority keeps an active inheritance boost when the
/// boost is stronger than the new base. The change is applied through the
/// task's thread-state lock, so it serializes against a concurrent
/// extraction on another processor: for a blocked task the waiter tree is
/// re-ordered and the new priority propagates down the ownership chain;
/// otherwise the scheduler re-evaluates the node.
pub fn os_task_set_prio(kernel: &Kernel, task: OsTaskId, new_prio: OsPrio) -> OsResult<()> {
    if new_prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }
    kernel.tcb_checked(task)?;

    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();

    let base_old = tcb.base_prio();
    let eff_old = tcb.effective_prio();
    tcb.set_base_prio(new_prio);
    let eff_new = if eff_old == base_old {
        new_prio
    } else {
        // boosted: the stronger of boost and new base wins
        eff_old.min(new_prio)
    };

    if eff_new != eff_old {
        tcb.set_effective_prio(eff_new);
        let obj = tcb.pend_obj();
        if obj.is_null() {
            let placement = if eff_new < eff_old {
                OsPlacement::Head
            } else {
                OsPlacement::Tail
            };
            let outcome = { kernel.sched.lock().update_priority(task, eff_new, placement) };
            kernel.apply_outcome(outcome);
        } else {
            // blocked: the lock we hold is the queue's lock
            threadq::reposition_waiter(kernel, obj, task, eff_new);
        }
    }

    tcb.wait_lock_release(lockp);
    Ok(())
}

/// Abort a task's pend
///
/// Forced extraction for signal delivery: the waiter is removed from its
/// thread queue and resumed with [`OsPendStatus::Abort`]. Safe to call on
/// a task that is not pending; returns whether anything was extracted.
pub fn os_task_pend_abort(kernel: &Kernel, task: OsTaskId) -> OsResult<bool> {
    kernel.tcb_checked(task)?;
    Ok(threadq::extract_task(kernel, task, OsPendStatus::Abort, true))
}

/// Voluntarily give up the processor
///
/// If another READY task of equal or higher priority exists, it takes the
/// processor and the yielding task becomes READY; otherwise this is a
/// no-op. Returns the task that needs to be actively rescheduled, if any.
pub fn os_task_yield(kernel: &Kernel, task: OsTaskId) -> OsResult<Option<OsTaskId>> {
    kernel.tcb_checked(task)?;
    let outcome = { kernel.sched.lock().yield_cpu(task) };
    Ok(kernel.apply_outcome(outcome))
}
