//! Deadline timer subsystem
//!
//! One ordered set of pending timers per processor, a cached first-to-fire
//! slot, and a tickle walk that fires expired timers. The tickle drops the
//! processor's watchdog lock around every routine invocation, so a routine
//! may insert or cancel timers (including re-arming itself) without
//! deadlocking.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicU8, Ordering};

use crate::config::{CFG_CPU_MAX, CFG_TASK_MAX, CFG_TIMER_MAX, CFG_WDOG_SLOTS};
use crate::critical::is_isr_context;
use crate::error::{OsError, OsResult};
use crate::kernel::{pack_wait, unpack_wait, Kernel};
use crate::rbtree::{RbIndex, RbNode, RbTree};
use crate::types::{OsCpu, OsTaskId, OsTick, OsTimerId, OsTimerState};

/// Bits of an [`OsTick`] deadline that hold sub-second ticks
pub const TICK_FRAC_BITS: u32 = 30;

/// Bits available for the seconds component
pub const TICK_SECS_BITS: u32 = 64 - TICK_FRAC_BITS;

/// Build a deadline tick value from whole seconds and sub-second ticks.
///
/// Returns `None` if the seconds component does not fit in the high bits
/// of the encoding, or the fraction overflows the low 30 bits.
pub fn ticks_from_seconds(secs: u64, frac: u64) -> Option<OsTick> {
    if secs >= 1u64 << TICK_SECS_BITS {
        return None;
    }
    if frac >= 1u64 << TICK_FRAC_BITS {
        return None;
    }
    Some((secs << TICK_FRAC_BITS) | frac)
}

/// Convert milliseconds to scheduler ticks at the configured tick rate.
pub fn ticks_from_ms(ms: u64) -> OsTick {
    ms * crate::config::CFG_TICK_RATE_HZ as u64 / 1000
}

/// Routine invoked when a timer fires.
///
/// Called with the watchdog lock released; the routine may arm or cancel
/// timers freely.
pub type OsTimerFn = fn(&Kernel, usize);

struct TimerInner {
    routine: Option<OsTimerFn>,
    arg: usize,
    expire: OsTick,
}

/// A deadline timer slot
///
/// Embedded in every TCB (timeout timer) and pooled for user timers. The
/// `inner` fields are guarded by the owning processor's watchdog lock.
pub struct OsTimer {
    state: AtomicU8,
    cpu: AtomicU8,
    inner: UnsafeCell<TimerInner>,
}

// SAFETY: `inner` is only touched while the owning processor's watchdog
// lock is held; `state` and `cpu` are atomics.
unsafe impl Sync for OsTimer {}
unsafe impl Send for OsTimer {}

impl OsTimer {
    pub(crate) const fn new() -> Self {
        OsTimer {
            state: AtomicU8::new(OsTimerState::Inactive as u8),
            cpu: AtomicU8::new(0),
            inner: UnsafeCell::new(TimerInner {
                routine: None,
                arg: 0,
                expire: 0,
            }),
        }
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> OsTimerState {
        match self.state.load(Ordering::Acquire) {
            0 => OsTimerState::Inactive,
            1 => OsTimerState::Scheduled,
            _ => OsTimerState::Pending,
        }
    }

    #[inline]
    fn set_state(&self, state: OsTimerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    fn state_transition(&self, from: OsTimerState, to: OsTimerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Per-processor set of scheduled deadlines
///
/// Lives behind the processor's watchdog ticket lock.
pub(crate) struct WatchdogSet {
    tree: RbTree,
    nodes: [RbNode<OsTick>; CFG_WDOG_SLOTS],
    /// Cached slot of the earliest deadline
    first: Option<RbIndex>,
    /// Tick value observed at the last tickle
    now: OsTick,
}

impl WatchdogSet {
    pub(crate) const fn new() -> Self {
        WatchdogSet {
            tree: RbTree::new(),
            nodes: [RbNode::zeroed(); CFG_WDOG_SLOTS],
            first: None,
            now: 0,
        }
    }

    pub(crate) fn now(&self) -> OsTick {
        self.now
    }

    fn insert(&mut self, slot: RbIndex, expire: OsTick) {
        self.nodes[slot as usize].key = expire;
        if self.tree.insert(&mut self.nodes, slot, |a, b| a < b) {
            self.first = Some(slot);
        }
    }

    fn remove(&mut self, slot: RbIndex) {
        self.tree.extract(&mut self.nodes, slot);
        if self.first == Some(slot) {
            self.first = self.tree.minimum(&self.nodes);
        }
    }

    fn first_due(&self, now: OsTick) -> Option<RbIndex> {
        self.first.filter(|&i| self.nodes[i as usize].key <= now)
    }
}

/// Schedule a timer on a processor's deadline set at an absolute deadline.
pub(crate) fn arm_at(
    kernel: &Kernel,
    id: OsTimerId,
    cpu: OsCpu,
    expire: OsTick,
    routine: OsTimerFn,
    arg: usize,
) {
    let timer = kernel.timer(id);
    // a stale timeout timer may still be scheduled when its task blocks
    // again; the wait generation already disarmed its routine
    if timer.state() == OsTimerState::Scheduled {
        cancel(kernel, id);
    }

    let mut set = kernel.per_cpu(cpu).watchdogs.lock();
    // SAFETY: the owning processor's watchdog lock is held.
    let inner = unsafe { &mut *timer.inner.get() };
    inner.routine = Some(routine);
    inner.arg = arg;
    inner.expire = expire;
    timer.cpu.store(cpu, Ordering::Relaxed);
    timer.set_state(OsTimerState::Scheduled);
    set.insert(id.0, expire);
}

/// Remove a timer from its deadline set if still scheduled.
///
/// Returns the remaining ticks until expiry, `0` if the timer is already
/// due, already fired, or was never armed. Never an error.
pub(crate) fn cancel(kernel: &Kernel, id: OsTimerId) -> OsTick {
    let timer = kernel.timer(id);
    loop {
        if timer.state() != OsTimerState::Scheduled {
            return 0;
        }
        let cpu = timer.cpu.load(Ordering::Relaxed);
        let mut set = kernel.per_cpu(cpu).watchdogs.lock();
        // the timer may have fired or moved between the reads and the lock
        if timer.state() != OsTimerState::Scheduled || timer.cpu.load(Ordering::Relaxed) != cpu {
            continue;
        }
        set.remove(id.0);
        timer.set_state(OsTimerState::Inactive);
        // SAFETY: watchdog lock held.
        let expire = unsafe { (*timer.inner.get()).expire };
        return expire.saturating_sub(set.now());
    }
}

/// Fire every timer on `cpu` whose deadline is at or before `now`.
///
/// Invoked once per clock interrupt. Each expired timer is detached under
/// the watchdog lock, the lock is released, the routine runs, and the lock
/// is re-acquired before the walk continues.
pub(crate) fn tickle(kernel: &Kernel, cpu: OsCpu, now: OsTick) {
    loop {
        let mut set = kernel.per_cpu(cpu).watchdogs.lock();
        set.now = now;

        let Some(slot) = set.first_due(now) else {
            return;
        };
        set.remove(slot);

        let id = OsTimerId(slot);
        let timer = kernel.timer(id);
        // SAFETY: watchdog lock held.
        let (routine, arg) = unsafe {
            let inner = &*timer.inner.get();
            (inner.routine, inner.arg)
        };
        timer.set_state(OsTimerState::Pending);
        drop(set);

        if let Some(routine) = routine {
            routine(kernel, arg);
        }
        // the routine may have re-armed the timer; only a still-pending
        // timer goes back to inactive
        timer.state_transition(OsTimerState::Pending, OsTimerState::Inactive);
    }
}

/// Schedule a timer relative to the processor's last observed tick.
pub(crate) fn arm_after(
    kernel: &Kernel,
    id: OsTimerId,
    cpu: OsCpu,
    delay: OsTick,
    routine: OsTimerFn,
    arg: usize,
) {
    let now = kernel.per_cpu(cpu).watchdogs.lock().now();
    arm_at(kernel, id, cpu, now.saturating_add(delay), routine, arg);
}

// ============ Public timer API ============

/// Allocate a timer from the user pool
pub fn os_timer_create(kernel: &Kernel) -> OsResult<OsTimerId> {
    let mut pool = kernel.pool.lock();
    let free = !pool.timer_used & (((1u64 << CFG_TIMER_MAX) - 1) as u32);
    if free == 0 {
        return Err(OsError::TmrNoMoreTmr);
    }
    let slot = free.trailing_zeros() as usize;
    pool.timer_used |= 1 << slot;
    Ok(OsTimerId((CFG_TASK_MAX + slot) as u16))
}

/// Cancel and return a user timer to the pool
pub fn os_timer_del(kernel: &Kernel, id: OsTimerId) -> OsResult<()> {
    if id.index() < CFG_TASK_MAX {
        return Err(OsError::ObjType);
    }
    cancel(kernel, id);
    kernel.pool.lock().timer_used &= !(1 << (id.index() - CFG_TASK_MAX));
    Ok(())
}

/// Arm a timer to fire `delay` ticks from the processor's current time
pub fn os_timer_arm(
    kernel: &Kernel,
    id: OsTimerId,
    cpu: OsCpu,
    delay: OsTick,
    routine: OsTimerFn,
    arg: usize,
) -> OsResult<()> {
    if id.index() < CFG_TASK_MAX {
        return Err(OsError::ObjType);
    }
    if cpu as usize >= CFG_CPU_MAX {
        return Err(OsError::CpuInvalid);
    }
    debug_assert_ne!(
        kernel.timer(id).state(),
        OsTimerState::Scheduled,
        "re-initializing an active timer"
    );
    arm_after(kernel, id, cpu, delay, routine, arg);
    Ok(())
}

/// Cancel a timer
///
/// Returns the remaining ticks to expiry, `0` if it already fired or was
/// never armed; canceling an inactive timer is a no-op, never an error.
pub fn os_timer_cancel(kernel: &Kernel, id: OsTimerId) -> OsTick {
    cancel(kernel, id)
}

// ============ Time delay ============

/// Delay a task for the specified number of ticks
///
/// The task blocks and its embedded timeout timer is armed to unblock it.
pub fn os_time_dly(kernel: &Kernel, task: OsTaskId, ticks: OsTick) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }
    kernel.tcb_checked(task)?;
    if ticks == 0 {
        return Ok(());
    }

    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();
    debug_assert!(tcb.pend_obj().is_null(), "delay while pending on an object");
    let gen = tcb.bump_wait_gen();
    tcb.wait_lock_release(lockp);

    let outcome = { kernel.sched.lock().block(task) };
    kernel.apply_outcome(outcome);

    arm_after(
        kernel,
        Kernel::timeout_timer_id(task),
        tcb.cpu(),
        ticks,
        dly_expired,
        pack_wait(task, gen),
    );
    Ok(())
}

/// Routine behind [`os_time_dly`]: wake the task when the delay elapses,
/// unless the wait generation moved on (deletion, re-block).
fn dly_expired(kernel: &Kernel, arg: usize) {
    let (task, gen) = unpack_wait(arg);
    let tcb = kernel.tcb(task);
    let lockp = tcb.wait_lock_acquire();
    if tcb.wait_gen() == gen && tcb.pend_obj().is_null() {
        tcb.bump_wait_gen();
        let outcome = { kernel.sched.lock().unblock(task) };
        kernel.apply_outcome(outcome);
    }
    tcb.wait_lock_release(lockp);
}

// ============ Tick handler ============

/// Clock-interrupt entry: fire every deadline on `cpu` at or before `now`
pub fn os_tick_handler(kernel: &Kernel, cpu: OsCpu, now: OsTick) {
    tickle(kernel, cpu, now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_encoding_orders_and_rejects() {
        let one_sec = ticks_from_seconds(1, 0).unwrap();
        assert_eq!(one_sec, 1 << TICK_FRAC_BITS);

        let just_under = ticks_from_seconds(0, (1 << TICK_FRAC_BITS) - 1).unwrap();
        assert!(just_under < one_sec);

        // seconds boundary: 2^34 - 1 fits, 2^34 does not
        assert!(ticks_from_seconds((1 << TICK_SECS_BITS) - 1, 0).is_some());
        assert!(ticks_from_seconds(1 << TICK_SECS_BITS, 0).is_none());

        // fraction overflow
        assert!(ticks_from_seconds(0, 1 << TICK_FRAC_BITS).is_none());
    }

    #[test]
    fn watchdog_set_caches_earliest() {
        let mut set = WatchdogSet::new();
        set.insert(0, 300);
        assert_eq!(set.first, Some(0));
        set.insert(1, 100);
        assert_eq!(set.first, Some(1));
        set.insert(2, 200);
        assert_eq!(set.first, Some(1));

        assert_eq!(set.first_due(50), None);
        assert_eq!(set.first_due(100), Some(1));

        set.remove(1);
        assert_eq!(set.first, Some(2));
        set.remove(2);
        assert_eq!(set.first, Some(0));
        set.remove(0);
        assert_eq!(set.first, None);
    }
}
