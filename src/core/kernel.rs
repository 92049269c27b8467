//! Kernel context
//!
//! All kernel state lives in an explicit [`Kernel`] structure passed by
//! reference into every operation: the TCB pool, the user timer pool, one
//! per-processor slot (deadline set + dispatch flag), and the scheduler
//! core behind its ticket lock. Nothing is addressed through globals, so
//! host tests construct as many independent kernels as they like.

use portable_atomic::{AtomicBool, Ordering};

use crate::config::{CFG_CPU_MAX, CFG_TASK_MAX, CFG_TIMER_MAX};
use crate::error::{OsError, OsResult};
use crate::sched::{SchedCore, SchedOutcome};
use crate::task::OsTcb;
use crate::ticket::TicketMutex;
use crate::timer::{OsTimer, WatchdogSet};
use crate::types::{OsCpu, OsPendStatus, OsPrio, OsSchedState, OsTaskId, OsTimerId};

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Check if the kernel is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if the kernel is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }
}

/// Per-processor kernel state
pub struct PerCpu {
    /// This processor's deadline set, behind its watchdog lock
    pub(crate) watchdogs: TicketMutex<WatchdogSet>,
    /// Set when the processor must re-run its dispatcher
    dispatch_pending: AtomicBool,
}

impl PerCpu {
    const fn new() -> Self {
        PerCpu {
            watchdogs: TicketMutex::new(WatchdogSet::new()),
            dispatch_pending: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn request_dispatch(&self) {
        self.dispatch_pending.store(true, Ordering::Release);
    }

    /// Check the dispatch flag without clearing it
    #[inline]
    pub fn dispatch_pending(&self) -> bool {
        self.dispatch_pending.load(Ordering::Acquire)
    }

    /// Consume the dispatch flag; the platform dispatcher calls this once
    /// per reschedule interrupt.
    #[inline]
    pub fn take_dispatch(&self) -> bool {
        self.dispatch_pending.swap(false, Ordering::AcqRel)
    }
}

/// Allocation bitmaps for the TCB and user-timer pools
pub(crate) struct PoolState {
    pub(crate) task_alive: u32,
    pub(crate) timer_used: u32,
}

impl PoolState {
    const fn new() -> Self {
        PoolState {
            task_alive: 0,
            timer_used: 0,
        }
    }
}

/// The kernel context
pub struct Kernel {
    pub(crate) tcbs: [OsTcb; CFG_TASK_MAX],
    pub(crate) user_timers: [OsTimer; CFG_TIMER_MAX],
    per_cpu: [PerCpu; CFG_CPU_MAX],
    pub(crate) sched: TicketMutex<SchedCore>,
    pub(crate) pool: TicketMutex<PoolState>,
    pub flags: KernelFlags,
}

impl Kernel {
    pub const fn new() -> Self {
        const TCB: OsTcb = OsTcb::new();
        const TIMER: OsTimer = OsTimer::new();
        const CPU: PerCpu = PerCpu::new();
        Kernel {
            tcbs: [TCB; CFG_TASK_MAX],
            user_timers: [TIMER; CFG_TIMER_MAX],
            per_cpu: [CPU; CFG_CPU_MAX],
            sched: TicketMutex::new(SchedCore::new()),
            pool: TicketMutex::new(PoolState::new()),
            flags: KernelFlags::new(),
        }
    }

    /// Initialize the kernel for `cpu_count` processors.
    ///
    /// Must be called before any other operation.
    pub fn init(&self, cpu_count: usize) -> OsResult<()> {
        if cpu_count == 0 || cpu_count > CFG_CPU_MAX {
            return Err(OsError::CpuInvalid);
        }
        if self.flags.is_running() {
            return Err(OsError::OsRunning);
        }
        self.sched.lock().init(cpu_count);
        {
            let mut pool = self.pool.lock();
            pool.task_alive = 0;
            pool.timer_used = 0;
        }
        self.flags.set_initialized(true);
        Ok(())
    }

    /// Mark the kernel running. The platform starts dispatching after
    /// this; the core itself only flips the flag.
    pub fn start(&self) -> OsResult<()> {
        if !self.flags.is_initialized() {
            return Err(OsError::OsNotInit);
        }
        if self.flags.is_running() {
            return Err(OsError::OsRunning);
        }
        self.flags.set_running(true);
        Ok(())
    }

    // ============ Internal accessors ============

    #[inline]
    pub(crate) fn tcb(&self, task: OsTaskId) -> &OsTcb {
        &self.tcbs[task.index()]
    }

    pub(crate) fn tcb_checked(&self, task: OsTaskId) -> OsResult<&OsTcb> {
        let tcb = &self.tcbs[task.index()];
        if tcb.is_alive() {
            Ok(tcb)
        } else {
            Err(OsError::TaskInvalid)
        }
    }

    /// Resolve a timer slot: task timeout timers first, then the user pool.
    #[inline]
    pub(crate) fn timer(&self, id: OsTimerId) -> &OsTimer {
        let idx = id.index();
        if idx < CFG_TASK_MAX {
            &self.tcbs[idx].timeout_timer
        } else {
            &self.user_timers[idx - CFG_TASK_MAX]
        }
    }

    #[inline]
    pub(crate) fn timeout_timer_id(task: OsTaskId) -> OsTimerId {
        OsTimerId(task.0)
    }

    #[inline]
    pub(crate) fn per_cpu(&self, cpu: OsCpu) -> &PerCpu {
        &self.per_cpu[cpu as usize]
    }

    /// Apply a scheduler outcome: flag every affected processor and raise
    /// the cross-processor reschedule request. Returns the task that still
    /// needs help, if any.
    pub(crate) fn apply_outcome(&self, outcome: SchedOutcome) -> Option<OsTaskId> {
        let mut cpus = outcome.dispatch_cpus;
        while cpus != 0 {
            let c = cpus.trailing_zeros() as OsCpu;
            cpus &= cpus - 1;
            self.per_cpu[c as usize].request_dispatch();
            crate::port::request_dispatch(c);
        }
        outcome.needs_help
    }

    // ============ Queries ============

    /// Scheduler state of a task
    pub fn task_state(&self, task: OsTaskId) -> OsResult<OsSchedState> {
        self.tcb_checked(task)?;
        Ok(self.sched.lock().state(task))
    }

    /// Task currently scheduled on a processor
    pub fn scheduled_on(&self, cpu: OsCpu) -> Option<OsTaskId> {
        self.sched.lock().scheduled_on(cpu)
    }

    /// Processor a task is scheduled on, if any
    pub fn task_cpu(&self, task: OsTaskId) -> OsResult<Option<OsCpu>> {
        self.tcb_checked(task)?;
        Ok(self.sched.lock().assigned_cpu(task))
    }

    /// Base priority of a task
    pub fn task_base_prio(&self, task: OsTaskId) -> OsResult<OsPrio> {
        Ok(self.tcb_checked(task)?.base_prio())
    }

    /// Effective (possibly inherited) priority of a task
    pub fn task_effective_prio(&self, task: OsTaskId) -> OsResult<OsPrio> {
        Ok(self.tcb_checked(task)?.effective_prio())
    }

    /// Status recorded when the task's last wait ended
    pub fn task_pend_status(&self, task: OsTaskId) -> OsResult<OsPendStatus> {
        Ok(self.tcb_checked(task)?.pend_status())
    }

    /// Dispatch flag of a processor (without consuming it)
    pub fn dispatch_pending(&self, cpu: OsCpu) -> bool {
        self.per_cpu[cpu as usize].dispatch_pending()
    }

    /// Consume the dispatch flag of a processor
    pub fn take_dispatch(&self, cpu: OsCpu) -> bool {
        self.per_cpu[cpu as usize].take_dispatch()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Wait token packing ============
//
// Timer routines receive a plain `usize`; wait-related routines pack the
// task id and the wait generation into it so a stale firing can be told
// apart from a live one.

#[inline]
pub(crate) fn pack_wait(task: OsTaskId, gen: u16) -> usize {
    task.0 as usize | (gen as usize) << 16
}

#[inline]
pub(crate) fn unpack_wait(arg: usize) -> (OsTaskId, u16) {
    (OsTaskId((arg & 0xFFFF) as u16), (arg >> 16) as u16)
}
