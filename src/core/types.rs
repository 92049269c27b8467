//! Core type definitions for the kernel
//!
//! These types provide strong typing for the scheduling and
//! synchronization primitives.

/// Task priority (0 = highest priority)
pub type OsPrio = u8;

/// Tick counter type
///
/// Deadlines encode seconds in the high bits and sub-second ticks in the
/// low 30 bits so that ordering is a plain unsigned comparison.
pub type OsTick = u64;

/// Processor index
pub type OsCpu = u8;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Option flags for API calls
pub type OsOpt = u16;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Stable index of a task control block in the kernel pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OsTaskId(pub(crate) u16);

impl OsTaskId {
    /// Raw pool index
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable index of a timer slot
///
/// Indices below `CFG_TASK_MAX` are the per-task timeout timers; user
/// timers follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsTimerId(pub(crate) u16);

impl OsTimerId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduler node state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsSchedState {
    /// Waiting on a thread queue or delay, not eligible to run
    Blocked = 0,
    /// Eligible to run but not assigned a processor
    Ready = 1,
    /// Assigned to a processor
    Scheduled = 2,
}

/// Deadline timer state
///
/// Lifecycle state is kept apart from the tree balancing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsTimerState {
    /// Not scheduled anywhere
    Inactive = 0,
    /// Linked into a per-processor deadline set
    Scheduled = 1,
    /// Detached by the tickle walk, routine about to run
    Pending = 2,
}

/// Pend status recorded in the TCB when a wait ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendStatus {
    /// Pend succeeded (normal release)
    Ok = 0,
    /// Pend was aborted (forced extraction, task deletion)
    Abort = 1,
    /// Timeout occurred
    Timeout = 2,
    /// A deadlock was detected before blocking
    Deadlock = 3,
}

/// Placement among equal-priority entries of an ordered queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPlacement {
    /// Ahead of existing entries of the same priority (LIFO)
    Head = 0,
    /// Behind existing entries of the same priority (FIFO)
    Tail = 1,
}

/// Kernel object type marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OsObjType {
    None = 0,
    Mutex = 0x4D555458,   // 'MUTX'
    Sem = 0x53454D41,     // 'SEMA'
}

// ============ Option flags ============

pub mod opt {
    use super::OsOpt;

    pub const NONE: OsOpt = 0x0000;

    // Pend options
    pub const PEND_BLOCKING: OsOpt = 0x0000;
    pub const PEND_NON_BLOCKING: OsOpt = 0x8000;
}
