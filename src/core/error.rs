//! Error types for the kernel
//!
//! Uses Rust's Result pattern instead of C-style error pointers. Caller
//! contract violations are debug assertions, not error codes; everything
//! here is an expected, recoverable outcome.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OsError {
    /// No error
    None = 0,

    // ============ ISR errors ============
    /// Function cannot be called from ISR
    AcceptIsr = 10001,
    /// Cannot pend from ISR
    PendIsr = 25006,

    // ============ Mutex errors ============
    /// Caller is not the mutex owner
    MutexNotOwner = 22401,
    /// Mutex nesting overflow
    MutexOvf = 22404,

    // ============ Object errors ============
    /// Wrong object type
    ObjType = 24004,

    // ============ OS state errors ============
    /// Kernel is already running
    OsRunning = 24202,
    /// Kernel not initialized
    OsNotInit = 24203,

    // ============ Pend errors ============
    /// Pend was aborted
    PendAbort = 25001,
    /// Pend would block (non-blocking mode)
    PendWouldBlock = 25008,
    /// Blocking would complete a cyclic ownership chain
    PendDeadlock = 25009,

    // ============ Priority errors ============
    /// Invalid priority
    PrioInvalid = 25203,

    // ============ CPU errors ============
    /// Invalid processor index
    CpuInvalid = 25301,

    // ============ Semaphore errors ============
    /// Semaphore overflow
    SemOvf = 28101,

    // ============ Task errors ============
    /// Cannot create task from ISR
    TaskCreateIsr = 29002,
    /// Cannot delete task from ISR
    TaskDelIsr = 29006,
    /// Invalid task
    TaskInvalid = 29007,
    /// No more TCBs available
    TaskNoMoreTcb = 29008,

    // ============ Time errors ============
    /// Cannot delay from ISR
    TimeDlyIsr = 29301,
    /// Zero delay specified
    TimeZeroDly = 29310,

    // ============ Timeout ============
    /// Operation timed out
    Timeout = 29401,

    // ============ Timer errors ============
    /// Timer is inactive
    TmrInactive = 29501,
    /// No more timer slots available
    TmrNoMoreTmr = 29502,
    /// Deadline not representable in the tick encoding
    TmrInvalidDly = 29503,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == OsError::None
    }

    #[inline]
    pub fn is_err(self) -> bool {
        self != OsError::None
    }
}
