//! Compile-time configuration for the kernel
//!
//! These constants control the resource limits of the kernel core.

/// Maximum number of processors
pub const CFG_CPU_MAX: usize = 4;

/// Maximum number of tasks
///
/// Bounded at 32 so the deadlock detector can use a word-sized visited set.
pub const CFG_TASK_MAX: usize = 16;

/// Maximum number of user timers (per-task timeout timers are separate)
pub const CFG_TIMER_MAX: usize = 16;

/// Maximum number of priority levels
pub const CFG_PRIO_MAX: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Total deadline-set slots: one per task timeout timer plus the user pool
pub(crate) const CFG_WDOG_SLOTS: usize = CFG_TASK_MAX + CFG_TIMER_MAX;
