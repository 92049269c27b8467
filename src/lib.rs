//! Multiprocessor real-time kernel core in Rust
//!
//! A real-time kernel core providing:
//! - Priority-based preemptive SMP scheduling with a shared ready queue
//! - Synchronization primitives (semaphores, mutexes) with priority
//!   inheritance and cross-processor deadlock detection
//! - Per-processor deadline timers with a 64-bit tick encoding
//! - Ticket-lock based cross-processor exclusion

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use core::config;
pub use core::config::*;
pub use core::critical;
pub use core::error;
pub use core::error::{OsError, OsResult};
pub use core::kernel;
pub use core::kernel::Kernel;
pub use core::rbtree;
pub use core::sched;
pub use core::sched::SchedOutcome;
pub use core::task;
pub use core::task::{
    os_task_create, os_task_del, os_task_pend_abort, os_task_set_prio, os_task_yield, OsTcb,
};
pub use core::ticket;
pub use core::ticket::{TicketLock, TicketMutex};
pub use core::timer;
pub use core::timer::{
    os_tick_handler, os_time_dly, os_timer_arm, os_timer_cancel, os_timer_create, os_timer_del,
    ticks_from_ms, ticks_from_seconds,
};
pub use core::types;
pub use core::types::*;

pub use sync::threadq;
pub use sync::threadq::ThreadQueue;

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "sem")]
pub use sync::sem::OsSem;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "mutex")]
pub use sync::mutex::OsMutex;
