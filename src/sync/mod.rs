//! Synchronization primitives
//!
//! The thread queue is the shared wait-list mechanism; mutexes and
//! semaphores are thin objects on top of it.

pub mod threadq;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "sem")]
pub mod sem;
