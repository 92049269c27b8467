//! Port layer - CPU-specific operations
//!
//! The kernel core never dispatches by itself; it flags processors whose
//! scheduled task changed and calls [`request_dispatch`] so the platform
//! can interrupt them.

use crate::types::OsCpu;

/// Request a reschedule on another processor.
///
/// On ARM this raises an event so a waiting processor re-runs its
/// dispatcher; a real port replaces it with its inter-processor interrupt.
#[cfg(target_arch = "arm")]
pub fn request_dispatch(_cpu: OsCpu) {
    cortex_m::asm::sev();
}

/// Wait for a dispatch request on the current processor.
#[cfg(target_arch = "arm")]
pub fn wait_for_dispatch() {
    cortex_m::asm::wfe();
}

// Stub implementations for non-ARM targets (for testing)

#[cfg(not(target_arch = "arm"))]
pub fn request_dispatch(_cpu: OsCpu) {
    // No-op for testing; the per-processor dispatch flag is still set
}

#[cfg(not(target_arch = "arm"))]
pub fn wait_for_dispatch() {
    // No-op for testing
}
