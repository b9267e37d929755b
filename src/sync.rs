//! # Synchronization Primitives
//!
//! Interrupt-safe critical section for the kernel's shared state.
//! The TCB table, mutex table, tick counter, and the UART FIFOs are
//! only ever touched inside one of these sections (or from ISR
//! context, where interrupts are already serialized by priority).

use cortex_m::interrupt::CriticalSection;

/// Execute a closure with interrupts saved and disabled, restoring
/// the previous state on exit.
///
/// Keep the enclosed work short: every tick of interrupt latency is
/// scheduler jitter.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    cortex_m::interrupt::free(f)
}

/// Host build: single-threaded test harness per shared structure, no
/// interrupts to mask.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    f(unsafe { &CriticalSection::new() })
}
