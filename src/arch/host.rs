//! # Host Port Layer
//!
//! A mock of the hardware surface so the scheduler, mutex, and
//! syscall logic run under the native test harness. Context-switch
//! pends are no-ops — tests drive `tick()`/`schedule()` directly —
//! and the tick source never fires.

use crate::servo::ServoPins;

pub fn systick_start(_freq_hz: u32) {}

pub fn systick_stop() {}

#[inline]
pub fn pend_context_switch() {}

#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

#[inline]
pub fn disable_interrupts() {}

#[inline]
pub fn uart_kick_tx() {}

/// Pinless servo outputs.
pub struct ServoGpio;

impl ServoPins for ServoGpio {
    fn set(&mut self, _channel: usize) {}
    fn clear(&mut self, _channel: usize) {}
}
