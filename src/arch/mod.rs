//! # Architecture Abstraction Layer
//!
//! The hardware boundary of the kernel: the tick source, the
//! deferred-context-switch trigger, interrupt control, and the pins
//! the servo service toggles. The Cortex-M4 port is the real thing;
//! the host port stubs the same surface so the scheduler logic runs
//! under the native test harness.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{
    disable_interrupts, pend_context_switch, systick_start, systick_stop, uart_kick_tx,
    wait_for_interrupt, ServoGpio,
};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::{
    disable_interrupts, pend_context_switch, systick_start, systick_stop, uart_kick_tx,
    wait_for_interrupt, ServoGpio,
};
