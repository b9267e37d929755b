//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2): SysTick
//! configuration, the PendSV context-switch trampoline, the SVC trap
//! entry, and interrupt control.
//!
//! ## Context Switch Mechanism
//!
//! Threads run on the process stack (PSP); exception handlers run on
//! the main stack (MSP), which is always the *current thread's*
//! kernel stack — swapping MSP inside PendSV is what moves the
//! kernel between threads. On entry PendSV pushes the saved user
//! stack pointer, `r4`–`r11`, and the EXC_RETURN code onto the
//! incumbent's kernel stack — exactly a
//! [`SavedCalleeFrame`](crate::task::SavedCalleeFrame) — records the
//! frame address in its TCB, asks the scheduler for the next thread,
//! then pops that thread's frame and returns through its saved
//! EXC_RETURN. The hardware unstacks the caller-saved frame from
//! whichever stack the code selects, resuming the thread's
//! instruction stream.
//!
//! ## Interrupt Priorities
//!
//! PendSV and SysTick both sit at the lowest priority (0xFF): the
//! switch never preempts another ISR, and the two can never preempt
//! each other, so scheduler state needs no further locking between
//! them.

use core::arch::global_asm;

use crate::config::SYSTEM_CLOCK_HZ;
use crate::servo::ServoPins;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// SysTick register block (CSR / RVR / CVR).
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

/// Start the scheduler tick at `freq_hz` on the processor clock.
pub fn systick_start(freq_hz: u32) {
    set_interrupt_priorities();
    let reload = SYSTEM_CLOCK_HZ / freq_hz.max(1) - 1;
    unsafe {
        core::ptr::write_volatile(SYST_RVR, reload);
        core::ptr::write_volatile(SYST_CVR, 0);
        core::ptr::write_volatile(
            SYST_CSR,
            SYST_CSR_ENABLE | SYST_CSR_TICKINT | SYST_CSR_CLKSOURCE,
        );
    }
}

/// Stop the scheduler tick.
pub fn systick_stop() {
    unsafe {
        core::ptr::write_volatile(SYST_CSR, 0);
    }
}

// ---------------------------------------------------------------------------
// Interrupt control
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority so the
/// deferred switch never preempts an application ISR.
fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3:
        // bits [23:16] = PendSV, bits [31:24] = SysTick.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));
    }
}

/// Pend the deferred context switch.
///
/// Sets PENDSVSET in the Interrupt Control and State Register. The
/// switch runs once no higher-priority exception is active — for a
/// thread-mode caller, immediately after the critical section ends.
#[inline]
pub fn pend_context_switch() {
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Mask interrupts for good (the exit path).
#[inline]
pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

// ---------------------------------------------------------------------------
// Console UART kick
// ---------------------------------------------------------------------------

/// USART2 CR1; the transmit-empty interrupt drains the TX FIFO.
const USART2_CR1: *mut u32 = 0x4000_440C as *mut u32;
const CR1_TXEIE: u32 = 1 << 7;

/// Tell the UART collaborator that the TX FIFO has data: enable the
/// transmit-empty interrupt, which the driver clears again when the
/// FIFO drains.
#[inline]
pub fn uart_kick_tx() {
    unsafe {
        let val = core::ptr::read_volatile(USART2_CR1);
        core::ptr::write_volatile(USART2_CR1, val | CR1_TXEIE);
    }
}

// ---------------------------------------------------------------------------
// Servo pins
// ---------------------------------------------------------------------------

/// GPIO port bit set/reset registers for the two servo outputs
/// (PA0 and PB10).
const GPIOA_BSRR: *mut u32 = 0x4002_0018 as *mut u32;
const GPIOB_BSRR: *mut u32 = 0x4002_0418 as *mut u32;

/// The servo service's view of its output pins.
pub struct ServoGpio;

impl ServoPins for ServoGpio {
    fn set(&mut self, channel: usize) {
        unsafe {
            match channel {
                0 => core::ptr::write_volatile(GPIOA_BSRR, 1 << 0),
                _ => core::ptr::write_volatile(GPIOB_BSRR, 1 << 10),
            }
        }
    }

    fn clear(&mut self, channel: usize) {
        unsafe {
            match channel {
                0 => core::ptr::write_volatile(GPIOA_BSRR, 1 << (0 + 16)),
                _ => core::ptr::write_volatile(GPIOB_BSRR, 1 << (10 + 16)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Exception entries
// ---------------------------------------------------------------------------

// PendSV: the deferred context switch.
//
// Pushes {saved PSP, r4-r11, EXC_RETURN} onto the current thread's
// kernel stack (MSP), hands the frame to the scheduler, then adopts
// the chosen thread's kernel stack and unwinds its frame. Lowest
// exception priority; never nested with SysTick.
global_asm!(
    ".syntax unified",
    ".cpu cortex-m4",
    ".thumb",
    ".global PendSV",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    push {{r0, r4-r11, lr}}",
    "    mov r0, sp",
    "    bl rmos_context_switch",
    "    mov sp, r0",
    "    pop {{r0, r4-r11, lr}}",
    "    msr psp, r0",
    "    bx lr",
);

// SVCall: the supervisor trap. The caller's frame sits on its
// process stack; the dispatcher decodes the SVC immediate from the
// saved pc and runs the service on the caller's kernel stack.
global_asm!(
    ".syntax unified",
    ".cpu cortex-m4",
    ".thumb",
    ".global SVCall",
    ".thumb_func",
    "SVCall:",
    "    push {{lr}}",
    "    mrs r0, psp",
    "    bl rmos_svc_dispatch",
    "    pop {{pc}}",
);

/// Scheduler half of PendSV. Returns the next thread's frame.
#[no_mangle]
unsafe extern "C" fn rmos_context_switch(
    frame: *mut crate::task::SavedCalleeFrame,
) -> *mut crate::task::SavedCalleeFrame {
    crate::kernel::context_switch_isr(frame)
}

/// Service half of SVCall.
#[no_mangle]
unsafe extern "C" fn rmos_svc_dispatch(frame: *mut crate::syscall::SvcFrame) {
    crate::kernel::svc_isr(frame)
}

/// SysTick exception: advance kernel time, then pend the switch.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::tick_isr();
}
