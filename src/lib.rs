//! # RMOS — Rate-Monotonic Operating System
//!
//! A small preemptive real-time kernel for ARM Cortex-M4
//! microcontrollers. A fixed set of periodic threads is admitted
//! through the Liu-Layland utilisation-bound test and scheduled
//! rate-monotonically: shorter period means higher priority, and the
//! TCB slot index *is* the priority. Shared resources are serialized
//! by priority-ceiling mutexes (the immediate priority ceiling
//! protocol), bounding priority inversion to a single critical
//! section.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              Application Threads (periodic)               │
//! ├──────────────────────────────────────────────────────────┤
//! │          Kernel API (kernel.rs) · SVC (syscall.rs)        │
//! │  thread_init() · thread_create() · scheduler_start()      │
//! │  mutex_init/lock/unlock() · wait_until_next_period()      │
//! ├─────────────┬─────────────────────┬────────────────────┤
//! │  Scheduler  │  Ceiling Mutexes    │  Admission (UB)    │
//! │ scheduler.rs│  mutex.rs           │  admission.rs      │
//! │ ─ tick()    │  ─ lock_attempt()   │  ─ admissible()    │
//! │ ─ schedule()│  ─ unlock()         │                    │
//! ├─────────────┴─────────────────────┴────────────────────┤
//! │      Thread Model (task.rs) · Tick Clock (time.rs)       │
//! │   TCB · ThreadState · MutexSet · dual-stack frames       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Console (uart.rs, klog.rs) · Servo (servo.rs) · MPU i/f │
//! ├──────────────────────────────────────────────────────────┤
//! │        Arch Port (arch/cortex_m4.rs, arch/host.rs)       │
//! │   SysTick · PendSV · SVCall · interrupt control          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - One hardware thread; a periodic SysTick at the frequency given
//!   to `scheduler_start` is the only time-slice preemption source
//! - Every thread owns a user stack and a kernel stack; a thread's
//!   continuation is its saved-callee frame on the kernel stack plus
//!   the hardware frame on its user stack
//! - The deferred context switch (PendSV, lowest priority) performs
//!   the save/restore outside the critical interrupt path
//! - Mutex operations are cooperative preemption points; a holder
//!   runs at the ceiling of its held mutexes until release
//!
//! ## Memory Model
//!
//! - **No heap** in the kernel: TCBs, stacks, mutexes, and FIFOs are
//!   statically allocated (`sbrk` serves a fixed user heap region)
//! - **Fixed tables**: 14 user threads + idle + main, 32 mutexes
//! - **Critical sections**: `cortex_m::interrupt::free` around all
//!   shared kernel state

#![cfg_attr(not(test), no_std)]

pub mod admission;
pub mod arch;
pub mod config;
pub mod kernel;
pub mod klog;
pub mod mpu;
pub mod mutex;
pub mod scheduler;
pub mod servo;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod time;
pub mod uart;
