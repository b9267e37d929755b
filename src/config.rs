//! # RMOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed
//! at compile time — no dynamic allocation.

/// Maximum number of user threads. Slot index doubles as static
/// priority, so this also bounds the priority space.
pub const MAX_THREADS: usize = 14;

/// Two reserved slots beyond the user threads: the idle thread at
/// index `max_threads` and the main thread one past it.
pub const RESERVED_SLOTS: usize = 2;

/// Total TCB table size (user slots + idle + main).
pub const MAX_SLOTS: usize = MAX_THREADS + RESERVED_SLOTS;

/// Maximum number of priority-ceiling mutexes. Bounds the bitmap
/// width used for `held_mutexes` / `waiting_mutexes`.
pub const MAX_MUTEXES: usize = 32;

/// Size in bytes of each thread-stack pool (one pool of user stacks,
/// one pool of kernel stacks). Thread stacks are carved out of these
/// at `thread_init` time.
pub const STACK_POOL_BYTES: usize = 32 * 1024;

/// Stack pool size in 32-bit words.
pub const STACK_POOL_WORDS: usize = STACK_POOL_BYTES / 4;

/// Default scheduler tick frequency in Hz. `scheduler_start` takes
/// the actual frequency; this is what the demo firmware uses.
pub const DEFAULT_TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 on the 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Capacity of each UART FIFO (transmit and receive).
pub const UART_QUEUE_LEN: usize = 64;

/// Bytes reserved for the user program heap served by `sbrk`.
pub const HEAP_BYTES: usize = 16 * 1024;

/// Number of PWM servo channels.
pub const SERVO_CHANNELS: usize = 2;

/// Length of one servo PWM cycle in timer intervals (20 ms frame at
/// the servo timer rate).
pub const SERVO_CYCLE_INTERVALS: u32 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_all_slots_at_minimum_stack() {
        assert!(MAX_SLOTS * 256 <= STACK_POOL_WORDS);
    }

    #[test]
    fn mutex_bitmap_fits_in_u32() {
        assert!(MAX_MUTEXES <= 32);
    }
}
