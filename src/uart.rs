//! # UART Stream Queues
//!
//! Byte-oriented, bounded FIFOs between the kernel's console
//! services and the interrupt-driven UART driver. The MMIO side of
//! the driver is a collaborator; the kernel only touches these
//! queues.
//!
//! The transmit and receive queues are shared between syscall and
//! interrupt context, so every access runs under
//! save-disable-restore of the global interrupt-enable flag
//! ([`crate::sync::critical_section`]). Put on a full queue and get
//! on an empty queue fail without blocking; blocking policy belongs
//! to the caller.

use heapless::Deque;

use crate::config::UART_QUEUE_LEN;
use crate::sync;

/// Error returned when a bounded queue cannot accept another byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// A bounded byte FIFO.
pub struct ByteQueue {
    inner: Deque<u8, UART_QUEUE_LEN>,
}

impl ByteQueue {
    pub const fn new() -> Self {
        ByteQueue { inner: Deque::new() }
    }

    pub fn put(&mut self, byte: u8) -> Result<(), QueueFull> {
        self.inner.push_back(byte).map_err(|_| QueueFull)
    }

    pub fn get(&mut self) -> Option<u8> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// The transmit and receive FIFOs of the console UART.
pub struct UartQueues {
    pub tx: ByteQueue,
    pub rx: ByteQueue,
}

impl UartQueues {
    pub const fn new() -> Self {
        UartQueues { tx: ByteQueue::new(), rx: ByteQueue::new() }
    }
}

// ---------------------------------------------------------------------------
// Shared instance
// ---------------------------------------------------------------------------

/// The console queues, shared between syscall and interrupt context.
static mut QUEUES: UartQueues = UartQueues::new();

/// Run `f` on the shared queues with interrupts saved and disabled.
pub fn with_queues<R>(f: impl FnOnce(&mut UartQueues) -> R) -> R {
    sync::critical_section(|_| unsafe { f(&mut *core::ptr::addr_of_mut!(QUEUES)) })
}

/// Enqueue one byte for transmission. Fails when the FIFO is full.
pub fn put_byte(byte: u8) -> Result<(), QueueFull> {
    let res = with_queues(|q| q.tx.put(byte));
    if res.is_ok() {
        crate::arch::uart_kick_tx();
    }
    res
}

/// Dequeue one received byte, if any.
pub fn get_byte() -> Option<u8> {
    with_queues(|q| q.rx.get())
}

/// Wait for the transmitter to drain, then reset both queues.
pub fn flush() {
    while with_queues(|q| !q.tx.is_empty()) {
        crate::arch::wait_for_interrupt();
    }
    with_queues(|q| {
        q.tx.clear();
        q.rx.clear();
    });
}

/// Interrupt side: take the next byte to push into the transmit
/// data register.
pub fn isr_take_tx() -> Option<u8> {
    with_queues(|q| q.tx.get())
}

/// Interrupt side: store a freshly received byte; dropped when the
/// FIFO is full.
pub fn isr_push_rx(byte: u8) {
    let _ = with_queues(|q| q.rx.put(byte));
}
