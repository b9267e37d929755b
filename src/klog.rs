//! # Kernel Diagnostic Channel
//!
//! Routes the `log` facade into the console UART. Protocol-misuse
//! warnings (double lock, unlock-by-non-owner, ceiling denials) and
//! lifecycle breadcrumbs all go through here.
//!
//! Records are formatted directly into the transmit FIFO; bytes that
//! do not fit are dropped so logging can never block, not even from
//! ISR context.

use core::fmt::{self, Write};

use crate::uart;

struct DiagWriter;

impl Write for DiagWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            // Best effort: a full FIFO drops the tail of the record.
            let _ = uart::put_byte(byte);
        }
        Ok(())
    }
}

struct QueueLogger;

impl log::Log for QueueLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(DiagWriter, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        uart::flush();
    }
}

static LOGGER: QueueLogger = QueueLogger;

/// Install the queue-fed logger. Safe to call more than once; only
/// the first call wins.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
}
