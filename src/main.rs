//! # RMOS Demo Firmware
//!
//! Two equal-period threads under rate-monotonic scheduling — the
//! smallest interesting RMS workload:
//!
//! | Thread | Priority | C (ticks) | T (ticks) | Behavior |
//! |--------|----------|-----------|-----------|----------|
//! | `worker` (slot 0) | 0 | 50 | 500 | spins ~50 ticks, waits for next period |
//! | `worker` (slot 1) | 1 | 50 | 500 | same, runs after slot 0 each period |
//!
//! Both threads release together at every 500-tick boundary; slot 0
//! always runs first. After two full periods each worker returns,
//! which lands it in the kill trampoline; once both are Done the
//! scheduler hands control back to main and `scheduler_start`
//! returns.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use rmos::config::DEFAULT_TICK_HZ;
    use rmos::kernel;

    /// Ticks of work each worker performs per period.
    const COMPUTE: u32 = 50;
    /// Period of both workers.
    const PERIOD: u32 = 500;
    /// Periods each worker lives through before terminating.
    const PERIODS: u32 = 2;

    /// Burn CPU until `ticks` kernel ticks have elapsed.
    fn spin_ticks(ticks: u32) {
        let start = kernel::get_time();
        while kernel::get_time().wrapping_sub(start) < ticks {}
    }

    /// A periodic worker: does its compute, reports, and parks until
    /// the next release. Returning after `PERIODS` rounds kills the
    /// thread via the exit trampoline.
    extern "C" fn worker(arg: u32) {
        for round in 0..PERIODS {
            spin_ticks(COMPUTE - 10);
            log::info!("thread {} finished round {}", arg, round);
            if round + 1 < PERIODS {
                kernel::wait_until_next_period();
            }
        }
    }

    #[entry]
    fn main() -> ! {
        kernel::init();

        kernel::thread_init(2, 256, None, 0).expect("thread_init failed");
        kernel::thread_create(worker, 0, COMPUTE, PERIOD, 0).expect("create worker 0");
        kernel::thread_create(worker, 1, COMPUTE, PERIOD, 1).expect("create worker 1");

        // Runs until both workers terminate.
        let status = kernel::scheduler_start(DEFAULT_TICK_HZ);
        log::info!("scheduler returned {}", status);
        rmos::syscall::sys_exit(status)
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The firmware entry only exists for the embedded target; the
    // host build carries the library and its test suite.
}
