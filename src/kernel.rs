//! # Kernel
//!
//! Top-level initialization and the public API of RMOS. The kernel
//! owns the global scheduler instance, exposes the thread and mutex
//! services to privileged callers, and hosts the ISR entry points
//! the arch layer dispatches into. All public functions use critical
//! sections to ensure interrupt safety.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()            ← Wire the global scheduler
//!         ├─► kernel::thread_init(…)    ← Lay out TCBs and stacks
//!         ├─► kernel::thread_create(…)  ← Admit threads (×N, UB test)
//!         └─► kernel::scheduler_start(F)← Tick at F Hz; returns only
//!                                         when every user thread is
//!                                         Done
//! ```
//!
//! Unprivileged callers reach the same services through the SVC
//! dispatcher in [`crate::syscall`].

use crate::arch;
use crate::mutex::{LockOutcome, UnlockOutcome};
use crate::scheduler::{EntryHooks, KernelError, KillOutcome, Scheduler};
use crate::sync;
use crate::syscall;

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance.
///
/// # Safety
/// Accessed via `SCHEDULER_PTR`, which is set during `init()`. All
/// access is through critical sections or from ISR context (where
/// interrupts are already serialized by priority).
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler for the arch layer (PendSV,
/// SysTick, SVCall), which cannot easily use references.
///
/// # Safety
/// Set once during `init()`, read from ISR context.
#[no_mangle]
pub static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

/// Run `f` on the global scheduler inside a critical section.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    sync::critical_section(|_| unsafe {
        debug_assert!(!SCHEDULER_PTR.is_null());
        f(&mut *SCHEDULER_PTR)
    })
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel: wire the scheduler pointer and install the
/// diagnostic logger.
///
/// Must be called exactly once, from the main thread, before any
/// other kernel function.
pub fn init() {
    unsafe {
        SCHEDULER_PTR = core::ptr::addr_of_mut!(SCHEDULER);
    }
    crate::klog::init();
}

/// Entry hooks for `thread_init`: the caller's idle function (or the
/// default halt loop) plus the kill trampoline every thread returns
/// into.
pub(crate) fn entry_hooks(idle_entry: u32) -> EntryHooks {
    let default_idle_entry = default_idle as usize as u32;
    EntryHooks {
        idle_entry: if idle_entry == 0 { default_idle_entry } else { idle_entry },
        default_idle_entry,
        kill_trampoline: thread_exit_trampoline as usize as u32,
    }
}

/// Lay out the TCB table, both stack pools, and the mutex quota.
///
/// `stack_words` is the per-thread stack size in 32-bit words,
/// rounded up to a power of two; the idle thread runs `idle_fn` if
/// given, else a halt loop.
pub fn thread_init(
    max_threads: usize,
    stack_words: usize,
    idle_fn: Option<extern "C" fn() -> !>,
    max_mutexes: usize,
) -> Result<(), KernelError> {
    let idle_entry = idle_fn.map(|f| f as usize as u32).unwrap_or(0);
    let hooks = entry_hooks(idle_entry);
    with_scheduler(|s| s.thread_init(max_threads, stack_words, max_mutexes, hooks))
}

/// Admit a periodic thread at priority `prio` with compute budget
/// `compute` per `period` ticks. `arg` arrives in the thread
/// function's first argument register.
pub fn thread_create(
    entry: extern "C" fn(u32),
    prio: u32,
    compute: u32,
    period: u32,
    arg: u32,
) -> Result<(), KernelError> {
    with_scheduler(|s| s.thread_create(entry as usize as u32, prio, compute, period, arg))
}

/// Kill the calling thread. Killing main terminates the kernel;
/// killing idle restarts it on the default halt loop.
pub fn thread_kill() {
    match with_scheduler(|s| s.thread_kill()) {
        KillOutcome::Main => syscall::sys_exit(0),
        KillOutcome::IdleRestarted | KillOutcome::Killed => arch::pend_context_switch(),
    }
}

/// Start preemptive scheduling at `freq_hz` ticks per second.
/// **Returns only after every user thread is Done.**
pub fn scheduler_start(freq_hz: u32) -> i32 {
    let res = with_scheduler(|s| scheduler_start_service(s, freq_hz));
    // Execution resumes here once the scheduler has selected main
    // again, i.e. when no user thread remains schedulable.
    arch::systick_stop();
    res
}

/// The `scheduler_start` service body, shared with the SVC path.
pub(crate) fn scheduler_start_service(sched: &mut Scheduler, freq_hz: u32) -> i32 {
    if sched.max_threads == 0 || freq_hz == 0 {
        return -1;
    }
    sched.clock.start(freq_hz);
    sched.started = true;
    arch::systick_start(freq_hz);
    arch::pend_context_switch();
    0
}

/// Park the calling thread until its next period release.
pub fn wait_until_next_period() {
    with_scheduler(|s| s.wait_until_next_period());
    arch::pend_context_switch();
}

/// Allocate a priority-ceiling mutex. Returns an opaque non-zero
/// handle, or None when the quota is exhausted.
pub fn mutex_init(ceiling: u32) -> Option<u32> {
    with_scheduler(|s| s.mutex_init(ceiling)).map(|index| index as u32 + 1)
}

/// Acquire a mutex, blocking while another thread owns it. A call
/// whose static priority violates the ceiling kills the caller.
pub fn mutex_lock(handle: u32) {
    let m = (handle as usize).wrapping_sub(1);
    loop {
        match with_scheduler(|s| s.mutex_lock_attempt(m)) {
            LockOutcome::Acquired
            | LockOutcome::AlreadyHeld
            | LockOutcome::Denied
            | LockOutcome::Ignored => return,
            LockOutcome::CeilingViolation => {
                thread_kill();
                return;
            }
            LockOutcome::Blocked => {
                // The switch happens as soon as the pend lands; when
                // the owner releases, the loop re-tests and claims.
                arch::pend_context_switch();
            }
        }
    }
}

/// Release a mutex owned by the caller; a higher-priority waiter may
/// run before this returns.
pub fn mutex_unlock(handle: u32) {
    let m = (handle as usize).wrapping_sub(1);
    match with_scheduler(|s| s.mutex_unlock(m)) {
        UnlockOutcome::Released => arch::pend_context_switch(),
        UnlockOutcome::NotOwner | UnlockOutcome::Ignored => {}
    }
}

/// Current kernel tick count.
pub fn get_time() -> u32 {
    with_scheduler(|s| s.get_time())
}

/// Busy-wait until `ticks` kernel ticks have elapsed. Sleeps between
/// interrupts; the caller keeps its compute budget ticking.
pub fn delay(ticks: u32) {
    let start = get_time();
    while get_time().wrapping_sub(start) < ticks {
        arch::wait_for_interrupt();
    }
}

/// The calling thread's effective priority.
pub fn get_priority() -> u32 {
    with_scheduler(|s| s.get_priority())
}

/// Ticks the calling thread has spent running.
pub fn thread_time() -> u32 {
    with_scheduler(|s| s.thread_time())
}

// ---------------------------------------------------------------------------
// ISR entry points (called from the arch layer)
// ---------------------------------------------------------------------------

/// SysTick body: advance kernel time and pend the switch; once the
/// scheduler has handed control back to main, stop the tick instead.
pub fn tick_isr() {
    let started = unsafe {
        let sched = &mut *SCHEDULER_PTR;
        sched.tick();
        sched.started
    };
    if started {
        arch::pend_context_switch();
    } else {
        arch::systick_stop();
    }
}

/// PendSV body: save the incumbent's frame, pick the next thread,
/// return its frame.
///
/// # Safety
/// ISR context only; `frame` must be the just-pushed callee frame.
pub unsafe fn context_switch_isr(
    frame: *mut crate::task::SavedCalleeFrame,
) -> *mut crate::task::SavedCalleeFrame {
    (*SCHEDULER_PTR).context_switch(frame)
}

/// SVCall body: decode and run one syscall.
///
/// # Safety
/// ISR context only; `frame` must be the caller's trap frame.
pub unsafe fn svc_isr(frame: *mut crate::syscall::SvcFrame) {
    syscall::dispatch(&mut *SCHEDULER_PTR, &mut *frame)
}

// ---------------------------------------------------------------------------
// Thread trampolines
// ---------------------------------------------------------------------------

/// Where a thread function lands when it returns: the thread is
/// killed and the slot becomes revivable.
pub extern "C" fn thread_exit_trampoline() -> ! {
    thread_kill();
    loop {
        arch::wait_for_interrupt();
    }
}

/// Default idle loop, used when `thread_init` gets no idle function
/// and as the replacement after `thread_kill` on the idle thread.
pub extern "C" fn default_idle() -> ! {
    loop {
        arch::wait_for_interrupt();
    }
}
