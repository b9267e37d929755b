//! # Scheduler
//!
//! Core scheduling state and logic for RMOS: the TCB table, the two
//! stack pools, the mutex table, and the rate-monotonic scheduling
//! decision.
//!
//! ## Per-Tick Algorithm
//!
//! At each SysTick interrupt, [`Scheduler::tick`] runs:
//! 1. **Advance time**: bump the tick counter and the current
//!    thread's elapsed-tick account
//! 2. **Charge budget**: a running user thread pays one compute
//!    tick; on exhaustion it transitions to Waiting with its budget
//!    refilled for the next release
//! 3. **Release periods**: every schedulable thread whose period
//!    divides the tick counter is made Ready with a full budget
//!
//! The deferred context switch then calls [`Scheduler::schedule`]:
//! 4. **Unblock pass**: Blocked threads whose waited mutexes have
//!    all been released become Ready
//! 5. **Demote**: the running thread is put back to Ready
//! 6. **Select**: the Ready user thread with the numerically
//!    smallest dynamic priority wins (a tie against an elevated
//!    mutex holder goes to the holder, other ties to the lower
//!    slot); idle runs when every populated thread is Waiting or
//!    Blocked; main runs when no user thread remains schedulable
//! 7. The chosen thread is marked Running
//!
//! Switches that do not originate from the tick (mutex operations,
//! `wait_until_next_period`, kills) go through steps 4–7 only.

use crate::admission;
use crate::config::{MAX_MUTEXES, MAX_SLOTS, MAX_THREADS, STACK_POOL_BYTES, STACK_POOL_WORDS};
use crate::mutex::KernelMutex;
use crate::task::{
    seed_thread_frames, SavedCalleeFrame, StackPool, ThreadControlBlock, ThreadState,
};
use crate::time::TickClock;

// ---------------------------------------------------------------------------
// Error model
// ---------------------------------------------------------------------------

/// Why a kernel service refused to act. The syscall layer flattens
/// these to the `-1` / NULL ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A parameter is out of the range the kernel was built for.
    InvalidArgument,
    /// The requested priority lies outside the admitted thread set.
    QuotaExceeded,
    /// The target slot already hosts a schedulable thread.
    SlotOccupied,
    /// The task set would fail the utilisation-bound test.
    Infeasible,
    /// A fixed table (mutexes) has no free entry left.
    Exhausted,
}

/// What `thread_kill` did, so the caller can finish the job
/// (terminate the kernel, or pend a context switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The main thread asked to die: the kernel itself terminates.
    Main,
    /// The idle thread asked to die: it was re-targeted at the
    /// default halt loop and keeps running.
    IdleRestarted,
    /// A user thread is now Done; a context switch is due.
    Killed,
}

/// Entry addresses wired in at `thread_init` time.
#[derive(Debug, Clone, Copy)]
pub struct EntryHooks {
    /// Idle thread entry point.
    pub idle_entry: u32,
    /// Fallback idle entry, installed if the idle thread is killed.
    pub default_idle_entry: u32,
    /// Where a returning thread function lands (the kill trampoline).
    pub kill_trampoline: u32,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central kernel state. Holds all TCBs, both stack pools, the
/// mutex table, and the tick clock. Stored as a global `static mut`
/// in `kernel.rs`; everything routes through kernel services or ISR
/// context, both of which run with preemption disabled.
pub struct Scheduler {
    /// Fixed TCB table: user slots `0..max_threads`, then idle, then
    /// main.
    pub tcbs: [ThreadControlBlock; MAX_SLOTS],

    /// Fixed mutex table; `mutex_count` entries are live.
    pub mutexes: [KernelMutex; MAX_MUTEXES],
    pub mutex_count: usize,
    /// Mutex quota requested at `thread_init`.
    pub max_mutexes: usize,

    /// Admitted user-thread count; zero until `thread_init`.
    pub max_threads: usize,
    /// Per-slot stack size in words, rounded to a power of two.
    pub stack_words: usize,

    /// Slot index of the thread considered current.
    pub current: usize,

    /// Monotonic tick clock.
    pub clock: TickClock,

    /// True between `scheduler_start` and the return to main.
    pub started: bool,

    hooks: EntryHooks,

    user_pool: StackPool,
    kernel_pool: StackPool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler {
            tcbs: [ThreadControlBlock::EMPTY; MAX_SLOTS],
            mutexes: [KernelMutex::EMPTY; MAX_MUTEXES],
            mutex_count: 0,
            max_mutexes: 0,
            max_threads: 0,
            stack_words: 0,
            current: 0,
            clock: TickClock::new(),
            started: false,
            hooks: EntryHooks { idle_entry: 0, default_idle_entry: 0, kill_trampoline: 0 },
            user_pool: StackPool::new(),
            kernel_pool: StackPool::new(),
        }
    }

    /// Slot index of the idle thread.
    #[inline]
    pub fn idle_slot(&self) -> usize {
        self.max_threads
    }

    /// Slot index of the main thread.
    #[inline]
    pub fn main_slot(&self) -> usize {
        self.max_threads + 1
    }

    /// Whether `slot` is a user thread (as opposed to idle or main).
    #[inline]
    pub fn is_user_slot(&self, slot: usize) -> bool {
        slot < self.max_threads
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Lay out the TCB table and both stack pools.
    ///
    /// Fails if the thread quota exceeds the table, if the requested
    /// stacks would not fit the pools, or if the mutex quota exceeds
    /// the table. `stack_words` is rounded up to a power of two
    /// before slots are carved.
    pub fn thread_init(
        &mut self,
        max_threads: usize,
        stack_words: usize,
        max_mutexes: usize,
        hooks: EntryHooks,
    ) -> Result<(), KernelError> {
        if max_threads > MAX_THREADS || stack_words == 0 || max_mutexes > MAX_MUTEXES {
            return Err(KernelError::InvalidArgument);
        }
        if max_threads * stack_words * 4 > STACK_POOL_BYTES {
            return Err(KernelError::InvalidArgument);
        }
        let words = stack_words.next_power_of_two();
        // Idle and main also get slots; the rounded size must still fit.
        if (max_threads + 2) * words > STACK_POOL_WORDS {
            return Err(KernelError::InvalidArgument);
        }

        self.max_threads = max_threads;
        self.stack_words = words;
        self.max_mutexes = max_mutexes;
        self.mutex_count = 0;
        self.mutexes = [KernelMutex::EMPTY; MAX_MUTEXES];
        self.clock = TickClock::new();
        self.started = false;
        self.hooks = hooks;

        for slot in 0..max_threads {
            self.tcbs[slot] = ThreadControlBlock::EMPTY;
            self.tcbs[slot].static_prio = slot as u32;
            self.tcbs[slot].dyn_prio = slot as u32;
            self.seed_slot(slot, 0, 0);
        }

        let idle = self.idle_slot();
        self.tcbs[idle] = ThreadControlBlock::EMPTY;
        self.tcbs[idle].configure(idle as u32, u32::MAX, u32::MAX, ThreadState::Ready);
        self.seed_slot(idle, hooks.idle_entry, 0);

        let main = self.main_slot();
        self.tcbs[main] = ThreadControlBlock::EMPTY;
        self.tcbs[main].configure(main as u32, u32::MAX, u32::MAX, ThreadState::Running);
        // Main's placeholder frame is overwritten by its first
        // context save; it returns on the main stack, not a process
        // stack.
        self.seed_slot(main, 0, 0);
        unsafe {
            (*self.tcbs[main].kernel_sp).exc_return = crate::task::EXC_RETURN_THREAD_MSP;
        }
        self.current = main;

        Ok(())
    }

    /// Seed the boot frames for `slot` and record its kernel stack
    /// pointer.
    fn seed_slot(&mut self, slot: usize, entry: u32, arg: u32) {
        let kill = self.hooks.kill_trampoline;
        let words = self.stack_words;
        let kernel_top = self.kernel_pool.slot_top(slot, words);
        let user_top = self.user_pool.slot_top(slot, words);
        self.tcbs[slot].kernel_sp =
            unsafe { seed_thread_frames(kernel_top, user_top, entry, arg, kill) };
    }

    /// Admit a thread into `prio`'s slot.
    ///
    /// Rejects a priority outside the admitted set, an occupied slot,
    /// or a task set that would fail the utilisation bound with the
    /// candidate counted in. A slot left Done by `thread_kill` is
    /// fully reusable; when the scheduler is already running the
    /// revived thread parks in Waiting so its first release lands on
    /// its next period boundary.
    pub fn thread_create(
        &mut self,
        entry: u32,
        prio: u32,
        compute: u32,
        period: u32,
        arg: u32,
    ) -> Result<(), KernelError> {
        if self.max_threads == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let slot = prio as usize;
        if slot >= self.max_threads {
            return Err(KernelError::QuotaExceeded);
        }
        if self.tcbs[slot].is_schedulable() {
            return Err(KernelError::SlotOccupied);
        }

        let existing = self
            .tcbs[..self.max_threads]
            .iter()
            .enumerate()
            .filter(|(i, t)| *i != slot && t.is_schedulable())
            .map(|(_, t)| (t.compute_ticks, t.period));
        if !admission::admissible(existing, compute, period) {
            return Err(KernelError::Infeasible);
        }

        let state = if self.started { ThreadState::Waiting } else { ThreadState::Ready };
        self.tcbs[slot].configure(prio, compute, period, state);
        self.seed_slot(slot, entry, arg);
        log::info!("thread {} admitted (C={}, T={})", prio, compute, period);
        Ok(())
    }

    /// Kill the current thread. Held mutexes are released (waiters
    /// are stripped and will be promoted by the next unblock pass).
    pub fn thread_kill(&mut self) -> KillOutcome {
        let slot = self.current;
        if slot == self.main_slot() {
            return KillOutcome::Main;
        }
        if slot == self.idle_slot() {
            let entry = self.hooks.default_idle_entry;
            self.seed_slot(slot, entry, 0);
            self.tcbs[slot].state = ThreadState::Ready;
            return KillOutcome::IdleRestarted;
        }

        for m in 0..self.mutex_count {
            if self.mutexes[m].owner == Some(slot) {
                self.release_mutex(m, slot);
            }
        }
        self.tcbs[slot].state = ThreadState::Done;
        log::info!("thread {} killed", slot);
        KillOutcome::Killed
    }

    /// Park the current thread until its next period release.
    pub fn wait_until_next_period(&mut self) {
        let slot = self.current;
        if self.is_user_slot(slot) {
            self.tcbs[slot].state = ThreadState::Waiting;
        }
    }

    // -----------------------------------------------------------------------
    // Tick path
    // -----------------------------------------------------------------------

    /// Steps 1–3 of the per-tick algorithm. Runs from the tick
    /// interrupt before the context switch is pended.
    pub fn tick(&mut self) {
        self.clock.advance();

        let current = self.current;
        self.tcbs[current].elapsed_ticks = self.tcbs[current].elapsed_ticks.wrapping_add(1);

        // Charge the running user thread one compute tick.
        if self.is_user_slot(current)
            && self.tcbs[current].state == ThreadState::Running
            && self.tcbs[current].budget_left > 0
        {
            self.tcbs[current].budget_left -= 1;
            if self.tcbs[current].budget_left == 0 {
                self.tcbs[current].state = ThreadState::Waiting;
                self.tcbs[current].budget_left = self.tcbs[current].compute_ticks;
            }
        }

        // Period releases.
        for slot in 0..self.max_threads {
            let tcb = &mut self.tcbs[slot];
            match tcb.state {
                ThreadState::Ready | ThreadState::Waiting | ThreadState::Running => {
                    if self.clock.is_release_point(tcb.period) {
                        tcb.budget_left = tcb.compute_ticks;
                        tcb.state = ThreadState::Ready;
                    }
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Selection path
    // -----------------------------------------------------------------------

    /// Steps 4–7: unblock, demote, select under RMS with the ceiling
    /// protocol, and mark the winner Running. Returns the chosen
    /// slot.
    pub fn schedule(&mut self) -> usize {
        // Unblock pass: the last waited mutex may have been released.
        for slot in 0..self.max_threads {
            if self.tcbs[slot].state == ThreadState::Blocked
                && self.tcbs[slot].waiting_mutexes.is_empty()
            {
                self.tcbs[slot].state = ThreadState::Ready;
            }
        }

        // Demote the incumbent; it re-competes like everyone else.
        if self.tcbs[self.current].state == ThreadState::Running {
            self.tcbs[self.current].state = ThreadState::Ready;
        }

        // RMS selection on dynamic priority. Distinct static
        // priorities cannot tie; a tie therefore pits a thread
        // elevated by a held ceiling against the ceiling-priority
        // thread itself, and the holder wins so its critical section
        // finishes first. Remaining ties go to the lower slot.
        let mut chosen: Option<usize> = None;
        for slot in 0..self.max_threads {
            let tcb = &self.tcbs[slot];
            if tcb.state != ThreadState::Ready || !tcb.waiting_mutexes.is_empty() {
                continue;
            }
            let wins = match chosen {
                None => true,
                Some(best_slot) => {
                    let best = &self.tcbs[best_slot];
                    tcb.dyn_prio < best.dyn_prio
                        || (tcb.dyn_prio == best.dyn_prio
                            && tcb.dyn_prio < tcb.static_prio
                            && best.dyn_prio == best.static_prio)
                }
            };
            if wins {
                chosen = Some(slot);
            }
        }

        let next = match chosen {
            Some(slot) => slot,
            None => {
                let parked = self.tcbs[..self.max_threads].iter().any(|t| {
                    matches!(t.state, ThreadState::Waiting | ThreadState::Blocked)
                });
                if parked {
                    self.idle_slot()
                } else {
                    // Terminal: every user thread is Done (or never
                    // existed), so scheduling ends and main resumes.
                    self.started = false;
                    self.main_slot()
                }
            }
        };

        self.tcbs[next].state = ThreadState::Running;
        self.current = next;
        next
    }

    /// The deferred-context-switch body: record where the preempted
    /// thread's callee-saved frame was pushed, pick the next thread,
    /// and hand back the frame to restore.
    pub fn context_switch(&mut self, saved: *mut SavedCalleeFrame) -> *mut SavedCalleeFrame {
        self.tcbs[self.current].kernel_sp = saved;
        let next = self.schedule();
        self.tcbs[next].kernel_sp
    }

    // -----------------------------------------------------------------------
    // Introspection services
    // -----------------------------------------------------------------------

    /// Current tick counter.
    pub fn get_time(&self) -> u32 {
        self.clock.now()
    }

    /// The calling thread's effective (dynamic) priority.
    pub fn get_priority(&self) -> u32 {
        self.tcbs[self.current].dyn_prio
    }

    /// Ticks the calling thread has spent Running since creation.
    pub fn thread_time(&self) -> u32 {
        self.tcbs[self.current].elapsed_ticks
    }

    /// Whether every user slot is past its lifecycle (Done or never
    /// populated); main is then the terminal pick.
    pub fn all_user_threads_done(&self) -> bool {
        self.tcbs[..self.max_threads].iter().all(|t| !t.is_schedulable())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
