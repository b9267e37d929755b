//! # Thread Control Block
//!
//! Defines the thread model for RMOS. Each thread occupies a fixed
//! TCB slot whose index doubles as its rate-monotonic static
//! priority (lower index = shorter period = more urgent). Two extra
//! slots follow the user threads: the idle thread and the main
//! thread that hosts pre-scheduler execution.
//!
//! ## State Machine
//!
//! ```text
//!   thread_init          thread_create            dispatch
//!  ┌─────┐    NEW ──────────────► READY ◄──────────────┐
//!  └─────┘                          │  ▲               │
//!                period release ────┘  │            RUNNING
//!                                      │               │
//!          budget exhausted /          │               │
//!          wait_until_next_period ► WAITING ◄──────────┤
//!                                      │               │
//!          contended mutex_lock ──► BLOCKED ◄──────────┤
//!          (READY again once the last waited           │
//!           mutex is released)                         ▼
//!                                                    DONE
//!                                            (thread_kill; slot
//!                                             revivable by a new
//!                                             thread_create)
//! ```
//!
//! ## Dual-Stack Layout
//!
//! Every slot owns one stack in the user pool and one in the kernel
//! pool, at statically computed offsets. The top of the kernel stack
//! holds a [`SavedCalleeFrame`]: the saved user stack pointer, the
//! callee-saved registers, and the exception-return code. The saved
//! user stack pointer in turn addresses the hardware-stacked
//! [`TrapFrame`] on the thread's user stack. A thread's continuation
//! is exactly these two frames — no other per-thread kernel state is
//! needed to resume it.

use crate::config::{MAX_MUTEXES, STACK_POOL_WORDS};

/// Initial xPSR for a fresh thread: all zero except the Thumb bit.
pub const XPSR_INIT: u32 = 0x0100_0000;

/// Exception-return code resuming thread mode on the process stack.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Exception-return code resuming thread mode on the main stack
/// (only the main thread returns this way).
pub const EXC_RETURN_THREAD_MSP: u32 = 0xFFFF_FFF9;

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread in the scheduler's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot laid out by `thread_init` but not yet populated.
    New,
    /// Released and runnable, waiting for the dispatcher.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Out of budget for this period, or parked by
    /// `wait_until_next_period`; runnable again at the next release.
    Waiting,
    /// Parked on one or more contended mutexes.
    Blocked,
    /// Killed or returned; the slot may be reused by `thread_create`.
    Done,
}

// ---------------------------------------------------------------------------
// Mutex bitmap
// ---------------------------------------------------------------------------

/// A set of mutex indices, stored as a bitmap over the fixed mutex
/// table. TCB↔mutex cross-references go through these indices and
/// the mutex table's `owner` field — never raw pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexSet(u32);

impl MutexSet {
    pub const EMPTY: MutexSet = MutexSet(0);

    #[inline]
    pub fn insert(&mut self, index: usize) {
        debug_assert!(index < MAX_MUTEXES);
        self.0 |= 1 << index;
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        self.0 &= !(1 << index);
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the contained mutex indices, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_MUTEXES).filter(move |i| self.contains(*i))
    }
}

// ---------------------------------------------------------------------------
// Saved execution frames
// ---------------------------------------------------------------------------

/// The frame the hardware stacks on exception entry, and that
/// `thread_create` pre-seeds on a fresh user stack so the first
/// exception return "resumes" into the thread function.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// The software-saved frame at the top of a thread's kernel stack:
/// the saved user stack pointer, the callee-saved registers, and the
/// exception-return code that selects which stack the hardware
/// unstacks from. The context switch stores and reloads exactly this.
#[derive(Debug)]
#[repr(C)]
pub struct SavedCalleeFrame {
    /// Saved user (process) stack pointer for this thread.
    pub psp: *mut TrapFrame,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    /// EXC_RETURN code popped into `lr` before the exception return.
    pub exc_return: u32,
}

// ---------------------------------------------------------------------------
// Stack pools
// ---------------------------------------------------------------------------

/// A contiguous pool of thread stacks, reserved at link time as part
/// of the kernel data region. Slot `i`'s stack occupies
/// `words` 32-bit words ending at `pool_top - i * words`. Stacks
/// grow downward.
#[repr(align(8))]
pub struct StackPool(pub [u32; STACK_POOL_WORDS]);

impl StackPool {
    pub const fn new() -> Self {
        StackPool([0; STACK_POOL_WORDS])
    }

    /// Top-of-stack address for `slot`, given the per-slot word count.
    ///
    /// Callers must have validated `(slot + 1) * words <=
    /// STACK_POOL_WORDS`; `thread_init` enforces this before any
    /// frame is laid out.
    pub fn slot_top(&mut self, slot: usize, words: usize) -> *mut u32 {
        debug_assert!((slot + 1) * words <= STACK_POOL_WORDS);
        let end = unsafe { self.0.as_mut_ptr().add(STACK_POOL_WORDS) };
        unsafe { end.sub(slot * words) }
    }

    /// Whether `ptr` lies within slot `slot`'s stack range.
    pub fn contains(&mut self, slot: usize, words: usize, ptr: *const u32) -> bool {
        let top = self.slot_top(slot, words) as usize;
        let low = top - words * 4;
        (ptr as usize) > low && (ptr as usize) <= top
    }
}

/// Seed the boot frames for a thread: the hardware trap frame at the
/// top of its user stack and the saved-callee frame at the top of its
/// kernel stack. Returns the thread's initial `kernel_sp`.
///
/// `entry` and `arg` land in `pc` and `r0`; `exit_lr` is the address
/// of the thread-kill trampoline, so a thread function that returns
/// is killed rather than running off its stack.
///
/// # Safety
/// Both stack tops must address valid, exclusively owned stack
/// memory large enough for the frames.
pub unsafe fn seed_thread_frames(
    kernel_top: *mut u32,
    user_top: *mut u32,
    entry: u32,
    arg: u32,
    exit_lr: u32,
) -> *mut SavedCalleeFrame {
    let user_sp = (user_top as *mut u8).sub(core::mem::size_of::<TrapFrame>()) as *mut TrapFrame;
    user_sp.write(TrapFrame {
        r0: arg,
        r1: 0,
        r2: 0,
        r3: 0,
        r12: 0,
        lr: exit_lr,
        pc: entry,
        xpsr: XPSR_INIT,
    });

    let kernel_sp = (kernel_top as *mut u8).sub(core::mem::size_of::<SavedCalleeFrame>())
        as *mut SavedCalleeFrame;
    kernel_sp.write(SavedCalleeFrame {
        psp: user_sp,
        r4: 0,
        r5: 0,
        r6: 0,
        r7: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        exc_return: EXC_RETURN_THREAD_PSP,
    });
    kernel_sp
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block — the kernel's per-thread record.
///
/// TCBs live in a fixed array inside the kernel data region; no heap.
/// The slot index is the thread's static priority. `dyn_prio` tracks
/// the effective priority under the immediate priority ceiling
/// protocol: it equals `static_prio` except while elevated by a held
/// mutex ceiling, and is always recomputed from scratch, never
/// incremented.
pub struct ThreadControlBlock {
    /// Saved kernel stack pointer; addresses a [`SavedCalleeFrame`].
    pub kernel_sp: *mut SavedCalleeFrame,

    /// Static rate-monotonic priority; equals the slot index.
    pub static_prio: u32,

    /// Effective priority: `min(static_prio, min ceiling of held
    /// mutexes)`.
    pub dyn_prio: u32,

    /// Worst-case compute ticks per period (C).
    pub compute_ticks: u32,

    /// Period length in ticks (T).
    pub period: u32,

    /// Compute ticks remaining in the current period.
    pub budget_left: u32,

    /// Position in the thread state machine.
    pub state: ThreadState,

    /// Mutexes this thread currently owns.
    pub held_mutexes: MutexSet,

    /// Mutexes this thread is blocked on (non-empty iff BLOCKED).
    pub waiting_mutexes: MutexSet,

    /// Depth of in-progress kernel service calls; routes the next
    /// context-switch return through the correct stack.
    pub svc_nesting: u32,

    /// Total ticks spent RUNNING since creation.
    pub elapsed_ticks: u32,
}

// Safety: the raw kernel_sp pointer always addresses the slot's own
// kernel stack inside the kernel data region, and TCBs are only
// touched inside critical sections or from ISR context.
unsafe impl Send for ThreadControlBlock {}
unsafe impl Sync for ThreadControlBlock {}

impl ThreadControlBlock {
    /// An unpopulated slot. Used to build the static TCB table.
    pub const EMPTY: ThreadControlBlock = ThreadControlBlock {
        kernel_sp: core::ptr::null_mut(),
        static_prio: 0,
        dyn_prio: 0,
        compute_ticks: 0,
        period: 0,
        budget_left: 0,
        state: ThreadState::New,
        held_mutexes: MutexSet::EMPTY,
        waiting_mutexes: MutexSet::EMPTY,
        svc_nesting: 0,
        elapsed_ticks: 0,
    };

    /// Populate the slot with rate-monotonic parameters and make it
    /// schedulable in `state`.
    pub fn configure(&mut self, prio: u32, compute: u32, period: u32, state: ThreadState) {
        self.static_prio = prio;
        self.dyn_prio = prio;
        self.compute_ticks = compute;
        self.period = period;
        self.budget_left = compute;
        self.state = state;
        self.held_mutexes = MutexSet::EMPTY;
        self.waiting_mutexes = MutexSet::EMPTY;
        self.svc_nesting = 0;
        self.elapsed_ticks = 0;
    }

    /// Whether this slot participates in admission and scheduling.
    #[inline]
    pub fn is_schedulable(&self) -> bool {
        !matches!(self.state, ThreadState::New | ThreadState::Done)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
