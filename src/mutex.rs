//! # Priority-Ceiling Mutexes
//!
//! A fixed table of mutexes serialising access to shared resources
//! under the Highest-Locker / Immediate Priority Ceiling Protocol.
//! Every mutex carries a static *ceiling*: the numerically smallest
//! priority of any thread that will ever lock it. On acquisition the
//! owner's dynamic priority is elevated to `min(dyn_prio, ceiling)`
//! and restored (recomputed from scratch) on release, bounding
//! priority inversion to a single critical section.
//!
//! Protocol enforcement:
//! - a thread whose static priority is above the ceiling can never
//!   legally hold the mutex; attempting the lock is fatal to it
//! - a lock is denied while any *other* thread holds a mutex whose
//!   ceiling is at or above the caller's dynamic priority
//! - double lock, double unlock, and unlock-by-non-owner warn on the
//!   diagnostic channel and change no state

use crate::scheduler::Scheduler;
use crate::task::ThreadState;

/// One entry in the mutex table. Cross-references to threads are
/// slot indices, never pointers; the inverse relation lives in the
/// TCB bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct KernelMutex {
    /// Highest priority (numerically smallest index) permitted to
    /// lock this mutex. Immutable after `mutex_init`.
    pub ceiling: u32,
    /// Owning slot, or None when free.
    pub owner: Option<usize>,
    /// Own position in the table.
    pub index: usize,
}

impl KernelMutex {
    pub const EMPTY: KernelMutex = KernelMutex { ceiling: 0, owner: None, index: 0 };
}

/// Result of a single lock attempt by the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now owns the mutex.
    Acquired,
    /// Contended: the caller is Blocked and must retry once
    /// re-dispatched.
    Blocked,
    /// Denied by the ceiling-admission rule; no state change.
    Denied,
    /// The caller already owns this mutex; warned, no state change.
    AlreadyHeld,
    /// The caller's static priority is above the ceiling — fatal to
    /// the caller.
    CeilingViolation,
    /// Idle-thread call or invalid handle; nothing happened.
    Ignored,
}

/// Result of an unlock by the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Released; a context switch is due so a waiter may claim it.
    Released,
    /// Caller does not own the mutex (includes double unlock);
    /// warned, no state change.
    NotOwner,
    /// Invalid handle; nothing happened.
    Ignored,
}

impl Scheduler {
    /// Allocate the next free mutex slot with the given ceiling.
    /// Returns the table index, or None once the quota requested at
    /// `thread_init` is exhausted.
    pub fn mutex_init(&mut self, ceiling: u32) -> Option<usize> {
        if self.mutex_count >= self.max_mutexes {
            log::warn!("mutex table exhausted ({} allocated)", self.mutex_count);
            return None;
        }
        let index = self.mutex_count;
        self.mutexes[index] = KernelMutex { ceiling, owner: None, index };
        self.mutex_count += 1;
        Some(index)
    }

    /// One pass of `mutex_lock` for the current thread. The blocking
    /// service loops: on [`LockOutcome::Blocked`] it pends a context
    /// switch and retries after being re-dispatched.
    pub fn mutex_lock_attempt(&mut self, m: usize) -> LockOutcome {
        let slot = self.current;
        if slot == self.idle_slot() {
            return LockOutcome::Ignored;
        }
        if m >= self.mutex_count {
            log::warn!("lock of invalid mutex handle {}", m);
            return LockOutcome::Ignored;
        }

        let ceiling = self.mutexes[m].ceiling;
        let tcb = &self.tcbs[slot];

        // A thread more urgent than the ceiling could never legally
        // hold this mutex under the ceiling protocol.
        if tcb.static_prio < ceiling {
            log::warn!(
                "thread {} (prio {}) violates ceiling {} of mutex {}",
                slot,
                tcb.static_prio,
                ceiling,
                m
            );
            return LockOutcome::CeilingViolation;
        }

        if tcb.held_mutexes.contains(m) {
            log::warn!("thread {} double-locked mutex {}", slot, m);
            return LockOutcome::AlreadyHeld;
        }

        // Ceiling admission: no acquisition while any other thread
        // holds a mutex whose ceiling is at or above the caller's
        // dynamic priority.
        let dyn_prio = tcb.dyn_prio;
        for other in 0..self.mutex_count {
            if other == m {
                continue;
            }
            if let Some(owner) = self.mutexes[other].owner {
                if owner != slot && self.mutexes[other].ceiling <= dyn_prio {
                    log::warn!(
                        "thread {} denied mutex {}: mutex {} held at ceiling {}",
                        slot,
                        m,
                        other,
                        self.mutexes[other].ceiling
                    );
                    return LockOutcome::Denied;
                }
            }
        }

        if self.mutexes[m].owner.is_some() {
            self.tcbs[slot].state = ThreadState::Blocked;
            self.tcbs[slot].waiting_mutexes.insert(m);
            return LockOutcome::Blocked;
        }

        self.mutexes[m].owner = Some(slot);
        self.tcbs[slot].held_mutexes.insert(m);
        let elevated = dyn_prio.min(ceiling);
        self.tcbs[slot].dyn_prio = elevated;
        LockOutcome::Acquired
    }

    /// `mutex_unlock` for the current thread.
    pub fn mutex_unlock(&mut self, m: usize) -> UnlockOutcome {
        let slot = self.current;
        if m >= self.mutex_count {
            log::warn!("unlock of invalid mutex handle {}", m);
            return UnlockOutcome::Ignored;
        }
        if self.mutexes[m].owner != Some(slot) {
            log::warn!("thread {} unlocked mutex {} it does not own", slot, m);
            return UnlockOutcome::NotOwner;
        }
        self.release_mutex(m, slot);
        UnlockOutcome::Released
    }

    /// Release `m` on behalf of `owner`: clear ownership, restore the
    /// owner's dynamic priority, and strip the mutex from every
    /// waiter's wait set. Waiters whose sets become empty are
    /// promoted by the scheduler's next unblock pass.
    pub(crate) fn release_mutex(&mut self, m: usize, owner: usize) {
        self.mutexes[m].owner = None;
        self.tcbs[owner].held_mutexes.remove(m);
        self.recompute_dyn_prio(owner);

        for slot in 0..self.max_threads {
            if self.tcbs[slot].state == ThreadState::Blocked {
                self.tcbs[slot].waiting_mutexes.remove(m);
            }
        }
    }

    /// `dyn_prio` is recomputed from scratch, never decremented, so
    /// nested lock/unlock sequences cannot drift.
    fn recompute_dyn_prio(&mut self, slot: usize) {
        let held = self.tcbs[slot].held_mutexes;
        let mut prio = self.tcbs[slot].static_prio;
        for m in held.iter() {
            prio = prio.min(self.mutexes[m].ceiling);
        }
        self.tcbs[slot].dyn_prio = prio;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
