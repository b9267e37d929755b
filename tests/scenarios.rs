//! End-to-end scheduling scenarios, simulated at the state-machine
//! level: a tiny script interpreter stands in for the thread bodies
//! and drives `tick()`/`schedule()` the way the SysTick/PendSV pair
//! does on hardware. One simulated tick is one millisecond at the
//! usual 1 kHz clock.

use rmos::mutex::{LockOutcome, UnlockOutcome};
use rmos::scheduler::{EntryHooks, Scheduler};
use rmos::task::ThreadState;

const HOOKS: EntryHooks = EntryHooks {
    idle_entry: 0x0800_0100,
    default_idle_entry: 0x0800_0100,
    kill_trampoline: 0x0800_0200,
};

/// Placeholder entry address for simulated threads.
const ENTRY: u32 = 0x0800_4000;

// ---------------------------------------------------------------------------
// Script interpreter
// ---------------------------------------------------------------------------

/// One step of a simulated thread body. Kernel calls are
/// instantaneous; only `Spin` consumes ticks.
#[derive(Debug, Clone, Copy)]
enum Act {
    /// Burn this many ticks of compute.
    Spin(u32),
    /// Record `(thread, value)` in the event log.
    Log(u32),
    /// `mutex_lock` on a table index, retried while blocked.
    Lock(usize),
    /// `mutex_unlock` on a table index.
    Unlock(usize),
    /// `wait_until_next_period`.
    Wait,
    /// Thread function returns: the kill trampoline fires.
    Return,
    /// `exit(code)`: the whole program terminates.
    ExitProgram(i32),
    /// `thread_create` from inside a thread, restarting the target
    /// slot's script at `restart_ip`.
    Revive { prio: u32, compute: u32, period: u32, restart_ip: usize },
}

struct Script {
    acts: Vec<Act>,
    ip: usize,
    spin_left: u32,
    spin_active: bool,
}

impl Script {
    fn new(acts: Vec<Act>) -> Self {
        Script { acts, ip: 0, spin_left: 0, spin_active: false }
    }

    fn restart(&mut self, ip: usize) {
        self.ip = ip;
        self.spin_left = 0;
        self.spin_active = false;
    }
}

struct Sim {
    sched: Box<Scheduler>,
    scripts: Vec<Script>,
    /// `(slot, value)` pairs in the order the threads logged them.
    events: Vec<(usize, u32)>,
    /// `(tick, running slot)` after every tick's schedule pass.
    occupancy: Vec<(u32, usize)>,
    exited: Option<i32>,
}

impl Sim {
    fn new(sched: Box<Scheduler>, scripts: Vec<Script>) -> Self {
        Sim { sched, scripts, events: Vec::new(), occupancy: Vec::new(), exited: None }
    }

    /// Start the clock and run until the program exits or the
    /// scheduler hands control back to main.
    fn run(&mut self, freq_hz: u32, max_ticks: u32) {
        self.sched.clock.start(freq_hz);
        self.sched.started = true;
        self.sched.schedule();

        for _ in 0..max_ticks {
            self.run_actions();
            if self.exited.is_some() {
                return;
            }
            if self.sched.current == self.sched.main_slot() {
                return; // scheduler_start returns
            }

            let prev = self.sched.current;
            let spinning = self.sched.is_user_slot(prev)
                && self.sched.tcbs[prev].state == ThreadState::Running;
            self.sched.tick();
            if spinning && self.scripts[prev].spin_active && self.scripts[prev].spin_left > 0 {
                self.scripts[prev].spin_left -= 1;
            }
            self.sched.schedule();
            self.occupancy.push((self.sched.clock.now(), self.sched.current));
            self.check_invariants();
        }
        panic!("simulation exceeded {} ticks", max_ticks);
    }

    /// Execute the current thread's instantaneous actions until it
    /// spins, parks, or the CPU falls to idle/main.
    fn run_actions(&mut self) {
        for _ in 0..10_000 {
            let cur = self.sched.current;
            if !self.sched.is_user_slot(cur)
                || self.sched.tcbs[cur].state != ThreadState::Running
            {
                return;
            }

            if self.scripts[cur].spin_active {
                if self.scripts[cur].spin_left > 0 {
                    return; // keep burning ticks
                }
                self.scripts[cur].spin_active = false;
                self.scripts[cur].ip += 1;
                continue;
            }

            let act = self.scripts[cur].acts.get(self.scripts[cur].ip).copied();
            match act {
                None | Some(Act::Return) => {
                    self.sched.thread_kill();
                    self.sched.schedule();
                }
                Some(Act::Spin(n)) => {
                    if n == 0 {
                        self.scripts[cur].ip += 1;
                    } else {
                        self.scripts[cur].spin_active = true;
                        self.scripts[cur].spin_left = n;
                    }
                }
                Some(Act::Log(value)) => {
                    self.events.push((cur, value));
                    self.scripts[cur].ip += 1;
                }
                Some(Act::Lock(m)) => match self.sched.mutex_lock_attempt(m) {
                    LockOutcome::Acquired
                    | LockOutcome::AlreadyHeld
                    | LockOutcome::Denied
                    | LockOutcome::Ignored => {
                        self.scripts[cur].ip += 1;
                    }
                    LockOutcome::Blocked => {
                        // ip untouched: the lock retries on resume.
                        self.sched.schedule();
                    }
                    LockOutcome::CeilingViolation => {
                        self.sched.thread_kill();
                        self.sched.schedule();
                    }
                },
                Some(Act::Unlock(m)) => {
                    let outcome = self.sched.mutex_unlock(m);
                    self.scripts[cur].ip += 1;
                    if outcome == UnlockOutcome::Released {
                        self.sched.schedule();
                    }
                }
                Some(Act::Wait) => {
                    self.scripts[cur].ip += 1;
                    self.sched.wait_until_next_period();
                    self.sched.schedule();
                }
                Some(Act::ExitProgram(code)) => {
                    self.exited = Some(code);
                    return;
                }
                Some(Act::Revive { prio, compute, period, restart_ip }) => {
                    self.sched
                        .thread_create(ENTRY, prio, compute, period, 0)
                        .expect("revival must pass the UB test");
                    self.scripts[prio as usize].restart(restart_ip);
                    self.scripts[cur].ip += 1;
                }
            }
        }
        panic!("runaway action loop");
    }

    /// The universal properties every tick must preserve.
    fn check_invariants(&self) {
        let s = &self.sched;

        let running = s.tcbs[..=s.main_slot()]
            .iter()
            .filter(|t| t.state == ThreadState::Running)
            .count();
        assert_eq!(running, 1, "exactly one thread runs at t={}", s.clock.now());

        for slot in 0..s.max_threads {
            let tcb = &s.tcbs[slot];

            // dyn_prio is always min(static, held ceilings).
            let mut expected = tcb.static_prio;
            for m in tcb.held_mutexes.iter() {
                expected = expected.min(s.mutexes[m].ceiling);
            }
            assert_eq!(tcb.dyn_prio, expected, "dyn_prio of slot {}", slot);

            match tcb.state {
                ThreadState::Blocked => assert!(!tcb.waiting_mutexes.is_empty()),
                ThreadState::Ready | ThreadState::Running => {
                    assert!(tcb.waiting_mutexes.is_empty())
                }
                _ => {}
            }

            assert!(tcb.budget_left <= tcb.compute_ticks.max(1));
        }

        // RMS respect: the running user thread is at least as urgent
        // as every Ready contender.
        let cur = s.current;
        if s.is_user_slot(cur) {
            for slot in 0..s.max_threads {
                if s.tcbs[slot].state == ThreadState::Ready
                    && s.tcbs[slot].waiting_mutexes.is_empty()
                {
                    assert!(
                        s.tcbs[cur].dyn_prio <= s.tcbs[slot].dyn_prio,
                        "slot {} outranks the running slot {} at t={}",
                        slot,
                        cur,
                        s.clock.now()
                    );
                }
            }
        }

        // At most one owner per mutex.
        for m in 0..s.mutex_count {
            let holders = (0..s.max_threads)
                .filter(|slot| s.tcbs[*slot].held_mutexes.contains(m))
                .count();
            assert!(holders <= 1, "mutex {} has {} holders", m, holders);
        }
    }

    /// Ticks `slot` spent running inside the half-open window.
    fn runtime_in(&self, slot: usize, from: u32, to: u32) -> u32 {
        self.occupancy
            .iter()
            .filter(|(t, s)| *s == slot && *t > from && *t <= to)
            .count() as u32
    }
}

fn booted(threads: usize, mutexes: usize) -> Box<Scheduler> {
    let mut s = Box::new(Scheduler::new());
    s.thread_init(threads, 256, mutexes, HOOKS).unwrap();
    s
}

// ---------------------------------------------------------------------------
// Scenario 1: basic RMS
// ---------------------------------------------------------------------------

#[test]
fn basic_rms_runs_threads_in_priority_order() {
    let mut s = booted(2, 0);
    s.thread_create(ENTRY, 0, 50, 500, 0).unwrap();
    s.thread_create(ENTRY, 1, 50, 500, 0).unwrap();

    let worker = |_| {
        Script::new(vec![
            Act::Log(0),
            Act::Spin(40),
            Act::Wait,
            Act::Log(1),
            Act::Spin(40),
            Act::Return,
        ])
    };
    let mut sim = Sim::new(s, vec![worker(0), worker(1)]);
    sim.run(1000, 5_000);

    // Each period: thread 0 first, then thread 1.
    assert_eq!(sim.events, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

    // Compute-budget bound: at most C ticks per thread per period.
    for period in 0..2 {
        let from = period * 500;
        assert!(sim.runtime_in(0, from, from + 500) <= 50);
        assert!(sim.runtime_in(1, from, from + 500) <= 50);
        // Thread 1 never runs before thread 0 has finished its burst.
        assert_eq!(sim.runtime_in(1, from, from + 40), 0);
    }

    // Both Done; the scheduler handed control back to main.
    assert_eq!(sim.sched.tcbs[0].state, ThreadState::Done);
    assert_eq!(sim.sched.tcbs[1].state, ThreadState::Done);
    assert!(!sim.sched.started);
}

// ---------------------------------------------------------------------------
// Scenario 2: UB admission boundary
// ---------------------------------------------------------------------------

#[test]
fn ub_boundary_first_accepts_c_200() {
    let mut s = booted(3, 0);
    s.thread_create(ENTRY, 0, 50, 200, 0).unwrap();
    s.thread_create(ENTRY, 1, 50, 200, 0).unwrap();

    let mut first_accepted = None;
    let mut c = 1000;
    while c > 0 {
        if s.thread_create(ENTRY, 2, c, 1000, 0).is_ok() {
            first_accepted = Some(c);
            break;
        }
        c -= 100;
    }
    assert_eq!(first_accepted, Some(200));
}

// ---------------------------------------------------------------------------
// Scenario 3: thread kill and revival
// ---------------------------------------------------------------------------

#[test]
fn killed_thread_revives_into_the_next_period() {
    let mut s = booted(5, 0);
    for prio in 0..5 {
        s.thread_create(ENTRY, prio, 50, 500, 0).unwrap();
    }

    let looper = || {
        Script::new(vec![
            Act::Spin(30),
            Act::Wait,
            Act::Spin(30),
            Act::Wait,
            Act::Spin(30),
            Act::Wait,
            Act::Spin(30),
            Act::Return,
        ])
    };
    // Thread 3 revives thread 4 during period 3, after thread 4
    // returned in period 2. The revived script spins once and exits.
    let reviver = Script::new(vec![
        Act::Spin(30),
        Act::Wait,
        Act::Spin(30),
        Act::Wait,
        Act::Spin(30),
        Act::Revive { prio: 4, compute: 50, period: 500, restart_ip: 2 },
        Act::Wait,
        Act::Spin(30),
        Act::Return,
    ]);
    let victim = Script::new(vec![
        Act::Spin(30),
        Act::Wait,
        Act::Spin(30),
        Act::Return,
    ]);

    let mut sim =
        Sim::new(s, vec![looper(), looper(), looper(), reviver, victim]);
    sim.run(1000, 5_000);

    // Thread 4 died in period 2: no runtime in period 3...
    assert_eq!(sim.runtime_in(4, 1000, 1500), 0);
    // ...and resumed with the period-4 release.
    assert!(sim.runtime_in(4, 1500, 2000) > 0);
    assert_eq!(sim.sched.tcbs[4].state, ThreadState::Done);
}

#[test]
fn mid_cycle_revival_parks_until_the_boundary() {
    let mut s = booted(2, 0);
    s.thread_create(ENTRY, 0, 50, 500, 0).unwrap();
    s.thread_create(ENTRY, 1, 50, 500, 0).unwrap();
    s.clock.start(1000);
    s.started = true;
    s.schedule();

    // Thread 1 dies mid-period, then is recreated.
    s.current = 1;
    s.tcbs[1].state = ThreadState::Running;
    s.thread_kill();
    for _ in 0..100 {
        s.tick();
    }
    s.thread_create(ENTRY, 1, 50, 500, 0).unwrap();
    assert_eq!(s.tcbs[1].state, ThreadState::Waiting);

    // Released exactly at the next multiple of its period.
    while s.clock.now() < 500 {
        s.tick();
        assert!(s.clock.now() == 500 || s.tcbs[1].state == ThreadState::Waiting);
    }
    assert_eq!(s.tcbs[1].state, ThreadState::Ready);
}

// ---------------------------------------------------------------------------
// Scenario 4: mutex misuse warnings
// ---------------------------------------------------------------------------

#[test]
fn mutex_misuse_warns_without_state_change() {
    let mut s = booted(1, 1);
    s.thread_create(ENTRY, 0, 500, 500, 0).unwrap();
    let m = s.mutex_init(0).unwrap();
    s.schedule();
    assert_eq!(s.current, 0);

    // lock → unlock → unlock (warn) → lock → lock (warn) → unlock
    assert_eq!(s.mutex_lock_attempt(m), LockOutcome::Acquired);
    assert_eq!(s.mutex_unlock(m), UnlockOutcome::Released);
    assert_eq!(s.mutex_unlock(m), UnlockOutcome::NotOwner);
    assert_eq!(s.mutex_lock_attempt(m), LockOutcome::Acquired);
    assert_eq!(s.mutex_lock_attempt(m), LockOutcome::AlreadyHeld);
    assert_eq!(s.mutex_unlock(m), UnlockOutcome::Released);

    assert_eq!(s.mutexes[m].owner, None);
    assert!(s.tcbs[0].held_mutexes.is_empty());
    assert_eq!(s.tcbs[0].dyn_prio, 0);
}

// ---------------------------------------------------------------------------
// Scenario 5: ceiling rejection kills the caller
// ---------------------------------------------------------------------------

#[test]
fn ceiling_rejection_kills_task_and_returns_to_main() {
    let mut s = booted(1, 1);
    s.thread_create(ENTRY, 0, 50, 500, 0).unwrap();
    s.mutex_init(1).unwrap();

    let script = Script::new(vec![Act::Log(0), Act::Lock(0), Act::Log(1)]);
    let mut sim = Sim::new(s, vec![script]);
    sim.run(1000, 1_000);

    // The lock was fatal: the second log never happened and the
    // scheduler fell back to main.
    assert_eq!(sim.events, vec![(0, 0)]);
    assert_eq!(sim.sched.tcbs[0].state, ThreadState::Done);
    assert_eq!(sim.sched.current, sim.sched.main_slot());
    assert!(!sim.sched.started);
}

// ---------------------------------------------------------------------------
// Scenario 6: priority ceilings across three threads
// ---------------------------------------------------------------------------

/// Two mutexes s0 (ceiling 0) and s1 (ceiling 1); T0=(100,500),
/// T1=(100,500), T2=(750,2000). T2 takes both mutexes and runs its
/// long critical section at the elevated priority; the higher
/// threads arrive at their releases and are admitted strictly in
/// ceiling order.
#[test]
fn hlp_three_thread_interleaving() {
    let mut s = booted(3, 2);
    let s0 = s.mutex_init(0).unwrap();
    let s1 = s.mutex_init(1).unwrap();
    s.thread_create(ENTRY, 0, 100, 500, 0).unwrap();
    s.thread_create(ENTRY, 1, 100, 500, 0).unwrap();
    s.thread_create(ENTRY, 2, 750, 2000, 0).unwrap();

    let t0 = Script::new(vec![
        Act::Log(0),
        Act::Lock(s0),
        Act::Log(1),
        Act::Spin(75),
        Act::Unlock(s0),
        Act::Wait,
        Act::Log(2),
        Act::Lock(s0),
        Act::Log(3),
        Act::Spin(75),
        Act::Unlock(s0),
        Act::Return,
    ]);
    let t1 = Script::new(vec![
        Act::Log(0),
        Act::Lock(s1),
        Act::Log(1),
        Act::Spin(75),
        Act::Unlock(s1),
        Act::Wait,
        Act::Log(2),
        Act::Lock(s1),
        Act::Log(3),
        Act::Spin(75),
        Act::Unlock(s1),
        Act::Wait,
    ]);
    let t2 = Script::new(vec![
        Act::Log(0),
        Act::Lock(s1),
        Act::Lock(s0),
        Act::Log(1),
        Act::Spin(350),
        Act::Log(2),
        Act::Unlock(s0),
        Act::Spin(5),
        Act::Log(3),
        Act::Spin(190),
        Act::Log(4),
        Act::Unlock(s1),
        Act::Spin(1),
        Act::Log(5),
        Act::ExitProgram(0),
    ]);

    let mut sim = Sim::new(s, vec![t0, t1, t2]);
    sim.run(1000, 5_000);

    assert_eq!(sim.exited, Some(0));
    assert_eq!(
        sim.events,
        vec![
            (0, 0),
            (0, 1),
            (1, 0),
            (1, 1),
            (2, 0),
            (2, 1),
            (2, 2),
            (0, 2),
            (0, 3),
            (2, 3),
            (2, 4),
            (1, 2),
            (1, 3),
            (2, 5),
        ]
    );
}
