//! # System-Call Dispatch
//!
//! The supervisor-trap surface of the kernel. A trap from user mode
//! arrives with the hardware-stacked frame (`r0`–`r3`, `r12`, `lr`,
//! `pc`, `xPSR`) on the caller's user stack and a conventional fifth
//! argument one word above it. The dispatcher decodes the 8-bit
//! immediate of the SVC instruction (the halfword below the saved
//! `pc`), invokes the matching service, and writes the result back
//! into the saved `r0`.
//!
//! A contended `mutex_lock` cannot complete inside the trap: the
//! dispatcher parks the caller, rewinds the saved `pc` onto the SVC
//! instruction, and pends a context switch, so the call restarts
//! when the thread is next dispatched and returns only once the
//! mutex is claimed.
//!
//! The dispatcher tracks `svc_nesting` on the caller's TCB so a
//! context switch taken mid-service is routed back through the
//! kernel stack rather than the user stack.

use crate::config::HEAP_BYTES;
use crate::mutex::{LockOutcome, UnlockOutcome};
use crate::scheduler::{KillOutcome, Scheduler};
use crate::sync;
use crate::task::TrapFrame;
use crate::uart;

/// NULL mutex handle on the syscall ABI. Valid handles are the table
/// index plus one.
pub const MUTEX_NULL_HANDLE: u32 = 0;

/// The stack frame visible to the dispatcher: the hardware-stacked
/// registers plus the fifth argument the caller pushed above them.
#[repr(C)]
pub struct SvcFrame {
    pub regs: TrapFrame,
    pub fifth_arg: u32,
}

// ---------------------------------------------------------------------------
// Service table
// ---------------------------------------------------------------------------

/// The active syscall set. Indices are ABI; gaps are unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Sbrk = 0,
    Write = 1,
    Read = 6,
    Exit = 7,
    ThreadInit = 9,
    ThreadCreate = 10,
    ThreadKill = 11,
    SchedulerStart = 12,
    MutexInit = 13,
    MutexLock = 14,
    MutexUnlock = 15,
    WaitUntilNextPeriod = 16,
    GetTime = 17,
    GetPriority = 19,
    ThreadTime = 20,
    ServoEnable = 22,
    ServoSet = 23,
}

impl Syscall {
    pub fn from_index(index: u8) -> Option<Syscall> {
        Some(match index {
            0 => Syscall::Sbrk,
            1 => Syscall::Write,
            6 => Syscall::Read,
            7 => Syscall::Exit,
            9 => Syscall::ThreadInit,
            10 => Syscall::ThreadCreate,
            11 => Syscall::ThreadKill,
            12 => Syscall::SchedulerStart,
            13 => Syscall::MutexInit,
            14 => Syscall::MutexLock,
            15 => Syscall::MutexUnlock,
            16 => Syscall::WaitUntilNextPeriod,
            17 => Syscall::GetTime,
            19 => Syscall::GetPriority,
            20 => Syscall::ThreadTime,
            22 => Syscall::ServoEnable,
            23 => Syscall::ServoSet,
            _ => return None,
        })
    }
}

/// SVC number carried in the low byte of the Thumb `svc` encoding.
#[inline]
pub fn svc_number_from_insn(insn: u16) -> u8 {
    (insn & 0xFF) as u8
}

/// Extract the SVC number from the instruction that raised the trap:
/// the halfword preceding the saved `pc`.
///
/// # Safety
/// `frame.regs.pc` must point just past a genuine SVC instruction in
/// readable memory.
pub unsafe fn decode_svc_number(frame: &SvcFrame) -> u8 {
    let insn = *(frame.regs.pc as usize as *const u16).offset(-1);
    svc_number_from_insn(insn)
}

/// Decode and execute one trapped syscall against `sched`, writing
/// the result into the saved `r0`.
///
/// # Safety
/// The frame must be a live trap frame for the current thread, with
/// `pc` addressing the instruction after the SVC.
pub unsafe fn dispatch(sched: &mut Scheduler, frame: &mut SvcFrame) {
    let index = decode_svc_number(frame);
    dispatch_service(sched, frame, index);
}

/// Execute the service for an already-decoded SVC number.
///
/// # Safety
/// As [`dispatch`]; pointer-carrying arguments in the frame must be
/// valid for the service invoked.
pub unsafe fn dispatch_service(sched: &mut Scheduler, frame: &mut SvcFrame, index: u8) {
    let Some(call) = Syscall::from_index(index) else {
        panic!("unimplemented svc {}", index);
    };

    let caller = sched.current;
    sched.tcbs[caller].svc_nesting += 1;

    match call {
        Syscall::Sbrk => {
            frame.regs.r0 = sys_sbrk(frame.regs.r0 as i32) as u32;
        }
        Syscall::Write => {
            frame.regs.r0 =
                sys_write(frame.regs.r0, frame.regs.r1 as *const u8, frame.regs.r2 as usize) as u32;
        }
        Syscall::Read => {
            frame.regs.r0 =
                sys_read(frame.regs.r0, frame.regs.r1 as *mut u8, frame.regs.r2 as usize) as u32;
        }
        Syscall::Exit => {
            sys_exit(frame.regs.r0 as i32);
        }
        Syscall::ThreadInit => {
            let hooks = crate::kernel::entry_hooks(frame.regs.r2);
            let res = sched.thread_init(
                frame.regs.r0 as usize,
                frame.regs.r1 as usize,
                frame.regs.r3 as usize,
                hooks,
            );
            frame.regs.r0 = if res.is_ok() { 0 } else { -1i32 as u32 };
        }
        Syscall::ThreadCreate => {
            let res = sched.thread_create(
                frame.regs.r0,
                frame.regs.r1,
                frame.regs.r2,
                frame.regs.r3,
                frame.fifth_arg,
            );
            frame.regs.r0 = if res.is_ok() { 0 } else { -1i32 as u32 };
        }
        Syscall::ThreadKill => match sched.thread_kill() {
            KillOutcome::Main => sys_exit(0),
            KillOutcome::IdleRestarted | KillOutcome::Killed => {
                crate::arch::pend_context_switch();
            }
        },
        Syscall::SchedulerStart => {
            frame.regs.r0 = crate::kernel::scheduler_start_service(sched, frame.regs.r0) as u32;
        }
        Syscall::MutexInit => {
            frame.regs.r0 = match sched.mutex_init(frame.regs.r0) {
                Some(index) => index as u32 + 1,
                None => MUTEX_NULL_HANDLE,
            };
        }
        Syscall::MutexLock => {
            let m = (frame.regs.r0 as usize).wrapping_sub(1);
            match sched.mutex_lock_attempt(m) {
                LockOutcome::Acquired
                | LockOutcome::AlreadyHeld
                | LockOutcome::Denied
                | LockOutcome::Ignored => {}
                LockOutcome::CeilingViolation => {
                    sched.thread_kill();
                    crate::arch::pend_context_switch();
                }
                LockOutcome::Blocked => {
                    // Restart the SVC once the thread is re-dispatched;
                    // the call completes only when the mutex is claimed.
                    frame.regs.pc = frame.regs.pc.wrapping_sub(2);
                    crate::arch::pend_context_switch();
                }
            }
        }
        Syscall::MutexUnlock => {
            let m = (frame.regs.r0 as usize).wrapping_sub(1);
            match sched.mutex_unlock(m) {
                UnlockOutcome::Released => crate::arch::pend_context_switch(),
                UnlockOutcome::NotOwner | UnlockOutcome::Ignored => {}
            }
        }
        Syscall::WaitUntilNextPeriod => {
            sched.wait_until_next_period();
            crate::arch::pend_context_switch();
        }
        Syscall::GetTime => {
            frame.regs.r0 = sched.get_time();
        }
        Syscall::GetPriority => {
            frame.regs.r0 = sched.get_priority();
        }
        Syscall::ThreadTime => {
            frame.regs.r0 = sched.thread_time();
        }
        Syscall::ServoEnable => {
            frame.regs.r0 =
                crate::servo::sys_servo_enable(frame.regs.r0 as u8, frame.regs.r1 != 0) as u32;
        }
        Syscall::ServoSet => {
            frame.regs.r0 =
                crate::servo::sys_servo_set(frame.regs.r0 as u8, frame.regs.r1 as u32) as u32;
        }
    }

    // Saturating: thread_init rebuilds the table mid-service.
    sched.tcbs[caller].svc_nesting = sched.tcbs[caller].svc_nesting.saturating_sub(1);
}

// ---------------------------------------------------------------------------
// Program break
// ---------------------------------------------------------------------------

/// Position of the program break inside the heap region.
pub struct ProgramBreak {
    offset: usize,
}

impl ProgramBreak {
    pub const fn new() -> Self {
        ProgramBreak { offset: 0 }
    }

    /// Move the break by `incr` bytes within `limit`. Returns the
    /// previous offset, or None when the move would leave the region.
    pub fn adjust(&mut self, incr: i32, limit: usize) -> Option<usize> {
        let previous = self.offset;
        let next = (previous as i64) + i64::from(incr);
        if next < 0 || next as usize >= limit {
            return None;
        }
        self.offset = next as usize;
        Some(previous)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[repr(align(8))]
struct Heap {
    mem: [u8; HEAP_BYTES],
    brk: ProgramBreak,
}

static mut HEAP: Heap = Heap { mem: [0; HEAP_BYTES], brk: ProgramBreak::new() };

/// Shift the program break. Returns the previous break address, or
/// −1 when the request would leave the heap region.
pub fn sys_sbrk(incr: i32) -> isize {
    sync::critical_section(|_| {
        let heap = unsafe { &mut *core::ptr::addr_of_mut!(HEAP) };
        match heap.brk.adjust(incr, HEAP_BYTES) {
            Some(previous) => heap.mem[previous..].as_ptr() as isize,
            None => -1,
        }
    })
}

// ---------------------------------------------------------------------------
// Console services
// ---------------------------------------------------------------------------

/// End-of-transmission byte; terminates a `read`.
const EOT: u8 = 0x04;

/// Write `len` bytes to STDOUT through the transmit FIFO, waiting
/// for drain when the FIFO is full. Only fd 1 is writable.
///
/// # Safety
/// `buf` must address `len` readable bytes.
pub unsafe fn sys_write(fd: u32, buf: *const u8, len: usize) -> i32 {
    if fd != 1 {
        return -1;
    }
    for i in 0..len {
        let byte = *buf.add(i);
        while uart::put_byte(byte).is_err() {
            crate::arch::wait_for_interrupt();
        }
    }
    len as i32
}

fn echo(byte: u8) {
    while uart::put_byte(byte).is_err() {
        crate::arch::wait_for_interrupt();
    }
}

/// Read up to `len` bytes from STDIN, echoing input. EOT ends the
/// read, backspace erases the previous byte, newline is stored,
/// echoed, and ends the read. Only fd 0 is readable.
///
/// # Safety
/// `buf` must address `len` writable bytes.
pub unsafe fn sys_read(fd: u32, buf: *mut u8, len: usize) -> i32 {
    if fd != 0 {
        return -1;
    }
    let mut count = 0usize;
    while count < len {
        let Some(byte) = uart::get_byte() else {
            crate::arch::wait_for_interrupt();
            continue;
        };
        match byte {
            EOT => return count as i32,
            b'\x08' => {
                if count > 0 {
                    count -= 1;
                }
                for b in b"\x08 \x08" {
                    echo(*b);
                }
            }
            b'\n' => {
                *buf.add(count) = b'\n';
                count += 1;
                echo(b'\n');
                return count as i32;
            }
            _ => {
                *buf.add(count) = byte;
                count += 1;
                echo(byte);
            }
        }
    }
    len as i32
}

/// Terminate the program: report the status, drain the console, and
/// halt with interrupts disabled.
pub fn sys_exit(status: i32) -> ! {
    log::info!("exit status: {}", status);
    uart::flush();
    crate::arch::disable_interrupts();
    loop {
        crate::arch::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EntryHooks;
    use crate::task::TrapFrame;
    use sequential_test::sequential;

    const HOOKS: EntryHooks =
        EntryHooks { idle_entry: 0x0800_0100, default_idle_entry: 0x0800_0100, kill_trampoline: 0x0800_0200 };

    /// Saved pc of the fabricated traps: just past the SVC halfword.
    const TRAP_PC: u32 = 0x0800_1002;

    fn trap_frame(args: [u32; 4], fifth: u32) -> SvcFrame {
        SvcFrame {
            regs: TrapFrame {
                r0: args[0],
                r1: args[1],
                r2: args[2],
                r3: args[3],
                r12: 0,
                lr: 0,
                pc: TRAP_PC,
                xpsr: crate::task::XPSR_INIT,
            },
            fifth_arg: fifth,
        }
    }

    #[test]
    fn svc_number_is_the_low_byte_of_the_encoding() {
        // Thumb `svc #n` encodes as 0xDF00 | n.
        assert_eq!(svc_number_from_insn(0xDF0E), 14);
        assert_eq!(svc_number_from_insn(0xDF00), 0);
        assert_eq!(svc_number_from_insn(0xDFFF), 255);
    }

    #[test]
    fn service_table_covers_the_active_set() {
        for index in [0u8, 1, 6, 7, 9, 10, 11, 12, 13, 14, 15, 16, 17, 19, 20, 22, 23] {
            assert!(Syscall::from_index(index).is_some(), "index {}", index);
        }
        for index in [2u8, 3, 4, 5, 8, 18, 21, 24, 255] {
            assert!(Syscall::from_index(index).is_none(), "index {}", index);
        }
    }

    #[test]
    #[should_panic(expected = "unimplemented svc")]
    fn unknown_syscall_asserts() {
        let mut sched = Box::new(Scheduler::new());
        sched.thread_init(1, 256, 0, HOOKS).unwrap();
        let mut frame = trap_frame([0; 4], 0);
        unsafe { dispatch_service(&mut sched, &mut frame, 42) };
    }

    #[test]
    fn dispatch_returns_results_in_r0() {
        let mut sched = Box::new(Scheduler::new());
        sched.thread_init(2, 256, 1, HOOKS).unwrap();

        // thread_create(entry, prio=0, C=50, T=500, arg)
        let mut frame = trap_frame([0x0800_4000, 0, 50, 500], 7);
        unsafe { dispatch_service(&mut sched, &mut frame, 10) };
        assert_eq!(frame.regs.r0, 0);

        // Occupied slot now fails with -1.
        let mut frame = trap_frame([0x0800_4000, 0, 50, 500], 7);
        unsafe { dispatch_service(&mut sched, &mut frame, 10) };
        assert_eq!(frame.regs.r0 as i32, -1);

        // get_priority reports the caller's (main's) dyn_prio.
        let mut frame = trap_frame([0; 4], 0);
        unsafe { dispatch_service(&mut sched, &mut frame, 19) };
        assert_eq!(frame.regs.r0 as usize, sched.main_slot());
    }

    #[test]
    fn dispatch_restarts_a_contended_lock() {
        let mut sched = Box::new(Scheduler::new());
        sched.thread_init(3, 256, 1, HOOKS).unwrap();
        sched.thread_create(0x0800_4000, 1, 50, 500, 0).unwrap();
        sched.thread_create(0x0800_4000, 2, 50, 500, 0).unwrap();
        let handle = sched.mutex_init(1).unwrap() as u32 + 1;

        sched.tcbs[1].state = crate::task::ThreadState::Running;
        sched.current = 1;
        let mut frame = trap_frame([handle, 0, 0, 0], 0);
        unsafe { dispatch_service(&mut sched, &mut frame, 14) };
        assert_eq!(sched.mutexes[0].owner, Some(1));
        assert_eq!(frame.regs.pc, TRAP_PC);

        // A contender is parked with the saved pc rewound onto the
        // SVC instruction, so the call restarts when re-dispatched.
        sched.tcbs[1].state = crate::task::ThreadState::Ready;
        sched.tcbs[2].state = crate::task::ThreadState::Running;
        sched.current = 2;
        let mut frame = trap_frame([handle, 0, 0, 0], 0);
        unsafe { dispatch_service(&mut sched, &mut frame, 14) };
        assert_eq!(sched.tcbs[2].state, crate::task::ThreadState::Blocked);
        assert_eq!(frame.regs.pc, TRAP_PC - 2);
    }

    #[test]
    fn ceiling_violation_through_the_trap_kills_the_caller() {
        let mut sched = Box::new(Scheduler::new());
        sched.thread_init(2, 256, 1, HOOKS).unwrap();
        sched.thread_create(0x0800_4000, 0, 50, 500, 0).unwrap();
        let handle = sched.mutex_init(1).unwrap() as u32 + 1;

        sched.tcbs[0].state = crate::task::ThreadState::Running;
        sched.current = 0;
        let mut frame = trap_frame([handle, 0, 0, 0], 0);
        unsafe { dispatch_service(&mut sched, &mut frame, 14) };
        assert_eq!(sched.tcbs[0].state, crate::task::ThreadState::Done);
        // The trap completes; no restart for a killed caller.
        assert_eq!(frame.regs.pc, TRAP_PC);
    }

    #[test]
    fn program_break_round_trips() {
        let mut brk = ProgramBreak::new();
        let base = brk.adjust(0, HEAP_BYTES).unwrap();
        assert_eq!(base, 0);
        brk.adjust(4096, HEAP_BYTES).unwrap();
        brk.adjust(-4096, HEAP_BYTES).unwrap();
        assert_eq!(brk.offset(), 0);
    }

    #[test]
    fn program_break_rejects_escapes() {
        let mut brk = ProgramBreak::new();
        assert!(brk.adjust(-1, HEAP_BYTES).is_none());
        assert!(brk.adjust(HEAP_BYTES as i32, HEAP_BYTES).is_none());
        assert_eq!(brk.offset(), 0);
    }

    #[test]
    #[sequential]
    fn write_rejects_bad_fd_and_streams_to_the_fifo() {
        uart::with_queues(|q| {
            q.tx.clear();
            q.rx.clear();
        });
        assert_eq!(unsafe { sys_write(2, b"x".as_ptr(), 1) }, -1);

        let message = b"ok";
        assert_eq!(unsafe { sys_write(1, message.as_ptr(), 2) }, 2);
        uart::with_queues(|q| {
            assert_eq!(q.tx.get(), Some(b'o'));
            assert_eq!(q.tx.get(), Some(b'k'));
        });
    }

    #[test]
    #[sequential]
    fn read_echoes_and_honours_terminators() {
        uart::with_queues(|q| {
            q.tx.clear();
            q.rx.clear();
            for b in b"hi\n" {
                q.rx.put(*b).unwrap();
            }
        });
        let mut buf = [0u8; 16];
        let n = unsafe { sys_read(0, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"hi\n");

        // EOT ends the read without storing a byte.
        uart::with_queues(|q| {
            q.tx.clear();
            q.rx.clear();
            q.rx.put(b'a').unwrap();
            q.rx.put(EOT).unwrap();
        });
        let n = unsafe { sys_read(0, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, 1);
        assert_eq!(buf[0], b'a');

        assert_eq!(unsafe { sys_read(1, buf.as_mut_ptr(), 1) }, -1);
    }
}
