//! Cooperative task switching and the 32-level interrupt controller.
//!
//! The ready queue is a priority-ordered linked list threaded through the
//! TIBs themselves (`OFF_QLINK`/`OFFB_PRIOR`); semaphores are a
//! `{count, waitq}` pair. Interrupts are a two-stage latch (set by
//! [`assert_int`], independent of whether interrupts are currently
//! enabled) and a pending mask (committed from the latch, and acted on,
//! only once per run-loop iteration — see [`crate::cpu::Pdq3::run`]).
//! This module is a direct transliteration of the source's `enque`/
//! `deque`/`DoSIGNAL`/`DoWAIT`/`taskswitch5`/`taskswitch6`/interrupt
//! state machine: these steps are load-bearing for every multitasking
//! guest and are not reinvented here.

use crate::constants::{NIL, OFF_QLINK, OFF_SEMCOUNT, OFF_SEMWAITQ, OFFB_PRIOR, SSR_INTEN};
use crate::mem::Memory;
use crate::registers::Registers;

/// Outcome of a task-switch attempt: either a task was made current, or
/// none is ready and the run loop should simply let time pass (the
/// tick-driven stand-in for the original's blocking keyboard/timer poll).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSwitch {
    Ready,
    Idle,
}

/// `save_to_tib()`.
pub fn save_to_tib(regs: &Registers, mem: &mut Memory) {
    mem.write(regs.ctp, crate::constants::OFF_SP, regs.sp).ok();
    mem.write(regs.ctp, crate::constants::OFF_MP, regs.mp).ok();
    mem.write(regs.ctp, crate::constants::OFF_BP, regs.bp).ok();
    mem.write(regs.ctp, crate::constants::OFF_IPC, regs.ipc).ok();
    mem.write(regs.ctp, crate::constants::OFF_SEGB, regs.segb).ok();
}

/// `restore_from_tib()`.
pub fn restore_from_tib(regs: &mut Registers, mem: &mut Memory) {
    regs.sp = mem.read(regs.ctp, crate::constants::OFF_SP);
    regs.splow = mem.read(regs.ctp, crate::constants::OFF_SPLOW);
    regs.spupr = mem.read(regs.ctp, crate::constants::OFF_SPUPR);
    regs.mp = mem.read(regs.ctp, crate::constants::OFF_MP);
    regs.bp = mem.read(regs.ctp, crate::constants::OFF_BP);
    regs.ipc = mem.read(regs.ctp, crate::constants::OFF_IPC);
    regs.segb = mem.read(regs.ctp, crate::constants::OFF_SEGB);
}

/// `enque(qhead, qtask)`: insert `qtask` into the priority queue rooted
/// at `qhead`, descending by priority; equal-priority entries keep their
/// arrival order.
#[must_use]
pub fn enque(mem: &mut Memory, qhead: u16, qtask: u16) -> u16 {
    let qtask_prio = mem.read_byte(qtask.wrapping_add(OFFB_PRIOR), 0);
    let mut t1 = qhead;
    let mut t2 = NIL;
    while t1 != NIL {
        if mem.read_byte(t1.wrapping_add(OFFB_PRIOR), 0) < qtask_prio {
            break;
        }
        t2 = t1;
        t1 = mem.get(t1.wrapping_add(OFF_QLINK));
    }
    mem.put(qtask.wrapping_add(OFF_QLINK), t1).ok();
    if t2 == NIL {
        qtask
    } else {
        mem.put(t2.wrapping_add(OFF_QLINK), qtask).ok();
        qhead
    }
}

/// `deque(qhead, &qtask)`: pop the head, returning `(new_head, qtask)`.
#[must_use]
pub fn deque(mem: &mut Memory, qhead: u16) -> (u16, u16) {
    let qtask = qhead;
    let new_head = mem.get(qhead.wrapping_add(OFF_QLINK));
    (new_head, qtask)
}

/// `DoSIGNAL(sem)`.
pub fn do_signal(regs: &mut Registers, mem: &mut Memory, vectors: &[u16; 32], sem: u16) -> TaskSwitch {
    let wqaddr = sem.wrapping_add(OFF_SEMWAITQ);
    let count = mem.get(sem.wrapping_add(OFF_SEMCOUNT));
    let wait = mem.get(wqaddr);

    if count == 0 && wait != NIL {
        let (new_wait_head, qtask) = deque(mem, wait);
        mem.put(wqaddr, new_wait_head).ok();
        regs.rq = enque(mem, regs.rq, qtask);

        if regs.ctp == NIL {
            return taskswitch6(regs, mem, vectors);
        }
        let current_prio = mem.read_byte(regs.ctp.wrapping_add(OFFB_PRIOR), 0);
        let qtask_prio = mem.read_byte(qtask.wrapping_add(OFFB_PRIOR), 0);
        if current_prio < qtask_prio {
            regs.rq = enque(mem, regs.rq, regs.ctp);
            return taskswitch5(regs, mem, vectors);
        }
        regs.sp = regs.sp.wrapping_add(1);
        return TaskSwitch::Ready;
    }

    mem.put(sem.wrapping_add(OFF_SEMCOUNT), count.wrapping_add(1)).ok();
    if regs.ctp == NIL {
        return taskswitch6(regs, mem, vectors);
    }
    regs.sp = regs.sp.wrapping_add(1);
    TaskSwitch::Ready
}

/// `DoWAIT(sem)`.
pub fn do_wait(regs: &mut Registers, mem: &mut Memory, vectors: &[u16; 32], sem: u16) -> TaskSwitch {
    let count = mem.get(sem.wrapping_add(OFF_SEMCOUNT));
    if count == 0 {
        let wqaddr = sem.wrapping_add(OFF_SEMWAITQ);
        let qhead = enque(mem, mem.get(wqaddr), regs.ctp);
        mem.put(wqaddr, qhead).ok();
        return taskswitch5(regs, mem, vectors);
    }
    mem.put(sem.wrapping_add(OFF_SEMCOUNT), count.wrapping_sub(1)).ok();
    TaskSwitch::Ready
}

/// `taskswitch5()`: save the current context, then switch.
pub fn taskswitch5(regs: &mut Registers, mem: &mut Memory, vectors: &[u16; 32]) -> TaskSwitch {
    save_to_tib(regs, mem);
    taskswitch6(regs, mem, vectors)
}

/// `taskswitch6()`: pick the highest-priority ready task, or — if none
/// is ready — signal the highest pending interrupt's semaphore directly
/// (there is no current context to save: `ctp` is already `NIL`), or
/// report [`TaskSwitch::Idle`] if nothing is ready or pending at all.
pub fn taskswitch6(regs: &mut Registers, mem: &mut Memory, vectors: &[u16; 32]) -> TaskSwitch {
    if regs.rq == NIL {
        if regs.intpending != 0 {
            regs.ctp = NIL;
            if let Some(level) = get_int_level(regs.intpending) {
                let vector = vectors[level as usize];
                let sem = mem.get(vector);
                return do_signal(regs, mem, vectors, sem);
            }
        }
        return TaskSwitch::Idle;
    }
    let (new_head, qtask) = deque(mem, regs.rq);
    regs.rq = new_head;
    regs.ctp = qtask;
    restore_from_tib(regs, mem);
    TaskSwitch::Ready
}

/// `getIntLevel()`: lowest set bit (highest priority) of `intpending`,
/// levels 0-30.
#[must_use]
pub fn get_int_level(intpending: u32) -> Option<u32> {
    (0..31).find(|&i| intpending & (1 << i) != 0)
}

/// `cpu_isIntEnabled()`.
#[must_use]
pub fn is_int_enabled(regs: &Registers) -> bool {
    regs.ssr & SSR_INTEN != 0
}

/// `cpu_assertInt(level, tf)`: latch (or clear) an interrupt request.
/// Independent of whether the interrupt system is currently enabled.
pub fn assert_int(regs: &mut Registers, level: u32, assert: bool) {
    let bit = 1u32 << level;
    if assert {
        regs.intlatch |= bit;
    } else {
        regs.intlatch &= !bit;
    }
}

/// `cpu_raiseInt(level)`: like [`assert_int`] but refuses while the
/// interrupt system is disabled, mirroring the caller-visible
/// `STOP_ERRIO` the original returns in that case.
pub fn raise_int(regs: &mut Registers, level: u32) -> bool {
    if !is_int_enabled(regs) {
        return false;
    }
    assert_int(regs, level, true);
    true
}

/// `cpu_ackInt(level)`: clear the pending bit and disable the interrupt
/// system, exactly as the original does on every acknowledge.
pub fn ack_int(regs: &mut Registers, level: u32) {
    regs.intpending &= !(1u32 << level);
    regs.ssr &= !SSR_INTEN;
}

/// `cpu_processInt()`: called from the run loop when a task is current
/// (`ctp != NIL`) and an interrupt is pending. Saves the current task,
/// enqueues it, and signals the interrupt's semaphore.
pub fn process_int(regs: &mut Registers, mem: &mut Memory, vectors: &[u16; 32]) -> TaskSwitch {
    let Some(level) = get_int_level(regs.intpending) else {
        return TaskSwitch::Ready;
    };
    let vector = vectors[level as usize];
    if vector == NIL {
        return TaskSwitch::Ready;
    }
    save_to_tib(regs, mem);
    regs.rq = enque(mem, regs.rq, regs.ctp);
    regs.ctp = NIL;
    let sem = mem.get(vector);
    ack_int(regs, level);
    do_signal(regs, mem, vectors, sem)
}
