//! The P-code interpreter proper: fetch-decode-execute for every opcode in
//! `DoInstr`'s switch, the `Raise`/`DoCXG`/`createMSCW` procedure-call
//! machinery, boot sequencing, and the run loop.

use crate::config::{Config, StopReason};
use crate::constants::*;
use crate::debug::Breakpoint;
use crate::fetch;
use crate::mem::Memory;
use crate::registers::Registers;
use crate::segment;
use crate::stack;
use crate::task::{self, TaskSwitch};
use emu_core::{Cpu, Observable, Tickable, Value};
use microengine_bus::WordBus;

pub struct Pdq3 {
    regs: Registers,
    mem: Memory,
    config: Config,
    /// Per-level interrupt vectors; levels 0-7 are fixed, 8-31 are
    /// QBUS-assignable via [`Pdq3::set_interrupt_vector`].
    vectors: [u16; 32],
    breakpoints: Vec<Breakpoint>,
    cancel_requested: bool,
    pending_stop: Option<StopReason>,
    instructions: u64,
}

impl Pdq3 {
    #[must_use]
    pub fn new(config: Config, bus: WordBus) -> Self {
        Self {
            regs: Registers {
                splow: 0,
                spupr: 0xFFFF,
                ctp: NIL,
                ssv: NIL,
                rq: NIL,
                ..Registers::default()
            },
            mem: Memory::new(bus),
            config,
            vectors: DEFAULT_INT_VECTORS,
            breakpoints: Vec::new(),
            cancel_requested: false,
            pending_stop: None,
            instructions: 0,
        }
    }

    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn mem(&mut self) -> &mut Memory {
        &mut self.mem
    }

    #[must_use]
    pub const fn instructions_retired(&self) -> u64 {
        self.instructions
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// `cpu_assertInt(level, tf)`.
    pub fn assert_interrupt(&mut self, level: u32, assert: bool) {
        task::assert_int(&mut self.regs, level, assert);
    }

    /// `cpu_raiseInt(level)`. Returns `false` if the interrupt system is
    /// currently disabled, mirroring the original's `STOP_ERRIO`.
    pub fn raise_interrupt(&mut self, level: u32) -> bool {
        task::raise_int(&mut self.regs, level)
    }

    /// `cpu_setIntVec(vec, level)`.
    pub fn set_interrupt_vector(&mut self, level: u32, vector: u16) {
        if (level as usize) < self.vectors.len() {
            self.vectors[level as usize] = vector;
        }
    }

    pub fn add_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoints.push(bp);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// `cpu_boot`: boot from the HDT ROM pointer if present; otherwise the
    /// caller (the floppy controller) must autoload the first track and
    /// call [`Self::finish_autoload`].
    pub fn boot(&mut self) -> bool {
        if self.regs.fc68 == 0 {
            return false;
        }
        let ctp = self.mem.read(self.regs.fc68, 0);
        let ssv = self.mem.read(self.regs.fc68, 1);
        let rq = self.mem.read(self.regs.fc68, 2);
        self.set_regs(ctp, ssv, rq);
        true
    }

    /// `cpu_finishAutoload`: hand control to the task loaded at
    /// `dma_base` by the floppy controller's autoload sequence.
    pub fn finish_autoload(&mut self, dma_base: u16) {
        let ctp = dma_base;
        let ssv = self.mem.read(ctp, OFF_SIBS);
        let rq = self.mem.read(ctp, OFF_WAITQ);
        self.set_regs(ctp, ssv, rq);
        if ssv != NIL {
            let sbase = self.mem.get(self.regs.segb);
            self.regs.segb = self.mem.read(sbase, OFF_SEGBASE);
        }
    }

    /// `cpu_setRegs`.
    fn set_regs(&mut self, ctp: u16, ssv: u16, rq: u16) {
        self.regs.ctp = ctp;
        self.regs.ssv = ssv;
        self.regs.rq = rq;
        task::restore_from_tib(&mut self.regs, &mut self.mem);
    }

    /// `cpu_buserror`.
    pub fn bus_error(&mut self) {
        self.regs.ssr |= SSR_BERR;
        task::raise_int(&mut self.regs, INT_BERR);
    }

    // -- stack/fetch conveniences, bounds-checked via `stack`/faulting
    // through `raise` exactly as the original's Tos/Pick/Pop/Push do --

    fn tos(&mut self) -> u16 {
        match stack::tos(&self.regs, &mut self.mem) {
            Ok(v) => v,
            Err(e) => {
                self.raise(e);
                0
            }
        }
    }

    fn pick(&mut self, i: u16) -> u16 {
        match stack::pick(&self.regs, &mut self.mem, i) {
            Ok(v) => v,
            Err(e) => {
                self.raise(e);
                0
            }
        }
    }

    fn pop(&mut self) -> u16 {
        match stack::pop(&mut self.regs, &mut self.mem) {
            Ok(v) => v,
            Err(e) => {
                self.raise(e);
                0
            }
        }
    }

    fn push(&mut self, v: u16) {
        if let Err(e) = stack::push(&mut self.regs, &mut self.mem, v) {
            self.raise(e);
        }
    }

    fn pop_signed(&mut self) -> i16 {
        self.pop() as i16
    }

    fn push_signed(&mut self, v: i16) {
        self.push(v as u16);
    }

    fn pop_float(&mut self) -> f32 {
        match stack::pop_float(&mut self.regs, &mut self.mem) {
            Ok(v) => v,
            Err(e) => {
                self.raise(e);
                0.0
            }
        }
    }

    fn push_float(&mut self, v: f32) {
        if let Err(e) = stack::push_float(&mut self.regs, &mut self.mem, v) {
            self.raise(e);
        }
    }

    fn get(&mut self, addr: u16) -> u16 {
        self.mem.get(addr)
    }

    fn put(&mut self, addr: u16, v: u16) {
        self.mem.put(addr, v).ok();
    }

    fn getb(&mut self, base: u16, idx: u16) -> u16 {
        u16::from(self.mem.read_byte(base, idx))
    }

    fn putb(&mut self, base: u16, idx: u16, v: u16) {
        self.mem.write_byte(base, idx, v as u8).ok();
    }

    // -- segment/procedure linkage --

    /// `createMSCW`.
    fn create_mscw(&mut self, ptbl: u16, procno: u8, stat: u16, segno: u8, osegb: u16) -> u16 {
        let _ = osegb;
        let procstart = self.mem.get(ptbl.wrapping_sub(u16::from(procno)));
        let datasz = self.mem.get(self.regs.segb.wrapping_add(procstart));
        if self.regs.sp < self.regs.splow
            || u32::from(datasz) + u32::from(MSCW_SZ) > u32::from(self.regs.sp.wrapping_sub(self.regs.splow))
        {
            self.raise(PASERROR_STKOVFL);
            return self.regs.ipc;
        }
        self.regs.sp = self.regs.sp.wrapping_sub(MSCW_SZ).wrapping_sub(datasz);
        self.regs.lm = self.regs.mp;
        self.regs.mp = self.regs.sp;
        let mp = self.regs.mp;
        self.put(mp.wrapping_add(OFF_MSDYNL), self.regs.lm);
        self.put(mp.wrapping_add(OFF_MSIPC), self.regs.ipc);
        self.put(mp.wrapping_add(OFF_MSSTAT), stat);
        self.put(mp.wrapping_add(OFFB_MSSEG), u16::from(segno));
        (procstart.wrapping_add(1)).wrapping_mul(2)
    }

    /// `DoCXG`.
    fn do_cxg(&mut self, segno: u8, procno: u8) {
        let osegno = segment::get_segno(&self.regs, &mut self.mem);
        let osegb = self.regs.segb;
        let ptbl = segment::set_segb(&mut self.regs, &mut self.mem, segno);
        segment::adjust_ref_count(&self.regs, &mut self.mem, segno, 1);
        self.regs.ipc = self.create_mscw(ptbl, procno, self.regs.bp, osegno, osegb);
    }

    /// `Raise`: push the error code (or, for a stack overflow, overwrite
    /// the current top in place to avoid a double fault) and transfer to
    /// the OS trap handler at segment/proc 2/2.
    fn raise(&mut self, err: u16) {
        if self.config.halt_on_exception {
            self.pending_stop = Some(StopReason::GuestException(err));
            return;
        }
        if err == PASERROR_STKOVFL {
            let sp = self.regs.sp;
            self.put(sp, err);
        } else if let Err(e) = stack::push(&mut self.regs, &mut self.mem, err) {
            self.raise(e);
            return;
        }
        self.do_cxg(TRAP_SEGNO, TRAP_PROCNO);
    }

    fn taskswitch5(&mut self) -> TaskSwitch {
        task::taskswitch5(&mut self.regs, &mut self.mem, &self.vectors)
    }

    /// One P-code instruction. Returns `Some` when the run loop must stop
    /// (breakpoint, software break, illegal opcode, or a guest exception
    /// with `Config::halt_on_exception` set); `None` to keep running.
    #[allow(clippy::too_many_lines)]
    fn step(&mut self) -> Option<StopReason> {
        let opcode = fetch::ub(&mut self.regs, &mut self.mem);

        match opcode {
            0x00..=0x1F => {
                let v = u16::from(opcode & 0x1F);
                self.push(v);
            }
            0x98 => self.push(NIL),
            0x80 => {
                let v = u16::from(fetch::ub(&mut self.regs, &mut self.mem));
                self.push(v);
            }
            0x81 => {
                let v = fetch::w(&mut self.regs, &mut self.mem);
                self.push(v);
            }
            0x82 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.regs.segb.wrapping_add(b);
                self.push(v);
            }
            0x20..=0x2F => {
                let addr = self.regs.mp.wrapping_add(MSCW_SZ).wrapping_add(u16::from(opcode & 0x0F));
                let v = self.get(addr);
                self.push(v);
            }
            0x87 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.get(self.regs.mp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b));
                self.push(v);
            }
            0x84 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.regs.mp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                self.push(v);
            }
            0xA4 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let addr = self.regs.mp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                let v = self.pop();
                self.put(addr, v);
            }
            0x30..=0x3F => {
                let addr = self.regs.bp.wrapping_add(MSCW_SZ).wrapping_add(u16::from(opcode & 0x0F));
                let v = self.get(addr);
                self.push(v);
            }
            0x85 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.get(self.regs.bp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b));
                self.push(v);
            }
            0x86 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.regs.bp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                self.push(v);
            }
            0xA5 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let addr = self.regs.bp.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                let v = self.pop();
                self.put(addr, v);
            }
            0x89 => {
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                self.regs.lm = segment::traverse_ms_stat(&self.regs, &mut self.mem, u16::from(db));
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.get(self.regs.lm.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b));
                self.push(v);
            }
            0x88 => {
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                self.regs.lm = segment::traverse_ms_stat(&self.regs, &mut self.mem, u16::from(db));
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.regs.lm.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                self.push(v);
            }
            0xA6 => {
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                self.regs.lm = segment::traverse_ms_stat(&self.regs, &mut self.mem, u16::from(db));
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let addr = self.regs.lm.wrapping_add(MSCW_SZ).wrapping_sub(1).wrapping_add(b);
                let v = self.pop();
                self.put(addr, v);
            }
            0xC4 => {
                let v = self.pop();
                let addr = self.pop();
                self.put(addr, v);
            }
            0x9A => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let base = segment::get_segbase(&self.regs, &mut self.mem, segno);
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.get(base.wrapping_add(b));
                self.push(v);
            }
            0x9B => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let base = segment::get_segbase(&self.regs, &mut self.mem, segno);
                let b = fetch::b(&mut self.regs, &mut self.mem);
                self.push(base.wrapping_add(b));
            }
            0xD9 => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let base = segment::get_segbase(&self.regs, &mut self.mem, segno);
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.pop();
                self.put(base.wrapping_add(b), v);
            }
            0x83 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let ub1 = fetch::ub(&mut self.regs, &mut self.mem);
                let src = self.regs.segb.wrapping_add(b).wrapping_add(u16::from(ub1));
                for i in 1..=u16::from(ub1) {
                    let v = self.get(src.wrapping_sub(i));
                    self.put(self.regs.sp.wrapping_sub(i), v);
                }
                self.regs.sp = self.regs.sp.wrapping_sub(u16::from(ub1));
            }
            0xD0 => {
                let ub1 = fetch::ub(&mut self.regs, &mut self.mem);
                let popped = self.pop();
                let src = popped.wrapping_add(u16::from(ub1));
                for i in 1..=u16::from(ub1) {
                    let v = self.get(src.wrapping_sub(i));
                    self.put(self.regs.sp.wrapping_sub(i), v);
                }
                self.regs.sp = self.regs.sp.wrapping_sub(u16::from(ub1));
            }
            0x8E => {
                let ub1 = fetch::ub(&mut self.regs, &mut self.mem);
                let dst = self.get(self.regs.sp.wrapping_add(u16::from(ub1)));
                for i in 0..u16::from(ub1) {
                    let v = self.pick(i);
                    self.put(dst.wrapping_add(i), v);
                }
                self.regs.sp = self.regs.sp.wrapping_add(u16::from(ub1) + 1);
            }
            0xA7 => {
                let idx = self.pop();
                let base = self.pop();
                let v = self.getb(base, idx);
                self.push(v);
            }
            0xC8 => {
                let ub1 = self.pop() & 0xFF;
                let idx = self.pop();
                let base = self.pop();
                self.putb(base, idx, ub1);
            }
            0xC5 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let src = self.pop();
                let dst = self.pop();
                for i in 0..b {
                    let v = self.get(src.wrapping_add(i));
                    self.put(dst.wrapping_add(i), v);
                }
            }
            0x78..=0x7F => {
                let base = self.pop();
                let v = self.get(base.wrapping_add(u16::from(opcode & 0x07)));
                self.push(v);
            }
            0xE6 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let base = self.pop();
                let v = self.get(base.wrapping_add(b));
                self.push(v);
            }
            0xE7 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let v = self.pop().wrapping_add(b);
                self.push(v);
            }
            0xD7 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                let v = self.pop().wrapping_add(t1.wrapping_mul(b));
                self.push(v);
            }
            0xD8 => {
                let ub1 = fetch::ub(&mut self.regs, &mut self.mem);
                let ub2 = fetch::ub(&mut self.regs, &mut self.mem);
                let inx = self.pop();
                let ub1w = u16::from(ub1);
                let v = self.pop().wrapping_add(inx / ub1w);
                self.push(v);
                self.push(u16::from(ub2));
                self.push((inx % ub1w).wrapping_mul(u16::from(ub2)));
            }
            0xC9 => {
                let start = self.pop();
                let nbits = self.pop();
                let addr = self.pop();
                let data = self.get(addr);
                let v = (data & bitfield_mask(start, nbits)) >> start;
                self.push(v);
            }
            0xCA => {
                let data = self.pop();
                let start = self.pop();
                let nbits = self.pop();
                let addr = self.pop();
                let existing = self.get(addr);
                let cleared = existing & !bitfield_mask(start, nbits);
                let shifted = (data & MASKS[nbits as usize]) << start;
                self.put(addr, cleared | shifted);
            }
            0xA1 => {
                let a = self.pop();
                let b = self.pop();
                self.push(a & b);
            }
            0xA0 => {
                let a = self.pop();
                let b = self.pop();
                self.push(a | b);
            }
            0xE5 => {
                let v = self.pop();
                self.push(!v);
            }
            0x9F => {
                let v = self.pop();
                self.push((!v) & 1);
            }
            0xB4 => {
                let t1 = self.pop();
                let v = u16::from(self.pop() <= t1);
                self.push(v);
            }
            0xB5 => {
                let t1 = self.pop();
                let v = u16::from(self.pop() >= t1);
                self.push(v);
            }
            0xE0 => {
                let v = self.pop_signed();
                self.push_signed(v.wrapping_abs());
            }
            0xE1 => {
                let v = self.pop_signed();
                self.push_signed(v.wrapping_neg());
            }
            0xE2 => {
                let v = self.tos();
                self.push(v);
            }
            0xA2 => {
                let a = self.pop_signed();
                let b = self.pop() as i16;
                self.push_signed(a.wrapping_add(b));
            }
            0xA3 => {
                let ts1 = self.pop_signed();
                let b = self.pop_signed();
                self.push_signed(b.wrapping_sub(ts1));
            }
            0x8C => {
                let a = self.pop() as i16;
                let b = self.pop() as i16;
                self.push_signed(a.wrapping_mul(b));
            }
            0x8D => {
                let ts1 = self.pop_signed();
                if ts1 == 0 {
                    self.raise(PASERROR_DIVZERO);
                } else {
                    let ts2 = self.pop_signed();
                    self.push_signed(ts2.wrapping_div(ts1));
                }
            }
            0x8F => {
                let ts1 = self.pop_signed();
                if ts1 <= 0 {
                    self.raise(PASERROR_DIVZERO);
                } else {
                    let v = self.pop();
                    self.push_signed((v as i16).wrapping_rem(ts1));
                }
            }
            0xCB => {
                let t1 = self.tos();
                let t2 = self.pick(1);
                let t3 = self.pick(2);
                if t2 <= t3 && t3 <= t1 {
                    self.regs.sp = self.regs.sp.wrapping_add(2);
                } else {
                    self.raise(PASERROR_VALRANGE);
                }
            }
            0xB0 => {
                let a = self.pop_signed();
                let b = self.pop_signed();
                self.push(u16::from(a == b));
            }
            0xB1 => {
                let a = self.pop_signed();
                let b = self.pop_signed();
                self.push(u16::from(a != b));
            }
            0xB2 => {
                let ts1 = self.pop_signed();
                let v = u16::from(self.pop_signed() <= ts1);
                self.push(v);
            }
            0xB3 => {
                let ts1 = self.pop_signed();
                let v = u16::from(self.pop_signed() >= ts1);
                self.push(v);
            }
            0xCC => {
                let t1 = self.pop_signed();
                self.push_float(f32::from(t1));
            }
            0xBE => {
                let v = self.pop_float();
                self.push_signed(v as i16);
            }
            0xBF => {
                let v = self.pop_float();
                self.push_signed((v + 0.5) as i16);
            }
            0xE3 => {
                let v = self.pop_float();
                self.push_float(v.abs());
            }
            0xE4 => {
                let v = self.pop_float();
                self.push_float(-v);
            }
            0xC0 => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push_float(tf1 + tf2);
            }
            0xC1 => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push_float(tf2 - tf1);
            }
            0xC2 => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push_float(tf1 * tf2);
            }
            0xC3 => {
                let tf1 = self.pop_float();
                if tf1 == 0.0 {
                    self.raise(PASERROR_DIVZERO);
                } else {
                    let tf2 = self.pop_float();
                    self.push_float(tf2 / tf1);
                }
            }
            0xCD => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push(u16::from(tf1 == tf2));
            }
            0xCE => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push(u16::from(tf2 <= tf1));
            }
            0xCF => {
                let tf1 = self.pop_float();
                let tf2 = self.pop_float();
                self.push(u16::from(tf2 >= tf1));
            }
            0xC6 => {
                let v = self.pick(1);
                self.push(v);
                let v = self.pick(1);
                self.push(v);
            }
            0xC7 => {
                let ub1 = u16::from(fetch::ub(&mut self.regs, &mut self.mem));
                let len0 = self.tos();
                let src = self.regs.sp.wrapping_add(1);
                let dst = self.regs.sp.wrapping_add(len0).wrapping_sub(ub1).wrapping_add(1);
                if len0 > ub1 {
                    for i in 1..=ub1 {
                        let v = self.get(src.wrapping_add(ub1).wrapping_sub(i));
                        self.put(dst.wrapping_add(ub1).wrapping_sub(i), v);
                    }
                } else {
                    for i in 0..len0 {
                        let v = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), v);
                    }
                    for i in len0..ub1 {
                        self.put(dst.wrapping_add(i), 0);
                    }
                }
                self.regs.sp = self.regs.sp.wrapping_add(len0.wrapping_sub(ub1).wrapping_add(1));
            }
            0xBC => {
                let hi = self.tos();
                let lo = self.pick(1);
                if hi <= BSET_SZ - 1 && lo <= BSET_SZ - 1 {
                    if lo > hi {
                        self.regs.sp = self.regs.sp.wrapping_add(1);
                        let sp = self.regs.sp;
                        self.put(sp, 0);
                    } else {
                        let len0 = hi / WORD_SZ + 1;
                        self.regs.sp = self.regs.sp.wrapping_sub(len0 - 1);
                        let sp = self.regs.sp;
                        self.put(sp, len0);
                        for i in 0..len0 {
                            self.put(sp.wrapping_add(1 + i), 0);
                        }
                        for i in 0..(len0 * WORD_SZ) {
                            if lo <= i && i <= hi {
                                let addr = sp.wrapping_add(1 + i / WORD_SZ);
                                let mut v = self.get(addr);
                                v |= 1 << (i % WORD_SZ);
                                self.put(addr, v);
                            }
                        }
                    }
                } else {
                    self.raise(PASERROR_VALRANGE);
                }
            }
            0xDA => {
                let len0 = self.tos();
                let ts1 = self.pick(len0 + 1) as i16;
                let t2 = if ts1 >= 0 && (ts1 as u16) <= len0 * WORD_SZ - 1 {
                    u16::from(self.mem.get_bit(self.regs.sp.wrapping_add(1), ts1 as u16))
                } else {
                    0
                };
                let addr = self.regs.sp.wrapping_add(len0 + 1);
                self.put(addr, t2);
                self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
            }
            0xDB => {
                let len0 = self.tos();
                let len1 = self.pick(len0 + 1);
                if len1 >= len0 {
                    let src = self.regs.sp.wrapping_add(1);
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    for i in 0..len0 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a | b);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                } else {
                    let src = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    let dst = self.regs.sp.wrapping_add(1);
                    for i in 0..len1 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a | b);
                    }
                    let src = self.regs.sp.wrapping_add(len0);
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(len1).wrapping_add(1);
                    for i in 0..=len0 {
                        let v = self.get(src.wrapping_sub(i));
                        self.put(dst.wrapping_sub(i), v);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len1 + 1);
                }
            }
            0xDC => {
                let len0 = self.tos();
                let len1 = self.pick(len0 + 1);
                if len0 == 0 {
                    self.regs.sp = self.regs.sp.wrapping_add(len1 + 1);
                    let sp = self.regs.sp;
                    self.put(sp, 0);
                } else if len1 == 0 {
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                } else if len1 > len0 {
                    let src = self.regs.sp.wrapping_add(1);
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    for i in 0..len0 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a & b);
                    }
                    for i in len0..len1 {
                        self.put(dst.wrapping_add(i), 0);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                } else {
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    let src = self.regs.sp.wrapping_add(1);
                    for i in 0..len1 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a & b);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                }
            }
            0xDD => {
                let len0 = self.tos();
                let len1 = self.pick(len0 + 1);
                if len0 == 0 {
                    self.regs.sp = self.regs.sp.wrapping_add(1);
                } else if len1 == 0 {
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                } else if len1 > len0 {
                    let src = self.regs.sp.wrapping_add(1);
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    for i in 0..len0 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a & !b);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                } else {
                    let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                    let src = self.regs.sp.wrapping_add(1);
                    for i in 0..len1 {
                        let a = self.get(dst.wrapping_add(i));
                        let b = self.get(src.wrapping_add(i));
                        self.put(dst.wrapping_add(i), a & !b);
                    }
                    self.regs.sp = self.regs.sp.wrapping_add(len0 + 1);
                }
            }
            0xB6 | 0xB7 | 0xB8 => {
                let len0 = self.tos();
                let len1 = self.pick(len0 + 1);
                let min1 = len0.min(len1);
                let max1 = len0.max(len1);
                let src = self.regs.sp.wrapping_add(1);
                let dst = self.regs.sp.wrapping_add(len0).wrapping_add(2);
                let mut i = 0;
                match opcode {
                    0xB6 => {
                        while i < min1 {
                            if self.get(src.wrapping_add(i)) != self.get(dst.wrapping_add(i)) {
                                break;
                            }
                            i += 1;
                        }
                        if len0 > len1 {
                            while i < max1 {
                                if self.get(src.wrapping_add(i)) != 0 {
                                    break;
                                }
                                i += 1;
                            }
                        } else if len1 > len0 {
                            while i < max1 {
                                if self.get(dst.wrapping_add(i)) != 0 {
                                    break;
                                }
                                i += 1;
                            }
                        }
                    }
                    0xB7 => {
                        while i < min1 {
                            let t1 = self.get(src.wrapping_add(i));
                            if t1 != (self.get(dst.wrapping_add(i)) | t1) {
                                break;
                            }
                            i += 1;
                        }
                        if len0 > len1 {
                            while i < max1 {
                                if self.get(src.wrapping_add(i)) != 0 {
                                    break;
                                }
                                i += 1;
                            }
                        } else {
                            i = max1;
                        }
                    }
                    _ => {
                        while i < min1 {
                            let t1 = self.get(src.wrapping_add(i));
                            if t1 != (self.get(dst.wrapping_add(i)) | t1) {
                                break;
                            }
                            i += 1;
                        }
                        if len0 < len1 {
                            while i < max1 {
                                if self.get(src.wrapping_add(i)) != 0 {
                                    break;
                                }
                                i += 1;
                            }
                        } else {
                            i = max1;
                        }
                    }
                }
                self.regs.sp = self.regs.sp.wrapping_add(len0 + len1 + 1);
                let sp = self.regs.sp;
                self.put(sp, u16::from(i >= max1));
            }
            0xB9 | 0xBA | 0xBB => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let src = self.pop();
                let dst = self.pop();
                let mut i = 0u16;
                let ok = loop {
                    if i >= b {
                        break true;
                    }
                    let s = self.getb(src, i);
                    let d = self.getb(dst, i);
                    let cont = match opcode {
                        0xB9 => s == d,
                        0xBA => s <= d,
                        _ => s >= d,
                    };
                    if !cont {
                        break false;
                    }
                    i += 1;
                };
                self.push(u16::from(ok));
            }
            0x8A => {
                let b = fetch::sb(&mut self.regs, &mut self.mem);
                self.regs.ipc = self.regs.ipc.wrapping_add(b);
            }
            0xD4 => {
                let b = fetch::sb(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                if t1 & 1 == 0 {
                    self.regs.ipc = self.regs.ipc.wrapping_add(b);
                }
            }
            0xD2 => {
                let b = fetch::sb(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                let t2 = self.pop();
                if t2 != t1 {
                    self.regs.ipc = self.regs.ipc.wrapping_add(b);
                }
            }
            0xD3 => {
                let b = fetch::sb(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                let t2 = self.pop();
                if t2 == t1 {
                    self.regs.ipc = self.regs.ipc.wrapping_add(b);
                }
            }
            0x8B => {
                let w = fetch::w(&mut self.regs, &mut self.mem);
                self.regs.ipc = self.regs.ipc.wrapping_add(w);
            }
            0xD5 => {
                let w = fetch::w(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                if t1 & 1 == 0 {
                    self.regs.ipc = self.regs.ipc.wrapping_add(w);
                }
            }
            0xD6 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                let t1 = self.pop();
                let lo = self.get(self.regs.segb.wrapping_add(b));
                let hi = self.get(self.regs.segb.wrapping_add(b).wrapping_add(1));
                if lo <= t1 && hi >= t1 {
                    let off = self.get(self.regs.segb.wrapping_add(b).wrapping_add(2).wrapping_add(t1.wrapping_sub(lo)));
                    self.regs.ipc = self.regs.ipc.wrapping_add(off);
                }
            }
            0x90 => {
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                let ptbl = segment::get_ptbl(&self.regs, &mut self.mem);
                let stat = self.regs.mp;
                let segb = self.regs.segb;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, 0, segb);
            }
            0x91 => {
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                let ptbl = segment::get_ptbl(&self.regs, &mut self.mem);
                let stat = self.regs.bp;
                let segb = self.regs.segb;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, 0, segb);
            }
            0x92 => {
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                let ptbl = segment::get_ptbl(&self.regs, &mut self.mem);
                let stat = self.get(self.regs.mp.wrapping_add(OFF_MSSTAT));
                let segb = self.regs.segb;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, 0, segb);
                self.regs.lm = self.regs.mp;
                for _ in 1..=db {
                    self.regs.lm = self.get(self.regs.lm.wrapping_add(OFF_MSSTAT));
                }
                let mp = self.regs.mp;
                let lm = self.regs.lm;
                self.put(mp.wrapping_add(OFF_MSSTAT), lm);
            }
            0x93 => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                let osegno = segment::get_segno(&self.regs, &mut self.mem);
                let osegb = self.regs.segb;
                let ptbl = segment::set_segb(&mut self.regs, &mut self.mem, segno);
                segment::adjust_ref_count(&self.regs, &mut self.mem, segno, 1);
                let stat = self.regs.mp;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, osegno, osegb);
            }
            0x94 => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                self.do_cxg(segno, procno);
            }
            0x95 => {
                let segno = fetch::ub(&mut self.regs, &mut self.mem);
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                let procno = fetch::ub(&mut self.regs, &mut self.mem);
                let osegno = segment::get_segno(&self.regs, &mut self.mem);
                let osegb = self.regs.segb;
                let ptbl = segment::set_segb(&mut self.regs, &mut self.mem, segno);
                segment::adjust_ref_count(&self.regs, &mut self.mem, segno, 1);
                let stat = self.regs.mp;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, osegno, osegb);
                self.regs.lm = self.regs.mp;
                for _ in 1..=db {
                    self.regs.lm = self.get(self.regs.lm.wrapping_add(OFF_MSSTAT));
                }
                let mp = self.regs.mp;
                let lm = self.regs.lm;
                self.put(mp.wrapping_add(OFF_MSSTAT), lm);
            }
            0x97 => {
                let t1 = self.pop();
                self.regs.lm = self.pop();
                let segno = (t1 >> 8) as u8;
                let procno = (t1 & 0xFF) as u8;
                let osegno = segment::get_segno(&self.regs, &mut self.mem);
                let osegb = self.regs.segb;
                let ptbl = segment::set_segb(&mut self.regs, &mut self.mem, segno);
                segment::adjust_ref_count(&self.regs, &mut self.mem, segno, 1);
                let stat = self.regs.lm;
                self.regs.ipc = self.create_mscw(ptbl, procno, stat, osegno, osegb);
            }
            0x96 => {
                let b = fetch::b(&mut self.regs, &mut self.mem);
                self.regs.sp = self.regs.mp;
                self.regs.lm = self.regs.mp;
                let lm = self.regs.lm;
                self.regs.mp = self.get(lm.wrapping_add(OFF_MSDYNL));
                self.regs.ipc = self.get(lm.wrapping_add(OFF_MSIPC));
                let segno = self.getb(lm.wrapping_add(OFFB_MSSEG), 0) as u8;
                if segno != 0 {
                    let osegno = segment::get_segno(&self.regs, &mut self.mem);
                    segment::adjust_ref_count(&self.regs, &mut self.mem, osegno, -1);
                    segment::set_segb(&mut self.regs, &mut self.mem, segno);
                }
                self.regs.sp = self.regs.sp.wrapping_add(b).wrapping_add(MSCW_SZ);
            }
            0x99 => {
                let db = fetch::ub(&mut self.regs, &mut self.mem);
                self.regs.lm = self.regs.mp;
                for _ in 1..=db {
                    self.regs.lm = self.get(self.regs.lm.wrapping_add(OFF_MSSTAT));
                }
                let lm = self.regs.lm;
                self.push(lm);
            }
            0xDE => {
                let sem = self.pick(0);
                self.do_signal(sem);
            }
            0xDF => {
                let sem = self.pop();
                self.do_wait(sem);
            }
            0x9D => {
                let w = self.tos() as i16;
                if w >= 0 {
                    task::save_to_tib(&self.regs, &mut self.mem);
                }
                let sp = self.regs.sp;
                if w == -3 {
                    self.put(sp, self.regs.rq);
                } else if w == -2 {
                    self.put(sp, self.regs.ssv);
                } else if w == -1 {
                    self.put(sp, self.regs.ctp);
                } else if w > 0 {
                    let v = self.get(self.regs.ctp.wrapping_add(w as u16));
                    self.put(sp, v);
                }
            }
            0xD1 => {
                let t1 = self.tos();
                let w = self.pick(1) as i16;
                if w >= -1 {
                    task::save_to_tib(&self.regs, &mut self.mem);
                }
                if w == -3 {
                    self.regs.rq = t1;
                } else if w == -2 {
                    self.regs.ssv = t1;
                } else if w == -1 {
                    self.regs.rq = t1;
                    self.taskswitch5();
                } else if w >= 1 {
                    match w as u16 {
                        OFF_SP => self.regs.sp = t1,
                        OFF_MP => self.regs.mp = t1,
                        OFF_BP => self.regs.bp = t1,
                        OFF_IPC => self.regs.ipc = t1,
                        OFF_SEGB => self.regs.segb = t1,
                        other => {
                            let addr = self.regs.ctp.wrapping_add(other);
                            self.put(addr, t1);
                        }
                    }
                }
                if w != -1 {
                    if w >= -1 {
                        task::save_to_tib(&self.regs, &mut self.mem);
                    }
                    if w as u16 != OFF_SP {
                        self.regs.sp = self.regs.sp.wrapping_add(2);
                    }
                }
            }
            0x9E => {
                self.raise(PASERROR_USERBRK);
                return Some(StopReason::SoftwareBreak);
            }
            0x9C => {}
            0xBD => {
                let t1 = self.tos();
                let below = self.pick(1);
                let sp = self.regs.sp;
                self.put(sp, below);
                self.put(sp.wrapping_add(1), t1);
            }
            _ => return Some(StopReason::IllegalOpcode(opcode)),
        }

        self.instructions = self.instructions.wrapping_add(1);
        self.pending_stop.take()
    }

    fn do_signal(&mut self, sem: u16) -> TaskSwitch {
        task::do_signal(&mut self.regs, &mut self.mem, &self.vectors, sem)
    }

    fn do_wait(&mut self, sem: u16) -> TaskSwitch {
        task::do_wait(&mut self.regs, &mut self.mem, &self.vectors, sem)
    }

    fn breakpoint_hit(&self) -> Option<u16> {
        let pc = self.regs.ipc;
        self.breakpoints.iter().find(|bp| bp.matches_pc(pc)).map(|_| pc)
    }

    /// The run loop: a direct transliteration of `sim_instr`'s literal
    /// ordering, including the one-iteration-late interrupt-latch commit
    /// (`spec.md` §4.5) — a known quirk of the original that is preserved
    /// rather than corrected.
    pub fn run(&mut self, max_ticks: u64, mut on_tick: impl FnMut(&mut Memory, u64)) -> StopReason {
        let mut ticks = 0u64;
        loop {
            if self.cancel_requested {
                self.cancel_requested = false;
                return StopReason::Cancelled;
            }
            if ticks >= max_ticks {
                return StopReason::BudgetExhausted;
            }

            if self.regs.ctp != NIL {
                if let Some(pc) = self.breakpoint_hit() {
                    return StopReason::Breakpoint(pc);
                }
                if let Some(stop) = self.step() {
                    return stop;
                }
            }

            if task::is_int_enabled(&self.regs) {
                self.regs.intpending |= self.regs.intlatch;
                if self.regs.intpending != 0 {
                    task::process_int(&mut self.regs, &mut self.mem, &self.vectors);
                }
            }

            ticks += 1;
            on_tick(&mut self.mem, ticks);
        }
    }
}

impl Tickable for Pdq3 {
    fn tick(&mut self) {
        self.run(1, |_, _| {});
    }
}

impl Cpu for Pdq3 {
    type Registers = Registers;

    fn tick<B: emu_core::Bus>(&mut self, _bus: &mut B) {
        self.run(1, |_, _| {});
    }

    fn pc(&self) -> u32 {
        u32::from(self.regs.segb) << 16 | u32::from(self.regs.ipc)
    }

    fn registers(&self) -> Self::Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.regs.ctp == NIL
    }

    fn interrupt(&mut self) -> bool {
        task::raise_int(&mut self.regs, INT_DMAFD)
    }

    fn nmi(&mut self) {
        task::assert_int(&mut self.regs, INT_PWRF, true);
    }

    fn reset(&mut self) {
        self.regs = Registers {
            splow: 0,
            spupr: 0xFFFF,
            ctp: NIL,
            ssv: NIL,
            rq: NIL,
            ..Registers::default()
        };
    }
}

impl Observable for Pdq3 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "ipc" => Some(Value::U16(self.regs.ipc)),
            "segb" => Some(Value::U16(self.regs.segb)),
            "sp" => Some(Value::U16(self.regs.sp)),
            "mp" => Some(Value::U16(self.regs.mp)),
            "bp" => Some(Value::U16(self.regs.bp)),
            "ctp" => Some(Value::U16(self.regs.ctp)),
            "rq" => Some(Value::U16(self.regs.rq)),
            "ssr" => Some(Value::U16(self.regs.ssr)),
            "intpending" => Some(Value::U32(self.regs.intpending)),
            "intlatch" => Some(Value::U32(self.regs.intlatch)),
            "instructions" => Some(Value::U64(self.instructions)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "ipc",
            "segb",
            "sp",
            "mp",
            "bp",
            "ctp",
            "rq",
            "ssr",
            "intpending",
            "intlatch",
            "instructions",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microengine_bus::WordBusConfig;

    fn make_cpu() -> Pdq3 {
        Pdq3::new(Config::default(), WordBus::new(WordBusConfig::default()))
    }

    fn with_runnable_task(cpu: &mut Pdq3, code_segb: u16, code: &[u8]) {
        cpu.regs.segb = code_segb;
        cpu.regs.ipc = 0;
        cpu.regs.sp = 0x1000;
        cpu.regs.splow = 0x0800;
        cpu.regs.spupr = 0x1000;
        cpu.regs.ctp = 0x0100;
        for (i, &b) in code.iter().enumerate() {
            let addr = code_segb.wrapping_add((i as u16) / 2);
            let hi = i % 2 == 1;
            cpu.mem.bus().put_byte(addr, hi, b).unwrap();
        }
    }

    #[test]
    fn sldc_pushes_small_immediate() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x05]); // SLDC 5
        assert!(cpu.step().is_none());
        assert_eq!(cpu.tos(), 5);
    }

    #[test]
    fn ldci_pushes_word_literal() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x81, 0x34, 0x12]); // LDCI 0x1234
        assert!(cpu.step().is_none());
        assert_eq!(cpu.tos(), 0x1234);
    }

    #[test]
    fn adi_adds_top_two_signed_words() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x03, 0x04, 0xA2]); // SLDC3; SLDC4; ADI
        assert!(cpu.step().is_none());
        assert!(cpu.step().is_none());
        assert!(cpu.step().is_none());
        assert_eq!(cpu.tos(), 7);
    }

    #[test]
    fn dvi_by_zero_raises_pascal_exception() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x05, 0x00, 0x8D]); // SLDC5; SLDC0; DVI
        // trap handler at segment 2, proc 2: give it a procedure table entry.
        cpu.mem.put(0x2000, 0x0100).unwrap(); // ptbl offset at segb[0]
        let sib_addr = 0x0002;
        cpu.mem.put(cpu.regs.ssv.wrapping_add(2), sib_addr).unwrap();
        cpu.mem.put(sib_addr + OFF_SEGBASE, 0x3000).unwrap();
        cpu.mem.put(0x3000, 0x0080).unwrap(); // ptbl for trap segment
        cpu.mem.put(0x3000 + 0x0080 - 2, 0x0010).unwrap(); // proc 2 start
        cpu.mem.put(0x3000 + 0x0010, 0).unwrap(); // datasz = 0
        assert!(cpu.step().is_none());
        assert!(cpu.step().is_none());
        assert!(cpu.step().is_none());
        assert_eq!(cpu.regs.segb, 0x3000);
    }

    #[test]
    fn nop_advances_ipc_only() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x9C]);
        let ipc0 = cpu.regs.ipc;
        assert!(cpu.step().is_none());
        assert_eq!(cpu.regs.ipc, ipc0 + 1);
    }

    #[test]
    fn illegal_opcode_stops_run() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0xFF]);
        let stop = cpu.run(10, |_, _| {});
        assert_eq!(stop, StopReason::IllegalOpcode(0xFF));
    }

    #[test]
    fn interrupt_controller_latches_then_commits_after_instruction() {
        let mut cpu = make_cpu();
        with_runnable_task(&mut cpu, 0x2000, &[0x9C, 0x9C]); // two NOPs
        cpu.regs.ssr |= SSR_INTEN;
        cpu.assert_interrupt(INT_TICK, true);
        assert_eq!(cpu.regs.intpending, 0);
        cpu.run(1, |_, _| {});
        assert_ne!(cpu.regs.intpending & (1 << INT_TICK), 0);
    }
}
