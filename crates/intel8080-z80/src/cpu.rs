//! Main interpreter: fetch/execute loop, prefix routing, and the
//! unprefixed 256-way opcode table.
//!
//! `spec.md` §4.3's per-iteration contract is followed literally: check
//! the budget and run due events, poll latched interrupts, test
//! breakpoints, fetch one byte, dispatch. The giant switch shape is kept
//! (design note §9) via the `x`/`y`/`z` decomposition from `decode.rs`
//! rather than a 256-arm literal match — both compile to a jump table,
//! and the decomposed form is what lets the CB/DD/ED/FD prefix tables
//! share the same register-index plumbing.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]

use emu_core::{Bus, Cpu, Observable, Tickable, Value};
use microengine_bus::{ByteBus, FlagTables, Pcq, CF, HF, NF, PF, SF, ZF};

use crate::alu;
use crate::config::{ChipMode, Config, StopReason};
use crate::debug::{BreakKind, Breakpoint};
use crate::decode::{decompose, R_A, R_B, R_C, R_D, R_E, R_H, R_HL_IND, R_L, RP2_AF};
use crate::registers::Registers;
use crate::{cb, ed, ixiy};

impl Bus for ByteBus {
    fn read(&mut self, address: u16) -> u8 {
        self.read_byte(address)
    }
    fn write(&mut self, address: u16, value: u8) {
        self.write_byte(address, value);
    }
}

/// Which index register (if any) the current instruction substitutes for
/// `HL`/`(HL)`. Plumbed through so `execute_main` can share its body
/// between the plain and `DD`/`FD`-prefixed paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexMode {
    Hl,
    Ix,
    Iy,
}

pub struct Intel8080Z80 {
    pub regs: Registers,
    pub bus: ByteBus,
    pub(crate) tables: FlagTables,
    config: Config,
    pcq: Pcq,
    breakpoints: Vec<Breakpoint>,
    t_states: u64,
    cancel_requested: bool,
    irq_pending: bool,
    irq_vector_byte: u8,
    nmi_pending: bool,
    ei_just_executed: bool,
    gov_last_check: u64,
    gov_start: std::time::Instant,
}

impl Intel8080Z80 {
    #[must_use]
    pub fn new(config: Config, bus: ByteBus) -> Self {
        Self {
            regs: Registers::default(),
            bus,
            tables: FlagTables::new(),
            config,
            pcq: Pcq::new(64),
            breakpoints: Vec::new(),
            t_states: 0,
            cancel_requested: false,
            irq_pending: false,
            irq_vector_byte: 0xFF,
            nmi_pending: false,
            ei_just_executed: false,
            gov_last_check: 0,
            gov_start: std::time::Instant::now(),
        }
    }

    #[must_use]
    pub const fn t_states(&self) -> u64 {
        self.t_states
    }

    #[must_use]
    pub const fn mode(&self) -> ChipMode {
        self.config.mode
    }

    #[must_use]
    pub(crate) const fn quirks(&self) -> crate::config::Quirks {
        self.config.quirks
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Assert a maskable interrupt request carrying the data-bus byte an
    /// `IM 2` vector lookup would use (ignored in `IM 0`/`IM 1`).
    pub fn request_interrupt(&mut self, vector_byte: u8) {
        self.irq_pending = true;
        self.irq_vector_byte = vector_byte;
    }

    pub fn request_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn add_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoints.push(bp);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    #[must_use]
    pub fn pcq_history(&self) -> Vec<u32> {
        self.pcq.history()
    }

    pub(crate) fn push_pcq(&mut self, pc: u16) {
        self.pcq.push(u32::from(pc));
    }

    pub(crate) fn push16(&mut self, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        self.bus.write_word(self.regs.sp, value);
    }

    pub(crate) fn pop16(&mut self) -> u16 {
        let value = self.bus.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        value
    }

    fn fetch(&mut self) -> u8 {
        let b = self.bus.read_byte(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
        b
    }

    fn fetch_signed(&mut self) -> i8 {
        self.fetch() as i8
    }

    pub(crate) fn fetch16(&mut self) -> u16 {
        let lo = self.fetch();
        let hi = self.fetch();
        u16::from(lo) | (u16::from(hi) << 8)
    }

    fn breakpoint_hit_pre(&self, pc: u16) -> Option<u16> {
        self.breakpoints
            .iter()
            .find(|bp| bp.kind == BreakKind::Pc && bp.addr == pc)
            .map(|bp| bp.addr)
    }

    /// Runs until a stop condition, the cycle budget is exhausted, or a
    /// host cancel is observed. `on_instruction` is invoked after every
    /// retired instruction with the T-states it consumed, so a host can
    /// advance its own event wheel (floppy/DMA/timers) in step.
    pub fn run(
        &mut self,
        max_cycles: u64,
        mut on_instruction: impl FnMut(&mut ByteBus, u64),
    ) -> StopReason {
        self.cancel_requested = false;
        let start = self.t_states;
        loop {
            if self.cancel_requested {
                return StopReason::Cancelled;
            }
            if self.t_states.wrapping_sub(start) >= max_cycles {
                return StopReason::BudgetExhausted;
            }

            self.poll_interrupts();

            if let Some(addr) = self.breakpoint_hit_pre(self.regs.pc) {
                return StopReason::Breakpoint(addr);
            }

            if self.regs.halted {
                self.t_states += 4;
                on_instruction(&mut self.bus, 4);
                if self.nmi_pending || (self.irq_pending && self.regs.iff1) {
                    continue;
                }
                continue;
            }

            let before = self.t_states;
            match self.step() {
                Ok(()) => {}
                Err(reason) => return reason,
            }
            let consumed = self.t_states - before;
            on_instruction(&mut self.bus, consumed);

            self.apply_governor();
        }
    }

    fn apply_governor(&mut self) {
        let Some(khz) = self.config.governor_khz else {
            return;
        };
        let elapsed_cycles = self.t_states - self.gov_last_check;
        if elapsed_cycles < u64::from(khz) {
            return;
        }
        self.gov_last_check = self.t_states;
        let target = std::time::Duration::from_micros(elapsed_cycles * 1000 / u64::from(khz));
        let actual = self.gov_start.elapsed();
        if let Some(remaining) = target.checked_sub(actual) {
            std::thread::sleep(remaining);
        }
    }

    /// Interrupt poll at the instruction boundary. The latch commits
    /// *before* the next instruction runs, matching the "interrupt
    /// committed before an instruction that disables it" quirk carried
    /// over from the P-code core's §4.5 note — here on the Z80 side the
    /// observable effect is the same: `iff1` is read once, at the top of
    /// the boundary, and a request latched this boundary is served even
    /// if the very next opcode is a `DI`.
    fn poll_interrupts(&mut self) {
        if self.nmi_pending && !self.regs.halted {
            self.nmi_pending = false;
            self.regs.halted = false;
            self.regs.iff2 = self.regs.iff1;
            self.regs.iff1 = false;
            self.push_pcq(self.regs.pc);
            self.push16(self.regs.pc);
            self.regs.pc = 0x0066;
            self.t_states += 11;
            return;
        }
        if self.irq_pending && self.regs.iff1 && !self.ei_just_executed {
            self.irq_pending = false;
            self.regs.halted = false;
            self.regs.iff1 = false;
            self.regs.iff2 = false;
            self.push_pcq(self.regs.pc);
            self.push16(self.regs.pc);
            match self.regs.im {
                0 => {
                    self.regs.pc = u16::from(self.irq_vector_byte & 0x38);
                    self.t_states += 13;
                }
                1 => {
                    self.regs.pc = 0x0038;
                    self.t_states += 13;
                }
                _ => {
                    let table = (u16::from(self.regs.i) << 8) | u16::from(self.irq_vector_byte & 0xFE);
                    self.regs.pc = self.bus.read_word(table);
                    self.t_states += 19;
                }
            }
        }
        self.ei_just_executed = false;
    }

    fn step(&mut self) -> Result<(), StopReason> {
        let pc_at_fetch = self.regs.pc;
        let op = self.fetch();

        match (op, self.config.mode) {
            (0xCB, ChipMode::Zilog) => {
                let sub = self.fetch();
                self.t_states += cb::execute(self, IndexMode::Hl, 0, sub);
            }
            (0xED, ChipMode::Zilog) => {
                let sub = self.fetch();
                if let Some(extra) = ed::execute(self, sub)? {
                    self.t_states += extra;
                } else {
                    self.t_states += 8; // ED + undefined = NONI NOP
                }
            }
            // Neither byte means anything special on real 8080 silicon;
            // the CB/ED tables are a Z80-only extension.
            (0xCB | 0xED, ChipMode::Intel8080) => self.illegal_opcode_8080(op)?,
            (0xDD, _) => self.run_indexed(IndexMode::Ix)?,
            (0xFD, _) => self.run_indexed(IndexMode::Iy)?,
            _ => {
                let cycles = self.execute_main(op, IndexMode::Hl)?;
                self.t_states += cycles;
            }
        }

        if let Some(bp) = self
            .breakpoints
            .iter()
            .find(|bp| bp.kind == BreakKind::Memory && bp.addr == pc_at_fetch)
        {
            let addr = bp.addr;
            self.regs.pc = pc_at_fetch;
            return Err(StopReason::Breakpoint(addr));
        }
        Ok(())
    }

    /// An undefined encoding reached while decoding in `Intel8080` mode.
    /// Per the Open Question resolution in `DESIGN.md`: decode, consume no
    /// further operand bytes beyond the opcode itself, and continue — or,
    /// if `trap_on_illegal` is set, stop the run loop so a host debugger
    /// can inspect the condition.
    fn illegal_opcode_8080(&mut self, op: u8) -> Result<(), StopReason> {
        if self.config.quirks.trap_on_illegal {
            return Err(StopReason::IllegalOpcode(op));
        }
        self.t_states += 4;
        Ok(())
    }

    fn run_indexed(&mut self, mode: IndexMode) -> Result<(), StopReason> {
        let op = self.fetch();
        if self.config.mode == ChipMode::Intel8080 {
            // 8080 mode has no IX/IY; DD/FD decode as their own opcodes.
            let cycles = self.execute_main(op, IndexMode::Hl)?;
            self.t_states += cycles + 4;
            return Ok(());
        }
        if op == 0xCB {
            let disp = self.fetch_signed();
            let sub = self.fetch();
            self.t_states += cb::execute(self, mode, disp, sub) + 4;
            return Ok(());
        }
        if op == 0xDD || op == 0xFD || op == 0xED {
            // A second prefix byte cancels index substitution for this
            // instruction (documented Z80 behavior: DD/FD is "sticky"
            // for exactly one following opcode).
            self.t_states += 4;
            return self.run_indexed(if op == 0xFD { IndexMode::Iy } else { IndexMode::Ix });
        }
        let cycles = ixiy::execute(self, mode, op)?;
        self.t_states += cycles + 4;
        Ok(())
    }

    pub(crate) fn index_reg(&self, mode: IndexMode) -> u16 {
        match mode {
            IndexMode::Hl => self.regs.hl(),
            IndexMode::Ix => self.regs.ix,
            IndexMode::Iy => self.regs.iy,
        }
    }

    pub(crate) fn set_index_reg(&mut self, mode: IndexMode, value: u16) {
        match mode {
            IndexMode::Hl => self.regs.set_hl(value),
            IndexMode::Ix => self.regs.ix = value,
            IndexMode::Iy => self.regs.iy = value,
        }
    }

    /// Effective address for `(HL)`/`(IX+d)`/`(IY+d)`; `disp` is ignored
    /// for `IndexMode::Hl`.
    pub(crate) fn index_addr(&self, mode: IndexMode, disp: i8) -> u16 {
        match mode {
            IndexMode::Hl => self.regs.hl(),
            IndexMode::Ix => self.regs.ix.wrapping_add(i16::from(disp) as u16),
            IndexMode::Iy => self.regs.iy.wrapping_add(i16::from(disp) as u16),
        }
    }

    pub(crate) fn read_r(&mut self, reg: u8, mode: IndexMode, disp: i8) -> u8 {
        match reg {
            R_B => self.regs.b,
            R_C => self.regs.c,
            R_D => self.regs.d,
            R_E => self.regs.e,
            R_H if mode == IndexMode::Hl => self.regs.h,
            R_L if mode == IndexMode::Hl => self.regs.l,
            R_H => (self.index_reg(mode) >> 8) as u8,
            R_L => self.index_reg(mode) as u8,
            R_HL_IND => {
                let addr = self.index_addr(mode, disp);
                self.bus.read_byte(addr)
            }
            R_A => self.regs.a,
            _ => unreachable!("register index out of range"),
        }
    }

    pub(crate) fn write_r(&mut self, reg: u8, mode: IndexMode, disp: i8, value: u8) {
        match reg {
            R_B => self.regs.b = value,
            R_C => self.regs.c = value,
            R_D => self.regs.d = value,
            R_E => self.regs.e = value,
            R_H if mode == IndexMode::Hl => self.regs.h = value,
            R_L if mode == IndexMode::Hl => self.regs.l = value,
            R_H => {
                let v = (self.index_reg(mode) & 0x00FF) | (u16::from(value) << 8);
                self.set_index_reg(mode, v);
            }
            R_L => {
                let v = (self.index_reg(mode) & 0xFF00) | u16::from(value);
                self.set_index_reg(mode, v);
            }
            R_HL_IND => {
                let addr = self.index_addr(mode, disp);
                self.bus.write_byte(addr, value);
            }
            R_A => self.regs.a = value,
            _ => unreachable!("register index out of range"),
        }
    }

    fn read_rp(&self, p: u8, mode: IndexMode) -> u16 {
        match p {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index_reg(mode),
            _ => self.regs.sp,
        }
    }

    fn write_rp(&mut self, p: u8, mode: IndexMode, value: u16) {
        match p {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_index_reg(mode, value),
            _ => self.regs.sp = value,
        }
    }

    fn read_rp2(&self, p: u8, mode: IndexMode) -> u16 {
        if p == RP2_AF {
            self.regs.af()
        } else {
            self.read_rp(p, mode)
        }
    }

    fn write_rp2(&mut self, p: u8, mode: IndexMode, value: u16) {
        if p == RP2_AF {
            self.regs.set_af(value);
        } else {
            self.write_rp(p, mode, value);
        }
    }

    fn cond(&self, y: u8) -> bool {
        let f = self.regs.f;
        match y {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    /// Shared body for unprefixed opcodes and `DD`/`FD`-prefixed opcodes
    /// that substitute `HL`/`(HL)` with `IX`/`IY`/`(IX+d)`/`(IY+d)`.
    /// `mode` is always [`IndexMode::Hl`] for the unprefixed call site;
    /// `ixiy::execute` re-enters here for opcodes it shares with the
    /// plain table (LD r,r' groups, ALU groups, INC/DEC r, …).
    pub(crate) fn execute_main(&mut self, op: u8, mode: IndexMode) -> Result<u64, StopReason> {
        let f = decompose(op);
        let indexed = matches!(mode, IndexMode::Ix | IndexMode::Iy);
        let needs_disp = indexed
            && match f.x {
                0 => matches!(f.z, 4 | 5 | 6) && f.y == R_HL_IND,
                1 => !(f.y == R_HL_IND && f.z == R_HL_IND) && (f.y == R_HL_IND || f.z == R_HL_IND),
                2 => f.z == R_HL_IND,
                _ => false,
            };
        let disp = if needs_disp { self.fetch_signed() } else { 0 };

        match (f.x, f.z) {
            (0, 0) => match f.y {
                0 => Ok(4),                               // NOP
                1 => {
                    self.regs.ex_af_af();
                    Ok(4)
                }
                2 => {
                    let d = self.fetch_signed();
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    if self.regs.b != 0 {
                        self.push_pcq(self.regs.pc);
                        self.regs.pc = self.regs.pc.wrapping_add(i16::from(d) as u16);
                        Ok(13)
                    } else {
                        Ok(8)
                    }
                }
                3 => {
                    let d = self.fetch_signed();
                    self.push_pcq(self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(i16::from(d) as u16);
                    Ok(12)
                }
                _ => {
                    let d = self.fetch_signed();
                    if self.cond(f.y - 4) {
                        self.push_pcq(self.regs.pc);
                        self.regs.pc = self.regs.pc.wrapping_add(i16::from(d) as u16);
                        Ok(12)
                    } else {
                        Ok(7)
                    }
                }
            },
            (0, 1) if f.q == 0 => {
                let n = self.fetch16();
                self.write_rp(f.p, mode, n);
                Ok(10)
            }
            (0, 1) => {
                let hl = self.index_reg(mode);
                let rp = self.read_rp(f.p, mode);
                let (result, flags) = alu::add16(hl, rp);
                self.set_index_reg(mode, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                Ok(11)
            }
            (0, 2) if f.q == 0 => {
                match f.p {
                    0 => self.bus.write_byte(self.regs.bc(), self.regs.a),
                    1 => self.bus.write_byte(self.regs.de(), self.regs.a),
                    2 => {
                        let addr = self.fetch16();
                        self.bus.write_word(addr, self.index_reg(mode));
                    }
                    _ => {
                        let addr = self.fetch16();
                        self.bus.write_byte(addr, self.regs.a);
                    }
                }
                Ok(if f.p >= 2 { 16 } else { 7 })
            }
            (0, 2) => {
                match f.p {
                    0 => self.regs.a = self.bus.read_byte(self.regs.bc()),
                    1 => self.regs.a = self.bus.read_byte(self.regs.de()),
                    2 => {
                        let addr = self.fetch16();
                        let v = self.bus.read_word(addr);
                        self.set_index_reg(mode, v);
                    }
                    _ => {
                        let addr = self.fetch16();
                        self.regs.a = self.bus.read_byte(addr);
                    }
                }
                Ok(if f.p >= 2 { 16 } else { 7 })
            }
            (0, 3) => {
                let v = self.read_rp(f.p, mode);
                let nv = if f.q == 0 { v.wrapping_add(1) } else { v.wrapping_sub(1) };
                self.write_rp(f.p, mode, nv);
                Ok(6)
            }
            (0, 4) => {
                let v = self.read_r(f.y, mode, disp);
                let r = alu::inc8(&self.tables, v);
                self.write_r(f.y, mode, disp, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
                Ok(if f.y == R_HL_IND { 11 } else { 4 })
            }
            (0, 5) => {
                let v = self.read_r(f.y, mode, disp);
                let r = alu::dec8(&self.tables, v);
                self.write_r(f.y, mode, disp, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
                Ok(if f.y == R_HL_IND { 11 } else { 4 })
            }
            (0, 6) => {
                let n = self.fetch();
                self.write_r(f.y, mode, disp, n);
                Ok(if f.y == R_HL_IND { 10 } else { 7 })
            }
            (0, 7) => {
                self.rotate_shift_accumulator(f.y);
                Ok(4)
            }
            (1, 6) if f.y == R_HL_IND => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                Err(StopReason::Halt)
            }
            (1, _) => {
                let v = self.read_r(f.z, mode, disp);
                self.write_r(f.y, mode, disp, v);
                Ok(if f.y == R_HL_IND || f.z == R_HL_IND { 7 } else { 4 })
            }
            (2, _) => {
                let v = self.read_r(f.z, mode, disp);
                self.alu_op(f.y, v);
                Ok(if f.z == R_HL_IND { 7 } else { 4 })
            }
            (3, 0) => {
                if self.cond(f.y) {
                    self.push_pcq(self.regs.pc);
                    self.regs.pc = self.pop16();
                    Ok(11)
                } else {
                    Ok(5)
                }
            }
            (3, 1) if f.q == 0 => {
                let v = self.pop16();
                self.write_rp2(f.p, mode, v);
                Ok(10)
            }
            (3, 1) => match f.p {
                0 => {
                    self.push_pcq(self.regs.pc);
                    self.regs.pc = self.pop16();
                    Ok(10)
                }
                1 => {
                    self.regs.exx();
                    Ok(4)
                }
                2 => {
                    self.regs.pc = self.index_reg(mode);
                    Ok(4)
                }
                _ => {
                    self.regs.sp = self.index_reg(mode);
                    Ok(6)
                }
            },
            (3, 2) => {
                let addr = self.fetch16();
                if self.cond(f.y) {
                    self.push_pcq(self.regs.pc);
                    self.regs.pc = addr;
                }
                Ok(10)
            }
            (3, 3) => match f.y {
                0 => {
                    let addr = self.fetch16();
                    self.push_pcq(self.regs.pc);
                    self.regs.pc = addr;
                    Ok(10)
                }
                1 => {
                    let sub = self.fetch();
                    self.t_states += cb::execute(self, IndexMode::Hl, 0, sub);
                    Ok(0)
                }
                2 => {
                    let n = self.fetch();
                    self.bus.io_out(n, self.regs.a);
                    Ok(11)
                }
                3 => {
                    let n = self.fetch();
                    self.regs.a = self.bus.io_in(n);
                    Ok(11)
                }
                4 => {
                    let hl = self.index_reg(mode);
                    let sp_lo = self.bus.read_byte(self.regs.sp);
                    let sp_hi = self.bus.read_byte(self.regs.sp.wrapping_add(1));
                    self.bus.write_byte(self.regs.sp, hl as u8);
                    self.bus.write_byte(self.regs.sp.wrapping_add(1), (hl >> 8) as u8);
                    self.set_index_reg(mode, u16::from(sp_lo) | (u16::from(sp_hi) << 8));
                    Ok(19)
                }
                5 => {
                    // `EX DE, HL` always operates on `HL`, never `IX`/`IY` —
                    // one of the few opcodes left unaffected by a `DD`/`FD`
                    // prefix on real silicon.
                    let de = self.regs.de();
                    self.regs.set_de(self.regs.hl());
                    self.regs.set_hl(de);
                    Ok(4)
                }
                6 => {
                    self.regs.iff1 = false;
                    self.regs.iff2 = false;
                    Ok(4)
                }
                _ => {
                    self.regs.iff1 = true;
                    self.regs.iff2 = true;
                    self.ei_just_executed = true;
                    Ok(4)
                }
            },
            (3, 4) => {
                let addr = self.fetch16();
                if self.cond(f.y) {
                    self.push_pcq(self.regs.pc);
                    self.push16(self.regs.pc);
                    self.regs.pc = addr;
                    Ok(17)
                } else {
                    Ok(10)
                }
            }
            (3, 5) if f.q == 0 => {
                let v = self.read_rp2(f.p, mode);
                self.push16(v);
                Ok(11)
            }
            (3, 5) => match f.p {
                0 => {
                    let addr = self.fetch16();
                    self.push_pcq(self.regs.pc);
                    self.push16(self.regs.pc);
                    self.regs.pc = addr;
                    Ok(17)
                }
                _ => {
                    // Secondary DD/FD/ED immediately after another
                    // DD/FD is handled by the caller (`run_indexed`);
                    // reaching here means a stray repeated prefix in
                    // the plain (unprefixed) table, which Z80 treats
                    // as its own opcode's NOP-equivalent timing.
                    Ok(4)
                }
            },
            (3, 6) => {
                let n = self.fetch();
                self.alu_op(f.y, n);
                Ok(7)
            }
            (3, 7) => {
                self.push_pcq(self.regs.pc);
                self.push16(self.regs.pc);
                self.regs.pc = u16::from(f.y) * 8;
                Ok(11)
            }
            _ => unreachable!("decompose() exhausts all opcodes"),
        }
    }

    fn rotate_shift_accumulator(&mut self, y: u8) {
        let a = self.regs.a;
        let preserved = self.regs.f & (SF | ZF | PF);
        match y {
            0 => {
                let carry = a & 0x80 != 0;
                self.regs.a = a.rotate_left(1);
                self.regs.f = preserved | (self.regs.a & 0x28) | u8::from(carry);
            }
            1 => {
                let carry = a & 0x01 != 0;
                self.regs.a = a.rotate_right(1);
                self.regs.f = preserved | (self.regs.a & 0x28) | u8::from(carry);
            }
            2 => {
                let carry = a & 0x80 != 0;
                self.regs.a = (a << 1) | u8::from(self.regs.f & CF != 0);
                self.regs.f = preserved | (self.regs.a & 0x28) | u8::from(carry);
            }
            3 => {
                let carry = a & 0x01 != 0;
                self.regs.a = (a >> 1) | ((self.regs.f & CF) << 7);
                self.regs.f = preserved | (self.regs.a & 0x28) | u8::from(carry);
            }
            4 => {
                let r = alu::daa(a, self.regs.f);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            5 => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & 0x28);
            }
            6 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (self.regs.a & 0x28) | CF;
            }
            _ => {
                let carry = self.regs.f & CF != 0;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (self.regs.a & 0x28) | u8::from(!carry);
            }
        }
    }

    pub(crate) fn alu_op(&mut self, y: u8, v: u8) {
        let a = self.regs.a;
        let r = match y {
            0 => alu::add8(&self.tables, a, v, false),
            1 => alu::add8(&self.tables, a, v, self.regs.f & CF != 0),
            2 => alu::sub8(&self.tables, a, v, false),
            3 => alu::sub8(&self.tables, a, v, self.regs.f & CF != 0),
            4 => alu::and8(&self.tables, a, v),
            5 => alu::xor8(&self.tables, a, v),
            6 => alu::or8(&self.tables, a, v),
            _ => alu::cp8(&self.tables, a, v),
        };
        let mut flags = r.flags;
        if self.config.mode == ChipMode::Intel8080 && matches!(y, 0 | 1 | 2 | 3) {
            flags = (flags & !PF) | if self.tables.parity_of(r.value) { PF } else { 0 };
        }
        self.regs.f = flags;
        if y != 7 {
            self.regs.a = r.value;
        } else {
            self.regs.a = a;
        }
    }
}

impl Tickable for Intel8080Z80 {
    fn tick(&mut self) {
        let _ = self.run(1, |_, _| {});
    }
}

impl Cpu for Intel8080Z80 {
    type Registers = Registers;

    fn tick<B: Bus>(&mut self, _bus: &mut B) {
        let _ = self.run(1, |_, _| {});
    }

    fn pc(&self) -> u32 {
        u32::from(self.regs.pc)
    }

    fn registers(&self) -> Self::Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }

    fn interrupt(&mut self) -> bool {
        if self.regs.iff1 {
            self.request_interrupt(0xFF);
            true
        } else {
            false
        }
    }

    fn nmi(&mut self) {
        self.request_nmi();
    }

    fn reset(&mut self) {
        self.regs = Registers::default();
        self.irq_pending = false;
        self.nmi_pending = false;
        self.ei_just_executed = false;
    }
}

impl Observable for Intel8080Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "a" => Some(Value::U8(self.regs.a)),
            "f" => Some(Value::U8(self.regs.f)),
            "bc" => Some(Value::U16(self.regs.bc())),
            "de" => Some(Value::U16(self.regs.de())),
            "hl" => Some(Value::U16(self.regs.hl())),
            "ix" => Some(Value::U16(self.regs.ix)),
            "iy" => Some(Value::U16(self.regs.iy)),
            "sp" => Some(Value::U16(self.regs.sp)),
            "pc" => Some(Value::U16(self.regs.pc)),
            "flags.z" => Some(Value::Bool(self.regs.f & ZF != 0)),
            "flags.c" => Some(Value::Bool(self.regs.f & CF != 0)),
            "halted" => Some(Value::Bool(self.regs.halted)),
            "t_states" => Some(Value::U64(self.t_states)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "a", "f", "bc", "de", "hl", "ix", "iy", "sp", "pc", "flags.z", "flags.c", "halted",
            "t_states",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipMode;
    use microengine_bus::ByteBusConfig;

    fn make_cpu() -> Intel8080Z80 {
        let bus = ByteBus::new(ByteBusConfig::default());
        Intel8080Z80::new(Config::default(), bus)
    }

    #[test]
    fn scenario_1_ld_a_immediate_then_halt() {
        let mut cpu = make_cpu();
        cpu.bus.load(0x0000, &[0x3E, 0x5A, 0x76]);
        let reason = cpu.run(1000, |_, _| {});
        assert_eq!(cpu.regs.a, 0x5A);
        assert_eq!(reason, StopReason::Halt);
        assert_eq!(cpu.regs.pc, 0x0002);
    }

    #[test]
    fn djnz_falls_through_at_b_eq_1() {
        let mut cpu = make_cpu();
        cpu.regs.b = 1;
        cpu.bus.load(0x0000, &[0x10, 0xFE]); // DJNZ -2
        let _ = cpu.run(8, |_, _| {});
        assert_eq!(cpu.regs.b, 0);
        assert_eq!(cpu.regs.pc, 0x0002);
    }

    #[test]
    fn djnz_wraps_b_to_ff_when_taken_from_zero() {
        let mut cpu = make_cpu();
        cpu.regs.b = 0;
        cpu.bus.load(0x0000, &[0x10, 0xFE]);
        let _ = cpu.run(8, |_, _| {});
        assert_eq!(cpu.regs.b, 0xFF);
        assert_eq!(cpu.regs.pc, 0x0000);
    }

    #[test]
    fn daa_after_bcd_add() {
        let mut cpu = make_cpu();
        cpu.regs.a = 0x09;
        cpu.alu_op(0, 0x01); // ADD A,1 -> 0x0A with half carry
        cpu.rotate_shift_accumulator(4); // DAA
        assert_eq!(cpu.regs.a, 0x10);
    }
}
