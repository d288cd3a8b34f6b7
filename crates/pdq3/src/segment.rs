//! Segment table helpers: locating a segment's SIB (Segment Information
//! Block), its base and number, and the static-link walk used by
//! intermediate-level local/global addressing.
//!
//! `createMSCW`/`DoCXG`/`Raise` live on [`crate::cpu::Pdq3`] instead of
//! here, since raising a Pascal exception has to fold back into the run
//! loop's stop/continue decision; everything in this module is a plain
//! lookup with no control-flow effect of its own.

use crate::mem::Memory;
use crate::registers::Registers;

/// `GetSIB(segno)`: address of segment `segno`'s SIB entry. Segments
/// below 128 are looked up in the segment dictionary (`ssv`); 128 and
/// above are private segments indexed through the current task's SIB
/// vector (`ctp + OFF_SIBS`).
#[must_use]
pub fn get_sib(regs: &Registers, mem: &mut Memory, segno: u8) -> u16 {
    if segno < 128 {
        mem.get(regs.ssv.wrapping_add(u16::from(segno)))
    } else {
        let sibvec = mem.get(regs.ctp.wrapping_add(crate::constants::OFF_SIBS));
        mem.get(sibvec.wrapping_add(u16::from(segno) - 128))
    }
}

/// `GetSegbase(segno)`.
#[must_use]
pub fn get_segbase(regs: &Registers, mem: &mut Memory, segno: u8) -> u16 {
    let sib = get_sib(regs, mem, segno);
    mem.read(sib, crate::constants::OFF_SEGBASE)
}

/// `GetPtbl()`: start address of the current code segment's procedure
/// table.
#[must_use]
pub fn get_ptbl(regs: &Registers, mem: &mut Memory) -> u16 {
    let ptbl = mem.read(regs.segb, 0);
    regs.segb.wrapping_add(ptbl)
}

/// `GetSegno()`: the current code segment's own number, stored as the
/// first byte of its procedure table.
#[must_use]
pub fn get_segno(regs: &Registers, mem: &mut Memory) -> u8 {
    let ptbl = get_ptbl(regs, mem);
    mem.read_byte(ptbl, 0)
}

/// `SetSEGB(segno)`: point `segb` at segment `segno` and return its
/// procedure table address.
pub fn set_segb(regs: &mut Registers, mem: &mut Memory, segno: u8) -> u16 {
    let sib = get_sib(regs, mem, segno);
    regs.segb = mem.read(sib, crate::constants::OFF_SEGBASE);
    get_ptbl(regs, mem)
}

/// `AdjustRefCount(segno, incr)`.
pub fn adjust_ref_count(regs: &Registers, mem: &mut Memory, segno: u8, incr: i16) {
    let sib = get_sib(regs, mem, segno);
    let refs = mem.read(sib, crate::constants::OFF_SEGREFS);
    mem.write(sib, crate::constants::OFF_SEGREFS, refs.wrapping_add(incr as u16))
        .ok();
}

/// `TraverseMSstat(db)`: walk `db` static links from `mp`.
#[must_use]
pub fn traverse_ms_stat(regs: &Registers, mem: &mut Memory, db: u16) -> u16 {
    let mut lm = regs.mp;
    for _ in 0..db {
        lm = mem.get(lm.wrapping_add(crate::constants::OFF_MSSTAT));
    }
    lm
}
