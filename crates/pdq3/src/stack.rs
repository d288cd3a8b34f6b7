//! Word-stack discipline: the stack grows downward from `sp` toward
//! `splow`, bounded above by `spupr`. Every primitive here is a direct
//! bounds-checked read or write of `reg_sp`; a violation returns the
//! Pascal error code the caller passes on to
//! [`crate::cpu::Pdq3::raise`] rather than panicking.

use crate::constants::PASERROR_STKOVFL;
use crate::mem::Memory;
use crate::registers::Registers;

/// `Tos()`: peek at the top of stack without popping.
pub fn tos(regs: &Registers, mem: &mut Memory) -> Result<u16, u16> {
    if regs.sp >= regs.spupr {
        return Err(PASERROR_STKOVFL);
    }
    Ok(mem.get(regs.sp))
}

/// `Pick(i)`: peek `i` words above the current top.
pub fn pick(regs: &Registers, mem: &mut Memory, i: u16) -> Result<u16, u16> {
    let addr = regs.sp.wrapping_add(i);
    if addr >= regs.spupr {
        return Err(PASERROR_STKOVFL);
    }
    Ok(mem.get(addr))
}

/// `Pop()`.
pub fn pop(regs: &mut Registers, mem: &mut Memory) -> Result<u16, u16> {
    if regs.sp.wrapping_add(1) > regs.spupr {
        return Err(PASERROR_STKOVFL);
    }
    let v = mem.get(regs.sp);
    regs.sp = regs.sp.wrapping_add(1);
    Ok(v)
}

/// `Push(val)`.
pub fn push(regs: &mut Registers, mem: &mut Memory, val: u16) -> Result<(), u16> {
    if regs.sp < regs.splow {
        return Err(PASERROR_STKOVFL);
    }
    regs.sp = regs.sp.wrapping_sub(1);
    mem.put(regs.sp, val).ok();
    Ok(())
}

/// `PopS()`: pop as a signed 16-bit value.
pub fn pop_signed(regs: &mut Registers, mem: &mut Memory) -> Result<i16, u16> {
    pop(regs, mem).map(|v| v as i16)
}

/// `PushS(val)`.
pub fn push_signed(regs: &mut Registers, mem: &mut Memory, val: i16) -> Result<(), u16> {
    push(regs, mem, val as u16)
}

/// `PopF()`: pop a 32-bit float, stored high word first then low word.
pub fn pop_float(regs: &mut Registers, mem: &mut Memory) -> Result<f32, u16> {
    let hi = pop(regs, mem)?;
    let lo = pop(regs, mem)?;
    Ok(f32::from_bits((u32::from(hi) << 16) | u32::from(lo)))
}

/// `PushF(val)`: pushed low word first so the high word ends on top,
/// the mirror image of [`pop_float`]'s high-word-first read.
pub fn push_float(regs: &mut Registers, mem: &mut Memory, val: f32) -> Result<(), u16> {
    let bits = val.to_bits();
    push(regs, mem, bits as u16)?;
    push(regs, mem, (bits >> 16) as u16)
}
