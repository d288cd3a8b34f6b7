//! `ED`-prefixed extended opcodes: 16-bit `ADC`/`SBC`, `LD (nn),rp`/`LD
//! rp,(nn)`, `NEG`, `RETN`/`RETI`, interrupt-mode selection, `LD
//! I,A`/`LD R,A`/`LD A,I`/`LD A,R`, `RRD`/`RLD`, and the eight block
//! instructions (`spec.md` §4.3: `LDIR`/`CPIR`/`INIR`/`OTIR`/`LDDR`/
//! `CPDR`/`INDR`/`OTDR`, plus their single-shot non-`R` forms).
//!
//! `BC == 0` is treated as `0x10000` for the repeating forms, so `LDIR`
//! with an initial `BC` of zero runs the full 65536 iterations (`spec.md`
//! §8 boundary case). Each iteration accounts its own cycles individually
//! so a breakpoint on the source/destination address can interrupt
//! mid-repeat and resume correctly — the repeat is implemented as `PC`
//! stepping back by 2 after a completed-but-continuing iteration, exactly
//! as the per-iteration interrupt poll in `cpu.rs::run` expects.

use microengine_bus::{CF, HF, NF, PF, SF, YF, ZF};

use crate::alu;
use crate::config::StopReason;
use crate::cpu::{IndexMode, Intel8080Z80};
use crate::decode::decompose;

pub fn execute(cpu: &mut Intel8080Z80, op: u8) -> Result<Option<u64>, StopReason> {
    let f = decompose(op);
    match (f.x, f.z) {
        (1, 0) => {
            let v = cpu.bus.io_in(cpu.regs.c);
            if f.y != 6 {
                cpu.write_r(f.y, IndexMode::Hl, 0, v);
            }
            let mut flags = (cpu.regs.f & CF) | (v & (YF | SF | 0x28));
            if v == 0 {
                flags |= ZF;
            }
            if v.count_ones() % 2 == 0 {
                flags |= PF;
            }
            cpu.regs.f = flags;
            Ok(Some(12))
        }
        (1, 1) => {
            let v = if f.y == 6 {
                // Undocumented `OUT (C), 0` — some 8080-derived clones
                // write 0xFF instead of the architectural 0x00.
                if cpu.quirks().out_c_zero_is_literal_zero {
                    0
                } else {
                    0xFF
                }
            } else {
                cpu.read_r(f.y, IndexMode::Hl, 0)
            };
            cpu.bus.io_out(cpu.regs.c, v);
            Ok(Some(12))
        }
        (1, 2) if f.q == 0 => {
            let hl = cpu.regs.hl();
            let rp = read_rp16(cpu, f.p);
            let (result, flags) = alu::sbc16(hl, rp, cpu.regs.f & CF != 0);
            cpu.regs.set_hl(result);
            cpu.regs.f = flags;
            Ok(Some(15))
        }
        (1, 2) => {
            let hl = cpu.regs.hl();
            let rp = read_rp16(cpu, f.p);
            let (result, flags) = alu::adc16(hl, rp, cpu.regs.f & CF != 0);
            cpu.regs.set_hl(result);
            cpu.regs.f = flags;
            Ok(Some(15))
        }
        (1, 3) if f.q == 0 => {
            let addr = cpu.fetch16();
            let v = read_rp16(cpu, f.p);
            cpu.bus.write_word(addr, v);
            Ok(Some(20))
        }
        (1, 3) => {
            let addr = cpu.fetch16();
            let v = cpu.bus.read_word(addr);
            write_rp16(cpu, f.p, v);
            Ok(Some(20))
        }
        (1, 4) => {
            let a = cpu.regs.a;
            let r = alu::sub8(&cpu.tables, 0, a, false);
            cpu.regs.a = r.value;
            cpu.regs.f = r.flags;
            Ok(Some(8))
        }
        (1, 5) => {
            cpu.regs.iff1 = cpu.regs.iff2;
            cpu.push_pcq(cpu.regs.pc);
            cpu.regs.pc = cpu.pop16();
            Ok(Some(14))
        }
        (1, 6) => {
            cpu.regs.im = [0, 0, 1, 2][(f.y & 3) as usize];
            Ok(Some(8))
        }
        (1, 7) => {
            match f.y {
                0 => cpu.regs.i = cpu.regs.a,
                1 => cpu.regs.r = cpu.regs.a,
                2 => {
                    cpu.regs.a = cpu.regs.i;
                    set_ir_flags(cpu, cpu.regs.iff2);
                }
                3 => {
                    cpu.regs.a = cpu.regs.r;
                    set_ir_flags(cpu, cpu.regs.iff2);
                }
                4 => rrd(cpu),
                5 => rld(cpu),
                _ => {}
            }
            Ok(Some(if f.y >= 4 && f.y <= 5 { 18 } else { 9 }))
        }
        (2, z) if f.y >= 4 => Ok(Some(block_op(cpu, z, f.y)?)),
        _ => Ok(None),
    }
}

fn set_ir_flags(cpu: &mut Intel8080Z80, iff2: bool) {
    let a = cpu.regs.a;
    let mut flags = cpu.regs.f & CF;
    if a == 0 {
        flags |= ZF;
    }
    if a & 0x80 != 0 {
        flags |= SF;
    }
    flags |= a & (YF | 0x08);
    if iff2 {
        flags |= PF;
    }
    cpu.regs.f = flags;
}

fn read_rp16(cpu: &Intel8080Z80, p: u8) -> u16 {
    match p {
        0 => cpu.regs.bc(),
        1 => cpu.regs.de(),
        2 => cpu.regs.hl(),
        _ => cpu.regs.sp,
    }
}

fn write_rp16(cpu: &mut Intel8080Z80, p: u8, v: u16) {
    match p {
        0 => cpu.regs.set_bc(v),
        1 => cpu.regs.set_de(v),
        2 => cpu.regs.set_hl(v),
        _ => cpu.regs.sp = v,
    }
}

fn rrd(cpu: &mut Intel8080Z80) {
    let addr = cpu.regs.hl();
    let hl_byte = cpu.bus.read_byte(addr);
    let a = cpu.regs.a;
    let new_hl = (a << 4) | (hl_byte >> 4);
    let new_a = (a & 0xF0) | (hl_byte & 0x0F);
    cpu.bus.write_byte(addr, new_hl);
    cpu.regs.a = new_a;
    cpu.regs.f = (cpu.regs.f & CF) | cpu.tables.rld_rrd(new_a);
}

fn rld(cpu: &mut Intel8080Z80) {
    let addr = cpu.regs.hl();
    let hl_byte = cpu.bus.read_byte(addr);
    let a = cpu.regs.a;
    let new_hl = (hl_byte << 4) | (a & 0x0F);
    let new_a = (a & 0xF0) | (hl_byte >> 4);
    cpu.bus.write_byte(addr, new_hl);
    cpu.regs.a = new_a;
    cpu.regs.f = (cpu.regs.f & CF) | cpu.tables.rld_rrd(new_a);
}

/// `z` selects the family (0=LD,1=CP,2=IN,3=OUT); `y` selects
/// increment/decrement and single-shot/repeating (4/5/6/7).
fn block_op(cpu: &mut Intel8080Z80, z: u8, y: u8) -> Result<u64, StopReason> {
    let increment = y == 4 || y == 6;
    let repeat = y == 6 || y == 7;

    let cycles = match z {
        0 => block_ld(cpu, increment),
        1 => block_cp(cpu, increment),
        2 => block_in(cpu, increment),
        _ => block_out(cpu, increment),
    };

    let continuing = match z {
        0 => cpu.regs.bc() != 0,
        1 => cpu.regs.bc() != 0 && cpu.regs.f & ZF == 0,
        _ => cpu.regs.b != 0,
    };

    if repeat && continuing {
        cpu.regs.pc = cpu.regs.pc.wrapping_sub(2);
        Ok(cycles + 5)
    } else {
        Ok(cycles)
    }
}

fn block_ld(cpu: &mut Intel8080Z80, increment: bool) -> u64 {
    let hl = cpu.regs.hl();
    let de = cpu.regs.de();
    let v = cpu.bus.read_byte(hl);
    cpu.bus.write_byte(de, v);
    step_hl_de(cpu, increment);
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let n = v.wrapping_add(cpu.regs.a);
    let mut flags = cpu.regs.f & (SF | ZF | CF);
    flags |= n & 0x08;
    if n & 0x02 != 0 {
        flags |= YF;
    }
    if bc != 0 {
        flags |= PF;
    }
    cpu.regs.f = flags;
    16
}

fn block_cp(cpu: &mut Intel8080Z80, increment: bool) -> u64 {
    let hl = cpu.regs.hl();
    let v = cpu.bus.read_byte(hl);
    let r = alu::cp8(&cpu.tables, cpu.regs.a, v);
    step_hl_only(cpu, increment);
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let n = r.value.wrapping_sub(u8::from(r.flags & HF != 0));
    let mut flags = (r.flags & (SF | ZF | HF)) | NF;
    flags |= n & 0x08;
    if n & 0x02 != 0 {
        flags |= YF;
    }
    if bc != 0 {
        flags |= PF;
    }
    cpu.regs.f = flags;
    16
}

fn block_in(cpu: &mut Intel8080Z80, increment: bool) -> u64 {
    let v = cpu.bus.io_in(cpu.regs.c);
    let hl = cpu.regs.hl();
    cpu.bus.write_byte(hl, v);
    step_hl_only(cpu, increment);
    cpu.regs.b = cpu.regs.b.wrapping_sub(1);
    let mut flags = NF;
    if cpu.regs.b == 0 {
        flags |= ZF;
    }
    if cpu.regs.b & 0x80 != 0 {
        flags |= SF;
    }
    cpu.regs.f = flags | (cpu.regs.f & CF);
    16
}

fn block_out(cpu: &mut Intel8080Z80, increment: bool) -> u64 {
    let hl = cpu.regs.hl();
    let v = cpu.bus.read_byte(hl);
    cpu.bus.io_out(cpu.regs.c, v);
    step_hl_only(cpu, increment);
    cpu.regs.b = cpu.regs.b.wrapping_sub(1);
    let mut flags = NF;
    if cpu.regs.b == 0 {
        flags |= ZF;
    }
    if cpu.regs.b & 0x80 != 0 {
        flags |= SF;
    }
    cpu.regs.f = flags | (cpu.regs.f & CF);
    16
}

fn step_hl_de(cpu: &mut Intel8080Z80, increment: bool) {
    if increment {
        cpu.regs.set_hl(cpu.regs.hl().wrapping_add(1));
        cpu.regs.set_de(cpu.regs.de().wrapping_add(1));
    } else {
        cpu.regs.set_hl(cpu.regs.hl().wrapping_sub(1));
        cpu.regs.set_de(cpu.regs.de().wrapping_sub(1));
    }
}

fn step_hl_only(cpu: &mut Intel8080Z80, increment: bool) {
    if increment {
        cpu.regs.set_hl(cpu.regs.hl().wrapping_add(1));
    } else {
        cpu.regs.set_hl(cpu.regs.hl().wrapping_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use microengine_bus::{ByteBus, ByteBusConfig};

    fn make_cpu() -> Intel8080Z80 {
        Intel8080Z80::new(Config::default(), ByteBus::new(ByteBusConfig::default()))
    }

    #[test]
    fn ldir_with_bc_zero_runs_65536_iterations() {
        let mut cpu = make_cpu();
        cpu.regs.set_hl(0x1000);
        cpu.regs.set_de(0x2000);
        cpu.regs.set_bc(0); // treated as 0x10000
        cpu.bus.load(0x0000, &[0xED, 0xB0]); // LDIR
        let _ = cpu.run(10_000_000, |_, _| {});
        assert_eq!(cpu.regs.bc(), 0);
        assert_eq!(cpu.regs.pc, 0x0002);
    }
}
