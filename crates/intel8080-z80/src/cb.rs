//! `CB`-prefixed bit/rotate/shift opcodes, including the `DD CB dd op` /
//! `FD CB dd op` "displacement before opcode" forms.
//!
//! `spec.md` §4.3 calls out the peculiar byte ordering of the indexed CB
//! forms explicitly: the displacement is fetched before the final
//! operation byte (already done by the caller in `cpu.rs::run_indexed`
//! before calling [`execute`] here). When indexed, every rotate/shift/
//! RES/SET additionally copies its result into the plain `r[z]` register
//! (undocumented, but load-bearing for software that relies on it) unless
//! `z == 6`; `BIT` never writes back and takes its undocumented Y/X bits
//! from the high byte of the effective address rather than from the
//! tested value.

use microengine_bus::CF;

use crate::alu;
use crate::cpu::{Intel8080Z80, IndexMode};
use crate::decode::{decompose, R_HL_IND};

pub fn execute(cpu: &mut Intel8080Z80, mode: IndexMode, disp: i8, op: u8) -> u64 {
    let f = decompose(op);
    let indexed = !matches!(mode, IndexMode::Hl);

    let (value, addr) = if indexed {
        let addr = cpu.index_addr(mode, disp);
        (cpu.bus.read_byte(addr), Some(addr))
    } else {
        (cpu.read_r(f.z, IndexMode::Hl, 0), None)
    };

    match f.x {
        0 => {
            let r = match f.y {
                0 => alu::rlc(value),
                1 => alu::rrc(value),
                2 => alu::rl(value, cpu.regs.f & CF != 0),
                3 => alu::rr(value, cpu.regs.f & CF != 0),
                4 => alu::sla(value),
                5 => alu::sra(value),
                6 => alu::sll(value),
                _ => alu::srl(value),
            };
            cpu.regs.f = r.flags;
            commit(cpu, mode, f.z, addr, r.value);
            cost(indexed, false)
        }
        1 => {
            let undoc_source = if indexed {
                (addr.unwrap() >> 8) as u8
            } else {
                value
            };
            cpu.regs.f = alu::bit_test(value, f.y, undoc_source, cpu.regs.f & CF);
            cost(indexed, true)
        }
        2 => {
            let result = value & !(1 << f.y);
            commit(cpu, mode, f.z, addr, result);
            cost(indexed, false)
        }
        _ => {
            let result = value | (1 << f.y);
            commit(cpu, mode, f.z, addr, result);
            cost(indexed, false)
        }
    }
}

fn commit(cpu: &mut Intel8080Z80, mode: IndexMode, z: u8, addr: Option<u16>, value: u8) {
    if let Some(addr) = addr {
        cpu.bus.write_byte(addr, value);
        if z != R_HL_IND {
            cpu.write_r(z, IndexMode::Hl, 0, value);
        }
        let _ = mode;
    } else {
        cpu.write_r(z, IndexMode::Hl, 0, value);
    }
}

const fn cost(indexed: bool, is_bit: bool) -> u64 {
    match (indexed, is_bit) {
        (true, true) => 20,
        (true, false) => 23,
        (false, _) => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use microengine_bus::{ByteBus, ByteBusConfig, ZF};

    fn make_cpu() -> Intel8080Z80 {
        Intel8080Z80::new(Config::default(), ByteBus::new(ByteBusConfig::default()))
    }

    #[test]
    fn scenario_2_bit_0_ix_plus_2() {
        let mut cpu = make_cpu();
        cpu.regs.ix = 0x1000;
        cpu.bus.load(0x1002, &[0xAA]);
        cpu.bus.load(0x0000, &[0xDD, 0xCB, 0x02, 0x46]); // BIT 0,(IX+2)
        let _ = cpu.run(100, |_, _| {});
        assert_ne!(cpu.regs.f & ZF, 0, "bit 0 of 0xAA is clear, Z should be set");
    }

    #[test]
    fn plain_bit_op_costs_8_cycles_for_register() {
        assert_eq!(cost(false, false), 8);
    }
}
