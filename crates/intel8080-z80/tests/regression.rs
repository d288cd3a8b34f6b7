//! End-to-end regression scenarios for the 8080/Z80 interpreter.

use intel8080_z80::{Config, Intel8080Z80, StopReason};
use microengine_bus::{ByteBus, ByteBusConfig, ZF};

fn make_cpu() -> Intel8080Z80 {
    Intel8080Z80::new(Config::default(), ByteBus::new(ByteBusConfig::default()))
}

/// Reset, load `LD A,0x5A ; HALT` at 0x0000, run; expect A=0x5A, stop code
/// `Halt`, PC=0x0002 (pointing at the `HALT` opcode itself).
#[test]
fn z80_reset_ld_a_immediate_then_halt() {
    let mut cpu = make_cpu();
    cpu.bus.load(0x0000, &[0x3E, 0x5A, 0x76]);
    let reason = cpu.run(1000, |_, _| {});
    assert_eq!(cpu.regs.a, 0x5A);
    assert_eq!(reason, StopReason::Halt);
    assert_eq!(cpu.regs.pc, 0x0002);
}

/// `DD CB 02 46` at PC=0 with IX=0x1000, memory at 0x1002 = 0xAA: this is
/// `BIT 0,(IX+2)`; bit 0 of 0xAA is clear, so Z is set.
#[test]
fn bit_0_ix_plus_2_sets_zero_flag() {
    let mut cpu = make_cpu();
    cpu.regs.ix = 0x1000;
    cpu.bus.load(0x1002, &[0xAA]);
    cpu.bus.load(0x0000, &[0xDD, 0xCB, 0x02, 0x46]);
    let _ = cpu.run(100, |_, _| {});
    assert_ne!(cpu.regs.f & ZF, 0);
}
