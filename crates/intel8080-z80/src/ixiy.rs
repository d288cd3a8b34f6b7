//! `DD`/`FD`-prefixed opcodes.
//!
//! Almost every indexed opcode is just its plain counterpart with `HL`/
//! `(HL)` substituted for `IX`/`IY`/`(IX+d)`/`(IY+d)` — `cpu.rs`'s
//! `execute_main` already parameterizes every register-pair and `(HL)`
//! access on [`IndexMode`], so this module is a thin re-entry point
//! rather than a parallel opcode table. The few genuinely index-specific
//! forms (`DD CB`/`FD CB`) are handled directly in `cpu.rs::run_indexed`
//! before reaching here, since they need the displacement byte fetched
//! ahead of the final opcode byte.

use crate::config::StopReason;
use crate::cpu::{IndexMode, Intel8080Z80};

pub fn execute(cpu: &mut Intel8080Z80, mode: IndexMode, op: u8) -> Result<u64, StopReason> {
    cpu.execute_main(op, mode)
}
