//! CPU register file.
//!
//! Mirrors the flat `reg_*` globals of the original interpreter as one
//! struct: the current task pointer `ctp` and the registers restored from
//! its TIB (`sp`/`splow`/`spupr`/`mp`/`bp`/`ipc`/`segb`), the segment
//! dictionary pointer `ssv`, the request-queue head `rq`, the system
//! status register `ssr`, and the two-stage interrupt latch/pending
//! bitmasks (`spec.md` §4.5).

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    /// Instruction pointer, byte offset within the segment pointed to by
    /// `segb`.
    pub ipc: u16,
    pub sp: u16,
    pub splow: u16,
    pub spupr: u16,
    pub mp: u16,
    pub bp: u16,
    /// Base of the current code segment.
    pub segb: u16,

    /// Current task pointer (address of the running task's TIB), or
    /// [`crate::constants::NIL`] when no task is current.
    pub ctp: u16,
    /// Segment dictionary pointer.
    pub ssv: u16,
    /// Ready-queue head.
    pub rq: u16,

    /// Scratch register used by `LOD`/`LDA`/`STR`/`CPI`/`CXI`/`LSL` to hold
    /// the result of walking the static chain (`reg_lm` in the original).
    pub lm: u16,

    pub ssr: u16,
    pub ses: u16,
    pub cpu_serial: u16,

    /// Location of the HDT boot ROM pointer; nonzero selects ROM boot.
    pub fc68: u16,
    pub romsize: u16,

    /// 32-level interrupt latch and pending bitmasks.
    pub intlatch: u32,
    pub intpending: u32,

    pub halted: bool,
}

impl Registers {
    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.ssr & crate::constants::SSR_INTEN != 0
    }
}
