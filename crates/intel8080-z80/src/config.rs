//! Chip mode, quirks, and run configuration.

/// Which instruction set the decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipMode {
    Intel8080,
    #[default]
    Zilog,
}

/// Behavior left unspecified (or inconsistent) by the original source,
/// pinned down here per `spec.md` §9's "pick one and stay consistent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    /// `OUT (C), 0` writes `0x00` (Z80) when true, `0xFF` (some 8080
    /// clones) when false.
    pub out_c_zero_is_literal_zero: bool,
    /// Stop with [`crate::StopReason::IllegalOpcode`] on an undefined
    /// encoding while in 8080 mode and trap-on-illegal is enabled.
    pub trap_on_illegal: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Self {
            out_c_zero_is_literal_zero: true,
            trap_on_illegal: false,
        }
    }
}

/// Construction-time configuration for [`crate::Intel8080Z80`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub mode: ChipMode,
    pub quirks: Quirks,
    /// Target kHz for the optional real-time governor. `None` runs free.
    pub governor_khz: Option<u32>,
}

/// Why [`crate::Intel8080Z80::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested cycle budget was consumed.
    BudgetExhausted,
    /// The host asked the loop to stop.
    Cancelled,
    /// `HALT` executed with no interrupt pending.
    Halt,
    /// A `PC`-type or memory-type breakpoint fired.
    Breakpoint(u16),
    /// An undefined opcode was fetched with trap-on-illegal enabled.
    IllegalOpcode(u8),
}
