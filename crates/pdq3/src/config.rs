//! Run configuration and stop reasons.

/// Construction-time configuration for [`crate::Pdq3`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Stop the run loop on any raised Pascal exception instead of
    /// dispatching to the OS trap handler, mirroring the original's
    /// `UNIT_PASEXC` ("halt on EXC") unit flag — useful for host-side
    /// debugging of a segment that has no trap handler linked yet.
    pub halt_on_exception: bool,
}

/// Why [`crate::Pdq3::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested cycle budget was consumed.
    BudgetExhausted,
    /// The host asked the loop to stop.
    Cancelled,
    /// A `Pc`-type breakpoint fired (`spec.md` §4.3/§8 debug semantics).
    Breakpoint(u16),
    /// `BPT` executed.
    SoftwareBreak,
    /// An opcode with no defined semantics was fetched.
    IllegalOpcode(u8),
    /// A Pascal exception was raised with `Config::halt_on_exception` set.
    GuestException(u16),
    /// A bus access referenced an address with no backing device.
    BusError(u16),
}
