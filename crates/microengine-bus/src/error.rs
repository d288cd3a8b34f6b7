//! Error types for the memory/IO fabric.

use std::fmt;

/// A fault raised while routing a memory or IO access.
///
/// On the Z80 side these never reach the guest; the interpreter keeps
/// running and may simply log the fault. On the P-code side an `Mmio`
/// fault is the synthetic bus-error trap described in the bus-error
/// handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// A write landed in `[rom_low, rom_high]` and was discarded.
    RomWrite(u16),
    /// An access landed above the configured memory size.
    NonExistent(u16),
    /// An MMIO handler refused the access (device-reported fault).
    Mmio(u16),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomWrite(addr) => write!(f, "write to ROM window at {addr:#06x} discarded"),
            Self::NonExistent(addr) => write!(f, "access to non-existent memory at {addr:#06x}"),
            Self::Mmio(addr) => write!(f, "MMIO fault at {addr:#06x}"),
        }
    }
}

impl std::error::Error for BusError {}

/// A configuration-time failure when wiring devices onto a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two devices tried to register overlapping port ranges.
    OverlappingRegistration {
        base: u32,
        span: u32,
        existing_base: u32,
        existing_span: u32,
    },
    /// A malformed disk image header or similarly invalid asset.
    MalformedImage(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverlappingRegistration {
                base,
                span,
                existing_base,
                existing_span,
            } => write!(
                f,
                "IO registration [{base:#x}, {:#x}) overlaps existing [{existing_base:#x}, {:#x})",
                base + span,
                existing_base + existing_span,
            ),
            Self::MalformedImage(reason) => write!(f, "malformed disk image: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
