//! Status register bit layout.
//!
//! The WD179x reuses one status byte across command types with different
//! bit meanings; `pdq3_fdc.c` keeps that conflation and so do we — callers
//! read the bits appropriate to whichever command most recently ran.

pub const BUSY: u8 = 0x01;
pub const INDEX_OR_DRQ: u8 = 0x02;
pub const TRACK0_OR_LOST_DATA: u8 = 0x04;
pub const CRC_ERROR: u8 = 0x08;
pub const SEEK_ERROR_OR_RECORD_NOT_FOUND: u8 = 0x10;
pub const HEAD_LOADED_OR_RECORD_TYPE: u8 = 0x20;
pub const WRITE_PROTECT: u8 = 0x40;
pub const NOT_READY: u8 = 0x80;

/// Not a real WD179x bit; this engine's open-question decision to mark
/// `WRITE_TRACK` as accepted-but-inert rather than silently pretending to
/// write, recorded in the workspace's `DESIGN.md`. Reuses the unused
/// combination `CRC_ERROR | SEEK_ERROR_OR_RECORD_NOT_FOUND` together so it
/// is visibly distinct from either error alone.
pub const NOT_IMPLEMENTED: u8 = CRC_ERROR | SEEK_ERROR_OR_RECORD_NOT_FOUND;

pub mod dma {
    //! DMA control/status bits, per `spec.md` §4.6's DMA paragraph.

    pub const CTRL_AECE: u8 = 0x01;
    pub const CTRL_HBUS: u8 = 0x02;
    pub const CTRL_IOM: u8 = 0x04;
    pub const CTRL_TCIE: u8 = 0x08;
    pub const CTRL_TOIE: u8 = 0x10;
    pub const CTRL_DIE: u8 = 0x20;
    pub const CTRL_RUN: u8 = 0x80;

    /// Terminal-count-zero interrupt: the byte count wrapped to zero.
    pub const STATUS_TCZI: u8 = 0x01;
    /// Time-out interrupt: a host-memory write fault aborted the transfer.
    pub const STATUS_TOI: u8 = 0x02;
    /// Device (floppy) interrupt latched through from the FDC.
    pub const STATUS_DINT: u8 = 0x04;
    /// Byte-output-waiting: a transfer is in flight.
    pub const STATUS_BOW: u8 = 0x08;
}
