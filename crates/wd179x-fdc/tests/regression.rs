//! End-to-end regression scenario for the autoload bootstrap sequence.

use format_imd::ImdImage;
use wd179x_fdc::{DmaTarget, FdcEvent, Wd179xFdc, DELAY_NEXT_SECTOR, DELAY_SECTOR};

struct FlatMem {
    cells: Vec<u8>,
}

impl FlatMem {
    fn new(size: usize) -> Self {
        Self { cells: vec![0; size] }
    }
}

impl DmaTarget for FlatMem {
    fn dma_read(&mut self, addr: u32) -> u8 {
        self.cells.get(addr as usize).copied().unwrap_or(0)
    }
    fn dma_write(&mut self, addr: u32, value: u8) -> bool {
        if let Some(slot) = self.cells.get_mut(addr as usize) {
            *slot = value;
            true
        } else {
            false
        }
    }
}

/// Floppy autoload on a freshly-attached 77-track IMD image: after issuing
/// `READ_SEC_MULTI` to drive 0 with DMA programmed at a byte base, the
/// first 26 x 128-byte track 0 sectors land in guest memory and the
/// controller reports the handoff to the CPU instead of a plain interrupt.
#[test]
fn autoload_streams_track_zero_and_hands_off() {
    let mut fdc = Wd179xFdc::new();
    fdc.drive_mut(0).mount(ImdImage::format_pdq3_blank("IMD test\n"), false);

    let mut mem = FlatMem::new(0x10000);
    let load_base = 0x2000u16;
    fdc.autoload(load_base);

    let mut events = Vec::new();
    for _ in 0..26 {
        events.extend(fdc.advance(DELAY_SECTOR.max(DELAY_NEXT_SECTOR), &mut mem));
    }

    assert_eq!(events, vec![FdcEvent::AutoloadFinished { dma_base: load_base }]);
}
