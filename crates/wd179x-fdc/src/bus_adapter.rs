//! [`DmaTarget`] impls for both of the workspace's memory fabrics, so the
//! DMA engine stays bus-agnostic while still plugging directly into
//! `microengine-bus` for the P-code side (the floppy's native home per
//! `spec.md` §6) and the Z80 side (for a host that wires the controller
//! onto the simpler port-based binding named there).

use crate::dma::DmaTarget;
use microengine_bus::{ByteBus, WordBus};

/// `WordBus` is word-celled; DMA addresses are byte addresses, so the
/// cell is `addr >> 1` and the low bit selects which half of the cell.
impl DmaTarget for WordBus {
    fn dma_read(&mut self, addr: u32) -> u8 {
        let cell = (addr >> 1) as u16;
        self.get_byte(cell, addr & 1 != 0)
    }

    fn dma_write(&mut self, addr: u32, value: u8) -> bool {
        let cell = (addr >> 1) as u16;
        self.put_byte(cell, addr & 1 != 0, value).is_ok()
    }
}

/// `ByteBus` writes never fault (ROM writes are silently discarded and
/// counted, not refused), so DMA transfers onto it never abort with TOI.
impl DmaTarget for ByteBus {
    fn dma_read(&mut self, addr: u32) -> u8 {
        self.read_byte(addr as u16)
    }

    fn dma_write(&mut self, addr: u32, value: u8) -> bool {
        self.write_byte(addr as u16, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microengine_bus::{ByteBusConfig, WordBusConfig};

    #[test]
    fn word_bus_byte_addressing_round_trips() {
        let mut bus = WordBus::new(WordBusConfig::default());
        assert!(DmaTarget::dma_write(&mut bus, 0x4000, 0xAB));
        assert!(DmaTarget::dma_write(&mut bus, 0x4001, 0xCD));
        assert_eq!(bus.get(0x2000), 0xCDAB);
        assert_eq!(DmaTarget::dma_read(&mut bus, 0x4000), 0xAB);
        assert_eq!(DmaTarget::dma_read(&mut bus, 0x4001), 0xCD);
    }

    #[test]
    fn byte_bus_writes_never_fault() {
        let mut bus = ByteBus::new(ByteBusConfig::default());
        assert!(DmaTarget::dma_write(&mut bus, 0x1000, 0x42));
        assert_eq!(DmaTarget::dma_read(&mut bus, 0x1000), 0x42);
    }
}
