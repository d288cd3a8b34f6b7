//! Flat word-addressed memory for the P-code side, with a memory-mapped
//! IO page at the top of the address space.
//!
//! `spec.md` §6 places every P-code IO device in a 4 KiB page at the top
//! of the 16-bit address space (`0xFC00`-`0xFFFF` by default). Unlike the
//! Z80 side's separate port space, accesses to that page are dispatched
//! through [`IoChain`] instead of touching the backing cell array; a
//! device-reported fault there is the synthetic bus-error trap described
//! in the bus-error design (propagated to the CPU as [`BusError::Mmio`]).

use crate::{BusError, IoChain};

#[derive(Debug, Clone)]
pub struct WordBusConfig {
    /// Number of 16-bit cells.
    pub size: usize,
    /// First cell address routed to the IO chain instead of memory.
    pub io_page_base: u16,
}

impl Default for WordBusConfig {
    fn default() -> Self {
        Self {
            size: 0x1_0000,
            io_page_base: 0xFC00,
        }
    }
}

pub struct WordBus {
    config: WordBusConfig,
    cells: Vec<u16>,
    io: IoChain,
}

impl WordBus {
    #[must_use]
    pub fn new(config: WordBusConfig) -> Self {
        let size = config.size;
        Self {
            config,
            cells: vec![0; size],
            io: IoChain::new(),
        }
    }

    const fn is_mmio(&self, addr: u16) -> bool {
        addr >= self.config.io_page_base
    }

    /// Read a 16-bit cell. Non-existent addresses read as `0x0000`
    /// (the P-code bus convention, distinct from the Z80 bus's `0xFF`).
    #[must_use]
    pub fn get(&mut self, addr: u16) -> u16 {
        if self.is_mmio(addr) {
            u16::from(self.io.read(u32::from(addr)).unwrap_or(0))
        } else {
            self.cells.get(addr as usize).copied().unwrap_or(0)
        }
    }

    /// Write a 16-bit cell. Returns `Err(BusError::Mmio)` if the address
    /// is in the IO page but no device claims it.
    pub fn put(&mut self, addr: u16, value: u16) -> Result<(), BusError> {
        if self.is_mmio(addr) {
            if self.io.write(u32::from(addr), value as u8) {
                Ok(())
            } else {
                Err(BusError::Mmio(addr))
            }
        } else if (addr as usize) < self.cells.len() {
            self.cells[addr as usize] = value;
            Ok(())
        } else {
            Err(BusError::NonExistent(addr))
        }
    }

    /// Read one byte of a cell (`hi = true` selects the high byte).
    #[must_use]
    pub fn get_byte(&mut self, addr: u16, hi: bool) -> u8 {
        let w = self.get(addr);
        if hi {
            (w >> 8) as u8
        } else {
            w as u8
        }
    }

    /// Write one byte of a cell, leaving the other byte untouched.
    pub fn put_byte(&mut self, addr: u16, hi: bool, value: u8) -> Result<(), BusError> {
        let existing = self.get(addr);
        let merged = if hi {
            (existing & 0x00FF) | (u16::from(value) << 8)
        } else {
            (existing & 0xFF00) | u16::from(value)
        };
        self.put(addr, merged)
    }

    /// Load raw words into the cell array (test/bootstrap helper).
    pub fn load(&mut self, addr: u16, words: &[u16]) {
        for (i, &w) in words.iter().enumerate() {
            let a = addr as usize + i;
            if a < self.cells.len() {
                self.cells[a] = w;
            }
        }
    }

    pub fn register_io(
        &mut self,
        base: u16,
        span: u16,
        vector: Option<u8>,
        priority: u8,
        read: impl FnMut(u32) -> u8 + Send + 'static,
        write: impl FnMut(u32, u8) + Send + 'static,
    ) -> Result<(), crate::ConfigError> {
        self.io.register(u32::from(base), u32::from(span), vector, priority, read, write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmio_write_without_device_is_bus_error() {
        let mut bus = WordBus::new(WordBusConfig::default());
        let err = bus.put(0xFC30, 1).unwrap_err();
        assert_eq!(err, BusError::Mmio(0xFC30));
    }

    #[test]
    fn plain_memory_round_trips() {
        let mut bus = WordBus::new(WordBusConfig::default());
        bus.put(0x2000, 0xBEEF).unwrap();
        assert_eq!(bus.get(0x2000), 0xBEEF);
        assert_eq!(bus.get_byte(0x2000, true), 0xBE);
        assert_eq!(bus.get_byte(0x2000, false), 0xEF);
    }
}
