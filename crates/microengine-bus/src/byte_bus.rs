//! Banked byte-addressed memory for the 8080/Z80 side.
//!
//! Mirrors the banking rules of `spec.md` §4.1: an `[address][bank]`
//! rectangle, a `common` watermark above which every bank sees bank 0, a
//! ROM window that silently discards writes, and a "does not exist" tail
//! above the configured memory size that reads as `0xFF`. IO ports are a
//! separate 256-entry space reached through [`crate::IoChain`] via
//! [`ByteBus::io_in`]/[`ByteBus::io_out`], not through this decoder — the
//! Z80 family's `IN`/`OUT` instructions never touch memory addressing.

use crate::IoChain;

/// How a 16-bit CPU address classifies under the current banking config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    /// Targets the currently selected bank (address below `common`).
    BankedRam(usize),
    /// Targets bank 0 regardless of selection (address at/above `common`).
    CommonRam,
    /// Falls in `[rom_low, rom_high]`; writes are discarded.
    Rom,
    /// Above the configured memory size.
    NonExistent,
}

#[derive(Debug, Clone)]
pub struct ByteBusConfig {
    /// Number of 64 KiB banks. Bank selection is taken modulo this.
    pub banks: usize,
    /// Addresses at or above this watermark always target bank 0.
    pub common: u16,
    /// When false, every address behaves as if `common == 0` (no banking).
    pub banked: bool,
    /// Inclusive ROM window; writes inside it are discarded.
    pub rom_range: Option<(u16, u16)>,
    /// Addresses at or above this size read as `0xFF` and discard writes.
    pub memory_size: u32,
}

impl Default for ByteBusConfig {
    fn default() -> Self {
        Self {
            banks: 1,
            common: 0xC000,
            banked: false,
            rom_range: None,
            memory_size: 0x1_0000,
        }
    }
}

/// Banked byte memory plus the 256-entry IO port table.
pub struct ByteBus {
    config: ByteBusConfig,
    banks: Vec<[u8; 0x1_0000]>,
    selected_bank: usize,
    io: IoChain,
    rom_write_warnings: u64,
}

impl ByteBus {
    #[must_use]
    pub fn new(config: ByteBusConfig) -> Self {
        let banks = (0..config.banks.max(1)).map(|_| [0u8; 0x1_0000]).collect();
        Self {
            config,
            banks,
            selected_bank: 0,
            io: IoChain::new(),
            rom_write_warnings: 0,
        }
    }

    #[must_use]
    pub const fn selected_bank(&self) -> usize {
        self.selected_bank
    }

    /// Select the active bank for the next memory access. Takes effect on
    /// the following access only — never retroactively.
    pub fn select_bank(&mut self, bank: usize) {
        self.selected_bank = bank % self.banks.len();
    }

    #[must_use]
    pub const fn rom_write_warnings(&self) -> u64 {
        self.rom_write_warnings
    }

    #[must_use]
    pub fn decode(&self, addr: u16) -> Decode {
        if u32::from(addr) >= self.config.memory_size {
            return Decode::NonExistent;
        }
        if let Some((lo, hi)) = self.config.rom_range {
            if addr >= lo && addr <= hi {
                return Decode::Rom;
            }
        }
        if self.config.banked && addr < self.config.common {
            Decode::BankedRam(self.selected_bank)
        } else {
            Decode::CommonRam
        }
    }

    #[must_use]
    pub fn read_byte(&self, addr: u16) -> u8 {
        match self.decode(addr) {
            Decode::NonExistent => 0xFF,
            Decode::Rom | Decode::CommonRam => self.banks[0][addr as usize],
            Decode::BankedRam(bank) => self.banks[bank][addr as usize],
        }
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        match self.decode(addr) {
            Decode::NonExistent => {}
            Decode::Rom => self.rom_write_warnings += 1,
            Decode::CommonRam => self.banks[0][addr as usize] = value,
            Decode::BankedRam(bank) => self.banks[bank][addr as usize] = value,
        }
    }

    #[must_use]
    pub fn read_word(&self, addr: u16) -> u16 {
        let lo = self.read_byte(addr);
        let hi = self.read_byte(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.write_byte(addr, value as u8);
        self.write_byte(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Load raw bytes into bank 0 (test/bootstrap helper).
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            let a = addr.wrapping_add(i as u16);
            self.banks[0][a as usize] = b;
        }
    }

    pub fn register_io(
        &mut self,
        base: u8,
        span: u16,
        vector: Option<u8>,
        priority: u8,
        read: impl FnMut(u32) -> u8 + Send + 'static,
        write: impl FnMut(u32, u8) + Send + 'static,
    ) -> Result<(), crate::ConfigError> {
        self.io.register(u32::from(base), u32::from(span), vector, priority, read, write)
    }

    #[must_use]
    pub fn io_in(&mut self, port: u8) -> u8 {
        self.io.read(u32::from(port)).unwrap_or(0xFF)
    }

    pub fn io_out(&mut self, port: u8, value: u8) {
        self.io.write(u32::from(port), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_carveout_matches_scenario_6() {
        let mut bus = ByteBus::new(ByteBusConfig {
            banks: 3,
            common: 0xC000,
            banked: true,
            ..Default::default()
        });
        bus.select_bank(1);
        bus.write_byte(0x8000, 0x11);
        bus.select_bank(2);
        bus.write_byte(0x8000, 0x22);
        bus.select_bank(1);
        assert_eq!(bus.read_byte(0x8000), 0x11);

        bus.write_byte(0xE000, 0x33);
        for bank in 0..3 {
            bus.select_bank(bank);
            assert_eq!(bus.read_byte(0xE000), 0x33);
        }
    }

    #[test]
    fn rom_writes_are_discarded() {
        let mut bus = ByteBus::new(ByteBusConfig {
            rom_range: Some((0xF000, 0xF7FF)),
            ..Default::default()
        });
        bus.write_byte(0xF000, 0xAA);
        assert_eq!(bus.read_byte(0xF000), 0x00);
        assert_eq!(bus.rom_write_warnings(), 1);
    }

    #[test]
    fn non_existent_reads_as_ff() {
        let bus = ByteBus::new(ByteBusConfig {
            memory_size: 0x4000,
            ..Default::default()
        });
        assert_eq!(bus.read_byte(0x8000), 0xFF);
    }
}
