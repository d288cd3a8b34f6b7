//! Central memory access, addressed the way the interpreter's own opcodes
//! address it: a word-space `base + woffset`, or a byte-space
//! `base + boffset/2` with `boffset & 1` selecting the half.
//!
//! Built on [`microengine_bus::WordBus`], which already dispatches a
//! single unified IO page (`0xFC00`-`0xFFFF` by default) for both word and
//! byte accesses. The original source checks `ea < 0xf000` for word reads
//! but `ea < 0xfc00` for byte writes — two different thresholds for the
//! same page. `WordBus` does not carry that asymmetry, and there is no
//! reason to reintroduce it: both access widths here go through the same
//! `io_page_base` boundary.

use microengine_bus::{BusError, WordBus};

/// Word- and byte-addressed view of the machine's flat memory space.
pub struct Memory {
    bus: WordBus,
}

impl Memory {
    #[must_use]
    pub fn new(bus: WordBus) -> Self {
        Self { bus }
    }

    #[must_use]
    pub fn bus(&mut self) -> &mut WordBus {
        &mut self.bus
    }

    /// `Get(addr)`: word read at a word-space address.
    #[must_use]
    pub fn get(&mut self, addr: u16) -> u16 {
        self.bus.get(addr)
    }

    /// `Put(addr, val)`: word write at a word-space address.
    pub fn put(&mut self, addr: u16, value: u16) -> Result<(), BusError> {
        self.bus.put(addr, value)
    }

    /// `Read(base, woffset)`.
    #[must_use]
    pub fn read(&mut self, base: u16, woffset: u16) -> u16 {
        self.get(base.wrapping_add(woffset))
    }

    /// `Write(base, woffset, data)`.
    pub fn write(&mut self, base: u16, woffset: u16, data: u16) -> Result<(), BusError> {
        self.put(base.wrapping_add(woffset), data)
    }

    /// `Getb(base, boffset)` / `ReadB(base, boffset, ...)`: byte read,
    /// `boffset` counted in bytes from `base`.
    #[must_use]
    pub fn read_byte(&mut self, base: u16, boffset: u16) -> u8 {
        let cell = base.wrapping_add(boffset >> 1);
        let hi = boffset & 1 != 0;
        self.bus.get_byte(cell, hi)
    }

    /// `Putb(base, boffset, val)` / `WriteB(base, boffset, val, ...)`.
    pub fn write_byte(&mut self, base: u16, boffset: u16, value: u8) -> Result<(), BusError> {
        let cell = base.wrapping_add(boffset >> 1);
        let hi = boffset & 1 != 0;
        self.bus.put_byte(cell, hi, value)
    }

    /// `GetBit(base, bitno)`: test bit `bitno` of the word at
    /// `base + bitno/WORD_SZ`.
    #[must_use]
    pub fn get_bit(&mut self, base: u16, bitno: u16) -> bool {
        let wnum = bitno / crate::constants::WORD_SZ;
        let bnum = bitno % crate::constants::WORD_SZ;
        self.read(base, wnum) & (1 << bnum) != 0
    }
}
