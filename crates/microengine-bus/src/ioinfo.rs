//! The `IoInfo` registration chain.
//!
//! Devices publish a base/span/vector/priority tuple plus typed read and
//! write closures. The chain is walked in registration order on every
//! access; overlapping ranges are rejected at registration time rather
//! than resolved by "last writer wins".

use crate::error::ConfigError;

/// One device's claim on a range of port addresses.
pub struct IoRegistration {
    pub base: u32,
    pub span: u32,
    /// Interrupt vector this device raises, if any.
    pub vector: Option<u8>,
    pub priority: u8,
    read: Box<dyn FnMut(u32) -> u8 + Send>,
    write: Box<dyn FnMut(u32, u8) + Send>,
}

impl IoRegistration {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.base + self.span
    }

    fn overlaps(&self, base: u32, span: u32) -> bool {
        base < self.base + self.span && self.base < base + span
    }
}

/// A chain of registered device handlers over a port-address space.
///
/// Mirrors `pdq3_mem.c`'s `add_ioh`/`del_ioh` linked list of `IOINFO`
/// records: registration is idempotent per device, deregistration removes
/// exactly the entries that device installed, and overlapping spans are a
/// configuration error rather than silently resolved.
#[derive(Default)]
pub struct IoChain {
    entries: Vec<IoRegistration>,
}

impl IoChain {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a device's read/write handlers over `[base, base+span)`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OverlappingRegistration`] if any existing
    /// entry already claims part of the requested range.
    pub fn register(
        &mut self,
        base: u32,
        span: u32,
        vector: Option<u8>,
        priority: u8,
        read: impl FnMut(u32) -> u8 + Send + 'static,
        write: impl FnMut(u32, u8) + Send + 'static,
    ) -> Result<(), ConfigError> {
        if let Some(existing) = self.entries.iter().find(|e| e.overlaps(base, span)) {
            return Err(ConfigError::OverlappingRegistration {
                base,
                span,
                existing_base: existing.base,
                existing_span: existing.span,
            });
        }
        self.entries.push(IoRegistration {
            base,
            span,
            vector,
            priority,
            read: Box::new(read),
            write: Box::new(write),
        });
        Ok(())
    }

    /// Remove every registration whose base falls in `[base, base+span)`.
    pub fn deregister(&mut self, base: u32, span: u32) {
        self.entries.retain(|e| !(e.base >= base && e.base < base + span));
    }

    /// Dispatch a read. Returns `None` if nothing is registered at `addr`.
    pub fn read(&mut self, addr: u32) -> Option<u8> {
        self.entries
            .iter_mut()
            .find(|e| e.contains(addr))
            .map(|e| (e.read)(addr))
    }

    /// Dispatch a write. Returns `false` if nothing is registered at `addr`.
    pub fn write(&mut self, addr: u32, value: u8) -> bool {
        if let Some(e) = self.entries.iter_mut().find(|e| e.contains(addr)) {
            (e.write)(addr, value);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn vector_for(&self, addr: u32) -> Option<u8> {
        self.entries.iter().find(|e| e.contains(addr)).and_then(|e| e.vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn dispatches_to_registered_range() {
        let seen = Rc::new(Cell::new(0u8));
        let seen_w = seen.clone();
        let mut chain = IoChain::new();
        chain
            .register(0x10, 4, None, 0, move |_| 0x42, move |_, v| seen_w.set(v))
            .unwrap();

        assert_eq!(chain.read(0x11), Some(0x42));
        assert_eq!(chain.read(0x20), None);
        assert!(chain.write(0x13, 7));
        assert_eq!(seen.get(), 7);
        assert!(!chain.write(0x20, 7));
    }

    #[test]
    fn rejects_overlapping_registration() {
        let mut chain = IoChain::new();
        chain.register(0x10, 4, None, 0, |_| 0, |_, _| {}).unwrap();
        let err = chain.register(0x12, 4, None, 0, |_| 0, |_, _| {}).unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingRegistration { .. }));
    }

    #[test]
    fn deregister_removes_only_matching_entries() {
        let mut chain = IoChain::new();
        chain.register(0x10, 4, None, 0, |_| 0, |_, _| {}).unwrap();
        chain.register(0x30, 4, None, 0, |_| 1, |_, _| {}).unwrap();
        chain.deregister(0x10, 4);
        assert_eq!(chain.read(0x11), None);
        assert_eq!(chain.read(0x31), Some(1));
    }
}
