//! Structured diagnostics ring.
//!
//! The core emits only structured log records (`spec.md` §7); there is no
//! `log`/`tracing` dependency anywhere in this workspace, so a bounded
//! in-memory ring is the house equivalent — a host drains it the same way
//! it would drain an `Observable` query, without affecting emulation
//! state.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    RomWrite { addr: u16 },
    IllegalOpcode { pc: u16, opcode: u8 },
    DeviceFault { port: u32, reason: String },
    BreakpointHit { addr: u16 },
}

/// Bounded FIFO ring of [`LogRecord`]s. Oldest entries are dropped once
/// capacity is reached so a runaway guest can't leak memory into the log.
pub struct LogRing {
    capacity: usize,
    entries: VecDeque<LogRecord>,
}

impl LogRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    #[must_use]
    pub fn drain(&mut self) -> Vec<LogRecord> {
        self.entries.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Bounded power-of-two circular history of recent PC values.
///
/// Written on every taken transfer of control; consulted by the debugger
/// only, never by the interpreter's own control flow. Default depth is 64
/// per `spec.md` §3.
pub struct Pcq {
    mask: usize,
    buf: Vec<u32>,
    next: usize,
    filled: bool,
}

impl Pcq {
    /// `depth` is rounded up to the next power of two.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1).next_power_of_two();
        Self {
            mask: depth - 1,
            buf: vec![0; depth],
            next: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, pc: u32) {
        self.buf[self.next] = pc;
        self.next = (self.next + 1) & self.mask;
        if self.next == 0 {
            self.filled = true;
        }
    }

    /// Most-recent-first snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<u32> {
        let len = if self.filled { self.buf.len() } else { self.next };
        (0..len)
            .map(|i| self.buf[(self.next + self.buf.len() - 1 - i) & self.mask])
            .collect()
    }
}

impl Default for Pcq {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcq_reports_most_recent_first() {
        let mut pcq = Pcq::new(4);
        for pc in [1u32, 2, 3, 4, 5] {
            pcq.push(pc);
        }
        assert_eq!(pcq.history(), vec![5, 4, 3, 2]);
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut ring = LogRing::new(2);
        ring.push(LogRecord::RomWrite { addr: 1 });
        ring.push(LogRecord::RomWrite { addr: 2 });
        ring.push(LogRecord::RomWrite { addr: 3 });
        let drained = ring.drain();
        assert_eq!(
            drained,
            vec![
                LogRecord::RomWrite { addr: 2 },
                LogRecord::RomWrite { addr: 3 },
            ]
        );
    }
}
