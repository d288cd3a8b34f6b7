//! Shared memory/IO fabric, event wheel, flag tables, and diagnostics ring
//! used by both the 8080/Z80 and P-code interpreters.
//!
//! This crate has no opinion on CPU semantics; it only models the parts
//! of the system both cores share: address decoding and banking, the
//! `IoInfo` device-registration chain, a cycle-keyed event wheel, the
//! precomputed flag/arithmetic tables, and a bounded diagnostics ring.

mod byte_bus;
mod debug;
mod error;
mod events;
mod ioinfo;
mod tables;
mod word_bus;

pub use byte_bus::{ByteBus, ByteBusConfig, Decode as ByteDecode};
pub use debug::{LogRecord, LogRing, Pcq};
pub use error::{BusError, ConfigError};
pub use events::{EventId, EventWheel};
pub use ioinfo::{IoChain, IoRegistration};
pub use tables::{FlagTables, CF, HF, NF, PF, SF, XF, YF, ZF};
pub use word_bus::{WordBus, WordBusConfig};
