//! Storage subsystem
//!
//! Primitives backing the report delivery pipeline:
//! - `record`: the encode/decode capability every persisted record provides.
//! - `ring_queue`: fixed-capacity in-memory FIFO of pending records.
//! - `durable_log`: append-only on-disk spill file with a persisted read offset.

pub mod durable_log;
pub mod record;
pub mod ring_queue;

pub use durable_log::DurableLog;
pub use record::Record;
pub use ring_queue::RingQueue;
