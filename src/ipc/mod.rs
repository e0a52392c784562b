//! IPC layer: shared-memory slot pools and FIFO signaling links.
//!
//! Design principles:
//! - Index-based addressing: everything that crosses the process boundary
//!   is a slot index into the mmap'd pool, never a raw address
//! - Split signaling: "slot full" and "slot empty" travel on separate
//!   one-way FIFOs, so the consumer can race ahead draining while the
//!   producer side waits for any one recycled slot
//! - Single owner per slot: a slot belongs to the producer side or to the
//!   consumer side, never both; ownership changes hands only through the
//!   links

mod channel;
mod fifo;
mod pool;

pub use channel::Channel;
pub use fifo::{ensure_fifo, SHUTDOWN_SENTINEL};
pub use pool::{SlotPool, SlotView};
