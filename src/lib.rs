//! Tracelink - Low-Overhead Trace Event Transport over Shared Memory
//!
//! Ships fixed-size execution-event records (memory accesses, instructions,
//! computation-cost entries) from the threads of a traced application to an
//! out-of-process consumer.
//!
//! Architecture:
//! - Shared-memory slot pools: one mmap'd pool per channel, records are
//!   written in place, the consumer drains whole slots
//! - Ticket-ordered locking: threads contending on a channel are served
//!   strictly first-come-first-served
//! - FIFO signaling: two unidirectional named pipes per channel carry slot
//!   indices between producer and consumer
//! - Lock-free hot path: appending a record touches only thread-private
//!   state; a lock is taken only when a slot fills up
//!
//! The event payload is opaque to this crate. Deciding *what* to trace and
//! how to encode it belongs to the instrumentation layer on top.

pub mod config;
pub mod error;
pub mod ipc;
pub mod runtime;
pub mod sync;
pub mod trace;

pub use config::TraceConfig;
pub use error::IpcError;
pub use runtime::TraceRuntime;
pub use trace::{EventRecord, ThreadContext};
