//! Per-thread tracing state and the flush protocol.
//!
//! Design principles:
//! - Thread-private fast path: appending a record is a cursor write, no
//!   atomics, no locks, no channel involvement
//! - Flush-before-write: a slot rotates before the record that would
//!   overflow it, so no record ever straddles a slot boundary
//! - Drain on exit: a thread's buffered records always reach the consumer
//!   before its context goes away

mod event;
mod flush;
pub mod roi;
mod thread_context;

pub use event::{EventRecord, EVENT_RECORD_BYTES};
pub use flush::FlushState;
pub use thread_context::ThreadContext;
