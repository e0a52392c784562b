//! Synchronization primitives.
//!
//! Design principles:
//! - FIFO fairness: threads contending on one channel are served in strict
//!   arrival order, so no thread's events starve behind a busy neighbour
//! - Blocking waits: queued threads sleep on a futex instead of spinning,
//!   contention on a channel must not burn CPU
//! - Fatal on primitive failure: if the OS wait/wake itself fails, the
//!   single-owner invariant is gone and the process aborts

mod fair_lock;
mod futex;

pub use fair_lock::{FairLock, FairLockGuard};
