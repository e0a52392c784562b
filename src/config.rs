//! Transport configuration.
//!
//! The surrounding process decides the channel count and the shared-memory
//! directory (typically from its own command line) and hands them down here.
//! Everything else has defaults sized for tracing workloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of slots in each channel's pool.
pub const DEFAULT_SLOTS_PER_CHANNEL: usize = 8;

/// Default record capacity of one slot.
pub const DEFAULT_SLOT_CAPACITY: usize = 1 << 15;

/// Default bound on waiting for the consumer to recycle a slot.
pub const DEFAULT_ROTATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for the consumer to open its side of the links.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`TraceRuntime`](crate::TraceRuntime).
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Number of shared-memory channels. Threads are routed to a channel by
    /// `thread_id % channels`, fixed for the life of the thread.
    pub channels: usize,
    /// Directory holding the pool files and signaling FIFOs.
    pub ipc_dir: PathBuf,
    /// Slots per channel pool.
    pub slots_per_channel: usize,
    /// Records per slot.
    pub slot_capacity: usize,
    /// How long a rotating thread waits for a recycled slot before the
    /// failure is treated as an unresponsive consumer.
    pub rotate_timeout: Duration,
    /// How long channel initialization waits for the consumer to appear.
    pub open_timeout: Duration,
}

impl TraceConfig {
    /// Configuration with default pool sizing and timeouts.
    pub fn new<P: AsRef<Path>>(channels: usize, ipc_dir: P) -> Self {
        Self {
            channels,
            ipc_dir: ipc_dir.as_ref().to_path_buf(),
            slots_per_channel: DEFAULT_SLOTS_PER_CHANNEL,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            rotate_timeout: DEFAULT_ROTATE_TIMEOUT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    /// Path of the shared-memory pool file for `channel`.
    pub fn shm_path(&self, channel: usize) -> PathBuf {
        self.ipc_dir.join(format!("tracelink-shm.{}", channel))
    }

    /// Path of the full-notification FIFO for `channel` (producer -> consumer).
    pub fn full_link_path(&self, channel: usize) -> PathBuf {
        self.ipc_dir.join(format!("tracelink-full.{}", channel))
    }

    /// Path of the empty-notification FIFO for `channel` (consumer -> producer).
    pub fn empty_link_path(&self, channel: usize) -> PathBuf {
        self.ipc_dir.join(format!("tracelink-empty.{}", channel))
    }
}
