//! Error types and the fatal-abort policy.
//!
//! Nothing in this transport is allowed to drop a record silently. Every
//! failure either propagates as an [`IpcError`] to a caller that can still
//! refuse to start tracing, or - once records are buffered and delivery can
//! no longer be guaranteed - aborts the process with a diagnostic.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures crossing the IPC boundary.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The shared-memory pool file could not be created or mapped.
    #[error("shared memory pool {path:?}: {source}")]
    Shm {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A signaling FIFO could not be created or opened.
    #[error("signal link {path:?}: {source}")]
    SignalLink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The consumer returned no recycled slot within the configured bound.
    /// Blocking forever here would hang the traced application.
    #[error("consumer returned no recycled slot within {timeout:?}")]
    ConsumerUnresponsive { timeout: Duration },

    /// The consumer closed its end of a signaling link.
    #[error("consumer closed the signal link")]
    ConsumerGone,

    /// Every slot is held by a writing thread and nothing is outstanding
    /// at the consumer, so no recycle can ever satisfy this claim. The
    /// channel has more concurrent threads than slots.
    #[error("all {slots} slots held by writers; increase slots_per_channel or channels")]
    PoolExhausted { slots: usize },

    /// The consumer sent something that is not a valid slot index.
    #[error("signal link protocol violation: {0}")]
    Protocol(String),

    /// I/O failure on an established signaling link.
    #[error("signal link i/o: {0}")]
    Link(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Abort the process with a diagnostic.
///
/// Called on the flush path when a buffered record can no longer be
/// delivered. Continuing would either lose the record or block the traced
/// application without bound, and neither is tolerated.
pub(crate) fn fatal(context: &str, err: &IpcError) -> ! {
    tracing::error!(context, error = %err, "unrecoverable IPC failure, aborting");
    eprintln!("tracelink: fatal: {}: {}", context, err);
    std::process::abort();
}
