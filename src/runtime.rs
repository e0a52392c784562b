//! Process-wide transport lifecycle.
//!
//! The surrounding process creates one [`TraceRuntime`] at startup (before
//! any thread traces), hands a [`ThreadContext`] to each tracked thread on
//! first use, and terminates the runtime at shutdown after every thread has
//! finalized.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::TraceConfig;
use crate::error::{IpcError, Result};
use crate::ipc::Channel;
use crate::trace::ThreadContext;

/// All channels of one traced process.
#[derive(Debug)]
pub struct TraceRuntime {
    channels: Vec<Arc<Channel>>,
    /// Next consumer-visible thread id; ids start at 1.
    next_tid: AtomicU32,
}

impl TraceRuntime {
    /// Initialize every channel: map the pools, open the links, wait for
    /// the consumer. On any error nothing traces; the host is expected to
    /// abort startup rather than run untraced.
    pub fn initialize(config: TraceConfig) -> Result<Self> {
        assert!(config.channels >= 1, "at least one channel is required");

        std::fs::create_dir_all(&config.ipc_dir).map_err(|source| IpcError::Shm {
            path: config.ipc_dir.clone(),
            source,
        })?;

        let channels = (0..config.channels)
            .map(|idx| Channel::initialize(idx, &config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            channels = channels.len(),
            dir = %config.ipc_dir.display(),
            "trace transport initialized"
        );

        Ok(Self {
            channels,
            next_tid: AtomicU32::new(1),
        })
    }

    #[inline(always)]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deterministic thread-to-channel routing: `tid mod channel_count`.
    /// Pure, stateless, fixed at thread start, never rebalanced.
    #[inline(always)]
    pub fn route(tid: u32, channels: usize) -> usize {
        tid as usize % channels
    }

    /// The channel serving thread `tid`.
    pub fn channel_for(&self, tid: u32) -> &Arc<Channel> {
        &self.channels[Self::route(tid, self.channels.len())]
    }

    /// Create the context for a newly started thread, with the next
    /// consumer-visible id.
    pub fn bind_thread(&self) -> ThreadContext {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        self.bind_thread_with_id(tid)
    }

    /// Create a context with an explicit id (the host instrumentation
    /// engine may number threads itself).
    pub fn bind_thread_with_id(&self, tid: u32) -> ThreadContext {
        ThreadContext::new(tid, Arc::clone(self.channel_for(tid)))
    }

    /// Tear down every channel, signaling completion to the consumer.
    ///
    /// All thread contexts must be finalized first; their partial slots
    /// are flushed by `finalize`, not here.
    pub fn terminate(&self) -> Result<()> {
        for channel in &self.channels {
            channel.terminate()?;
        }
        tracing::info!("trace transport terminated");
        Ok(())
    }
}
