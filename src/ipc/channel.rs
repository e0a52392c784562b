//! One shared-memory conduit to the consumer.
//!
//! A channel owns a slot pool, the two signaling links, and the fair lock
//! that serializes every producer-side slot exchange. Threads whose id
//! routes here share the channel; each one fills its own slot and crosses
//! the lock only to swap a full slot for a recycled one.
//!
//! Slots are claimed by scanning the ring from the last claim (`cur_slot`
//! advances modulo the pool size, only under the lock), and a claimed slot
//! stays unavailable until the consumer returns its index on the empty
//! link. The lock gives the consumer a single total order of slot-full
//! events per channel, and the availability flags make a double publish of
//! an unrecycled slot impossible.
//!
//! Liveness: a claim waits on the empty link only while at least one
//! published slot is outstanding at the consumer. Rotation publishes
//! before it claims, so a rotating thread can always be satisfied by its
//! own slot coming back. Only first-use binding can find every slot held
//! by some writer with nothing outstanding; that is a provisioning error
//! (more concurrent threads per channel than slots) and is reported as
//! such instead of deadlocking the lock queue.

use std::cell::UnsafeCell;
use std::io;
use std::time::{Duration, Instant};

use crate::config::TraceConfig;
use crate::error::{IpcError, Result};
use crate::sync::{FairLock, FairLockGuard};

use super::fifo::{EmptyLink, FullLink, SHUTDOWN_SENTINEL};
use super::pool::{SlotPool, SlotView};

/// Producer-side state of one channel. All of it is touched only while the
/// channel's [`FairLock`] is held.
struct ChannelState {
    full_link: FullLink,
    empty_link: EmptyLink,
    /// Index of the slot most recently claimed for filling.
    cur_slot: usize,
    /// Availability per slot: true while the producer may claim it.
    slot_free: Vec<bool>,
    /// Per slot: published on the full link and not yet recycled.
    slot_published: Vec<bool>,
    /// How many slots are currently at the consumer.
    outstanding: usize,
    /// Id of the thread that last published through this channel.
    last_writer_tid: u32,
    terminated: bool,
}

/// A shared-memory channel serving the threads that hash to it.
#[derive(Debug)]
pub struct Channel {
    index: usize,
    lock: FairLock,
    pool: SlotPool,
    rotate_timeout: Duration,
    state: UnsafeCell<ChannelState>,
}

// SAFETY: ChannelState is only reached through `state()`, which demands a
// guard of `self.lock`; the pool enforces its own single-writer discipline.
unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}

impl Channel {
    /// Map the pool and open both signaling links for channel `index`.
    ///
    /// Any failure leaves nothing usable behind; a half-initialized
    /// channel must not serve threads, so the caller treats an error here
    /// as fatal and never starts tracing.
    pub fn initialize(index: usize, config: &TraceConfig) -> Result<Self> {
        let shm_path = config.shm_path(index);
        let pool = SlotPool::create(&shm_path, config.slots_per_channel, config.slot_capacity)
            .map_err(|source| IpcError::Shm {
                path: shm_path,
                source,
            })?;

        let full_path = config.full_link_path(index);
        let full_link =
            FullLink::open(&full_path, config.open_timeout).map_err(|source| {
                IpcError::SignalLink {
                    path: full_path,
                    source,
                }
            })?;

        let empty_path = config.empty_link_path(index);
        let empty_link = EmptyLink::open(&empty_path).map_err(|source| IpcError::SignalLink {
            path: empty_path,
            source,
        })?;

        let slot_count = pool.slot_count();
        tracing::debug!(channel = index, slots = slot_count, "channel initialized");

        Ok(Self {
            index,
            lock: FairLock::new(),
            pool,
            rotate_timeout: config.rotate_timeout,
            state: UnsafeCell::new(ChannelState {
                full_link,
                empty_link,
                // First claim advances to slot 0.
                cur_slot: slot_count - 1,
                slot_free: vec![true; slot_count],
                slot_published: vec![false; slot_count],
                outstanding: 0,
                last_writer_tid: 0,
                terminated: false,
            }),
        })
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn slot_capacity(&self) -> usize {
        self.pool.slot_capacity()
    }

    /// Id of the thread that last published a slot here.
    pub fn last_writer_tid(&self) -> u32 {
        let guard = self.lock.acquire();
        self.state(&guard).last_writer_tid
    }

    /// The guard is the proof of exclusive access.
    #[allow(clippy::mut_from_ref)]
    fn state<'a>(&'a self, _guard: &'a FairLockGuard<'a>) -> &'a mut ChannelState {
        // SAFETY: every caller holds this channel's FairLock, which admits
        // one thread at a time.
        unsafe { &mut *self.state.get() }
    }

    /// First-use binding: claim a slot for a thread's initial view.
    pub fn bind(&self, tid: u32) -> Result<(usize, SlotView)> {
        let guard = self.lock.acquire();
        let idx = self.claim_slot(&guard)?;
        self.state(&guard).last_writer_tid = tid;
        Ok((idx, self.pool.view(idx)))
    }

    /// Swap a full slot for a recycled one.
    ///
    /// Under the lock: publish `full_idx` on the full link, then block on
    /// the empty link until the consumer has recycled the next ring slot.
    /// This is the only place producer and consumer synchronize.
    pub fn rotate(&self, full_idx: usize, used: u64, tid: u32) -> Result<(usize, SlotView)> {
        let guard = self.lock.acquire();
        self.publish_slot(&guard, full_idx, used, tid)?;
        let idx = self.claim_slot(&guard)?;
        Ok((idx, self.pool.view(idx)))
    }

    /// Publish a thread's last slot without claiming a replacement.
    /// The slot may be partial or even empty; the count field says so.
    pub fn publish_final(&self, full_idx: usize, used: u64, tid: u32) -> Result<()> {
        let guard = self.lock.acquire();
        self.publish_slot(&guard, full_idx, used, tid)
    }

    /// Tear the channel down: tell the consumer no more slots will come.
    ///
    /// Partially filled slots have already been flushed by each thread's
    /// finalize; by the time this runs the channel owes the consumer only
    /// the shutdown notice. Idempotent.
    pub fn terminate(&self) -> Result<()> {
        let guard = self.lock.acquire();
        let state = self.state(&guard);
        if state.terminated {
            return Ok(());
        }
        state.terminated = true;
        state
            .full_link
            .send(SHUTDOWN_SENTINEL)
            .map_err(map_link_err)?;
        tracing::debug!(channel = self.index, "channel terminated");
        Ok(())
    }

    fn publish_slot(
        &self,
        guard: &FairLockGuard<'_>,
        idx: usize,
        used: u64,
        tid: u32,
    ) -> Result<()> {
        let state = self.state(guard);
        debug_assert!(!state.slot_free[idx], "publishing a slot nobody claimed");
        debug_assert!(!state.slot_published[idx], "double publish of slot {}", idx);
        // Count first (release), then the index: by the time the consumer
        // reads the index off the link, the slot contents are visible.
        self.pool.commit_used(idx, used);
        state.last_writer_tid = tid;
        state.full_link.send(idx as u32).map_err(map_link_err)?;
        state.slot_published[idx] = true;
        state.outstanding += 1;
        tracing::trace!(channel = self.index, slot = idx, used, tid, "slot published");
        Ok(())
    }

    /// Claim the next free slot, scanning the ring from the last claim.
    ///
    /// When no slot is free the empty link is drained until one comes
    /// back, bounded by `rotate_timeout`: an unresponsive consumer must
    /// not hang the traced application, so the wait fails instead of
    /// blocking forever. Waiting is only legal while something is
    /// outstanding at the consumer; with every slot held by a writer and
    /// nothing published, no recycle can ever arrive (publishing needs the
    /// lock this thread holds) and the pool is simply too small for the
    /// thread count.
    fn claim_slot(&self, guard: &FairLockGuard<'_>) -> Result<usize> {
        let state = self.state(guard);
        let slot_count = self.pool.slot_count();
        let deadline = Instant::now() + self.rotate_timeout;

        loop {
            for step in 1..=slot_count {
                let idx = (state.cur_slot + step) % slot_count;
                if state.slot_free[idx] {
                    state.slot_free[idx] = false;
                    state.cur_slot = idx;
                    return Ok(idx);
                }
            }

            if state.outstanding == 0 {
                return Err(IpcError::PoolExhausted {
                    slots: slot_count,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(IpcError::ConsumerUnresponsive {
                    timeout: self.rotate_timeout,
                });
            }
            match state.empty_link.recv(remaining) {
                Ok(Some(idx)) => {
                    let idx = idx as usize;
                    if idx >= slot_count {
                        return Err(IpcError::Protocol(format!(
                            "recycled slot index {} out of range",
                            idx
                        )));
                    }
                    if !state.slot_published[idx] {
                        return Err(IpcError::Protocol(format!(
                            "slot {} recycled but never published",
                            idx
                        )));
                    }
                    state.slot_published[idx] = false;
                    state.slot_free[idx] = true;
                    state.outstanding -= 1;
                }
                Ok(None) => {
                    return Err(IpcError::ConsumerUnresponsive {
                        timeout: self.rotate_timeout,
                    })
                }
                Err(err) => return Err(map_link_err(err)),
            }
        }
    }
}

fn map_link_err(err: io::Error) -> IpcError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => IpcError::ConsumerGone,
        _ => IpcError::Link(err),
    }
}
