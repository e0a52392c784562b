//! In-process consumer harness for the integration tests.
//!
//! Plays the consumer role over the real IPC surface (named FIFOs plus a
//! second mapping of the pool file) so the tests exercise the exact
//! handshake a separate consumer process would.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use tracelink::config::TraceConfig;
use tracelink::ipc::{ensure_fifo, SlotPool, SHUTDOWN_SENTINEL};
use tracelink::trace::EVENT_RECORD_BYTES;
use tracelink::EventRecord;

/// Fresh IPC directory per test so parallel tests never collide.
pub fn unique_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "tracelink-test-{}-{}-{}",
        tag,
        std::process::id(),
        nanos
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Tag a record with its producing thread and per-thread sequence number.
pub fn make_record(tid: u32, seq: u64) -> EventRecord {
    let mut bytes = [0u8; EVENT_RECORD_BYTES];
    bytes[0..4].copy_from_slice(&tid.to_le_bytes());
    bytes[4..12].copy_from_slice(&seq.to_le_bytes());
    EventRecord::from_bytes(bytes)
}

pub fn decode_record(rec: &EventRecord) -> (u32, u64) {
    let tid = u32::from_le_bytes(rec.bytes[0..4].try_into().unwrap());
    let seq = u64::from_le_bytes(rec.bytes[4..12].try_into().unwrap());
    (tid, seq)
}

/// Everything one consumer observed on one channel, in publish order.
pub struct ChannelDrain {
    /// (slot index, drained records) per published slot.
    pub slots: Vec<(u32, Vec<EventRecord>)>,
}

impl ChannelDrain {
    pub fn total_records(&self) -> usize {
        self.slots.iter().map(|(_, recs)| recs.len()).sum()
    }

    /// All records in publish order.
    pub fn flattened(&self) -> Vec<EventRecord> {
        self.slots
            .iter()
            .flat_map(|(_, recs)| recs.iter().copied())
            .collect()
    }

    /// Per-thread sequence numbers in the order the consumer saw them.
    pub fn sequences_for(&self, tid: u32) -> Vec<u64> {
        self.flattened()
            .iter()
            .map(decode_record)
            .filter(|(t, _)| *t == tid)
            .map(|(_, seq)| seq)
            .collect()
    }
}

/// How many drained slots the consumer keeps unrecycled. A slot index
/// republished before its recycle arrives while its first publish is
/// still held back, where the distinctness assert catches it.
const RECYCLE_LAG: usize = 2;

/// Wait until `fd` has data, or `timeout_ms` passes.
fn readable(fd: RawFd, timeout_ms: i32) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            panic!("poll on full link failed: {}", err);
        }
        return rc > 0;
    }
}

/// Drain one channel until its shutdown sentinel: read a full-slot index,
/// copy the records out of shared memory, recycle the index.
///
/// Recycles lag behind publishes by up to [`RECYCLE_LAG`] slots, so an
/// index published twice without an intervening recycle is seen twice in
/// the held-back window and fails the drain. Held indices are returned
/// whenever the full link goes quiet, so a producer blocked on a recycle
/// of its own slot is never starved.
pub fn spawn_consumer(cfg: &TraceConfig, channel: usize) -> JoinHandle<ChannelDrain> {
    let shm_path = cfg.shm_path(channel);
    let full_path = cfg.full_link_path(channel);
    let empty_path = cfg.empty_link_path(channel);
    ensure_fifo(&full_path).unwrap();
    ensure_fifo(&empty_path).unwrap();

    thread::spawn(move || {
        let mut full = OpenOptions::new().read(true).open(&full_path).unwrap();
        let mut empty = OpenOptions::new().write(true).open(&empty_path).unwrap();
        let mut pool: Option<SlotPool> = None;
        let mut held: VecDeque<u32> = VecDeque::new();
        let mut slots = Vec::new();
        let mut buf = [0u8; 4];

        loop {
            if !readable(full.as_raw_fd(), 5) {
                // Producers are quiet or waiting on a recycle; let go of
                // everything held back.
                while let Some(idx) = held.pop_front() {
                    empty.write_all(&idx.to_le_bytes()).unwrap();
                }
                continue;
            }
            if full.read_exact(&mut buf).is_err() {
                // Producer went away without a sentinel; report what we have.
                break;
            }
            let slot = u32::from_le_bytes(buf);
            if slot == SHUTDOWN_SENTINEL {
                break;
            }
            assert!(
                !held.contains(&slot),
                "slot {} published twice without an intervening recycle",
                slot
            );
            // The pool file exists once the producer has published anything.
            let pool = pool.get_or_insert_with(|| SlotPool::open(&shm_path).unwrap());
            assert!((slot as usize) < pool.slot_count(), "slot index out of range");
            let records = pool.read_records(slot as usize);
            slots.push((slot, records));

            held.push_back(slot);
            while held.len() > RECYCLE_LAG {
                let idx = held.pop_front().unwrap();
                empty.write_all(&idx.to_le_bytes()).unwrap();
            }
        }

        ChannelDrain { slots }
    })
}

/// One consumer per channel.
pub fn spawn_consumers(cfg: &TraceConfig) -> Vec<JoinHandle<ChannelDrain>> {
    (0..cfg.channels).map(|c| spawn_consumer(cfg, c)).collect()
}
