//! Mmap-backed slot pool.
//!
//! Layout of one channel's pool file:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ PoolHeader (64 bytes: magic, version, geometry)     │
//! ├─────────────────────────────────────────────────────┤
//! │ Slot 0:  used: u64 | records[slot_capacity]         │
//! ├─────────────────────────────────────────────────────┤
//! │ ...                                                 │
//! ├─────────────────────────────────────────────────────┤
//! │ Slot N-1                                            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The `used` count is the only metadata the consumer reads per slot: the
//! last slot a thread publishes before exit may be partially filled, so the
//! slot length is always explicit, never assumed to be the capacity.

use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::trace::EventRecord;

/// Pool file metadata, written once by the producer at initialization.
#[repr(C, align(64))]
struct PoolHeader {
    /// Magic number for validation ("TRCLNKP1").
    magic: u64,
    /// Layout version.
    version: u32,
    /// Number of slots in this pool.
    slot_count: u32,
    /// Records per slot.
    slot_capacity: u64,
    /// Bytes per record, pinned so both sides agree on the stride.
    record_bytes: u64,
}

const MAGIC: u64 = 0x5452_434c_4e4b_5031; // "TRCLNKP1"
const VERSION: u32 = 1;
const HEADER_SIZE: usize = mem::size_of::<PoolHeader>();

/// Byte offset of the record array inside a slot (after the `used` field).
const SLOT_RECORDS_OFFSET: usize = 8;

/// One channel's pool of fixed-capacity slots in shared memory.
#[derive(Debug)]
pub struct SlotPool {
    // Keeps the mapping alive; all access goes through `base`.
    _mmap: MmapMut,
    base: *mut u8,
    slot_count: usize,
    slot_capacity: usize,
    slot_stride: usize,
}

// SAFETY: the pool itself is immutable after construction; slot contents
// are raw shared memory whose single-writer discipline is enforced by the
// channel protocol (one owning thread per slot until rotation).
unsafe impl Send for SlotPool {}
unsafe impl Sync for SlotPool {}

impl SlotPool {
    /// Create (or re-create) the pool file at `path` and map it.
    ///
    /// Producer side only: the header is rewritten unconditionally, a stale
    /// file left by a previous run is reused as plain backing storage.
    pub fn create<P: AsRef<Path>>(
        path: P,
        slot_count: usize,
        slot_capacity: usize,
    ) -> io::Result<Self> {
        assert!(slot_count > 0, "pool needs at least one slot");
        assert!(slot_capacity > 0, "slots must hold at least one record");

        let slot_stride = Self::stride(slot_capacity);
        let total_size = HEADER_SIZE + slot_count * slot_stride;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(total_size as u64)?;

        // SAFETY: the file is open read/write and sized to the mapping.
        let mut mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        // SAFETY: the header lives at the start of the mapping.
        let header = unsafe { &mut *(base as *mut PoolHeader) };
        header.magic = MAGIC;
        header.version = VERSION;
        header.slot_count = slot_count as u32;
        header.slot_capacity = slot_capacity as u64;
        header.record_bytes = EventRecord::SIZE as u64;

        Ok(Self {
            _mmap: mmap,
            base,
            slot_count,
            slot_capacity,
            slot_stride,
        })
    }

    /// Map an existing pool file, deriving the geometry from its header.
    ///
    /// Drain side: used by whatever process (or test harness) plays the
    /// consumer role.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "pool file shorter than its header",
            ));
        }

        // SAFETY: the file is open read/write; length checked above.
        let mut mmap = unsafe { MmapOptions::new().len(file_len).map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        // SAFETY: the header lives at the start of the mapping.
        let header = unsafe { &*(base as *const PoolHeader) };
        if header.magic != MAGIC || header.version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a tracelink pool file",
            ));
        }
        if header.record_bytes != EventRecord::SIZE as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "pool built with a different record size",
            ));
        }

        let slot_count = header.slot_count as usize;
        let slot_capacity = header.slot_capacity as usize;
        let slot_stride = Self::stride(slot_capacity);
        if file_len < HEADER_SIZE + slot_count * slot_stride {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "pool file truncated",
            ));
        }

        Ok(Self {
            _mmap: mmap,
            base,
            slot_count,
            slot_capacity,
            slot_stride,
        })
    }

    /// Slot stride, 64-byte aligned so neighbouring slots never share a
    /// cache line.
    fn stride(slot_capacity: usize) -> usize {
        let raw = SLOT_RECORDS_OFFSET + slot_capacity * EventRecord::SIZE;
        (raw + 63) & !63
    }

    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline(always)]
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    #[inline(always)]
    fn slot_base(&self, idx: usize) -> *mut u8 {
        assert!(idx < self.slot_count, "slot index out of range");
        // SAFETY: idx checked against slot_count; the mapping covers
        // HEADER_SIZE + slot_count * slot_stride bytes.
        unsafe { self.base.add(HEADER_SIZE + idx * self.slot_stride) }
    }

    /// Writer view into slot `idx`, handed to the thread that owns it.
    ///
    /// The caller (the channel protocol) guarantees a slot has at most one
    /// view at a time.
    pub fn view(&self, idx: usize) -> SlotView {
        let base = self.slot_base(idx);
        // SAFETY: offsets stay inside the slot's stride.
        unsafe {
            let used = base as *mut u64;
            *used = 0;
            let records = base.add(SLOT_RECORDS_OFFSET) as *mut EventRecord;
            SlotView {
                cursor: records,
                end: records.add(self.slot_capacity),
                used,
            }
        }
    }

    /// Publish the final record count of a full or partial slot.
    ///
    /// The release store orders all prior record writes before the count,
    /// which the drain side pairs with an acquire load.
    pub fn commit_used(&self, idx: usize, used: u64) {
        let base = self.slot_base(idx);
        // SAFETY: the `used` field is a u64 at the slot base, 8-aligned.
        let atomic = unsafe { &*(base as *const AtomicU64) };
        atomic.store(used, Ordering::Release);
    }

    /// Drain-side copy of a published slot's records.
    pub fn read_records(&self, idx: usize) -> Vec<EventRecord> {
        let base = self.slot_base(idx);
        // SAFETY: `used` is the slot's count field; the acquire load pairs
        // with `commit_used` so the records below are fully visible.
        let used = unsafe { &*(base as *const AtomicU64) }.load(Ordering::Acquire) as usize;
        let used = used.min(self.slot_capacity);
        // SAFETY: `used` is clamped to the slot capacity.
        unsafe {
            let records = base.add(SLOT_RECORDS_OFFSET) as *const EventRecord;
            std::slice::from_raw_parts(records, used).to_vec()
        }
    }
}

/// A thread's private window into the slot it currently owns.
///
/// `cursor` advances towards `end` as records are appended; `used` points
/// at the slot's consumer-visible count field.
#[derive(Debug)]
pub struct SlotView {
    pub(crate) cursor: *mut EventRecord,
    pub(crate) end: *mut EventRecord,
    pub(crate) used: *mut u64,
}

impl SlotView {
    /// A view bound to nothing; any append must bind a real slot first.
    pub(crate) fn unbound() -> Self {
        Self {
            cursor: std::ptr::null_mut(),
            end: std::ptr::null_mut(),
            used: std::ptr::null_mut(),
        }
    }

    #[inline(always)]
    pub(crate) fn is_full(&self) -> bool {
        self.cursor >= self.end
    }

    /// Records appended into the bound slot so far.
    #[inline(always)]
    pub(crate) fn used_records(&self) -> u64 {
        if self.used.is_null() {
            return 0;
        }
        // SAFETY: non-null means the view is bound to a live slot that only
        // this thread writes.
        unsafe { *self.used }
    }
}
