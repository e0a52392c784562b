//! The trace event record.
//!
//! A record is a fixed-size run of bytes. What those bytes mean (memory
//! access, executed instruction, computation cost entry) is settled between
//! the instrumentation layer and the consumer; the transport only moves
//! them, and never touches one after it is appended.

use std::mem;

/// Payload bytes per record.
pub const EVENT_RECORD_BYTES: usize = 32;

/// One opaque, fixed-size trace entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub bytes: [u8; EVENT_RECORD_BYTES],
}

const _: () = assert!(mem::size_of::<EventRecord>() == EVENT_RECORD_BYTES);

impl EventRecord {
    pub const SIZE: usize = mem::size_of::<EventRecord>();

    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            bytes: [0; EVENT_RECORD_BYTES],
        }
    }

    #[inline(always)]
    pub const fn from_bytes(bytes: [u8; EVENT_RECORD_BYTES]) -> Self {
        Self { bytes }
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}
