//! The process-wide region-of-interest flag.
//!
//! Tracing is active only inside the region of interest. The surrounding
//! process toggles it when the configured start/stop functions are hit;
//! with no such configuration the whole run is the region, so the flag
//! starts set.
//!
//! Reads happen on every append from every traced thread while the toggle
//! can race with them, hence an atomic rather than a plain global. A
//! toggle is a pure gate: records appended before a `stop` are still
//! flushed and delivered.

use std::sync::atomic::{AtomicBool, Ordering};

static ROI_ACTIVE: AtomicBool = AtomicBool::new(true);

/// Enter the region of interest: appends start recording.
pub fn start() {
    ROI_ACTIVE.store(true, Ordering::Release);
}

/// Leave the region of interest: appends become no-ops.
pub fn stop() {
    ROI_ACTIVE.store(false, Ordering::Release);
}

#[inline(always)]
pub fn is_active() -> bool {
    ROI_ACTIVE.load(Ordering::Acquire)
}
