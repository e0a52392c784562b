//! Per-thread producer state.
//!
//! A `ThreadContext` belongs to exactly one application thread. Its view
//! points into the shared-memory slot the thread currently owns, so the
//! append path is a bounds check and a cursor write; the channel is only
//! involved when the slot fills up or the thread exits.

use std::sync::Arc;

use crate::ipc::{Channel, SlotView};
use crate::trace::{flush, roi, EventRecord, FlushState};

/// One thread's handle into the transport.
pub struct ThreadContext {
    /// Consumer-visible thread id; ids start at 1.
    tid: u32,
    /// Instrumentation toggle for this thread (e.g. suppressed inside
    /// library calls that are traced as a single high-level event).
    active: bool,
    channel: Arc<Channel>,
    /// Index of the slot the view is bound to. Meaningless while UNBOUND.
    slot: usize,
    view: SlotView,
    pub(crate) state: FlushState,
}

// SAFETY: the view's raw pointers target a slot that the channel protocol
// assigns to this context alone; moving the context to its thread moves
// that exclusive ownership with it.
unsafe impl Send for ThreadContext {}

impl ThreadContext {
    pub(crate) fn new(tid: u32, channel: Arc<Channel>) -> Self {
        assert!(tid >= 1, "consumer-visible thread ids start at 1");
        Self {
            tid,
            active: true,
            channel,
            slot: 0,
            view: SlotView::unbound(),
            state: FlushState::Unbound,
        }
    }

    #[inline(always)]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn view(&self) -> &SlotView {
        &self.view
    }

    pub(crate) fn rebind(&mut self, slot: usize, view: SlotView) {
        self.slot = slot;
        self.view = view;
    }

    /// Append one record.
    ///
    /// No-op while the thread is deactivated, outside the region of
    /// interest, or after finalize. Rotation happens *before* the write
    /// when the slot is full, so a record never straddles two slots.
    #[inline]
    pub fn append(&mut self, record: EventRecord) {
        if !self.active || !roi::is_active() {
            return;
        }
        match self.state {
            FlushState::Writing => {
                if self.view.is_full() {
                    flush::rotate(self);
                }
            }
            FlushState::Unbound => flush::bind(self),
            // Rotating is unreachable from the owning thread, Finalized is
            // terminal; either way the record is not recorded.
            FlushState::Rotating | FlushState::Finalized => return,
        }
        // SAFETY: the view is bound and not full (bind/rotate above leave
        // it with free space), and this thread is the slot's only writer.
        unsafe {
            self.view.cursor.write(record);
            self.view.cursor = self.view.cursor.add(1);
            *self.view.used += 1;
        }
    }

    /// Pause tracing for this thread; `append` becomes a no-op.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Resume tracing for this thread.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Flush the partially filled slot and retire this context.
    ///
    /// Every buffered record is visible to the consumer when this returns.
    /// Idempotent: a second call does not re-publish anything.
    pub fn finalize(&mut self) {
        flush::finalize(self);
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // Thread exit always drains; a context dropped without an explicit
        // finalize still owes its partial slot to the consumer.
        flush::finalize(self);
    }
}
