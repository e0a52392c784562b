//! The flush controller: slot rotation and final drain for one thread.
//!
//! Per-thread state machine:
//!
//! ```text
//! UNBOUND ──first append──> WRITING <──────┐
//!                              │           │ new slot bound
//!                              ├─slot full─> ROTATING
//!                              │
//!                              └─finalize──> FINALIZED (terminal)
//! ```
//!
//! WRITING is lock-free; ROTATING holds the channel's fair lock across the
//! publish/claim exchange. Failures past this point are fatal: the records
//! in the full slot exist only there, and a transport that cannot deliver
//! them aborts rather than losing them or blocking the application forever.

use crate::error::fatal;

use super::thread_context::ThreadContext;

/// Where a thread stands in the flush protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No slot bound yet; binding happens on the first recorded append.
    Unbound,
    /// Exclusive owner of its slot's write cursor, lock-free.
    Writing,
    /// Exchanging a full slot for a recycled one under the channel lock.
    Rotating,
    /// Drained and done. Terminal: nothing is ever appended or flushed again.
    Finalized,
}

/// Bind the thread's view to a freshly claimed slot.
pub(crate) fn bind(tcxt: &mut ThreadContext) {
    tcxt.state = FlushState::Rotating;
    match tcxt.channel().bind(tcxt.tid()) {
        Ok((idx, view)) => {
            tcxt.rebind(idx, view);
            tcxt.state = FlushState::Writing;
        }
        Err(err) => fatal("binding thread to channel", &err),
    }
}

/// Publish the thread's full slot and rebind to a recycled one.
pub(crate) fn rotate(tcxt: &mut ThreadContext) {
    tcxt.state = FlushState::Rotating;
    let used = tcxt.view().used_records();
    match tcxt.channel().rotate(tcxt.slot(), used, tcxt.tid()) {
        Ok((idx, view)) => {
            tcxt.rebind(idx, view);
            tcxt.state = FlushState::Writing;
        }
        Err(err) => fatal("rotating shared-memory slot", &err),
    }
}

/// Final drain at thread exit.
///
/// Publishes whatever the slot holds; the consumer tells a partial slot
/// from a full one by the count field, never by assuming capacity. Calling
/// this twice is a no-op: FINALIZED is terminal.
pub(crate) fn finalize(tcxt: &mut ThreadContext) {
    match tcxt.state {
        FlushState::Writing => {}
        FlushState::Unbound => {
            // Never buffered anything; nothing is owed to the consumer.
            tcxt.state = FlushState::Finalized;
            return;
        }
        FlushState::Rotating | FlushState::Finalized => return,
    }

    let used = tcxt.view().used_records();
    if let Err(err) = tcxt.channel().publish_final(tcxt.slot(), used, tcxt.tid()) {
        fatal("flushing final slot", &err);
    }
    tcxt.state = FlushState::Finalized;
    tracing::debug!(tid = tcxt.tid(), used, "thread finalized");
}
