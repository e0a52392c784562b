//! Ticket-ordered blocking mutual exclusion.
//!
//! `acquire` takes a ticket from an atomic dispenser and sleeps until the
//! serving counter reaches it, so the lock is granted in strict arrival
//! order regardless of how many threads pile up on one channel.
//!
//! Waiters do not all share one wait address. Each ticket maps to one of
//! `WAIT_WORDS` futex words, and release wakes only the word of the next
//! ticket. The classic ticket-lock broadcast would wake every queued thread
//! on every release just so all but one can go back to sleep; spreading the
//! tickets across words keeps the herd down to the rare residue collision.
//! Each word carries a generation counter bumped before the wake, so a
//! sleeper that raced with the wake fails its futex compare and re-checks
//! the serving counter instead of sleeping through its own turn.

use std::sync::atomic::{AtomicU32, Ordering};

use super::futex;

/// Number of distinct wait addresses. Tickets map to words by residue, so
/// two waiters share a word only when they are `WAIT_WORDS` tickets apart.
const WAIT_WORDS: usize = 64;

/// First-come-first-served lock for one channel.
#[derive(Debug)]
pub struct FairLock {
    /// Ticket dispenser.
    next_ticket: AtomicU32,
    /// Ticket currently allowed in.
    now_serving: AtomicU32,
    /// Per-residue futex words, value is a wake generation.
    wait_words: [AtomicU32; WAIT_WORDS],
}

impl FairLock {
    pub fn new() -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            wait_words: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Block until it is the caller's turn. Strict arrival order: a thread
    /// that called `acquire` first is granted the lock first.
    pub fn acquire(&self) -> FairLockGuard<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let word = &self.wait_words[ticket as usize % WAIT_WORDS];
        loop {
            if self.now_serving.load(Ordering::Acquire) == ticket {
                break;
            }
            let generation = word.load(Ordering::Acquire);
            // Re-check between reading the generation and sleeping: release
            // bumps the generation only after advancing now_serving, so a
            // turn granted here can no longer be slept through.
            if self.now_serving.load(Ordering::Acquire) == ticket {
                break;
            }
            futex::wait(word, generation);
        }
        FairLockGuard { lock: self, ticket }
    }

    fn release(&self) {
        let next = self.now_serving.load(Ordering::Relaxed).wrapping_add(1);
        self.now_serving.store(next, Ordering::Release);
        let word = &self.wait_words[next as usize % WAIT_WORDS];
        word.fetch_add(1, Ordering::Release);
        // Residue collisions share the word, so wake everyone on it; the
        // losers re-check now_serving and go back to sleep.
        futex::wake_all(word);
    }
}

impl Default for FairLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock ownership. Releasing is dropping.
pub struct FairLockGuard<'a> {
    lock: &'a FairLock,
    ticket: u32,
}

impl FairLockGuard<'_> {
    /// The ticket this guard was granted. Tickets are handed out in arrival
    /// order, so consecutive grants carry consecutive tickets.
    pub fn ticket(&self) -> u32 {
        self.ticket
    }
}

impl Drop for FairLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_uncontended_acquire_release() {
        let lock = FairLock::new();
        let g = lock.acquire();
        assert_eq!(g.ticket(), 0);
        drop(g);
        let g = lock.acquire();
        assert_eq!(g.ticket(), 1);
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(FairLock::new());
        let in_critical = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let in_critical = Arc::clone(&in_critical);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _g = lock.acquire();
                    assert!(!in_critical.swap(true, Ordering::SeqCst));
                    std::hint::spin_loop();
                    in_critical.store(false, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_fifo_grant_order() {
        // Grant order must equal ticket order: a thread whose acquire
        // arrived earlier (lower ticket) enters the critical section first.
        let lock = Arc::new(FairLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the lock so every spawned thread queues up behind it.
        let head = lock.acquire();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let g = lock.acquire();
                order.lock().unwrap().push(g.ticket());
            }));
        }
        // Give the threads time to take their tickets and block.
        thread::sleep(Duration::from_millis(100));
        drop(head);

        for h in handles {
            h.join().unwrap();
        }
        let order = order.lock().unwrap();
        assert_eq!(order.len(), 16);
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "grant order violated: {:?}", *order);
        }
    }

    #[test]
    fn test_many_waiters_share_wait_words() {
        // More waiters than wait words forces residue collisions; the lock
        // must still serve every ticket exactly once.
        let lock = Arc::new(FairLock::new());
        let served = Arc::new(Mutex::new(Vec::new()));
        let head = lock.acquire();

        let mut handles = Vec::new();
        for _ in 0..(WAIT_WORDS + 8) {
            let lock = Arc::clone(&lock);
            let served = Arc::clone(&served);
            handles.push(thread::spawn(move || {
                let g = lock.acquire();
                served.lock().unwrap().push(g.ticket());
            }));
        }
        thread::sleep(Duration::from_millis(200));
        drop(head);
        for h in handles {
            h.join().unwrap();
        }

        let served = served.lock().unwrap();
        assert_eq!(served.len(), WAIT_WORDS + 8);
        for pair in served.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
