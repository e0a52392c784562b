//! Thin wrappers around the Linux futex syscall.
//!
//! `wait` sleeps only while the word still holds the expected value, so a
//! wake that races with the sleeper is never lost: the kernel compares the
//! word under its own lock and returns EAGAIN if it already moved.

use std::sync::atomic::AtomicU32;

/// Sleep until `word` is woken, provided it still reads `expected`.
///
/// Spurious returns (EINTR) and already-moved words (EAGAIN) are normal;
/// the caller re-checks its condition and re-waits. Any other failure
/// aborts the process: a lock whose wait primitive is broken cannot
/// guarantee mutual exclusion.
pub fn wait(word: &AtomicU32, expected: u32) {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *mut u32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            std::ptr::null::<libc::timespec>(),
        )
    };
    if rc == -1 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno != libc::EAGAIN && errno != libc::EINTR {
            tracing::error!(errno, "futex wait failed");
            eprintln!("tracelink: fatal: futex wait failed (errno {})", errno);
            std::process::abort();
        }
    }
}

/// Wake every thread sleeping on `word`.
pub fn wake_all(word: &AtomicU32) {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *mut u32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        )
    };
    if rc == -1 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        tracing::error!(errno, "futex wake failed");
        eprintln!("tracelink: fatal: futex wake failed (errno {})", errno);
        std::process::abort();
    }
}
