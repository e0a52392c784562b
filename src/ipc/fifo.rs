//! Named-FIFO signaling links.
//!
//! Two one-way links per channel:
//! - full link (producer -> consumer): indices of slots ready to drain
//! - empty link (consumer -> producer): indices of slots drained and
//!   available again
//!
//! Wire format is a bare little-endian `u32` per message. Writes of four
//! bytes are atomic on a pipe, so indices never interleave even though
//! several threads publish through one link (serialized by the channel's
//! lock anyway).

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Published on the full link at teardown: no more slots will follow.
pub const SHUTDOWN_SENTINEL: u32 = u32::MAX;

/// Create the FIFO at `path` if it does not exist yet.
///
/// Both sides call this, whoever starts first wins; EEXIST is not an error.
pub fn ensure_fifo(path: &Path) -> io::Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o644) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }
    }
    Ok(())
}

fn open_raw(path: &Path, flags: libc::c_int) -> io::Result<RawFd> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn clear_nonblock(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until `fd` is readable or `timeout` passes.
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(i32::MAX as u128) as libc::c_int;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(false);
        }
        return Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0);
    }
}

/// Producer end of the full-notification link.
#[derive(Debug)]
pub struct FullLink {
    file: File,
}

impl FullLink {
    /// Open the write side, waiting up to `timeout` for the consumer to
    /// open the read side. A FIFO with no reader refuses a non-blocking
    /// write-open with ENXIO, which is the retry signal here.
    pub fn open(path: &Path, timeout: Duration) -> io::Result<Self> {
        ensure_fifo(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match open_raw(path, libc::O_WRONLY | libc::O_NONBLOCK) {
                Ok(fd) => {
                    // SAFETY: fd was just opened and is owned by nobody else.
                    // Wrapped before clear_nonblock so an error there still
                    // closes it.
                    let file = unsafe { File::from_raw_fd(fd) };
                    clear_nonblock(file.as_raw_fd())?;
                    return Ok(Self { file });
                }
                Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "no consumer on the full-notification link",
                        ));
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Publish one slot index.
    pub fn send(&mut self, idx: u32) -> io::Result<()> {
        self.file.write_all(&idx.to_le_bytes())
    }
}

/// Producer end of the empty-notification link.
pub struct EmptyLink {
    file: File,
    // Carry for a 4-byte index split across reads. Pipes deliver 4-byte
    // writes whole in practice, but the protocol does not rely on it.
    pending: [u8; 4],
    pending_len: usize,
}

impl EmptyLink {
    /// Open the read side.
    ///
    /// Opened read-write: holding a write descriptor ourselves means the
    /// link never reads EOF merely because the consumer has not opened its
    /// side yet. Consumer death is detected on the full link instead
    /// (EPIPE on publish).
    pub fn open(path: &Path) -> io::Result<Self> {
        ensure_fifo(path)?;
        let fd = open_raw(path, libc::O_RDWR | libc::O_NONBLOCK)?;
        // SAFETY: fd was just opened and is owned by nobody else.
        Ok(Self {
            file: unsafe { File::from_raw_fd(fd) },
            pending: [0; 4],
            pending_len: 0,
        })
    }

    /// Receive one recycled slot index, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the consumer returned nothing in time.
    pub fn recv(&mut self, timeout: Duration) -> io::Result<Option<u32>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !poll_readable(self.file.as_raw_fd(), remaining)? {
                return Ok(None);
            }
            match self.file.read(&mut self.pending[self.pending_len..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "empty-notification link closed",
                    ))
                }
                Ok(n) => {
                    self.pending_len += n;
                    if self.pending_len == 4 {
                        self.pending_len = 0;
                        return Ok(Some(u32::from_le_bytes(self.pending)));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_fifo(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "tracelink-fifo-{}-{}",
            tag,
            std::process::id()
        ))
    }

    #[test]
    fn test_ensure_fifo_twice() {
        let path = tmp_fifo("twice");
        ensure_fifo(&path).unwrap();
        ensure_fifo(&path).unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_send_recv_roundtrip() {
        let path = tmp_fifo("roundtrip");
        ensure_fifo(&path).unwrap();

        // EmptyLink's O_RDWR open doubles as the reader the write side needs.
        let mut rx = EmptyLink::open(&path).unwrap();
        let mut tx = FullLink::open(&path, Duration::from_secs(1)).unwrap();

        tx.send(7).unwrap();
        tx.send(SHUTDOWN_SENTINEL).unwrap();
        assert_eq!(rx.recv(Duration::from_secs(1)).unwrap(), Some(7));
        assert_eq!(
            rx.recv(Duration::from_secs(1)).unwrap(),
            Some(SHUTDOWN_SENTINEL)
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_recv_times_out() {
        let path = tmp_fifo("timeout");
        let mut rx = EmptyLink::open(&path).unwrap();
        let start = Instant::now();
        assert_eq!(rx.recv(Duration::from_millis(50)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_open_times_out_without_reader() {
        let path = tmp_fifo("noreader");
        ensure_fifo(&path).unwrap();
        let err = FullLink::open(&path, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        std::fs::remove_file(&path).ok();
    }
}
