//! Cross-thread termination channel (the self-pipe trick).
//!
//! One non-blocking pipe whose read end is watched by the dispatch loop.
//! Any thread may write a byte into the write end to request termination;
//! a full pipe means a request is already pending, so the would-block case
//! is success. Both ends are close-on-exec and held behind `-1` sentinels
//! so a use after destroy fails on a bad handle instead of touching a pipe
//! whose reader is gone.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::fd::INVALID_FD;

#[derive(Debug)]
pub(crate) struct WakePipe {
    read: AtomicI32,
    write: AtomicI32,
}

impl WakePipe {
    /// Creates the pipe pair, non-blocking and close-on-exec on both ends.
    ///
    /// Non-blocking is required: if the loop has already exited nobody
    /// drains the pipe, and a later notify must not block its caller.
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [INVALID_FD; 2];
        #[cfg(not(target_os = "macos"))]
        {
            // SAFETY: fds is a valid two-element buffer for pipe2 to fill.
            let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        #[cfg(target_os = "macos")]
        {
            // No pipe2 on macOS; set the flags after creation.
            // SAFETY: fds is a valid two-element buffer for pipe to fill.
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            for &fd in &fds {
                // SAFETY: fd was just created and is owned here.
                let ok = unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    flags >= 0
                        && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) >= 0
                        && libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) >= 0
                };
                if !ok {
                    let err = io::Error::last_os_error();
                    // SAFETY: both fds belong to the pipe created above.
                    unsafe {
                        libc::close(fds[0]);
                        libc::close(fds[1]);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            read: AtomicI32::new(fds[0]),
            write: AtomicI32::new(fds[1]),
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.load(Ordering::SeqCst)
    }

    pub(crate) fn write_fd(&self) -> RawFd {
        self.write.load(Ordering::SeqCst)
    }

    /// Requests termination by writing one byte.
    ///
    /// A would-block failure means the pipe is full, i.e. a request is
    /// already pending; that is reported as success.
    pub(crate) fn notify(&self) -> io::Result<()> {
        let fd = self.write_fd();
        let byte = 0u8;
        // SAFETY: fd is the pipe write end (or -1, which write rejects with
        // EBADF); the buffer is one valid byte.
        let n = unsafe { libc::write(fd, std::ptr::addr_of!(byte).cast::<libc::c_void>(), 1) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drains exactly one byte from the read end.
    ///
    /// Called only when the dispatch loop observed readiness on the read
    /// end, so data is guaranteed present and the non-blocking read is
    /// bounded.
    pub(crate) fn drain(&self) -> io::Result<()> {
        let fd = self.read_fd();
        let mut byte = 0u8;
        // SAFETY: fd is the pipe read end; the buffer is one valid byte.
        let n = unsafe { libc::read(fd, std::ptr::addr_of_mut!(byte).cast::<libc::c_void>(), 1) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Closes the write end, leaving the sentinel behind. Idempotent.
    ///
    /// Closed before the read end so that a racing notify fails on a bad
    /// handle rather than writing into a pipe nobody will ever drain.
    pub(crate) fn close_write(&self) -> io::Result<()> {
        let fd = self.write.swap(INVALID_FD, Ordering::SeqCst);
        if fd >= 0 {
            crate::fd::close(fd)?;
        }
        Ok(())
    }

    /// Closes the read end, leaving the sentinel behind. Idempotent.
    pub(crate) fn close_read(&self) -> io::Result<()> {
        let fd = self.read.swap(INVALID_FD, Ordering::SeqCst);
        if fd >= 0 {
            crate::fd::close(fd)?;
        }
        Ok(())
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        let _ = self.close_write();
        let _ = self.close_read();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_then_drain() {
        let pipe = WakePipe::new().expect("pipe creation");
        pipe.notify().expect("notify");
        pipe.drain().expect("drain");
    }

    #[test]
    fn repeated_notify_never_fails() {
        let pipe = WakePipe::new().expect("pipe creation");
        for _ in 0..16 {
            pipe.notify().expect("notify");
        }
        // Only the queued bytes are there; each drain is bounded.
        pipe.drain().expect("drain");
    }

    #[test]
    fn notify_after_close_write_fails() {
        let pipe = WakePipe::new().expect("pipe creation");
        pipe.close_write().expect("close write");
        assert_eq!(pipe.write_fd(), INVALID_FD);
        let err = pipe.notify().expect_err("notify on closed write end");
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn close_is_idempotent() {
        let pipe = WakePipe::new().expect("pipe creation");
        pipe.close_write().expect("first close");
        pipe.close_write().expect("second close");
        pipe.close_read().expect("first close");
        pipe.close_read().expect("second close");
    }
}
