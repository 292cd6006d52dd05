//! Raw descriptor helpers shared by the core and the platform backends.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;

/// Sentinel value for an unset or destroyed descriptor.
pub(crate) const INVALID_FD: RawFd = -1;

/// Lightweight liveness probe: the descriptor is non-negative and the
/// kernel still knows it.
///
/// Used before issuing queue operations so a stale handle fails with a
/// clear bad-handle condition instead of an opaque low-level error.
pub(crate) fn is_alive(fd: RawFd) -> bool {
    if fd < 0 {
        return false;
    }
    // SAFETY: F_GETFL has no side effects; an invalid fd yields EBADF.
    unsafe { libc::fcntl(fd, libc::F_GETFL) >= 0 }
}

/// Closes a raw descriptor, surfacing the OS error on failure.
pub(crate) fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller owns fd and does not use it after this call.
    if unsafe { libc::close(fd) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn probe_detects_live_and_dead_fds() {
        let (sock, _other) = UnixStream::pair().expect("socket pair");
        let fd = sock.as_raw_fd();
        assert!(is_alive(fd));
        drop(sock);
        assert!(!is_alive(fd));
        assert!(!is_alive(INVALID_FD));
    }

    #[test]
    fn close_reports_bad_fd() {
        let err = close(INVALID_FD).expect_err("close of -1 must fail");
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
