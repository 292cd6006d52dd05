//! BSD/macOS kqueue backend.
//!
//! kqueue keys registrations by (ident, filter), so a single portable
//! watch maps to up to two kevents: `EVFILT_READ` and `EVFILT_WRITE`.
//! The user tag travels in `udata` and comes back verbatim. Edge
//! triggering maps to `EV_CLEAR`.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use super::{CtlOp, ReadinessQueue};
use crate::event::{Event, Events};
use crate::fd::INVALID_FD;
use crate::interest::Interest;

/// kqueue-backed readiness queue.
pub struct KqueueQueue {
    fd: AtomicI32,
    /// Raw kernel event array, sized to the batch capacity.
    slots: Mutex<Vec<libc::kevent>>,
}

// libc::kevent contains raw pointers (udata) which strip the auto traits;
// only integer tags are ever stored in them.
unsafe impl Send for KqueueQueue {}
unsafe impl Sync for KqueueQueue {}

fn empty_kevent() -> libc::kevent {
    // SAFETY: kevent is a plain C struct; all-zero is a valid value.
    unsafe { std::mem::zeroed() }
}

impl KqueueQueue {
    /// Creates a new kqueue with room for `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        // SAFETY: kqueue takes no arguments.
        let fd = unsafe { libc::kqueue() };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just created and is owned here.
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Self {
            fd: AtomicI32::new(fd),
            slots: Mutex::new(vec![empty_kevent(); capacity.max(1)]),
        })
    }

    fn kevent_to_interest(event: &libc::kevent) -> Interest {
        let mut interest = Interest::NONE;
        match event.filter {
            libc::EVFILT_READ => interest |= Interest::READABLE,
            libc::EVFILT_WRITE => interest |= Interest::WRITABLE,
            _ => {}
        }
        if event.flags & libc::EV_EOF != 0 {
            interest |= Interest::HUP;
        }
        if event.flags & libc::EV_ERROR != 0 {
            interest |= Interest::ERROR;
        }
        interest
    }

    fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let queue_fd = self.raw_fd();
        if queue_fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // SAFETY: changes is a valid array of initialized kevents; no
        // event list is requested so errors come back via the return code.
        let rc = unsafe {
            libc::kevent(
                queue_fd,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn change(fd: RawFd, filter: i16, flags: u16, token: u64) -> libc::kevent {
        let mut event = empty_kevent();
        event.ident = fd as libc::uintptr_t;
        event.filter = filter;
        event.flags = flags;
        event.udata = token as *mut libc::c_void;
        event
    }
}

impl ReadinessQueue for KqueueQueue {
    fn ctl(&self, op: CtlOp, fd: RawFd, interest: Interest, token: u64) -> io::Result<()> {
        match op {
            CtlOp::Add | CtlOp::Modify => {
                if !interest.is_readable() && !interest.is_writable() {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                // EV_ADD on an existing (ident, filter) pair updates it in
                // place, so add and modify are the same submission. Filters
                // no longer wanted are deleted, tolerating ENOENT.
                let mut flags = libc::EV_ADD;
                if interest.is_edge_triggered() {
                    flags |= libc::EV_CLEAR;
                }
                let mut wanted = Vec::with_capacity(2);
                let mut unwanted = Vec::with_capacity(2);
                if interest.is_readable() {
                    wanted.push(Self::change(fd, libc::EVFILT_READ, flags, token));
                } else {
                    unwanted.push(Self::change(fd, libc::EVFILT_READ, libc::EV_DELETE, 0));
                }
                if interest.is_writable() {
                    wanted.push(Self::change(fd, libc::EVFILT_WRITE, flags, token));
                } else {
                    unwanted.push(Self::change(fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0));
                }
                self.submit(&wanted)?;
                for change in &unwanted {
                    match self.submit(std::slice::from_ref(change)) {
                        Ok(()) => {}
                        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            }
            CtlOp::Delete => {
                let read = Self::change(fd, libc::EVFILT_READ, libc::EV_DELETE, 0);
                let write = Self::change(fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0);
                let read_result = self.submit(std::slice::from_ref(&read));
                let write_result = self.submit(std::slice::from_ref(&write));
                // A watch may carry only one of the two filters; deleting
                // succeeds if either filter was present.
                match (read_result, write_result) {
                    (Ok(()), _) | (_, Ok(())) => Ok(()),
                    (Err(err), Err(_)) => Err(err),
                }
            }
        }
    }

    fn wait(&self, events: &mut Events) -> io::Result<usize> {
        let queue_fd = self.raw_fd();
        if queue_fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut slots = self.slots.lock();
        let capacity = slots.len() as libc::c_int;
        // SAFETY: slots is a live array of `capacity` kevent entries; a
        // null timeout blocks until at least one event is ready.
        let n = unsafe {
            libc::kevent(
                queue_fd,
                std::ptr::null(),
                0,
                slots.as_mut_ptr(),
                capacity,
                std::ptr::null(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        events.clear();
        for slot in slots.iter().take(n as usize) {
            let token = slot.udata as u64;
            events.push(Event::new(token, Self::kevent_to_interest(slot)));
        }
        Ok(n as usize)
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.load(Ordering::SeqCst)
    }

    fn close(&self) -> io::Result<()> {
        let fd = self.fd.swap(INVALID_FD, Ordering::SeqCst);
        if fd >= 0 {
            crate::fd::close(fd)?;
        }
        Ok(())
    }
}

impl Drop for KqueueQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for KqueueQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KqueueQueue")
            .field("fd", &self.raw_fd())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn create_and_close_idempotent() {
        let queue = KqueueQueue::new(8).expect("queue creation");
        assert!(queue.raw_fd() >= 0);
        queue.close().expect("first close");
        assert_eq!(queue.raw_fd(), INVALID_FD);
        queue.close().expect("second close");
    }

    #[test]
    fn add_wait_delete_round_trip() {
        let queue = KqueueQueue::new(8).expect("queue creation");
        let (mut writer, reader) = UnixStream::pair().expect("socket pair");
        let fd = reader.as_raw_fd();

        queue
            .ctl(CtlOp::Add, fd, Interest::READABLE, fd as u64)
            .expect("add");
        writer.write_all(b"x").expect("write");

        let mut events = Events::with_capacity(8);
        let n = queue.wait(&mut events).expect("wait");
        assert_eq!(n, 1);
        let event = events.iter().next().expect("one event");
        assert_eq!(event.token(), fd as u64);
        assert!(event.is_readable());

        queue
            .ctl(CtlOp::Delete, fd, Interest::NONE, 0)
            .expect("delete");
    }

    #[test]
    fn modify_narrows_filters() {
        let queue = KqueueQueue::new(8).expect("queue creation");
        let (_writer, reader) = UnixStream::pair().expect("socket pair");
        let fd = reader.as_raw_fd();

        queue
            .ctl(CtlOp::Add, fd, Interest::both(), fd as u64)
            .expect("add both");
        queue
            .ctl(CtlOp::Modify, fd, Interest::READABLE, fd as u64)
            .expect("narrow to readable");
        queue
            .ctl(CtlOp::Delete, fd, Interest::NONE, 0)
            .expect("delete");
    }

    #[test]
    fn add_without_read_or_write_filter_is_rejected() {
        let queue = KqueueQueue::new(8).expect("queue creation");
        let (_writer, reader) = UnixStream::pair().expect("socket pair");
        let fd = reader.as_raw_fd();

        let err = queue
            .ctl(CtlOp::Add, fd, Interest::HUP, fd as u64)
            .expect_err("hang-up-only filter");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn operations_after_close_fail_with_ebadf() {
        let queue = KqueueQueue::new(8).expect("queue creation");
        queue.close().expect("close");

        let err = queue
            .ctl(CtlOp::Add, 0, Interest::READABLE, 0)
            .expect_err("ctl after close");
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
