//! Linux epoll backend.
//!
//! The user tag travels in `epoll_event.data.u64` and comes back verbatim
//! on dispatch. The queue descriptor is created close-on-exec and held
//! behind a `-1` sentinel so operations after close fail with `EBADF`
//! instead of touching a recycled descriptor.

// Raw epoll_ctl/epoll_wait calls; each call site documents its invariant.
#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use super::{CtlOp, ReadinessQueue};
use crate::event::{Event, Events};
use crate::fd::INVALID_FD;
use crate::interest::Interest;

/// epoll-backed readiness queue.
pub struct EpollQueue {
    fd: AtomicI32,
    /// Raw kernel event array, sized to the batch capacity.
    slots: Mutex<Vec<libc::epoll_event>>,
}

impl EpollQueue {
    /// Creates a new epoll queue with room for `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        // SAFETY: epoll_create1 takes no pointers.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let empty = libc::epoll_event { events: 0, u64: 0 };
        Ok(Self {
            fd: AtomicI32::new(fd),
            slots: Mutex::new(vec![empty; capacity.max(1)]),
        })
    }

    fn interest_to_epoll(interest: Interest) -> u32 {
        let mut bits = 0u32;
        if interest.is_readable() {
            bits |= libc::EPOLLIN as u32;
        }
        if interest.is_writable() {
            bits |= libc::EPOLLOUT as u32;
        }
        if interest.is_error() {
            bits |= libc::EPOLLERR as u32;
        }
        if interest.is_hup() {
            bits |= libc::EPOLLRDHUP as u32;
        }
        if interest.is_edge_triggered() {
            bits |= libc::EPOLLET as u32;
        }
        bits
    }

    fn epoll_to_interest(bits: u32) -> Interest {
        let mut interest = Interest::NONE;
        if bits & libc::EPOLLIN as u32 != 0 {
            interest |= Interest::READABLE;
        }
        if bits & libc::EPOLLOUT as u32 != 0 {
            interest |= Interest::WRITABLE;
        }
        if bits & libc::EPOLLERR as u32 != 0 {
            interest |= Interest::ERROR;
        }
        if bits & (libc::EPOLLRDHUP as u32 | libc::EPOLLHUP as u32) != 0 {
            interest |= Interest::HUP;
        }
        interest
    }

    fn ctl_raw(&self, op: libc::c_int, fd: RawFd, event: &mut libc::epoll_event) -> io::Result<()> {
        let queue_fd = self.raw_fd();
        if queue_fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // SAFETY: event points at a valid epoll_event for the duration of
        // the call. Kernels prior to 2.6.9 require a non-null event even
        // for EPOLL_CTL_DEL, so it is always passed.
        let rc = unsafe { libc::epoll_ctl(queue_fd, op, fd, event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl ReadinessQueue for EpollQueue {
    fn ctl(&self, op: CtlOp, fd: RawFd, interest: Interest, token: u64) -> io::Result<()> {
        if op != CtlOp::Delete && !interest.is_readable() && !interest.is_writable() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut event = libc::epoll_event {
            events: Self::interest_to_epoll(interest),
            u64: token,
        };
        let raw_op = match op {
            CtlOp::Add => libc::EPOLL_CTL_ADD,
            CtlOp::Modify => libc::EPOLL_CTL_MOD,
            CtlOp::Delete => libc::EPOLL_CTL_DEL,
        };
        match self.ctl_raw(raw_op, fd, &mut event) {
            Ok(()) => Ok(()),
            Err(err) if op == CtlOp::Add && err.raw_os_error() == Some(libc::EEXIST) => {
                // Descriptor-number reuse can leave a stale registration
                // behind; the intent is identical, so retry as a modify.
                tracing::debug!(fd, "add hit EEXIST, retrying as modify");
                self.ctl_raw(libc::EPOLL_CTL_MOD, fd, &mut event)
            }
            Err(err) => Err(err),
        }
    }

    fn wait(&self, events: &mut Events) -> io::Result<usize> {
        let queue_fd = self.raw_fd();
        if queue_fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut slots = self.slots.lock();
        let capacity = slots.len() as libc::c_int;
        // SAFETY: slots is a live array of `capacity` epoll_event entries;
        // the kernel fills at most that many.
        let n = unsafe { libc::epoll_wait(queue_fd, slots.as_mut_ptr(), capacity, -1) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        events.clear();
        for slot in slots.iter().take(n as usize) {
            let token = slot.u64;
            let bits = slot.events;
            events.push(Event::new(token, Self::epoll_to_interest(bits)));
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

impl Drop for EpollQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for EpollQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollQueue")
            .field("fd", &self.raw_fd())
            .finish_non_exhaustive()
    }
}
