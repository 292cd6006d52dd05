//! Timer subsystem backed by kernel countdown descriptors.
//!
//! Each [`EventTimer`] owns one `timerfd` registered on an
//! [`EventMachine`] like any other descriptor. When the countdown
//! expires the machine dispatches to an internal handler that reads the
//! expiration counter and invokes the timer callback once per elapsed
//! interval, so a loop stalled across several periods still delivers
//! every tick.
//!
//! Linux only; the core machine builds on kqueue platforms without this
//! module.

#![allow(unsafe_code)]

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::descriptor::EventDescriptor;
use crate::error::{Error, Result};
use crate::fd::{self, INVALID_FD};
use crate::interest::Interest;
use crate::machine::EventMachine;

struct TimerInner {
    machine: EventMachine,
    fd: AtomicI32,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl TimerInner {
    /// Drains the expiration counter and fires the callback per elapsed
    /// interval.
    ///
    /// Called from the dispatch loop on readiness. A would-block read
    /// means another drain already consumed the counter; the next
    /// readiness cycle retries, so it is not an error.
    fn fan_out(&self) {
        let fd = self.fd.load(Ordering::SeqCst);
        if fd < 0 {
            return;
        }
        let mut count = 0u64;
        // SAFETY: fd is a live timerfd and the buffer holds the 8-byte
        // expiration counter the kernel writes.
        let n = unsafe {
            libc::read(
                fd,
                std::ptr::addr_of_mut!(count).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(fd, error = %err, "timer counter read failed");
            }
            return;
        }
        if n as usize != std::mem::size_of::<u64>() {
            tracing::warn!(fd, n, "short read of timer counter");
            return;
        }
        tracing::trace!(fd, expirations = count, "timer fired");
        for _ in 0..count {
            (self.callback)();
        }
    }

    fn arm(&self, value: Duration, interval: Duration) -> Result<()> {
        let fd = self.fd.load(Ordering::SeqCst);
        if !fd::is_alive(fd) {
            return Err(Error::BadHandle(fd));
        }
        let new_value = libc::itimerspec {
            it_interval: timespec_from(interval),
            it_value: timespec_from(value),
        };
        // SAFETY: fd is a live timerfd and new_value is a valid
        // itimerspec; no old value is requested.
        let rc = unsafe { libc::timerfd_settime(fd, 0, &new_value, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(Error::TimerSetTime(io::Error::last_os_error()));
        }
        Ok(())
    }
}

fn timespec_from(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

/// A countdown timer dispatched through an [`EventMachine`].
pub struct EventTimer {
    inner: Arc<TimerInner>,
}

impl EventTimer {
    /// Creates a disarmed timer and registers its source on `machine`.
    ///
    /// `callback` runs on the machine's dispatch thread, once per elapsed
    /// interval.
    pub fn new<F>(machine: &EventMachine, callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        // SAFETY: timerfd_create takes no pointers. Non-blocking so the
        // dispatch-side counter read never stalls the loop.
        let timer_fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if timer_fd < 0 {
            return Err(Error::TimerCreate(io::Error::last_os_error()));
        }

        let inner = Arc::new(TimerInner {
            machine: machine.clone(),
            fd: AtomicI32::new(timer_fd),
            callback: Box::new(callback),
        });

        // The registration handler holds only a weak reference, so the
        // machine's registry never keeps a destroyed timer alive.
        let weak: Weak<TimerInner> = Arc::downgrade(&inner);
        let descriptor = EventDescriptor::new(timer_fd, Interest::READABLE, move |_, _, _| {
            if let Some(timer) = weak.upgrade() {
                timer.fan_out();
            }
        });
        if let Err(err) = machine.add(descriptor) {
            inner.fd.store(INVALID_FD, Ordering::SeqCst);
            let _ = fd::close(timer_fd);
            return Err(err);
        }
        tracing::debug!(fd = timer_fd, "timer created");

        Ok(Self { inner })
    }

    /// Arms the timer to fire every `interval`, first after `interval`.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument("timer interval must be non-zero"));
        }
        self.inner.arm(interval, interval)
    }

    /// Arms the timer to fire exactly once, `after` from now.
    pub fn start_one_shot(&self, after: Duration) -> Result<()> {
        if after.is_zero() {
            return Err(Error::InvalidArgument("timer delay must be non-zero"));
        }
        self.inner.arm(after, Duration::ZERO)
    }

    /// Disarms the timer without releasing it. Already-disarmed timers
    /// disarm again without complaint.
    pub fn stop(&self) -> Result<()> {
        self.inner.arm(Duration::ZERO, Duration::ZERO)
    }

    /// Deregisters the timer from its machine and releases its source.
    ///
    /// The handle is shredded first, so a racing expiration observes the
    /// sentinel and backs off. Destroying twice is harmless; every other
    /// operation afterwards fails on a bad handle.
    pub fn destroy(&self) -> Result<()> {
        let timer_fd = self.inner.fd.swap(INVALID_FD, Ordering::SeqCst);
        if timer_fd < 0 {
            return Ok(());
        }
        let deleted = self.inner.machine.delete(timer_fd).map(|_| ());
        let closed = fd::close(timer_fd).map_err(Error::Close);
        tracing::debug!(fd = timer_fd, "timer destroyed");
        deleted.and(closed)
    }
}

impl Drop for EventTimer {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

impl std::fmt::Debug for EventTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTimer")
            .field("fd", &self.inner.fd.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
