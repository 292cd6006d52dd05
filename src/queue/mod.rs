//! Platform multiplexer adapter.
//!
//! Normalizes the two OS readiness facilities to one capability set:
//! create a queue, issue control operations against it, and block until
//! events arrive. The reactor core and the timer subsystem are written
//! entirely against [`ReadinessQueue`]; the concrete backend is selected
//! by target OS.
//!
//! | Platform | Backend | Module |
//! |----------|---------|--------|
//! | Linux | epoll | `epoll.rs` |
//! | macOS/BSD | kqueue | `kqueue.rs` |

use std::io;
use std::os::unix::io::RawFd;

use crate::event::Events;
use crate::interest::Interest;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

#[cfg(target_os = "linux")]
pub use epoll::EpollQueue;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueQueue;

/// Control operation issued against a readiness queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    /// Start watching a descriptor.
    Add,
    /// Replace the filter and tag of an existing watch in one call.
    Modify,
    /// Stop watching a descriptor.
    Delete,
}

/// One OS readiness queue.
///
/// Implementations own the queue descriptor and the raw platform event
/// array, and translate kernel events into the portable [`Events`] batch
/// in kernel-returned order.
pub trait ReadinessQueue: Send + Sync {
    /// Issues a control operation for `fd`.
    ///
    /// `interest` and `token` supply the filter and the user tag on add
    /// and modify; both are ignored on delete. The token is returned
    /// verbatim in every event the watch produces.
    ///
    /// Adding a descriptor the kernel believes is already registered
    /// (descriptor-number reuse racing a prior removal) is retried as a
    /// modify; the intent is to watch this descriptor with this filter
    /// either way. All other failures surface unchanged.
    ///
    /// Add and modify require an interest containing at least one of
    /// `READABLE` or `WRITABLE`; error and hang-up conditions are
    /// delivered alongside those filters, not as standalone watches.
    /// An empty filter is rejected with `EINVAL`.
    fn ctl(&self, op: CtlOp, fd: RawFd, interest: Interest, token: u64) -> io::Result<()>;

    /// Blocks until at least one event is ready, filling `events`.
    ///
    /// Returns the number of filled slots. Fails fast with `EBADF` once
    /// the queue has been closed.
    fn wait(&self, events: &mut Events) -> io::Result<usize>;

    /// The raw queue descriptor, `-1` once closed.
    fn raw_fd(&self) -> RawFd;

    /// Closes the queue descriptor, leaving the `-1` sentinel. Idempotent.
    fn close(&self) -> io::Result<()>;
}

/// Creates the readiness queue for the current platform.
pub(crate) fn platform(capacity: usize) -> io::Result<Box<dyn ReadinessQueue>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(EpollQueue::new(capacity)?))
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    {
        Ok(Box::new(KqueueQueue::new(capacity)?))
    }
}
