//! Error taxonomy for the event machine.
//!
//! Every public operation returns one of these kinds; underlying OS errors
//! are preserved as sources so diagnostics survive propagation. The two
//! designed non-errors never surface here: a would-block write on the
//! termination channel (termination already pending) and a would-block read
//! of a timer's expiration counter (retry on the next readiness cycle).

use std::io;
use std::os::unix::io::RawFd;

use crate::descriptor::StorageError;

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds reported by the event machine and its timer subsystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A descriptor is negative or failed the liveness probe.
    ///
    /// Seen for the readiness queue, a watched descriptor, a timer source,
    /// or the termination channel, including any use after destroy.
    #[error("bad handle: fd {0}")]
    BadHandle(RawFd),

    /// The batch capacity is not positive.
    #[error("event batch capacity must be positive")]
    InvalidCapacity,

    /// Creating the underlying readiness queue failed.
    #[error("failed to create readiness queue")]
    QueueCreate(#[source] io::Error),

    /// An add/modify/delete on the readiness queue failed.
    #[error("readiness queue control operation failed")]
    QueueOp(#[source] io::Error),

    /// Blocking for readiness events failed.
    #[error("waiting for readiness events failed")]
    QueueWait(#[source] io::Error),

    /// Creating, reading, or writing the termination channel failed for a
    /// reason other than would-block.
    #[error("termination channel failure")]
    Channel(#[source] io::Error),

    /// Closing a handle during destroy failed.
    #[error("failed to close a handle")]
    Close(#[source] io::Error),

    /// Creating the kernel countdown source failed.
    #[error("failed to create timer source")]
    TimerCreate(#[source] io::Error),

    /// Arming or disarming the kernel countdown source failed.
    #[error("failed to arm or disarm timer source")]
    TimerSetTime(#[source] io::Error),

    /// The caller-supplied descriptor storage reported a failure.
    #[error("descriptor storage failure")]
    Storage(#[from] StorageError),
}

impl Error {
    /// Returns true for the bad-handle kind, the common signature of
    /// use-after-destroy.
    #[must_use]
    pub fn is_bad_handle(&self) -> bool {
        matches!(self, Self::BadHandle(_))
    }

    /// The preserved OS error, when this kind carries one.
    #[must_use]
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Self::QueueCreate(err)
            | Self::QueueOp(err)
            | Self::QueueWait(err)
            | Self::Channel(err)
            | Self::Close(err)
            | Self::TimerCreate(err)
            | Self::TimerSetTime(err) => Some(err),
            Self::InvalidArgument(_)
            | Self::BadHandle(_)
            | Self::InvalidCapacity
            | Self::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn os_error_is_preserved_as_source() {
        let err = Error::QueueOp(io::Error::from_raw_os_error(libc::ENOENT));
        let source = err.source().expect("source missing");
        assert_eq!(
            source.downcast_ref::<io::Error>().map(io::Error::raw_os_error),
            Some(Some(libc::ENOENT))
        );
        assert_eq!(
            err.os_error().and_then(io::Error::raw_os_error),
            Some(libc::ENOENT)
        );
    }

    #[test]
    fn bad_handle_is_recognizable() {
        assert!(Error::BadHandle(-1).is_bad_handle());
        assert!(!Error::InvalidCapacity.is_bad_handle());
    }

    #[test]
    fn storage_error_converts() {
        let err: Error = StorageError::DuplicateEntry.into();
        assert!(matches!(err, Error::Storage(StorageError::DuplicateEntry)));
    }
}
