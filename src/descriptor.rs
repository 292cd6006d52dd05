//! Registration records and the optional caller-side storage contract.
//!
//! An [`EventDescriptor`] binds a watched descriptor to its interest set
//! and readiness handler. Records are shared as `Arc`s: the machine keeps
//! one reference for dispatch, and a caller-supplied [`DescriptorStorage`]
//! may keep another so removal can hand the record back for reuse.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::interest::Interest;
use crate::machine::EventMachine;

/// Readiness handler invoked by the dispatch loop.
///
/// Receives the machine that dispatched the event (so handlers can issue
/// further registrations or request termination), the readiness that
/// actually fired, and the descriptor it fired on.
pub type Handler = Box<dyn Fn(&EventMachine, Interest, RawFd) + Send + Sync>;

/// One registration record: descriptor, interest set, and handler.
pub struct EventDescriptor {
    fd: RawFd,
    interest: Interest,
    handler: Handler,
}

impl EventDescriptor {
    /// Creates a record for `fd` with the given interest set and handler.
    pub fn new<F>(fd: RawFd, interest: Interest, handler: F) -> Self
    where
        F: Fn(&EventMachine, Interest, RawFd) + Send + Sync + 'static,
    {
        Self {
            fd,
            interest,
            handler: Box::new(handler),
        }
    }

    /// The watched descriptor.
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// The interest set this record was registered with.
    #[must_use]
    pub const fn interest(&self) -> Interest {
        self.interest
    }

    pub(crate) fn invoke(&self, machine: &EventMachine, ready: Interest) {
        (self.handler)(machine, ready, self.fd);
    }
}

impl fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .finish_non_exhaustive()
    }
}

/// Failures reported by a [`DescriptorStorage`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// An entry for the descriptor already exists.
    #[error("storage already holds an entry for this descriptor")]
    DuplicateEntry,

    /// No entry exists for the descriptor.
    #[error("storage holds no entry for this descriptor")]
    NoSuchEntry,

    /// The implementation does not support removal.
    ///
    /// Insert-only storage is valid; the machine treats this as "no record
    /// to hand back" rather than as a failure.
    #[error("storage does not support removal")]
    RemoveUnsupported,
}

/// Caller-supplied side storage for registration records.
///
/// Implementations that only observe registrations may rely on the default
/// [`remove`](DescriptorStorage::remove), which declines; the machine then
/// completes removal without handing a record back.
pub trait DescriptorStorage: Send + Sync {
    /// Stores a record at registration time.
    fn insert(&self, descriptor: Arc<EventDescriptor>) -> Result<(), StorageError>;

    /// Takes the record for `fd` back out at removal time.
    fn remove(&self, fd: RawFd) -> Result<Arc<EventDescriptor>, StorageError> {
        let _ = fd;
        Err(StorageError::RemoveUnsupported)
    }
}

/// Hash-map storage keyed by descriptor, suitable for most callers.
#[derive(Default)]
pub struct FdMap {
    entries: Mutex<std::collections::HashMap<RawFd, Arc<EventDescriptor>>>,
}

impl FdMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DescriptorStorage for FdMap {
    fn insert(&self, descriptor: Arc<EventDescriptor>) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        match entries.entry(descriptor.fd()) {
            std::collections::hash_map::Entry::Occupied(_) => Err(StorageError::DuplicateEntry),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    fn remove(&self, fd: RawFd) -> Result<Arc<EventDescriptor>, StorageError> {
        self.entries.lock().remove(&fd).ok_or(StorageError::NoSuchEntry)
    }
}

impl fmt::Debug for FdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdMap").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fd: RawFd) -> Arc<EventDescriptor> {
        Arc::new(EventDescriptor::new(fd, Interest::READABLE, |_, _, _| {}))
    }

    #[test]
    fn fd_map_insert_and_remove() {
        let map = FdMap::new();
        let descriptor = record(7);
        map.insert(Arc::clone(&descriptor)).expect("insert");
        assert_eq!(map.len(), 1);

        let removed = map.remove(7).expect("remove");
        assert!(Arc::ptr_eq(&removed, &descriptor));
        assert!(map.is_empty());
    }

    #[test]
    fn fd_map_rejects_duplicates_and_misses() {
        let map = FdMap::new();
        map.insert(record(3)).expect("insert");
        assert_eq!(map.insert(record(3)), Err(StorageError::DuplicateEntry));
        assert!(matches!(map.remove(4), Err(StorageError::NoSuchEntry)));
    }

    #[test]
    fn default_remove_declines() {
        struct InsertOnly;
        impl DescriptorStorage for InsertOnly {
            fn insert(&self, _descriptor: Arc<EventDescriptor>) -> Result<(), StorageError> {
                Ok(())
            }
        }
        let storage = InsertOnly;
        storage.insert(record(1)).expect("insert");
        assert!(matches!(
            storage.remove(1),
            Err(StorageError::RemoveUnsupported)
        ));
    }
}
