//! The reactor core: registration, dispatch, termination, teardown.
//!
//! An [`EventMachine`] owns one platform readiness queue, one termination
//! channel, and the batch buffer the dispatch loop fills. Handles are
//! cheap clones over a shared inner state, so any thread can register
//! descriptors or request termination while another runs the loop.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::{DescriptorStorage, EventDescriptor};
use crate::error::{Error, Result};
use crate::event::{EventBuffer, Events};
use crate::fd;
use crate::interest::Interest;
use crate::queue::{self, CtlOp, ReadinessQueue};
use crate::wake::WakePipe;

/// Batch capacity used when the configuration leaves it unset.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Construction parameters for an [`EventMachine`].
///
/// All fields are optional: the default configuration uses a
/// [`DEFAULT_CAPACITY`]-sized internal batch buffer and no side storage.
#[derive(Default)]
pub struct Config {
    capacity: usize,
    buffer: Option<Events>,
    storage: Option<Box<dyn DescriptorStorage>>,
}

impl Config {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch capacity. Zero means [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Supplies a caller-owned batch buffer.
    ///
    /// The buffer's capacity must match the configured capacity, unless
    /// the capacity is left unset, which forces an internal allocation.
    /// An adopted buffer is handed back by [`EventMachine::destroy`].
    #[must_use]
    pub fn buffer(mut self, buffer: Events) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Attaches side storage that observes every registration.
    #[must_use]
    pub fn storage(mut self, storage: Box<dyn DescriptorStorage>) -> Self {
        self.storage = Some(storage);
        self
    }
}

struct Inner {
    queue: Box<dyn ReadinessQueue>,
    wake: WakePipe,
    /// Tag under which the termination channel's read end is registered.
    wake_token: u64,
    capacity: usize,
    /// Taken by the dispatch loop for its whole run; also guards against a
    /// second concurrent run on the same machine.
    buffer: Mutex<Option<EventBuffer>>,
    /// Live registrations, keyed by descriptor. Dispatch recovers the
    /// record for a kernel event from here; a miss means the registration
    /// was deleted after the batch was collected and the event is stale.
    registry: Mutex<HashMap<RawFd, Arc<EventDescriptor>>>,
    storage: Option<Box<dyn DescriptorStorage>>,
}

/// A readiness dispatch machine.
///
/// Clones share the same underlying machine.
#[derive(Clone)]
pub struct EventMachine {
    inner: Arc<Inner>,
}

impl EventMachine {
    /// Creates a machine from `config`.
    ///
    /// Sets up the platform readiness queue and the termination channel,
    /// and registers the channel's read end on the queue.
    pub fn new(config: Config) -> Result<Self> {
        if matches!(&config.buffer, Some(buffer) if buffer.capacity() == 0) {
            return Err(Error::InvalidCapacity);
        }
        // An unset capacity falls back to the default and forces an
        // internal allocation regardless of any supplied buffer.
        let capacity = if config.capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            config.capacity
        };
        let buffer = match config.buffer {
            Some(_) if config.capacity == 0 => {
                EventBuffer::Internal(Events::with_capacity(capacity))
            }
            Some(events) if events.capacity() == capacity => EventBuffer::Supplied(events),
            Some(_) => return Err(Error::InvalidCapacity),
            None => EventBuffer::Internal(Events::with_capacity(capacity)),
        };

        let queue = queue::platform(capacity).map_err(Error::QueueCreate)?;
        let wake = WakePipe::new().map_err(Error::Channel)?;
        let wake_token = wake.read_fd() as u64;
        queue
            .ctl(CtlOp::Add, wake.read_fd(), Interest::READABLE, wake_token)
            .map_err(Error::QueueOp)?;
        tracing::debug!(
            queue_fd = queue.raw_fd(),
            capacity,
            "event machine created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                queue,
                wake,
                wake_token,
                capacity,
                buffer: Mutex::new(Some(buffer)),
                registry: Mutex::new(HashMap::new()),
                storage: config.storage,
            }),
        })
    }

    /// The batch capacity this machine was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Registers `descriptor` on the readiness queue.
    ///
    /// The record is shared with the attached storage, when one exists. A
    /// storage failure after the kernel registration succeeded is reported
    /// but does not undo the watch.
    pub fn add(&self, descriptor: EventDescriptor) -> Result<()> {
        let fd = descriptor.fd();
        self.probe_queue()?;
        self.probe_descriptor(fd)?;

        let record = Arc::new(descriptor);
        self.inner
            .queue
            .ctl(CtlOp::Add, fd, record.interest(), fd as u64)
            .map_err(Error::QueueOp)?;
        self.inner.registry.lock().insert(fd, Arc::clone(&record));
        tracing::trace!(fd, interest = ?record.interest(), "descriptor added");

        if let Some(storage) = &self.inner.storage {
            storage.insert(record)?;
        }
        Ok(())
    }

    /// Removes the watch for `fd`.
    ///
    /// Hands back the record the attached storage was holding, when the
    /// storage supports removal; `None` otherwise. Any event for `fd`
    /// already collected into the current batch is discarded as stale.
    pub fn delete(&self, fd: RawFd) -> Result<Option<Arc<EventDescriptor>>> {
        self.probe_queue()?;
        self.probe_descriptor(fd)?;

        self.inner
            .queue
            .ctl(CtlOp::Delete, fd, Interest::NONE, 0)
            .map_err(Error::QueueOp)?;
        self.inner.registry.lock().remove(&fd);
        tracing::trace!(fd, "descriptor deleted");

        self.take_from_storage(fd)
    }

    /// Replaces the registration for `descriptor.fd()` in one queue call.
    ///
    /// The descriptor must already be registered; an unknown descriptor
    /// surfaces the kernel's no-entry error rather than being silently
    /// added. Hands back the previous record the same way
    /// [`delete`](Self::delete) does. Storage bookkeeping failures are
    /// reported after the watch and the dispatch record have already been
    /// swapped to the new registration.
    pub fn modify(&self, descriptor: EventDescriptor) -> Result<Option<Arc<EventDescriptor>>> {
        let fd = descriptor.fd();
        self.probe_queue()?;
        self.probe_descriptor(fd)?;

        let record = Arc::new(descriptor);
        self.inner
            .queue
            .ctl(CtlOp::Modify, fd, record.interest(), fd as u64)
            .map_err(Error::QueueOp)?;
        // The dispatch record must track the kernel filter: once the ctl
        // succeeded, events carry the new registration's intent, so the
        // registry is updated before any storage bookkeeping can fail.
        self.inner.registry.lock().insert(fd, Arc::clone(&record));
        tracing::trace!(fd, interest = ?record.interest(), "descriptor modified");

        let previous = self.take_from_storage(fd)?;
        if let Some(storage) = &self.inner.storage {
            storage.insert(record)?;
        }
        Ok(previous)
    }

    /// Runs the dispatch loop on the calling thread.
    ///
    /// Blocks until [`terminate`](Self::terminate) is observed, then
    /// returns `Ok(())` after finishing the batch the request arrived in.
    /// Only one loop may run per machine at a time; a second concurrent
    /// call is rejected without touching the queue.
    pub fn run(&self) -> Result<()> {
        self.probe_queue()?;
        let Some(mut buffer) = self.inner.buffer.lock().take() else {
            return Err(Error::InvalidArgument("dispatch loop already running"));
        };
        tracing::debug!("dispatch loop entered");

        let result = self.run_loop(&mut buffer);
        *self.inner.buffer.lock() = Some(buffer);
        tracing::debug!("dispatch loop exited");
        result
    }

    fn run_loop(&self, buffer: &mut EventBuffer) -> Result<()> {
        loop {
            let events = buffer.events_mut();
            self.inner.queue.wait(events).map_err(Error::QueueWait)?;

            // A termination request finishes the batch it arrived in; the
            // loop breaks only once every collected event was handled.
            let mut terminated = false;
            for event in events.iter() {
                if event.token() == self.inner.wake_token {
                    self.inner.wake.drain().map_err(Error::Channel)?;
                    terminated = true;
                    continue;
                }
                let fd = event.token() as RawFd;
                let record = self.inner.registry.lock().get(&fd).cloned();
                match record {
                    Some(record) => record.invoke(self, event.ready()),
                    None => tracing::trace!(fd, "stale event skipped"),
                }
            }
            if terminated {
                return Ok(());
            }
        }
    }

    /// Requests termination of the dispatch loop from any thread.
    ///
    /// Repeated requests are harmless: a full termination channel means a
    /// request is already pending and counts as success.
    pub fn terminate(&self) -> Result<()> {
        let fd = self.inner.wake.write_fd();
        if !fd::is_alive(fd) {
            return Err(Error::BadHandle(fd));
        }
        self.inner.wake.notify().map_err(Error::Channel)?;
        tracing::debug!("termination requested");
        Ok(())
    }

    /// Releases every resource the machine owns.
    ///
    /// Teardown order: readiness queue, batch buffer, termination channel
    /// write end, then read end. A caller-supplied buffer is handed back;
    /// all steps are attempted even when an earlier one fails, and the
    /// first failure is reported. Every subsequent operation on the
    /// machine fails on a bad handle.
    pub fn destroy(&self) -> Result<Option<Events>> {
        let mut first_error = None;
        let mut note = |result: std::result::Result<(), std::io::Error>| {
            if let Err(err) = result {
                first_error.get_or_insert(Error::Close(err));
            }
        };

        note(self.inner.queue.close());
        let returned = self
            .inner
            .buffer
            .lock()
            .take()
            .and_then(EventBuffer::into_supplied);
        note(self.inner.wake.close_write());
        note(self.inner.wake.close_read());
        self.inner.registry.lock().clear();
        tracing::debug!("event machine destroyed");

        match first_error {
            Some(err) => Err(err),
            None => Ok(returned),
        }
    }

    fn probe_queue(&self) -> Result<()> {
        let fd = self.inner.queue.raw_fd();
        if !fd::is_alive(fd) {
            return Err(Error::BadHandle(fd));
        }
        Ok(())
    }

    fn probe_descriptor(&self, fd: RawFd) -> Result<()> {
        if !fd::is_alive(fd) {
            return Err(Error::BadHandle(fd));
        }
        Ok(())
    }

    fn take_from_storage(&self, fd: RawFd) -> Result<Option<Arc<EventDescriptor>>> {
        let Some(storage) = &self.inner.storage else {
            return Ok(None);
        };
        match storage.remove(fd) {
            Ok(record) => Ok(Some(record)),
            Err(crate::descriptor::StorageError::RemoveUnsupported) => Ok(None),
            Err(err) => Err(Error::Storage(err)),
        }
    }
}

impl std::fmt::Debug for EventMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMachine")
            .field("queue_fd", &self.inner.queue.raw_fd())
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_default_capacity() {
        let machine = EventMachine::new(Config::new()).expect("machine creation");
        assert_eq!(machine.capacity(), DEFAULT_CAPACITY);
        machine.destroy().expect("destroy");
    }

    #[test]
    fn zero_capacity_supplied_buffer_is_rejected() {
        let config = Config::new().buffer(Events::with_capacity(0));
        assert!(matches!(
            EventMachine::new(config),
            Err(Error::InvalidCapacity)
        ));
    }

    #[test]
    fn mismatched_supplied_buffer_is_rejected() {
        let config = Config::new().capacity(16).buffer(Events::with_capacity(8));
        assert!(matches!(
            EventMachine::new(config),
            Err(Error::InvalidCapacity)
        ));
    }

    #[test]
    fn unset_capacity_forces_an_internal_buffer() {
        let config = Config::new().buffer(Events::with_capacity(DEFAULT_CAPACITY));
        let machine = EventMachine::new(config).expect("machine creation");
        assert_eq!(machine.capacity(), DEFAULT_CAPACITY);
        // The supplied buffer was not adopted, so destroy has nothing to
        // hand back.
        assert!(machine.destroy().expect("destroy").is_none());
    }

    #[test]
    fn negative_fd_is_rejected_before_side_effects() {
        let machine = EventMachine::new(Config::new()).expect("machine creation");
        let descriptor = EventDescriptor::new(-3, Interest::READABLE, |_, _, _| {});
        let err = machine.add(descriptor).expect_err("negative fd");
        assert!(matches!(err, Error::BadHandle(-3)));
        let err = machine.delete(-3).expect_err("negative fd");
        assert!(matches!(err, Error::BadHandle(-3)));
        machine.destroy().expect("destroy");
    }

    #[test]
    fn operations_after_destroy_fail_on_bad_handle() {
        let machine = EventMachine::new(Config::new()).expect("machine creation");
        machine.destroy().expect("destroy");

        let descriptor = EventDescriptor::new(0, Interest::READABLE, |_, _, _| {});
        assert!(machine.add(descriptor).expect_err("add").is_bad_handle());
        assert!(machine.delete(0).expect_err("delete").is_bad_handle());
        assert!(machine.terminate().expect_err("terminate").is_bad_handle());
    }
}
