//! Portable readiness events and the reusable batch buffer.
//!
//! The platform backends translate raw `epoll_event`/`kevent` structures
//! into [`Event`] values, preserving the order the kernel returned them in.
//! [`Events`] is the fixed-capacity batch container the dispatch loop walks;
//! [`EventBuffer`] records whether that container was supplied by the caller
//! or allocated by the machine, so destroy knows whether to hand it back.

use crate::interest::Interest;

/// A single readiness notification.
///
/// The token is the value supplied to the multiplexer at registration time;
/// the reactor core tags every watch with the watched descriptor itself and
/// recovers the registration record from it on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    ready: Interest,
}

impl Event {
    /// Creates a new event with the given token and fired readiness bits.
    #[must_use]
    pub const fn new(token: u64, ready: Interest) -> Self {
        Self { token, ready }
    }

    /// The registration token this event belongs to.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// The readiness bits that fired.
    #[must_use]
    pub const fn ready(&self) -> Interest {
        self.ready
    }

    /// Returns true if the source is readable.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }

    /// Returns true if the source is writable.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.ready.is_writable()
    }

    /// Returns true if an error condition was reported.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.ready.is_error()
    }

    /// Returns true if the peer hung up.
    #[must_use]
    pub const fn is_hup(&self) -> bool {
        self.ready.is_hup()
    }
}

/// Fixed-capacity container for one batch of readiness events.
///
/// Re-used across wait calls to avoid allocation. The capacity bounds how
/// many events one wait call can return; events beyond it are dropped by
/// the backend (the kernel re-reports pending readiness on the next wait).
#[derive(Debug)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates a new batch buffer able to hold `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears all events, maintaining capacity.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Pushes an event, silently dropping it once the capacity is reached.
    pub(crate) fn push(&mut self, event: Event) {
        if self.inner.len() < self.capacity {
            self.inner.push(event);
        }
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the batch capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over the batch in kernel-returned order.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Events {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

/// Ownership of the batch buffer.
///
/// Either the machine borrowed a caller-supplied buffer for its lifetime,
/// or it allocated one itself. `destroy` hands a supplied buffer back to
/// the caller and simply drops an internal one.
#[derive(Debug)]
pub enum EventBuffer {
    /// Buffer allocated by the machine at construction time.
    Internal(Events),
    /// Buffer supplied by the caller, returned on destroy.
    Supplied(Events),
}

impl EventBuffer {
    /// Mutable access to the underlying batch, whoever owns it.
    pub(crate) fn events_mut(&mut self) -> &mut Events {
        match self {
            Self::Internal(events) | Self::Supplied(events) => events,
        }
    }

    /// The batch capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self {
            Self::Internal(events) | Self::Supplied(events) => events.capacity(),
        }
    }

    /// Consumes the buffer, returning the batch only if the caller supplied it.
    #[must_use]
    pub fn into_supplied(self) -> Option<Events> {
        match self {
            Self::Internal(_) => None,
            Self::Supplied(events) => Some(events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_preserve_push_order() {
        let mut events = Events::with_capacity(8);
        events.push(Event::new(3, Interest::READABLE));
        events.push(Event::new(1, Interest::WRITABLE));
        events.push(Event::new(2, Interest::READABLE | Interest::HUP));

        let tokens: Vec<u64> = events.iter().map(Event::token).collect();
        assert_eq!(tokens, vec![3, 1, 2]);
        assert!(events.iter().nth(2).expect("third event").is_hup());
    }

    #[test]
    fn events_respect_capacity() {
        let mut events = Events::with_capacity(2);
        for token in 0..5 {
            events.push(Event::new(token, Interest::READABLE));
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events.capacity(), 2);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut events = Events::with_capacity(4);
        events.push(Event::new(1, Interest::READABLE));
        events.clear();
        assert!(events.is_empty());
        assert_eq!(events.capacity(), 4);
    }

    #[test]
    fn supplied_buffer_is_reclaimable() {
        let supplied = EventBuffer::Supplied(Events::with_capacity(16));
        assert_eq!(supplied.capacity(), 16);
        let reclaimed = supplied.into_supplied().expect("supplied buffer");
        assert_eq!(reclaimed.capacity(), 16);

        let internal = EventBuffer::Internal(Events::with_capacity(16));
        assert!(internal.into_supplied().is_none());
    }
}
