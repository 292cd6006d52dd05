//! Interest flags for I/O readiness.

use std::ops::{BitOr, BitOrAssign};

/// Interest flags indicating what I/O events to monitor.
///
/// The same type carries the filter supplied at registration time and the
/// bits that actually fired when a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// No interest at all.
    pub const NONE: Interest = Interest(0);
    /// Interest in readable events.
    pub const READABLE: Interest = Interest(0b0_0001);
    /// Interest in writable events.
    pub const WRITABLE: Interest = Interest(0b0_0010);
    /// Interest in error conditions on the descriptor.
    pub const ERROR: Interest = Interest(0b0_0100);
    /// Interest in peer hang-up.
    pub const HUP: Interest = Interest(0b0_1000);
    /// Request edge-triggered delivery where the platform supports it.
    ///
    /// Edge-triggered registrations report readiness once per state
    /// transition; the handler must drain the descriptor before re-waiting.
    pub const EDGE_TRIGGERED: Interest = Interest(0b1_0000);

    /// Returns interest in both readable and writable events.
    #[must_use]
    pub const fn both() -> Self {
        Interest(Self::READABLE.0 | Self::WRITABLE.0)
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if readable interest is set.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if writable interest is set.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Returns true if the error flag is set.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    /// Returns true if the peer hang-up flag is set.
    #[must_use]
    pub const fn is_hup(&self) -> bool {
        self.0 & Self::HUP.0 != 0
    }

    /// Returns true if edge-triggered mode is requested.
    #[must_use]
    pub const fn is_edge_triggered(&self) -> bool {
        self.0 & Self::EDGE_TRIGGERED.0 != 0
    }

    /// Returns true if every flag of `other` is set in `self`.
    #[must_use]
    pub const fn contains(&self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines interests.
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Removes interest.
    #[must_use]
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        *self = self.add(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_remove() {
        let interest = Interest::READABLE | Interest::HUP | Interest::EDGE_TRIGGERED;
        assert!(interest.is_readable());
        assert!(interest.is_hup());
        assert!(interest.is_edge_triggered());
        assert!(!interest.is_writable());

        let stripped = interest.remove(Interest::EDGE_TRIGGERED);
        assert!(!stripped.is_edge_triggered());
        assert!(stripped.is_readable());
    }

    #[test]
    fn contains_requires_all_bits() {
        let interest = Interest::both();
        assert!(interest.contains(Interest::READABLE));
        assert!(interest.contains(Interest::both()));
        assert!(!interest.contains(Interest::both() | Interest::ERROR));
    }

    #[test]
    fn none_is_empty() {
        assert!(Interest::NONE.is_empty());
        assert!(!Interest::READABLE.is_empty());
    }
}
