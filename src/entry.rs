use crate::Deadline;

use std::time::Instant;

/// A value together with its expiration deadline.
///
/// Entries are never modified in place. A write for an existing key replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry<V> {
    value: V,
    deadline: Deadline,
}

impl<V> Entry<V> {
    pub fn new(value: V, deadline: Deadline) -> Self {
        Self { value, deadline }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.deadline.is_expired_at(now)
    }

    pub fn into_inner(self) -> (V, Deadline) {
        (self.value, self.deadline)
    }
}

impl<V: Clone> Entry<V> {
    /// Clones the value out together with the deadline.
    pub(crate) fn to_pair(&self) -> (V, Deadline) {
        (self.value.clone(), self.deadline)
    }
}
