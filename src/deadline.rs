use std::time::{Duration, Instant};

/// Point in time after which an entry is considered absent.
///
/// Every [`Deadline::At`] sorts before [`Deadline::Never`], so the larger of two deadlines is
/// always the one that lives longer.
///
/// # Examples
///
/// ```
/// use lapse::Deadline;
///
/// use std::time::{Duration, Instant};
///
/// let now = Instant::now();
/// let deadline = Deadline::At(now + Duration::from_millis(10));
///
/// assert!(!deadline.is_expired_at(now));
/// assert!(deadline.is_expired_at(now + Duration::from_millis(11)));
/// assert!(!Deadline::Never.is_expired_at(now + Duration::from_secs(3600)));
/// assert!(deadline < Deadline::Never);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Expires once this instant has passed.
    At(Instant),
    /// Never expires. Only deletion, replacement or `clear` removes the entry.
    Never,
}

impl Deadline {
    /// Deadline `timeout` from now.
    ///
    /// A timeout too large to be represented as an [`Instant`] yields [`Deadline::Never`].
    #[inline]
    pub fn after(timeout: Duration) -> Self {
        Self::after_from(Instant::now(), timeout)
    }

    #[inline]
    pub(crate) fn after_from(now: Instant, timeout: Duration) -> Self {
        match now.checked_add(timeout) {
            Some(at) => Deadline::At(at),
            None => Deadline::Never,
        }
    }

    /// Returns `true` if `now` is strictly past this deadline.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self {
            Deadline::At(at) => now > *at,
            Deadline::Never => false,
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub fn is_never(&self) -> bool {
        matches!(self, Deadline::Never)
    }

    /// The expiration instant, or `None` for [`Deadline::Never`].
    #[inline]
    pub fn instant(&self) -> Option<Instant> {
        match self {
            Deadline::At(at) => Some(*at),
            Deadline::Never => None,
        }
    }

    /// Time left before expiration. `None` for [`Deadline::Never`], zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.instant()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl From<Instant> for Deadline {
    fn from(at: Instant) -> Self {
        Deadline::At(at)
    }
}
