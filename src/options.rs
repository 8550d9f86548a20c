use once_cell::sync::Lazy;

use std::thread;
use std::time::Duration;

const MAX_SHARD_AMOUNT: usize = 1 << 16;

// computed once, the answer does not change while the process runs.
static DEFAULT_SHARD_AMOUNT: Lazy<usize> = Lazy::new(|| {
    let parallelism = thread::available_parallelism().map_or(1, |n| n.get());
    parallelism
        .saturating_mul(4)
        .clamp(1, MAX_SHARD_AMOUNT)
        .next_power_of_two()
});

/// Options used to build a [`Store`](crate::Store).
///
/// # Examples
///
/// ```
/// use lapse::StoreOptions;
///
/// use std::time::Duration;
///
/// let options = StoreOptions::new()
///     .with_default_timeout(Duration::from_secs(30))
///     .with_shard_amount(16);
///
/// assert_eq!(options.default_timeout(), Some(Duration::from_secs(30)));
/// assert_eq!(options.shard_amount(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    default_timeout: Option<Duration>,
    shard_amount: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_timeout: None,
            shard_amount: *DEFAULT_SHARD_AMOUNT,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied by [`Store::set`](crate::Store::set).
    ///
    /// A zero duration is the same as no timeout: entries written with `set` never expire.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Number of independently locked shards. Rounded up to a power of two, between 1 and
    /// 65536.
    #[must_use]
    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount.clamp(1, MAX_SHARD_AMOUNT).next_power_of_two();
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn shard_amount(&self) -> usize {
        self.shard_amount
    }
}
