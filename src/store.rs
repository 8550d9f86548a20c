use crate::hash::*;
use crate::{Deadline, Entry, StoreOptions};

use hashbrown::hash_map::{DefaultHashBuilder, RawEntryMut};
use hashbrown::HashMap;

use crossbeam::utils::CachePadded;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, trace};

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::time::{Duration, Instant};

type Shard<K, V, H> = CachePadded<RwLock<HashMap<K, Entry<V>, H>>>;

/// Concurrent key-value store whose entries expire at a per-entry [`Deadline`].
///
/// The store is split into shards, each guarded by its own reader/writer lock. Reads never
/// block reads, and writes only block the shard holding the key.
///
/// Expired entries are never observable. A read that finds one evicts it on the spot, and
/// [`Store::prune`] evicts every expired entry in one pass.
pub struct Store<K, V, H = DefaultHashBuilder> {
    shards: Box<[Shard<K, V, H>]>,
    shift: u32,
    hash_builder: H,
    options: StoreOptions,
}

impl<K, V> Store<K, V, DefaultHashBuilder> {
    /// Creates an empty `Store` whose entries written with [`Store::set`] never expire.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::{Deadline, Store};
    ///
    /// let store = Store::new();
    ///
    /// assert_eq!(store.set("hello", "world"), Deadline::Never);
    /// assert_eq!(store.get("hello"), Some(("world", Deadline::Never)));
    /// ```
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Creates an empty `Store` with the given options.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::{Store, StoreOptions};
    ///
    /// use std::time::Duration;
    ///
    /// let store = Store::with_options(
    ///     StoreOptions::new().with_default_timeout(Duration::from_secs(30)),
    /// );
    ///
    /// let deadline = store.set("session", 42);
    /// assert!(!deadline.is_never());
    /// # let _: Option<(i32, _)> = store.get("session");
    /// ```
    pub fn with_options(options: StoreOptions) -> Self {
        Self::with_options_and_hasher(options, DefaultHashBuilder::default())
    }
}

impl<K, V> Default for Store<K, V, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> Store<K, V, H>
where
    H: BuildHasher + Clone,
{
    pub fn with_options_and_hasher(options: StoreOptions, hash_builder: H) -> Self {
        let shard_amount = options.shard_amount();
        let shards = (0..shard_amount)
            .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hash_builder.clone()))))
            .collect();

        Self {
            shards,
            shift: shard_shift(shard_amount),
            hash_builder,
            options,
        }
    }
}

impl<K, V, H> Store<K, V, H> {
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Returns the number of entries physically held, including expired entries which have
    /// not been evicted yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::Store;
    ///
    /// use std::thread::sleep;
    /// use std::time::Duration;
    ///
    /// let store = Store::new();
    /// store.set_with_timeout("a", 1, Duration::from_millis(10));
    ///
    /// sleep(Duration::from_millis(20));
    /// assert_eq!(store.len_approx(), 1);
    /// assert_eq!(store.len(), 0);
    /// ```
    pub fn len_approx(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns the number of entries which have not expired.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .values()
                    .filter(|entry| !entry.is_expired_at(now))
                    .count()
            })
            .sum()
    }

    /// Returns `true` if the store holds no live entry.
    pub fn is_empty(&self) -> bool {
        let now = Instant::now();
        self.shards.iter().all(|shard| {
            shard
                .read()
                .values()
                .all(|entry| entry.is_expired_at(now))
        })
    }

    /// Removes every entry, expired or not.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    /// Evicts every expired entry and returns how many were evicted.
    ///
    /// Shards are visited one at a time. Scanning a shard never blocks its readers, but it
    /// does block writers to that shard, and a shard holding expired entries is write locked
    /// while they are evicted. Entries written while the pass runs may or may not be visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::Store;
    ///
    /// use std::thread::sleep;
    /// use std::time::Duration;
    ///
    /// let store = Store::new();
    /// store.set_with_timeout("gone", 1, Duration::from_millis(10));
    /// store.set("kept", 2);
    ///
    /// sleep(Duration::from_millis(20));
    /// assert_eq!(store.prune(), 1);
    /// assert_eq!(store.len_approx(), 1);
    /// ```
    pub fn prune(&self) -> usize {
        let started = Instant::now();
        let mut evicted = 0;

        for shard in self.shards.iter() {
            let now = Instant::now();

            let guard = shard.upgradable_read();
            if !guard.values().any(|entry| entry.is_expired_at(now)) {
                continue;
            }

            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            let before = guard.len();
            guard.retain(|_, entry| !entry.is_expired_at(now));
            evicted += before - guard.len();
        }

        debug!(evicted, elapsed = ?started.elapsed(), "pruned expired entries");
        evicted
    }
}

impl<K, V, H> Store<K, V, H>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    #[inline]
    fn shard(&self, hash: u64) -> &RwLock<HashMap<K, Entry<V>, H>> {
        &self.shards[shard_index(hash, self.shift)]
    }

    /// Stores `v` under `k` using the configured default timeout, or without expiration if
    /// there is none. Returns the deadline recorded for the entry.
    pub fn set(&self, k: K, v: V) -> Deadline {
        let deadline = match self.options.default_timeout() {
            Some(timeout) => Deadline::after(timeout),
            None => Deadline::Never,
        };

        self.set_with_deadline(k, v, deadline)
    }

    /// Stores `v` under `k`, expiring `timeout` from now. The default timeout is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::Store;
    ///
    /// use std::thread::sleep;
    /// use std::time::Duration;
    ///
    /// let store = Store::new();
    /// let deadline = store.set_with_timeout("hello", "world", Duration::from_millis(10));
    /// assert_eq!(store.get("hello"), Some(("world", deadline)));
    ///
    /// sleep(Duration::from_millis(20));
    /// assert_eq!(store.get("hello"), None);
    /// ```
    pub fn set_with_timeout(&self, k: K, v: V, timeout: Duration) -> Deadline {
        self.set_with_deadline(k, v, Deadline::after(timeout))
    }

    /// Stores `v` under `k` with exactly the given deadline and returns it unchanged.
    ///
    /// Any previous entry for `k` is replaced, value and deadline both.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::{Deadline, Store};
    ///
    /// use std::time::{Duration, Instant};
    ///
    /// let store = Store::new();
    /// let deadline = Deadline::At(Instant::now() + Duration::from_secs(60));
    ///
    /// assert_eq!(store.set_with_deadline("k", "a", Deadline::Never), Deadline::Never);
    /// assert_eq!(store.set_with_deadline("k", "b", deadline), deadline);
    /// assert_eq!(store.get("k"), Some(("b", deadline)));
    /// ```
    pub fn set_with_deadline(&self, k: K, v: V, deadline: Deadline) -> Deadline {
        let hash = make_hash(&self.hash_builder, &k);
        let entry = Entry::new(v, deadline);

        let mut shard = self.shard(hash).write();
        match shard.raw_entry_mut().from_key_hashed_nocheck(hash, &k) {
            RawEntryMut::Occupied(mut occupied) => {
                occupied.insert(entry);
            }
            RawEntryMut::Vacant(vacant) => {
                vacant.insert_hashed_nocheck(hash, k, entry);
            }
        }

        deadline
    }

    /// Returns the deadline of the entry for `k`, or `None` if there is no live entry.
    ///
    /// An expired entry is evicted as a side effect.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::{Deadline, Store};
    ///
    /// let store = Store::new();
    /// assert_eq!(store.has("hello"), None);
    ///
    /// store.set("hello", "world");
    /// assert_eq!(store.has("hello"), Some(Deadline::Never));
    /// ```
    pub fn has<Q: ?Sized>(&self, k: &Q) -> Option<Deadline>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.lookup(k, Entry::deadline)
    }

    /// Returns `true` if the store holds a live entry for `k`.
    pub fn contains_key<Q: ?Sized>(&self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.has(k).is_some()
    }

    /// Removes the entry for `k`. Does nothing if there is none.
    pub fn delete<Q: ?Sized>(&self, k: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.remove_entry(k);
    }

    /// Removes the entry for `k`, returning its value if it had not expired.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::Store;
    ///
    /// let store = Store::new();
    /// store.set("a", 1);
    ///
    /// assert_eq!(store.remove("a"), Some(1));
    /// assert_eq!(store.remove("a"), None);
    /// ```
    pub fn remove<Q: ?Sized>(&self, k: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.remove_entry(k)
            .filter(|entry| !entry.deadline().is_expired())
            .map(|entry| entry.into_inner().0)
    }

    fn remove_entry<Q: ?Sized>(&self, k: &Q) -> Option<Entry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, k);

        let mut shard = self.shard(hash).write();
        match shard.raw_entry_mut().from_key_hashed_nocheck(hash, k) {
            RawEntryMut::Occupied(occupied) => Some(occupied.remove()),
            RawEntryMut::Vacant(_) => None,
        }
    }

    /// Applies `f` to the live entry for `k`, evicting it instead if it has expired.
    fn lookup<Q: ?Sized, R>(&self, k: &Q, f: impl FnOnce(&Entry<V>) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, k);
        let shard = self.shard(hash);
        let now = Instant::now();

        {
            let guard = shard.read();
            match guard.raw_entry().from_key_hashed_nocheck(hash, k) {
                None => return None,
                Some((_, entry)) if !entry.is_expired_at(now) => return Some(f(entry)),
                Some(_) => {}
            }
        }

        let mut guard = shard.write();
        if let RawEntryMut::Occupied(occupied) = guard.raw_entry_mut().from_key_hashed_nocheck(hash, k) {
            // the entry could have been replaced between the two locks.
            if occupied.get().is_expired_at(now) {
                occupied.remove();
                trace!("evicted expired entry on read");
            }
        }

        None
    }
}

impl<K, V, H> Store<K, V, H>
where
    K: Hash + Eq,
    V: Clone,
    H: BuildHasher,
{
    /// Returns a clone of the value stored for `k` together with its deadline.
    ///
    /// Returns `None` if there is no entry or the entry has expired, in which case the
    /// expired entry is evicted before returning.
    ///
    /// # Examples
    ///
    /// ```
    /// use lapse::{Deadline, Store};
    ///
    /// let store = Store::new();
    /// assert_eq!(store.get("hello"), None);
    ///
    /// store.set("hello", "world".to_string());
    /// assert_eq!(store.get("hello"), Some(("world".to_string(), Deadline::Never)));
    /// ```
    pub fn get<Q: ?Sized>(&self, k: &Q) -> Option<(V, Deadline)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.lookup(k, Entry::to_pair)
    }
}

impl<K, V, H> fmt::Debug for Store<K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("len_approx", &self.len_approx())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod test_store {
    use super::Store;
    use crate::{Deadline, StoreOptions};

    use std::thread::sleep;
    use std::time::{Duration, Instant};

    fn store() -> Store<String, String> {
        Store::new()
    }

    #[test]
    fn test_get_missing_key() {
        let store = store();

        assert!(store.get("hello").is_none());
        assert!(store.has("hello").is_none());
        assert!(!store.contains_key("hello"));
    }

    #[test]
    fn test_set_get() {
        let store = store();

        let d = store.set("hello".into(), "world".into());
        assert_eq!(d, Deadline::Never);

        assert_eq!(store.get("hello"), Some(("world".to_string(), d)));
    }

    #[test]
    fn test_set_has() {
        let store = store();

        let d = store.set("hello".into(), "world".into());

        assert_eq!(store.has("hello"), Some(d));
        assert!(store.contains_key("hello"));
    }

    #[test]
    fn test_default_never_expires() {
        let store = store();

        store.set("k".into(), "v".into());
        sleep(Duration::from_millis(20));

        assert_eq!(store.get("k"), Some(("v".to_string(), Deadline::Never)));
        assert_eq!(store.prune(), 0);
    }

    #[test]
    fn test_default_timeout() {
        let store: Store<String, String> = Store::with_options(
            StoreOptions::new().with_default_timeout(Duration::from_millis(50)),
        );

        let before = Instant::now();
        let d = store.set("hello".into(), "world".into());
        let after = Instant::now();

        let at = d.instant().unwrap();
        assert!(at >= before + Duration::from_millis(50));
        assert!(at <= after + Duration::from_millis(50));
        assert_eq!(store.get("hello"), Some(("world".to_string(), d)));

        sleep(Duration::from_millis(80));
        assert!(store.get("hello").is_none());
    }

    #[test]
    fn test_set_with_timeout_ignores_default() {
        let store: Store<String, String> = Store::with_options(
            StoreOptions::new().with_default_timeout(Duration::from_secs(3600)),
        );

        store.set_with_timeout("hello".into(), "world".into(), Duration::from_millis(20));
        sleep(Duration::from_millis(50));

        assert!(store.get("hello").is_none());
    }

    #[test]
    fn test_set_with_timeout() {
        let store = store();

        let before = Instant::now();
        let d = store.set_with_timeout("hello".into(), "world".into(), Duration::from_millis(100));
        assert!(d.instant().unwrap() >= before + Duration::from_millis(100));

        assert_eq!(store.get("hello"), Some(("world".to_string(), d)));

        sleep(Duration::from_millis(150));
        assert!(store.get("hello").is_none());
        assert!(store.has("hello").is_none());
    }

    #[test]
    fn test_set_with_deadline() {
        let store = store();

        let t = Instant::now() + Duration::from_millis(100);
        let d = store.set_with_deadline("hello".into(), "world".into(), Deadline::At(t));
        assert_eq!(d, Deadline::At(t));

        assert_eq!(store.get("hello"), Some(("world".to_string(), Deadline::At(t))));

        sleep(Duration::from_millis(150));
        assert!(store.get("hello").is_none());
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let store = store();

        let past = Instant::now() - Duration::from_millis(1);
        store.set_with_deadline("hello".into(), "world".into(), Deadline::At(past));
        assert_eq!(store.len_approx(), 1);

        assert!(store.get("hello").is_none());
        assert_eq!(store.len_approx(), 0);

        store.set_with_deadline("hello".into(), "world".into(), Deadline::At(past));
        assert!(store.has("hello").is_none());
        assert_eq!(store.len_approx(), 0);
    }

    #[test]
    fn test_delete() {
        let store = store();

        // deleting an absent key is a no-op.
        store.delete("hello");

        store.set("hello".into(), "world".into());
        store.set("other".into(), "value".into());
        store.delete("hello");

        assert!(store.get("hello").is_none());
        assert!(store.get("other").is_some());

        store.delete("hello");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = store();

        assert!(store.remove("hello").is_none());

        store.set("hello".into(), "world".into());
        assert_eq!(store.remove("hello"), Some("world".to_string()));
        assert!(store.get("hello").is_none());

        let past = Instant::now() - Duration::from_millis(1);
        store.set_with_deadline("hello".into(), "world".into(), Deadline::At(past));
        assert!(store.remove("hello").is_none());
        assert_eq!(store.len_approx(), 0);
    }

    #[test]
    fn test_overwrite() {
        let store = store();

        store.set_with_timeout("k".into(), "a".into(), Duration::from_millis(10));
        store.set("k".into(), "b".into());

        assert_eq!(store.get("k"), Some(("b".to_string(), Deadline::Never)));

        // the replacing write also replaces the deadline.
        sleep(Duration::from_millis(30));
        assert_eq!(store.get("k"), Some(("b".to_string(), Deadline::Never)));
        assert_eq!(store.len_approx(), 1);
    }

    #[test]
    fn test_overwrite_expired() {
        let store = store();

        let past = Instant::now() - Duration::from_millis(1);
        store.set_with_deadline("k".into(), "a".into(), Deadline::At(past));
        store.set("k".into(), "b".into());

        assert_eq!(store.get("k"), Some(("b".to_string(), Deadline::Never)));
    }

    #[test]
    fn test_prune_all_expired() {
        let store = store();

        for i in 0..100 {
            store.set_with_timeout(i.to_string(), "v".into(), Duration::from_millis(10));
        }
        assert_eq!(store.len_approx(), 100);

        sleep(Duration::from_millis(30));
        assert_eq!(store.prune(), 100);
        assert_eq!(store.len_approx(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_prune_keeps_live() {
        let store = store();

        for i in 0..50 {
            store.set_with_timeout(format!("expired-{}", i), "v".into(), Duration::from_millis(10));
            store.set(format!("kept-{}", i), "v".into());
            store.set_with_timeout(format!("later-{}", i), "v".into(), Duration::from_secs(3600));
        }

        sleep(Duration::from_millis(30));
        assert_eq!(store.prune(), 50);
        assert_eq!(store.len_approx(), 100);

        for i in 0..50 {
            assert!(store.get(format!("kept-{}", i).as_str()).is_some());
            assert!(store.get(format!("later-{}", i).as_str()).is_some());
        }

        assert_eq!(store.prune(), 0);
    }

    #[test]
    fn test_len() {
        let store = store();

        assert_eq!(store.len(), 0);
        assert!(store.is_empty());

        store.set("a".into(), "1".into());
        store.set("b".into(), "2".into());
        store.set_with_deadline(
            "c".into(),
            "3".into(),
            Deadline::At(Instant::now() - Duration::from_millis(1)),
        );

        assert_eq!(store.len(), 2);
        assert_eq!(store.len_approx(), 3);
        assert!(!store.is_empty());

        store.delete("a");
        store.delete("b");
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.len_approx(), 1);
    }

    #[test]
    fn test_clear() {
        let store = store();

        store.set("a".into(), "1".into());
        store.set("b".into(), "2".into());
        store.clear();

        assert_eq!(store.len_approx(), 0);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_single_shard() {
        let store: Store<u32, u32> = Store::with_options(StoreOptions::new().with_shard_amount(1));

        for i in 0..64 {
            store.set(i, i * 2);
        }

        for i in 0..64 {
            assert_eq!(store.get(&i), Some((i * 2, Deadline::Never)));
        }
        assert_eq!(store.len(), 64);
    }

    #[test]
    fn test_debug() {
        let store: Store<u32, u32> = Store::with_options(StoreOptions::new().with_shard_amount(2));
        store.set(1, 1);

        let debug = format!("{:?}", store);
        assert!(debug.contains("shards: 2"));
        assert!(debug.contains("len_approx: 1"));
    }
}
