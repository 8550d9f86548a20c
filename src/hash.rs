use std::hash::{BuildHasher, Hash, Hasher};

#[inline]
pub(crate) fn make_hash<Q, H>(hash_builder: &H, val: &Q) -> u64
where
    Q: Hash + ?Sized,
    H: BuildHasher,
{
    let mut state = hash_builder.build_hasher();
    val.hash(&mut state);
    state.finish()
}

/// Shift that maps a hash onto `0..shard_amount`. `shard_amount` must be a power of two.
#[inline]
pub(crate) fn shard_shift(shard_amount: usize) -> u32 {
    debug_assert!(shard_amount.is_power_of_two());
    u64::BITS - shard_amount.trailing_zeros()
}

#[inline]
pub(crate) fn shard_index(hash: u64, shift: u32) -> usize {
    // skip the top 7 bits, hashbrown uses them for its control bytes.
    (hash << 7).checked_shr(shift).unwrap_or(0) as usize
}

#[cfg(test)]
mod test_hash {
    use super::*;

    use hashbrown::hash_map::DefaultHashBuilder;

    #[test]
    fn test_same_key_same_hash() {
        let hash_builder = DefaultHashBuilder::default();

        let a = make_hash(&hash_builder, "key");
        let b = make_hash(&hash_builder, &"key".to_string());

        assert_eq!(a, b);
    }

    #[test]
    fn test_single_shard() {
        let shift = shard_shift(1);

        assert_eq!(shard_index(u64::MAX, shift), 0);
        assert_eq!(shard_index(0, shift), 0);
    }

    #[test]
    fn test_shard_index_in_range() {
        for shard_amount in [2usize, 4, 16, 256] {
            let shift = shard_shift(shard_amount);
            for hash in [0u64, 1, u64::MAX, 0xDEAD_BEEF_0000_0000, 0x0123_4567_89AB_CDEF] {
                assert!(shard_index(hash, shift) < shard_amount);
            }
        }
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let hash_builder = DefaultHashBuilder::default();
        let shift = shard_shift(8);

        let mut seen = [false; 8];
        for i in 0..1024 {
            seen[shard_index(make_hash(&hash_builder, &i), shift)] = true;
        }

        assert!(seen.iter().all(|v| *v));
    }
}
