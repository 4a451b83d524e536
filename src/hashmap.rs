use parking_lot::Mutex;
use rustc_hash::FxHashMap;

const L1_CACHE_BYTES: usize = 32 * 1024;

/// Largest power-of-two entry count whose key/value payload still fits the
/// L1 data cache. Used to size the hash containers that sit on the hot path
/// of the move applier.
pub fn max_size_to_fit_l1<K, V>() -> usize {
    let entry_bytes = std::mem::size_of::<K>() + std::mem::size_of::<V>();
    let entries = L1_CACHE_BYTES / entry_bytes.max(1);
    entries.next_power_of_two() >> 1
}

/// Concurrent hashmap for aggregating weighted pair keys during cluster
/// contraction. Grows as needed; concurrent writers combine values under a
/// per-shard lock.
///
/// The access protocol mirrors the contraction inner loop: the first touch
/// of a key installs `initial`, every further touch folds a value in with
/// `combiner`.
pub struct ConcurrentGrowingHashMap {
    shards: Box<[Mutex<FxHashMap<u64, i64>>]>,
    shard_mask: u64,
}

impl ConcurrentGrowingHashMap {
    pub fn with_capacity(capacity: usize) -> Self {
        let num_shards: usize = 64;
        let per_shard = (capacity / num_shards).max(4);
        let shards = (0..num_shards)
            .map(|_| Mutex::new(FxHashMap::with_capacity_and_hasher(per_shard, Default::default())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            shard_mask: num_shards as u64 - 1,
        }
    }

    /// Install `initial` for a fresh key, otherwise fold `value` into the
    /// stored one with `combiner`.
    pub fn insert_or_update<F>(&self, key: u64, initial: i64, combiner: F, value: i64)
    where
        F: Fn(&mut i64, i64),
    {
        let mut shard = self.shards[self.shard_of(key)].lock();
        match shard.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                combiner(entry.get_mut(), value);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(initial);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every stored entry. Intended for the serial-per-map passes of
    /// the contraction (each thread walks its own map).
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(u64, i64),
    {
        for shard in self.shards.iter() {
            for (&key, &value) in shard.lock().iter() {
                visitor(key, value);
            }
        }
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    fn shard_of(&self, key: u64) -> usize {
        // Fibonacci hashing spreads the packed pair keys across shards
        let hashed = key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ((hashed >> 32) & self.shard_mask) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_size_to_fit_l1_is_power_of_two() {
        // Act
        let size = max_size_to_fit_l1::<u64, (u32, u32)>();

        // Assert
        assert!(size.is_power_of_two());
        assert!(size * (8 + 8) <= L1_CACHE_BYTES);
    }

    #[test]
    fn test_insert_or_update_combines_on_collision() {
        // Arrange
        let map = ConcurrentGrowingHashMap::with_capacity(16);

        // Act
        map.insert_or_update(42, 3, |stored, value| *stored += value, 3);
        map.insert_or_update(42, 5, |stored, value| *stored += value, 5);
        map.insert_or_update(7, 1, |stored, value| *stored += value, 1);

        // Assert
        assert_eq!(map.len(), 2);
        let mut entries = Vec::new();
        map.for_each(|key, value| entries.push((key, value)));
        entries.sort_unstable();
        assert_eq!(entries, vec![(7, 1), (42, 8)]);
    }

    #[test]
    fn test_concurrent_inserts_sum_up() {
        // Arrange
        let map = ConcurrentGrowingHashMap::with_capacity(16);

        // Act: many threads hammer the same key
        rayon::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|_| {
                    for _ in 0..1000 {
                        map.insert_or_update(1, 1, |stored, value| *stored += value, 1);
                    }
                });
            }
        });

        // Assert
        let mut total = 0;
        map.for_each(|_, value| total = value);
        assert_eq!(total, 8000);
    }
}
