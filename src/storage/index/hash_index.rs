use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::{IndexKind, IndexStats, IndexStructure, InsertOutcome};
use crate::config::HashIndexConfig;
use crate::error::{MemDbError, MemDbResult};

/// Past this depth a full bucket overflows instead of splitting again.
/// Only reachable when many keys share the same low hash bits.
const MAX_GLOBAL_DEPTH: u32 = 24;

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: u32,
    entries: Vec<(K, V)>,
}

/// Extendible hash index. The low `global_depth` bits of a key's hash select a
/// directory slot; several slots may share one bucket while its
/// `local_depth` is below `global_depth`.
#[derive(Debug)]
pub struct ExtendibleHashIndex<K, V> {
    global_depth: u32,
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    bucket_capacity: usize,
    len: usize,
    searches: AtomicU64,
    splits: u64,
    doublings: u64,
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl<K, V> ExtendibleHashIndex<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug + Send + Sync,
    V: Clone + std::fmt::Debug + Send + Sync,
{
    pub fn new(config: HashIndexConfig) -> MemDbResult<Self> {
        if config.bucket_capacity == 0 {
            return Err(MemDbError::NotSupport(
                "hash bucket capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            global_depth: 0,
            directory: vec![0],
            buckets: vec![Bucket {
                local_depth: 0,
                entries: Vec::with_capacity(config.bucket_capacity),
            }],
            bucket_capacity: config.bucket_capacity,
            len: 0,
            searches: AtomicU64::new(0),
            splits: 0,
            doublings: 0,
        })
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    fn slot(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.global_depth) - 1)) as usize
    }

    fn bucket_for(&self, key: &K) -> usize {
        self.directory[self.slot(hash_key(key))]
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.buckets[self.bucket_for(key)]
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: K, value: V) -> InsertOutcome {
        let capacity = self.bucket_capacity;
        loop {
            let bucket_idx = self.bucket_for(&key);
            let bucket = &mut self.buckets[bucket_idx];
            if let Some(entry) = bucket.entries.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return InsertOutcome::Updated;
            }
            if bucket.entries.len() < capacity || bucket.local_depth >= MAX_GLOBAL_DEPTH {
                bucket.entries.push((key, value));
                self.len += 1;
                return InsertOutcome::Inserted;
            }
            self.split_bucket(bucket_idx);
        }
    }

    fn split_bucket(&mut self, bucket_idx: usize) {
        let local_depth = self.buckets[bucket_idx].local_depth;
        if local_depth == self.global_depth {
            let mirror = self.directory.clone();
            self.directory.extend(mirror);
            self.global_depth += 1;
            self.doublings += 1;
            debug!("hash directory doubled to depth {}", self.global_depth);
        }

        let new_idx = self.buckets.len();
        let entries = std::mem::take(&mut self.buckets[bucket_idx].entries);
        self.buckets[bucket_idx].local_depth = local_depth + 1;
        let mut image = Bucket {
            local_depth: local_depth + 1,
            entries: Vec::with_capacity(self.bucket_capacity),
        };
        for (key, value) in entries {
            if (hash_key(&key) >> local_depth) & 1 == 1 {
                image.entries.push((key, value));
            } else {
                self.buckets[bucket_idx].entries.push((key, value));
            }
        }
        self.buckets.push(image);

        for (slot, target) in self.directory.iter_mut().enumerate() {
            if *target == bucket_idx && (slot >> local_depth) & 1 == 1 {
                *target = new_idx;
            }
        }
        self.splits += 1;
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let bucket_idx = self.bucket_for(key);
        let bucket = &mut self.buckets[bucket_idx];
        match bucket.entries.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.entries.swap_remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|(k, v)| (k, v)))
    }

    pub fn statistics(&self) -> IndexStats {
        IndexStats {
            entries: self.len,
            searches: self.searches.load(Ordering::Relaxed),
            total_search_depth: self.searches.load(Ordering::Relaxed),
            splits: self.splits,
            height: 1,
            global_depth: self.global_depth,
            directory_size: self.directory.len(),
            buckets: self.buckets.len(),
            ..Default::default()
        }
    }

    pub fn doublings(&self) -> u64 {
        self.doublings
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> MemDbResult<()> {
        if self.directory.len() != 1usize << self.global_depth {
            return Err(MemDbError::Internal("directory size mismatch".to_string()));
        }
        for (idx, bucket) in self.buckets.iter().enumerate() {
            if bucket.local_depth > self.global_depth {
                return Err(MemDbError::Internal(format!(
                    "bucket {idx} local depth exceeds global depth"
                )));
            }
            let refs = self.directory.iter().filter(|b| **b == idx).count();
            if refs != 1usize << (self.global_depth - bucket.local_depth) {
                return Err(MemDbError::Internal(format!(
                    "bucket {idx} referenced by {refs} slots"
                )));
            }
            for (key, _) in bucket.entries.iter() {
                if self.bucket_for(key) != idx {
                    return Err(MemDbError::Internal(format!("{key:?} in wrong bucket")));
                }
            }
        }
        Ok(())
    }
}

impl<K, V> IndexStructure<K, V> for ExtendibleHashIndex<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug + Send + Sync,
    V: Clone + std::fmt::Debug + Send + Sync,
{
    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn search(&self, key: &K) -> MemDbResult<Option<&V>> {
        Ok(self.get(key))
    }

    fn insert(&mut self, key: K, value: V) -> MemDbResult<InsertOutcome> {
        Ok(ExtendibleHashIndex::insert(self, key, value))
    }

    fn delete(&mut self, key: &K) -> MemDbResult<bool> {
        Ok(self.remove(key))
    }

    fn range(&self, _lo: Bound<&K>, _hi: Bound<&K>) -> MemDbResult<Vec<(K, V)>> {
        Err(MemDbError::NotSupport(
            "hash index does not support range scans".to_string(),
        ))
    }

    fn len(&self) -> usize {
        self.len
    }

    fn stats(&self) -> IndexStats {
        self.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn small_index() -> ExtendibleHashIndex<i64, String> {
        ExtendibleHashIndex::new(HashIndexConfig { bucket_capacity: 2 }).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let mut index = small_index();
        for k in 0..200 {
            assert_eq!(index.insert(k, format!("v{k}")), InsertOutcome::Inserted);
        }
        index.check_invariants().unwrap();
        for k in 0..200 {
            assert_eq!(index.get(&k), Some(&format!("v{k}")));
        }
        assert!(index.global_depth() > 0);
        assert!(index.doublings() > 0);

        assert_eq!(index.insert(7, "seven".to_string()), InsertOutcome::Updated);
        assert_eq!(index.get(&7).map(String::as_str), Some("seven"));

        for k in (0..200).step_by(2) {
            assert!(index.remove(&k));
        }
        for k in 0..200 {
            assert_eq!(index.get(&k).is_some(), k % 2 == 1);
        }
        assert!(!index.remove(&0));
        assert_eq!(IndexStructure::len(&index), 100);
    }

    #[test]
    fn test_matches_reference_map() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut index = small_index();
        let mut reference = HashMap::new();
        for _ in 0..5000 {
            let key = rng.random_range(0..800);
            if rng.random_bool(0.7) {
                index.insert(key, key.to_string());
                reference.insert(key, key.to_string());
            } else {
                assert_eq!(index.remove(&key), reference.remove(&key).is_some());
            }
        }
        index.check_invariants().unwrap();
        for key in 0..800 {
            assert_eq!(index.get(&key), reference.get(&key));
        }
        assert_eq!(index.iter().count(), reference.len());
    }

    #[test]
    fn test_range_not_supported() {
        let index = small_index();
        assert!(matches!(
            index.range_search(&1, &5, true),
            Err(MemDbError::NotSupport(_))
        ));
    }
}
