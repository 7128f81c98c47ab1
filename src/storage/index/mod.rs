use std::fmt::Debug;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::MemDbResult;
use crate::utils::scalar::ScalarValue;

pub mod btree_index;
pub mod hash_index;
pub mod table_index;

pub use btree_index::BPlusTree;
pub use hash_index::ExtendibleHashIndex;
pub use table_index::TableIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum IndexKind {
    #[strum(serialize = "btree")]
    BTree,
    #[strum(serialize = "hash")]
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already existed and its value was replaced.
    Updated,
}

/// Point-in-time counters exposed to the optimizer and to statistics reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub entries: usize,
    pub searches: u64,
    pub total_search_depth: u64,
    pub splits: u64,
    pub merges: u64,
    /// Levels from root to leaf. Always 1 for hash indexes.
    pub height: usize,
    pub global_depth: u32,
    pub directory_size: usize,
    pub buckets: usize,
}

impl IndexStats {
    pub fn avg_search_depth(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            self.total_search_depth as f64 / self.searches as f64
        }
    }
}

/// Common surface of every index structure a table can bind to a column.
pub trait IndexStructure<K, V>: Debug + Send + Sync {
    fn kind(&self) -> IndexKind;

    fn search(&self, key: &K) -> MemDbResult<Option<&V>>;

    fn insert(&mut self, key: K, value: V) -> MemDbResult<InsertOutcome>;

    fn delete(&mut self, key: &K) -> MemDbResult<bool>;

    /// Entries with keys inside the bounds, in ascending key order.
    fn range(&self, lo: Bound<&K>, hi: Bound<&K>) -> MemDbResult<Vec<(K, V)>>;

    fn range_search(&self, lo: &K, hi: &K, inclusive: bool) -> MemDbResult<Vec<(K, V)>> {
        if inclusive {
            self.range(Bound::Included(lo), Bound::Included(hi))
        } else {
            self.range(Bound::Excluded(lo), Bound::Excluded(hi))
        }
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> IndexStats;
}

/// Keys that can be placed into the coarse B+Tree insert histogram.
pub trait IndexKey: Ord + Clone + Debug + Send + Sync {
    /// Histogram bucket for this key, `None` when the key has no numeric position.
    fn histogram_bucket(&self, width: f64) -> Option<i64>;
}

fn bucket_of(value: f64, width: f64) -> Option<i64> {
    if width <= 0.0 || !value.is_finite() {
        return None;
    }
    Some((value / width).floor() as i64)
}

impl IndexKey for i64 {
    fn histogram_bucket(&self, width: f64) -> Option<i64> {
        bucket_of(*self as f64, width)
    }
}

impl IndexKey for i32 {
    fn histogram_bucket(&self, width: f64) -> Option<i64> {
        bucket_of(*self as f64, width)
    }
}

impl IndexKey for u64 {
    fn histogram_bucket(&self, width: f64) -> Option<i64> {
        bucket_of(*self as f64, width)
    }
}

impl IndexKey for String {
    fn histogram_bucket(&self, _width: f64) -> Option<i64> {
        None
    }
}

impl IndexKey for ScalarValue {
    fn histogram_bucket(&self, width: f64) -> Option<i64> {
        self.as_f64().and_then(|v| bucket_of(v, width))
    }
}
