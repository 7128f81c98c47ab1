use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;

use crate::config::MvccConfig;
use crate::storage::tuple::Row;
use crate::transaction::ResourceId;

pub type Timestamp = u64;

/// One committed state of a resource. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub value: Option<Row>,
    pub commit_ts: Timestamp,
}

/// Committed version chains, oldest first.
///
/// Timestamps come from a single monotonic clock. A batch is installed under
/// `commit_latch` and the clock is published only after every version of the
/// batch is in place, so a snapshot taken at `current_ts()` never observes a
/// half-installed commit.
#[derive(Debug)]
pub struct MvccStore {
    config: MvccConfig,
    chains: DashMap<ResourceId, Vec<Version>>,
    clock: AtomicU64,
    commit_latch: Mutex<()>,
}

impl MvccStore {
    pub fn new(config: MvccConfig) -> Self {
        Self {
            config,
            chains: DashMap::new(),
            clock: AtomicU64::new(0),
            commit_latch: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MvccConfig {
        &self.config
    }

    /// Latest published commit timestamp.
    pub fn current_ts(&self) -> Timestamp {
        self.clock.load(Ordering::Acquire)
    }

    /// Newest version committed at or before `ts`. `None` when the resource
    /// has no version visible at `ts`.
    pub fn read(&self, key: &ResourceId, ts: Timestamp) -> Option<Version> {
        let chain = self.chains.get(key)?;
        chain.iter().rev().find(|v| v.commit_ts <= ts).cloned()
    }

    pub fn contains(&self, key: &ResourceId) -> bool {
        self.chains.contains_key(key)
    }

    /// Record `value` as the pre-existing state of `key` (timestamp 0) when the
    /// resource has never been versioned. Rows loaded outside a transaction
    /// enter the version store this way on their first transactional write.
    pub fn seed_if_absent(&self, key: &ResourceId, value: Option<Row>) -> bool {
        let mut seeded = false;
        self.chains.entry(key.clone()).or_insert_with(|| {
            seeded = true;
            vec![Version {
                value,
                commit_ts: 0,
            }]
        });
        seeded
    }

    /// Install a committed write-set and return its commit timestamp.
    pub fn install_batch<I>(&self, writes: I) -> Timestamp
    where
        I: IntoIterator<Item = (ResourceId, Option<Row>)>,
    {
        let _latch = self.commit_latch.lock();
        let commit_ts = self.clock.load(Ordering::Acquire) + 1;
        for (key, value) in writes {
            self.chains
                .entry(key)
                .or_default()
                .push(Version { value, commit_ts });
        }
        self.clock.store(commit_ts, Ordering::Release);
        commit_ts
    }

    /// Drop versions that no snapshot at or after `watermark` can see.
    /// Every chain keeps at least its newest version.
    pub fn gc(&self, watermark: Timestamp) -> usize {
        let mut removed = 0;
        for mut chain in self.chains.iter_mut() {
            // the newest version visible at the watermark must survive
            let keep_from = chain
                .iter()
                .rposition(|v| v.commit_ts <= watermark)
                .unwrap_or(0);
            if keep_from > 0 {
                chain.drain(..keep_from);
                removed += keep_from;
            }
        }
        if removed > 0 {
            debug!("mvcc gc below ts {watermark} removed {removed} versions");
        }
        removed
    }

    /// Replace every chain with a single base version per resource.
    pub fn reset<I>(&self, base: I)
    where
        I: IntoIterator<Item = (ResourceId, Row)>,
    {
        let _latch = self.commit_latch.lock();
        self.chains.clear();
        for (key, row) in base {
            self.chains.insert(
                key,
                vec![Version {
                    value: Some(row),
                    commit_ts: 0,
                }],
            );
        }
    }

    /// Forget every chain that belongs to `table`.
    pub fn drop_table(&self, table: &str) -> usize {
        let before = self.chains.len();
        self.chains
            .retain(|key, _| !key.table.eq_ignore_ascii_case(table));
        before - self.chains.len()
    }

    pub fn chain_len(&self, key: &ResourceId) -> usize {
        self.chains.get(key).map(|chain| chain.len()).unwrap_or(0)
    }

    pub fn version_count(&self) -> usize {
        self.chains.iter().map(|chain| chain.len()).sum()
    }
}

impl Default for MvccStore {
    fn default() -> Self {
        Self::new(MvccConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64) -> ResourceId {
        ResourceId::new("accounts", id)
    }

    #[test]
    fn snapshot_reads_see_only_earlier_commits() {
        let store = MvccStore::default();
        assert!(store.seed_if_absent(&key(1), Some(vec![100.into()])));
        assert!(!store.seed_if_absent(&key(1), None));

        let snapshot = store.current_ts();
        let ts1 = store.install_batch([(key(1), Some(vec![70.into()]))]);
        let ts2 = store.install_batch([(key(1), None), (key(2), Some(vec![5.into()]))]);
        assert!(ts1 < ts2);
        assert_eq!(store.current_ts(), ts2);

        assert_eq!(
            store.read(&key(1), snapshot).unwrap().value,
            Some(vec![100.into()])
        );
        assert_eq!(
            store.read(&key(1), ts1).unwrap().value,
            Some(vec![70.into()])
        );
        assert_eq!(store.read(&key(1), ts2).unwrap().value, None);
        assert!(store.read(&key(2), ts1).is_none());
        assert_eq!(store.version_count(), 4);
    }

    #[test]
    fn gc_keeps_newest_visible_version() {
        let store = MvccStore::default();
        for balance in 0..5i64 {
            store.install_batch([(key(1), Some(vec![balance.into()]))]);
        }
        assert_eq!(store.chain_len(&key(1)), 5);
        // snapshot at ts 3 must still read balance 2
        assert_eq!(store.gc(3), 2);
        assert_eq!(
            store.read(&key(1), 3).unwrap().value,
            Some(vec![2i64.into()])
        );
        assert_eq!(store.gc(u64::MAX), 2);
        assert_eq!(store.chain_len(&key(1)), 1);
        assert_eq!(store.gc(u64::MAX), 0);
    }

    #[test]
    fn drop_table_and_reset() {
        let store = MvccStore::default();
        store.install_batch([
            (key(1), Some(vec![1.into()])),
            (ResourceId::new("other", 1), Some(vec![2.into()])),
        ]);
        assert_eq!(store.drop_table("ACCOUNTS"), 1);
        assert!(!store.contains(&key(1)));
        store.reset([(key(9), vec![9.into()])]);
        assert_eq!(store.version_count(), 1);
        assert_eq!(
            store.read(&key(9), 0).unwrap().value,
            Some(vec![9.into()])
        );
    }
}
