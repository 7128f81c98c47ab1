use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::config::DatabaseOptions;
use crate::error::{MemDbError, MemDbResult};
use crate::recovery::wal_record::{ClrPayload, LogRecordBody, UpdatePayload};
use crate::recovery::{Lsn, WalManager};
use crate::storage::tuple::Row;
use crate::transaction::{
    LockManager, LockMode, LockStats, MvccStore, ResourceId, Timestamp, Transaction,
    TransactionId, TransactionState, TwoPhaseLockManager, UndoEntry,
};

/// Result of a transactional read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Visible(Row),
    /// The resource does not exist in the transaction's snapshot.
    Absent,
    /// No transaction ever wrote the resource; the table's base row is authoritative.
    Unversioned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub next_txn_id: TransactionId,
    pub active: usize,
    pub commits: u64,
    pub aborts: u64,
    pub current_ts: Timestamp,
    pub versions: usize,
    pub locks: LockStats,
}

pub struct TransactionManager {
    options: DatabaseOptions,
    wal: Arc<WalManager>,
    lock_manager: Arc<dyn LockManager>,
    mvcc: Arc<MvccStore>,
    next_txn_id: AtomicU64,
    // txn id -> snapshot timestamp
    active: DashMap<TransactionId, Timestamp>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl TransactionManager {
    pub fn new(options: DatabaseOptions, wal: Arc<WalManager>) -> Self {
        let lock_manager: Arc<dyn LockManager> =
            Arc::new(TwoPhaseLockManager::new(options.lock));
        Self::with_lock_manager(options, wal, lock_manager)
    }

    pub fn with_lock_manager(
        options: DatabaseOptions,
        wal: Arc<WalManager>,
        lock_manager: Arc<dyn LockManager>,
    ) -> Self {
        Self {
            mvcc: Arc::new(MvccStore::new(options.mvcc)),
            options,
            wal,
            lock_manager,
            next_txn_id: AtomicU64::new(1),
            active: DashMap::new(),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn mvcc(&self) -> &Arc<MvccStore> {
        &self.mvcc
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.lock_manager
    }

    /// Continue numbering after ids already present in a recovered log.
    pub fn resume_after(&self, txn_id: TransactionId) {
        self.next_txn_id.fetch_max(txn_id + 1, Ordering::SeqCst);
    }

    pub fn begin(&self) -> MemDbResult<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let start_ts = self.mvcc.current_ts();
        let begin_lsn = self.wal.append(txn_id, LogRecordBody::Begin)?;
        self.active.insert(txn_id, start_ts);
        debug!("begin txn {txn_id} at ts {start_ts}, lsn {begin_lsn}");
        Ok(Transaction::new(txn_id, start_ts, begin_lsn))
    }

    /// Snapshot read: the transaction's own pending write wins, otherwise the
    /// newest version committed at or before its start timestamp.
    pub fn read(&self, txn: &mut Transaction, key: &ResourceId) -> MemDbResult<ReadOutcome> {
        Self::ensure_active(txn)?;
        if let Some(pending) = txn.pending_write(key) {
            return Ok(match &pending.after {
                Some(row) => ReadOutcome::Visible(row.clone()),
                None => ReadOutcome::Absent,
            });
        }
        txn.record_read(key);
        Ok(self.committed_as_of(key, txn.start_ts()))
    }

    /// Locking read: take an exclusive lock, then return the newest committed
    /// version instead of the snapshot one, so a following write cannot lose
    /// a concurrent update.
    pub fn read_for_update(&self, txn: &mut Transaction, key: &ResourceId) -> MemDbResult<ReadOutcome> {
        Self::ensure_active(txn)?;
        self.lock_manager.lock(txn.id(), key, LockMode::Exclusive)?;
        txn.record_lock(key, LockMode::Exclusive);
        if let Some(pending) = txn.pending_write(key) {
            return Ok(match &pending.after {
                Some(row) => ReadOutcome::Visible(row.clone()),
                None => ReadOutcome::Absent,
            });
        }
        txn.record_read(key);
        Ok(self.committed_as_of(key, Timestamp::MAX))
    }

    fn committed_as_of(&self, key: &ResourceId, ts: Timestamp) -> ReadOutcome {
        match self.mvcc.read(key, ts) {
            Some(version) => match version.value {
                Some(row) => ReadOutcome::Visible(row),
                None => ReadOutcome::Absent,
            },
            None if self.mvcc.contains(key) => ReadOutcome::Absent,
            None => ReadOutcome::Unversioned,
        }
    }

    /// Take a shared lock on `key` until the transaction ends.
    pub fn lock_shared(&self, txn: &mut Transaction, key: &ResourceId) -> MemDbResult<()> {
        Self::ensure_active(txn)?;
        self.lock_manager.lock(txn.id(), key, LockMode::Shared)?;
        txn.record_lock(key, LockMode::Shared);
        Ok(())
    }

    /// Log a change of `key` from `old` to `new`. The caller applies the change
    /// to the table after this returns. Lock failures leave the transaction
    /// active and untouched.
    pub fn write(
        &self,
        txn: &mut Transaction,
        key: &ResourceId,
        old: Option<Row>,
        new: Option<Row>,
    ) -> MemDbResult<Lsn> {
        Self::ensure_active(txn)?;
        self.lock_manager.lock(txn.id(), key, LockMode::Exclusive)?;
        txn.record_lock(key, LockMode::Exclusive);
        if txn.pending_write(key).is_none() {
            self.mvcc.seed_if_absent(key, old.clone());
        }

        let page_id = key.page_id(self.options.buffer_pool.rows_per_page);
        let prev_lsn = txn.last_lsn();
        let lsn = self.wal.append(
            txn.id(),
            LogRecordBody::Update(UpdatePayload {
                resource: key.clone(),
                page_id,
                before: old.clone(),
                after: new.clone(),
            }),
        )?;
        txn.record_write(
            UndoEntry {
                lsn,
                prev_lsn,
                page_id,
                resource: key.clone(),
                before: old,
            },
            new,
        );
        Ok(lsn)
    }

    /// Force the COMMIT record, publish the write-set, release locks.
    /// A failed flush leaves the transaction active and uncommitted.
    pub fn commit(&self, txn: &mut Transaction) -> MemDbResult<Timestamp> {
        Self::ensure_active(txn)?;
        let txn_id = txn.id();
        let commit_lsn = self.wal.append(txn_id, LogRecordBody::Commit)?;
        if let Err(e) = self.wal.flush(Some(commit_lsn)) {
            self.wal.discard_pending(commit_lsn);
            warn!("commit of txn {txn_id} failed to reach the log: {e}");
            return Err(e);
        }
        txn.record_lsn(commit_lsn);

        let writes = txn.take_write_set();
        let commit_ts = if writes.is_empty() {
            self.mvcc.current_ts()
        } else {
            self.mvcc
                .install_batch(writes.into_iter().map(|(key, write)| (key, write.after)))
        };
        txn.set_state(TransactionState::Committed);
        self.finish(txn);
        self.commits.fetch_add(1, Ordering::Relaxed);
        info!("commit txn {txn_id} at ts {commit_ts}, lsn {commit_lsn}");

        self.collect_garbage();
        if self.wal.checkpoint_due() {
            if let Err(e) = self.wal.checkpoint() {
                warn!("automatic checkpoint failed: {e}");
            }
        }
        Ok(commit_ts)
    }

    /// Roll back in reverse order. For each update a CLR is logged and `undo`
    /// is asked to restore the before-image; `undo` must be idempotent since a
    /// failed abort can be retried.
    pub fn abort(
        &self,
        txn: &mut Transaction,
        undo: &mut dyn FnMut(&ResourceId, Option<&Row>) -> MemDbResult<()>,
    ) -> MemDbResult<()> {
        Self::ensure_active(txn)?;
        let txn_id = txn.id();
        let mut undone = 0;
        while let Some(entry) = txn.undo_log().last().cloned() {
            let clr_lsn = self.wal.append(
                txn_id,
                LogRecordBody::Clr(ClrPayload {
                    resource: entry.resource.clone(),
                    page_id: entry.page_id,
                    undone_lsn: entry.lsn,
                    undo_next_lsn: entry.prev_lsn,
                    image: entry.before.clone(),
                }),
            )?;
            txn.record_lsn(clr_lsn);
            undo(&entry.resource, entry.before.as_ref())?;
            txn.pop_undo();
            undone += 1;
        }

        let abort_lsn = self.wal.append(txn_id, LogRecordBody::Abort)?;
        txn.record_lsn(abort_lsn);
        // an abort that never reaches the log is undone again by recovery
        if let Err(e) = self.wal.flush(Some(abort_lsn)) {
            warn!("abort record of txn {txn_id} not flushed: {e}");
        }
        txn.take_write_set();
        txn.set_state(TransactionState::Aborted);
        self.finish(txn);
        self.aborts.fetch_add(1, Ordering::Relaxed);
        info!("abort txn {txn_id}, {undone} updates undone");
        Ok(())
    }

    pub fn checkpoint(&self) -> MemDbResult<Lsn> {
        self.wal.checkpoint()
    }

    pub fn is_active(&self, txn_id: TransactionId) -> bool {
        self.active.contains_key(&txn_id)
    }

    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Oldest snapshot still in use, or the current timestamp when idle.
    pub fn oldest_active_ts(&self) -> Timestamp {
        self.active
            .iter()
            .map(|e| *e.value())
            .min()
            .unwrap_or_else(|| self.mvcc.current_ts())
    }

    pub fn collect_garbage(&self) -> usize {
        let watermark = self
            .oldest_active_ts()
            .saturating_sub(self.options.mvcc.retention);
        self.mvcc.gc(watermark)
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            next_txn_id: self.next_txn_id.load(Ordering::Acquire),
            active: self.active.len(),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            current_ts: self.mvcc.current_ts(),
            versions: self.mvcc.version_count(),
            locks: self.lock_manager.stats(),
        }
    }

    fn finish(&self, txn: &mut Transaction) {
        self.lock_manager.unlock_all(txn.id());
        txn.clear_locks();
        self.active.remove(&txn.id());
    }

    fn ensure_active(txn: &Transaction) -> MemDbResult<()> {
        if txn.is_active() {
            Ok(())
        } else {
            Err(MemDbError::Execution(format!(
                "transaction {} is already {}",
                txn.id(),
                txn.state()
            )))
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id)
            .field("active", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LockConfig, WalConfig};
    use crate::recovery::{LogRecordKind, INVALID_LSN};

    fn manager(lock: LockConfig) -> TransactionManager {
        let options = DatabaseOptions::default().with_lock(lock);
        TransactionManager::new(options, Arc::new(WalManager::new(WalConfig::default())))
    }

    fn key(id: u64) -> ResourceId {
        ResourceId::new("accounts", id)
    }

    fn balance(v: i64) -> Option<Row> {
        Some(vec![v.into()])
    }

    #[test]
    fn commit_publishes_versions_and_releases_locks() {
        let tm = manager(LockConfig::no_wait());
        let mut txn = tm.begin().expect("begin");
        assert_eq!(
            tm.read(&mut txn, &key(1)).expect("read"),
            ReadOutcome::Unversioned
        );
        tm.write(&mut txn, &key(1), balance(100), balance(70))
            .expect("write");
        assert_eq!(
            tm.read(&mut txn, &key(1)).expect("read own write"),
            ReadOutcome::Visible(vec![70i64.into()])
        );
        assert_eq!(txn.held_locks().get(&key(1)), Some(&LockMode::Exclusive));

        let commit_ts = tm.commit(&mut txn).expect("commit");
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.held_locks().is_empty());
        assert_eq!(tm.lock_manager().stats().locked_resources, 0);
        assert!(tm.wal().durable_lsn() >= txn.last_lsn());

        let mut reader = tm.begin().expect("begin reader");
        assert!(reader.start_ts() >= commit_ts);
        assert_eq!(
            tm.read(&mut reader, &key(1)).expect("read"),
            ReadOutcome::Visible(vec![70i64.into()])
        );
        assert!(reader.read_set().contains(&key(1)));
        assert!(tm.commit(&mut txn).is_err());
    }

    #[test]
    fn snapshot_ignores_later_commits() {
        let tm = manager(LockConfig::no_wait());
        let mut old_reader = tm.begin().expect("begin");
        let mut writer = tm.begin().expect("begin");
        tm.write(&mut writer, &key(1), balance(100), balance(40))
            .expect("write");
        tm.write(&mut writer, &key(2), None, balance(5))
            .expect("insert");
        tm.commit(&mut writer).expect("commit");

        assert_eq!(
            tm.read(&mut old_reader, &key(1)).expect("read"),
            ReadOutcome::Visible(vec![100i64.into()])
        );
        assert_eq!(
            tm.read(&mut old_reader, &key(2)).expect("read"),
            ReadOutcome::Absent
        );
    }

    #[test]
    fn abort_undoes_in_reverse_with_clrs() {
        let tm = manager(LockConfig::no_wait());
        let mut txn = tm.begin().expect("begin");
        let first = tm
            .write(&mut txn, &key(1), balance(100), balance(90))
            .expect("write");
        tm.write(&mut txn, &key(1), balance(90), balance(80))
            .expect("write");
        tm.write(&mut txn, &key(2), None, balance(1))
            .expect("write");

        let mut restored = Vec::new();
        tm.abort(&mut txn, &mut |resource, image| {
            restored.push((resource.clone(), image.cloned()));
            Ok(())
        })
        .expect("abort");
        assert_eq!(
            restored,
            vec![
                (key(2), None),
                (key(1), balance(90)),
                (key(1), balance(100)),
            ]
        );
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(!tm.is_active(txn.id()));

        let records = tm.wal().durable_records().expect("records");
        let clrs: Vec<_> = records
            .iter()
            .filter_map(|r| match &r.body {
                LogRecordBody::Clr(clr) => Some(clr.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(clrs.len(), 3);
        assert_eq!(clrs[2].undone_lsn, first);
        assert_eq!(clrs[2].undo_next_lsn, txn.begin_lsn());
        assert_ne!(clrs[2].undo_next_lsn, INVALID_LSN);
        assert_eq!(records.last().map(|r| r.kind()), Some(LogRecordKind::Abort));

        // the aborted write-set never reaches the version store
        let mut reader = tm.begin().expect("begin");
        assert_eq!(
            tm.read(&mut reader, &key(1)).expect("read"),
            ReadOutcome::Visible(vec![100i64.into()])
        );
    }

    #[test]
    fn lock_conflict_keeps_transaction_abortable() {
        let tm = manager(LockConfig::no_wait());
        let mut holder = tm.begin().expect("begin");
        let mut other = tm.begin().expect("begin");
        tm.write(&mut holder, &key(1), balance(1), balance(2))
            .expect("write");
        let err = tm
            .write(&mut other, &key(1), balance(1), balance(3))
            .unwrap_err();
        assert!(matches!(err, MemDbError::Conflict(_)));
        assert!(other.is_active());
        assert!(other.undo_log().is_empty());
        tm.abort(&mut other, &mut |_, _| Ok(())).expect("abort");
        tm.commit(&mut holder).expect("commit");
        assert_eq!(tm.stats().commits, 1);
        assert_eq!(tm.stats().aborts, 1);
    }

    #[test]
    fn failed_commit_flush_leaves_transaction_uncommitted() {
        let tm = manager(LockConfig::no_wait());
        let mut txn = tm.begin().expect("begin");
        tm.write(&mut txn, &key(1), None, balance(10))
            .expect("write");
        tm.wal().fail_next_flush();
        assert!(tm.commit(&mut txn).is_err());
        assert!(txn.is_active());
        assert_eq!(tm.mvcc().version_count(), 1);
        assert!(tm.wal().durable_records().expect("records").is_empty());

        tm.commit(&mut txn).expect("retry commit");
        let kinds: Vec<LogRecordKind> = tm
            .wal()
            .durable_records()
            .expect("records")
            .iter()
            .map(|r| r.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![LogRecordKind::Begin, LogRecordKind::Update, LogRecordKind::Commit]
        );
    }

    #[test]
    fn shared_lock_upgrades_on_write() {
        let tm = manager(LockConfig::no_wait());
        let mut txn = tm.begin().expect("begin");
        tm.lock_shared(&mut txn, &key(3)).expect("shared");
        assert_eq!(txn.held_locks().get(&key(3)), Some(&LockMode::Shared));
        tm.write(&mut txn, &key(3), balance(1), balance(2))
            .expect("upgrade");
        assert_eq!(txn.held_locks().get(&key(3)), Some(&LockMode::Exclusive));
        tm.commit(&mut txn).expect("commit");
    }

    #[test]
    fn read_for_update_sees_latest_commit() {
        let tm = manager(LockConfig::no_wait());
        let mut setup = tm.begin().expect("begin");
        tm.write(&mut setup, &key(1), None, balance(100)).expect("insert");
        tm.commit(&mut setup).expect("commit");

        let mut early = tm.begin().expect("begin");
        let mut writer = tm.begin().expect("begin");
        tm.write(&mut writer, &key(1), balance(100), balance(60))
            .expect("write");
        assert!(matches!(
            tm.read_for_update(&mut early, &key(1)),
            Err(MemDbError::Conflict(_)) | Err(MemDbError::Deadlock(_))
        ));
        tm.commit(&mut writer).expect("commit");

        assert_eq!(
            tm.read(&mut early, &key(1)).expect("snapshot"),
            ReadOutcome::Visible(vec![100i64.into()])
        );
        assert_eq!(
            tm.read_for_update(&mut early, &key(1)).expect("locking read"),
            ReadOutcome::Visible(vec![60i64.into()])
        );
        assert_eq!(txn_lock(&early, 1), Some(LockMode::Exclusive));
        tm.commit(&mut early).expect("commit");
    }

    fn txn_lock(txn: &Transaction, id: u64) -> Option<LockMode> {
        txn.held_locks().get(&key(id)).copied()
    }
}
