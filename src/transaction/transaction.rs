use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strum::Display as StrumDisplay;

use crate::buffer::{heap_page_id, PageId};
use crate::recovery::Lsn;
use crate::storage::tuple::{Row, RowId};
use crate::transaction::{LockMode, Timestamp};

pub type TransactionId = u64;

/// A lockable, versioned unit: one row of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub table: String,
    pub row_id: RowId,
}

impl ResourceId {
    pub fn new(table: impl Into<String>, row_id: RowId) -> Self {
        Self {
            table: table.into().to_ascii_lowercase(),
            row_id,
        }
    }

    pub fn page_id(&self, rows_per_page: u64) -> PageId {
        heap_page_id(&self.table, self.row_id, rows_per_page)
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.table, self.row_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Image before this transaction first touched the resource.
    pub before: Option<Row>,
    pub after: Option<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub lsn: Lsn,
    /// Record preceding this update in the transaction's chain.
    pub prev_lsn: Lsn,
    pub page_id: PageId,
    pub resource: ResourceId,
    pub before: Option<Row>,
}

/// Per-transaction bookkeeping, owned by the caller that began it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    start_ts: Timestamp,
    begin_lsn: Lsn,
    last_lsn: Lsn,
    read_set: BTreeSet<ResourceId>,
    write_set: BTreeMap<ResourceId, PendingWrite>,
    held_locks: BTreeMap<ResourceId, LockMode>,
    undo_log: Vec<UndoEntry>,
}

impl Transaction {
    pub fn new(id: TransactionId, start_ts: Timestamp, begin_lsn: Lsn) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            start_ts,
            begin_lsn,
            last_lsn: begin_lsn,
            read_set: BTreeSet::new(),
            write_set: BTreeMap::new(),
            held_locks: BTreeMap::new(),
            undo_log: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Snapshot timestamp for MVCC reads.
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn begin_lsn(&self) -> Lsn {
        self.begin_lsn
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    pub fn read_set(&self) -> &BTreeSet<ResourceId> {
        &self.read_set
    }

    pub fn write_set(&self) -> &BTreeMap<ResourceId, PendingWrite> {
        &self.write_set
    }

    pub fn held_locks(&self) -> &BTreeMap<ResourceId, LockMode> {
        &self.held_locks
    }

    pub fn undo_log(&self) -> &[UndoEntry] {
        &self.undo_log
    }

    pub fn pending_write(&self, resource: &ResourceId) -> Option<&PendingWrite> {
        self.write_set.get(resource)
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub(crate) fn record_lsn(&mut self, lsn: Lsn) {
        self.last_lsn = lsn;
    }

    pub(crate) fn record_read(&mut self, resource: &ResourceId) {
        if !self.write_set.contains_key(resource) {
            self.read_set.insert(resource.clone());
        }
    }

    pub(crate) fn record_lock(&mut self, resource: &ResourceId, mode: LockMode) {
        let entry = self.held_locks.entry(resource.clone()).or_insert(mode);
        if mode == LockMode::Exclusive {
            *entry = LockMode::Exclusive;
        }
    }

    pub(crate) fn record_write(&mut self, entry: UndoEntry, after: Option<Row>) {
        self.write_set
            .entry(entry.resource.clone())
            .and_modify(|pending| pending.after = after.clone())
            .or_insert_with(|| PendingWrite {
                before: entry.before.clone(),
                after,
            });
        self.last_lsn = entry.lsn;
        self.undo_log.push(entry);
    }

    pub(crate) fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo_log.pop()
    }

    pub(crate) fn take_write_set(&mut self) -> BTreeMap<ResourceId, PendingWrite> {
        std::mem::take(&mut self.write_set)
    }

    pub(crate) fn clear_locks(&mut self) {
        self.held_locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_set_keeps_first_before_image() {
        let mut txn = Transaction::new(1, 0, 1);
        let key = ResourceId::new("Accounts", 4);
        assert_eq!(key.to_string(), "accounts#4");
        for (lsn, before, after) in [(2, 10, 20), (3, 20, 30)] {
            txn.record_write(
                UndoEntry {
                    lsn,
                    prev_lsn: lsn - 1,
                    page_id: key.page_id(64),
                    resource: key.clone(),
                    before: Some(vec![before.into()]),
                },
                Some(vec![after.into()]),
            );
        }
        let pending = txn.pending_write(&key).unwrap();
        assert_eq!(pending.before, Some(vec![10.into()]));
        assert_eq!(pending.after, Some(vec![30.into()]));
        assert_eq!(txn.undo_log().len(), 2);
        assert_eq!(txn.last_lsn(), 3);
        txn.record_read(&key);
        assert!(txn.read_set().is_empty());
    }
}
