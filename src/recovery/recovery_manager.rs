use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};

use crate::error::MemDbResult;
use crate::recovery::analysis::AnalysisPass;
use crate::recovery::redo::RedoPass;
use crate::recovery::undo::UndoPass;
use crate::recovery::{Lsn, WalManager};
use crate::storage::tuple::{Row, RowId};
use crate::transaction::{ResourceId, TransactionId};

/// State that recovery rebuilds.
pub trait RecoveryTarget {
    /// Install `image` (`None` = absent) for `resource` as written at `lsn`.
    /// Must be idempotent: returns false when the resource already reflects
    /// `lsn` or a later record.
    fn apply(&mut self, lsn: Lsn, resource: &ResourceId, image: Option<&Row>) -> MemDbResult<bool>;
}

#[derive(Debug, Clone, PartialEq)]
struct VersionedImage {
    lsn: Lsn,
    image: Option<Row>,
}

/// Resource images keyed by id, each stamped with the LSN that produced it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveredState {
    images: BTreeMap<ResourceId, VersionedImage>,
}

impl RecoveredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: &ResourceId) -> Option<&Row> {
        self.images.get(resource).and_then(|v| v.image.as_ref())
    }

    pub fn page_lsn(&self, resource: &ResourceId) -> Option<Lsn> {
        self.images.get(resource).map(|v| v.lsn)
    }

    /// Live rows of `table` in row id order.
    pub fn rows_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = (RowId, &'a Row)> + 'a {
        self.images.iter().filter_map(move |(resource, v)| {
            match (&v.image, resource.table.eq_ignore_ascii_case(table)) {
                (Some(row), true) => Some((resource.row_id, row)),
                _ => None,
            }
        })
    }

    pub fn live_rows(&self) -> impl Iterator<Item = (&ResourceId, &Row)> {
        self.images
            .iter()
            .filter_map(|(resource, v)| v.image.as_ref().map(|row| (resource, row)))
    }

    pub fn len(&self) -> usize {
        self.live_rows().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecoveryTarget for RecoveredState {
    fn apply(&mut self, lsn: Lsn, resource: &ResourceId, image: Option<&Row>) -> MemDbResult<bool> {
        if let Some(current) = self.images.get(resource) {
            if current.lsn >= lsn {
                return Ok(false);
            }
        }
        self.images.insert(
            resource.clone(),
            VersionedImage {
                lsn,
                image: image.cloned(),
            },
        );
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoverySummary {
    pub checkpoint_lsn: Option<Lsn>,
    pub redo_lsn: Lsn,
    pub redo_applied: usize,
    pub redo_skipped: usize,
    pub winners: Vec<TransactionId>,
    pub loser_transactions: Vec<TransactionId>,
    pub clrs_written: usize,
}

/// Drives analysis, redo and undo over the durable contents of a WAL.
pub struct RecoveryManager {
    wal: Arc<WalManager>,
}

impl RecoveryManager {
    pub fn new(wal: Arc<WalManager>) -> Self {
        Self { wal }
    }

    pub fn replay<T: RecoveryTarget>(&self, target: &mut T) -> MemDbResult<RecoverySummary> {
        let records = self.wal.durable_records()?;
        if records.is_empty() {
            return Ok(RecoverySummary::default());
        }
        let analysis = AnalysisPass::new().run(&records);
        info!(
            "recovery analysis: checkpoint {:?}, redo from lsn {}, {} dirty pages, {} losers",
            analysis.checkpoint_lsn,
            analysis.redo_lsn,
            analysis.dirty_pages.len(),
            analysis.losers.len()
        );
        let redo = RedoPass::new(&analysis).run(&records, target)?;
        info!(
            "recovery redo: {} applied, {} skipped",
            redo.applied, redo.skipped
        );
        let undo = UndoPass::new(&self.wal, &analysis).run(&records, target)?;
        if !undo.loser_transactions.is_empty() {
            warn!(
                "recovery rolled back {} loser transaction(s) with {} CLRs",
                undo.loser_transactions.len(),
                undo.clrs_written
            );
        }
        Ok(RecoverySummary {
            checkpoint_lsn: analysis.checkpoint_lsn,
            redo_lsn: analysis.redo_lsn,
            redo_applied: redo.applied,
            redo_skipped: redo.skipped,
            winners: analysis.winners,
            loser_transactions: undo.loser_transactions,
            clrs_written: undo.clrs_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use crate::recovery::wal_record::{LogRecordBody, UpdatePayload};

    fn update(resource: &ResourceId, before: Option<i64>, after: Option<i64>) -> LogRecordBody {
        LogRecordBody::Update(UpdatePayload {
            resource: resource.clone(),
            page_id: resource.row_id / 4,
            before: before.map(|v| vec![v.into()]),
            after: after.map(|v| vec![v.into()]),
        })
    }

    fn value(state: &RecoveredState, resource: &ResourceId) -> Option<i64> {
        state
            .get(resource)
            .and_then(|row| row[0].as_f64())
            .map(|v| v as i64)
    }

    /// txn 1 commits, txn 2 is in flight at the crash, txn 3 aborted normally.
    fn crashed_image(with_checkpoint: bool) -> bytes::Bytes {
        let wal = WalManager::new(WalConfig::default());
        let a = ResourceId::new("acct", 1);
        let b = ResourceId::new("acct", 2);
        let c = ResourceId::new("acct", 9);
        wal.append(1, LogRecordBody::Begin).unwrap();
        wal.append(1, update(&a, None, Some(100))).unwrap();
        wal.append(1, update(&b, None, Some(50))).unwrap();
        wal.append(1, LogRecordBody::Commit).unwrap();
        wal.append(2, LogRecordBody::Begin).unwrap();
        wal.append(2, update(&a, Some(100), Some(70))).unwrap();
        if with_checkpoint {
            wal.checkpoint().unwrap();
        }
        wal.append(2, update(&b, Some(50), Some(80))).unwrap();
        wal.append(2, update(&c, None, Some(1))).unwrap();
        wal.append(3, LogRecordBody::Begin).unwrap();
        wal.append(3, LogRecordBody::Abort).unwrap();
        wal.flush(None).unwrap();
        wal.durable_image()
    }

    fn recover(image: &[u8]) -> (Arc<WalManager>, RecoveredState, RecoverySummary) {
        let wal = Arc::new(WalManager::open(WalConfig::default(), image).unwrap());
        let mut state = RecoveredState::new();
        let summary = RecoveryManager::new(wal.clone()).replay(&mut state).unwrap();
        (wal, state, summary)
    }

    #[test]
    fn losers_are_rolled_back_and_winners_kept() {
        for with_checkpoint in [false, true] {
            let (_, state, summary) = recover(&crashed_image(with_checkpoint));
            let a = ResourceId::new("acct", 1);
            let b = ResourceId::new("acct", 2);
            let c = ResourceId::new("acct", 9);
            assert_eq!(value(&state, &a), Some(100));
            assert_eq!(value(&state, &b), Some(50));
            assert_eq!(value(&state, &c), None);
            // analysis starts at the checkpoint, which follows txn 1's commit
            let winners: Vec<u64> = if with_checkpoint { vec![] } else { vec![1] };
            assert_eq!(summary.winners, winners);
            assert_eq!(summary.loser_transactions, vec![2]);
            assert_eq!(summary.clrs_written, 3);
            assert_eq!(summary.checkpoint_lsn.is_some(), with_checkpoint);
            assert_eq!(state.rows_of("acct").count(), 2);
        }
    }

    #[test]
    fn redo_is_idempotent() {
        let image = crashed_image(true);
        let (wal, state, _) = recover(&image);

        // replaying the same records onto already-recovered state changes nothing
        let mut again = state.clone();
        let summary = RecoveryManager::new(Arc::new(
            WalManager::open(WalConfig::default(), &image).unwrap(),
        ))
        .replay(&mut again)
        .unwrap();
        assert_eq!(summary.redo_applied, 0);
        assert_eq!(
            again.rows_of("acct").collect::<Vec<_>>(),
            state.rows_of("acct").collect::<Vec<_>>()
        );

        // a second crash right after recovery finds no losers and the same rows
        let (_, second, summary) = recover(&wal.durable_image());
        assert!(summary.loser_transactions.is_empty());
        assert_eq!(summary.clrs_written, 0);
        assert_eq!(
            second.rows_of("acct").collect::<Vec<_>>(),
            state.rows_of("acct").collect::<Vec<_>>()
        );
    }

    #[test]
    fn corrupt_image_is_a_recovery_failure() {
        let mut image = crashed_image(false).to_vec();
        image.truncate(image.len() - 2);
        let err = WalManager::open(WalConfig::default(), &image).unwrap_err();
        assert!(matches!(err, crate::error::MemDbError::RecoveryFailure(_)));
    }
}
