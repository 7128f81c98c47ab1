use std::collections::{BinaryHeap, HashMap};

use log::debug;

use crate::error::{MemDbError, MemDbResult};
use crate::recovery::analysis::AnalysisResult;
use crate::recovery::recovery_manager::RecoveryTarget;
use crate::recovery::wal_record::{ClrPayload, LogRecord, LogRecordBody, INVALID_LSN};
use crate::recovery::{Lsn, WalManager};
use crate::transaction::TransactionId;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoOutcome {
    pub loser_transactions: Vec<TransactionId>,
    pub undone: usize,
    pub clrs_written: usize,
}

/// Rolls back loser transactions newest-LSN-first across all losers, writing
/// a CLR per undone update and an ABORT once a transaction reaches its start.
pub struct UndoPass<'a> {
    wal: &'a WalManager,
    analysis: &'a AnalysisResult,
}

impl<'a> UndoPass<'a> {
    pub fn new(wal: &'a WalManager, analysis: &'a AnalysisResult) -> Self {
        Self { wal, analysis }
    }

    pub fn run<T: RecoveryTarget>(&self, records: &[LogRecord], target: &mut T) -> MemDbResult<UndoOutcome> {
        let by_lsn: HashMap<Lsn, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();
        let mut to_undo: BinaryHeap<(Lsn, TransactionId)> = self
            .analysis
            .losers
            .iter()
            .map(|(txn, lsn)| (*lsn, *txn))
            .collect();
        let mut outcome = UndoOutcome {
            loser_transactions: self.analysis.losers.keys().copied().collect(),
            ..Default::default()
        };

        while let Some((lsn, txn_id)) = to_undo.pop() {
            let record = by_lsn.get(&lsn).ok_or_else(|| {
                MemDbError::RecoveryFailure(format!("txn {txn_id} references missing lsn {lsn}"))
            })?;
            let next = match &record.body {
                LogRecordBody::Update(update) => {
                    let clr_lsn = self.wal.append(
                        txn_id,
                        LogRecordBody::Clr(ClrPayload {
                            resource: update.resource.clone(),
                            page_id: update.page_id,
                            undone_lsn: lsn,
                            undo_next_lsn: record.prev_lsn,
                            image: update.before.clone(),
                        }),
                    )?;
                    target.apply(clr_lsn, &update.resource, update.before.as_ref())?;
                    outcome.undone += 1;
                    outcome.clrs_written += 1;
                    record.prev_lsn
                }
                // already compensated; skip what it undid
                LogRecordBody::Clr(clr) => clr.undo_next_lsn,
                LogRecordBody::Begin => INVALID_LSN,
                _ => record.prev_lsn,
            };
            if next == INVALID_LSN {
                self.wal.append(txn_id, LogRecordBody::Abort)?;
                debug!("recovery rolled back txn {txn_id}");
            } else {
                to_undo.push((next, txn_id));
            }
        }
        self.wal.flush(None)?;
        Ok(outcome)
    }
}
