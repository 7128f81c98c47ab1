use std::collections::BTreeMap;

use crate::buffer::PageId;
use crate::recovery::wal_record::{LogRecord, LogRecordBody};
use crate::recovery::Lsn;
use crate::transaction::TransactionId;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalysisResult {
    pub checkpoint_lsn: Option<Lsn>,
    /// Where redo starts: the smallest recLSN in the dirty page table.
    pub redo_lsn: Lsn,
    pub dirty_pages: BTreeMap<PageId, Lsn>,
    /// Transactions without a COMMIT or ABORT, with their last LSN.
    pub losers: BTreeMap<TransactionId, Lsn>,
    pub winners: Vec<TransactionId>,
}

/// Rebuilds the transaction and dirty page tables from the last checkpoint forward.
#[derive(Debug, Default)]
pub struct AnalysisPass {
    result: AnalysisResult,
}

impl AnalysisPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, records: &[LogRecord]) -> AnalysisResult {
        let start = match records
            .iter()
            .rposition(|r| matches!(r.body, LogRecordBody::Checkpoint(_)))
        {
            Some(pos) => {
                self.seed_from_checkpoint(&records[pos]);
                pos + 1
            }
            None => 0,
        };
        for record in records[start..].iter() {
            self.observe(record);
        }
        self.finalize()
    }

    fn seed_from_checkpoint(&mut self, record: &LogRecord) {
        if let LogRecordBody::Checkpoint(payload) = &record.body {
            self.result.checkpoint_lsn = Some(record.lsn);
            self.result.losers = payload.active_transactions.iter().copied().collect();
            self.result.dirty_pages = payload.dirty_pages.iter().copied().collect();
        }
    }

    fn observe(&mut self, record: &LogRecord) {
        if let Some(page_id) = record.page_id() {
            self.result.dirty_pages.entry(page_id).or_insert(record.lsn);
        }
        match record.body {
            LogRecordBody::Commit => {
                self.result.losers.remove(&record.txn_id);
                self.result.winners.push(record.txn_id);
            }
            LogRecordBody::Abort => {
                self.result.losers.remove(&record.txn_id);
            }
            LogRecordBody::Checkpoint(_) => {}
            LogRecordBody::Begin | LogRecordBody::Update(_) | LogRecordBody::Clr(_) => {
                self.result.losers.insert(record.txn_id, record.lsn);
            }
        }
    }

    fn finalize(mut self) -> AnalysisResult {
        self.result.redo_lsn = self
            .result
            .dirty_pages
            .values()
            .copied()
            .min()
            .unwrap_or_default();
        self.result
    }
}
