use crate::error::MemDbResult;
use crate::recovery::analysis::AnalysisResult;
use crate::recovery::recovery_manager::RecoveryTarget;
use crate::recovery::wal_record::{LogRecord, LogRecordBody};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RedoOutcome {
    pub applied: usize,
    /// Records the target already reflected.
    pub skipped: usize,
}

/// Repeats history: every UPDATE and CLR from the redo point onward,
/// winners and losers alike.
pub struct RedoPass<'a> {
    analysis: &'a AnalysisResult,
}

impl<'a> RedoPass<'a> {
    pub fn new(analysis: &'a AnalysisResult) -> Self {
        Self { analysis }
    }

    pub fn run<T: RecoveryTarget>(&self, records: &[LogRecord], target: &mut T) -> MemDbResult<RedoOutcome> {
        let mut outcome = RedoOutcome::default();
        for record in records.iter().filter(|r| r.lsn >= self.analysis.redo_lsn) {
            let (resource, page_id, image) = match &record.body {
                LogRecordBody::Update(update) => (&update.resource, update.page_id, update.after.as_ref()),
                LogRecordBody::Clr(clr) => (&clr.resource, clr.page_id, clr.image.as_ref()),
                _ => continue,
            };
            let needs_redo = self
                .analysis
                .dirty_pages
                .get(&page_id)
                .is_some_and(|rec_lsn| record.lsn >= *rec_lsn);
            if !needs_redo {
                outcome.skipped += 1;
                continue;
            }
            if target.apply(record.lsn, resource, image)? {
                outcome.applied += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        Ok(outcome)
    }
}
