use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use log::{debug, info};
use parking_lot::Mutex;

use crate::buffer::PageId;
use crate::config::WalConfig;
use crate::error::{MemDbError, MemDbResult};
use crate::recovery::wal_record::{
    encode_frame, CheckpointPayload, LogRecord, LogRecordBody, WalReader, INVALID_LSN,
};
use crate::transaction::TransactionId;

pub type Lsn = u64;

#[derive(Debug, Clone)]
struct PendingRecord {
    lsn: Lsn,
    txn_id: TransactionId,
    prev_lsn: Lsn,
    frame: Vec<u8>,
}

#[derive(Debug, Default)]
struct WalState {
    /// Appended but not yet durable, in LSN order.
    buffer: Vec<PendingRecord>,
    /// The durable log image.
    log: BytesMut,
    /// Last LSN of every transaction that has not ended.
    txn_last_lsn: HashMap<TransactionId, Lsn>,
    /// Page -> first LSN that dirtied it. The heap has no stable copy, so a
    /// page stays here once touched.
    dirty_pages: BTreeMap<PageId, Lsn>,
    records_since_checkpoint: u64,
    last_checkpoint_lsn: Option<Lsn>,
    durable_records: u64,
    checkpoints: u64,
    fail_next_flush: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub next_lsn: Lsn,
    pub durable_lsn: Lsn,
    pub durable_records: u64,
    pub pending_records: usize,
    pub log_bytes: usize,
    pub checkpoints: u64,
    pub last_checkpoint_lsn: Option<Lsn>,
}

/// Append-only log with group flush. LSNs start at 1, increase strictly and
/// are never reused, even when a pending record is discarded.
#[derive(Debug)]
pub struct WalManager {
    config: WalConfig,
    next_lsn: AtomicU64,
    durable_lsn: AtomicU64,
    state: Mutex<WalState>,
}

impl WalManager {
    pub fn new(config: WalConfig) -> Self {
        Self {
            config,
            next_lsn: AtomicU64::new(1),
            durable_lsn: AtomicU64::new(INVALID_LSN),
            state: Mutex::new(WalState::default()),
        }
    }

    /// Resume from a durable image, e.g. one taken before a crash. Every frame
    /// is validated; the transaction and dirty page tables are rebuilt.
    pub fn open(config: WalConfig, image: &[u8]) -> MemDbResult<Self> {
        let records = WalReader::new(image).read_all()?;
        let wal = Self::new(config);
        {
            let mut state = wal.state.lock();
            for record in records.iter() {
                Self::track(&mut state, record);
                if let LogRecordBody::Checkpoint(_) = record.body {
                    state.last_checkpoint_lsn = Some(record.lsn);
                    state.records_since_checkpoint = 0;
                    state.checkpoints += 1;
                }
            }
            state.log.extend_from_slice(image);
            state.durable_records = records.len() as u64;
        }
        let last = records.last().map(|r| r.lsn).unwrap_or(INVALID_LSN);
        wal.next_lsn.store(last + 1, Ordering::SeqCst);
        wal.durable_lsn.store(last, Ordering::SeqCst);
        debug!("opened wal with {} records, last lsn {last}", records.len());
        Ok(wal)
    }

    fn track(state: &mut WalState, record: &LogRecord) {
        if let Some(page_id) = record.page_id() {
            state.dirty_pages.entry(page_id).or_insert(record.lsn);
        }
        match record.body {
            LogRecordBody::Commit | LogRecordBody::Abort => {
                state.txn_last_lsn.remove(&record.txn_id);
            }
            LogRecordBody::Checkpoint(_) => {}
            _ => {
                state.txn_last_lsn.insert(record.txn_id, record.lsn);
            }
        }
    }

    #[inline]
    pub fn max_assigned_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::Acquire).saturating_sub(1)
    }

    #[inline]
    pub fn durable_lsn(&self) -> Lsn {
        self.durable_lsn.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Append a record for `txn_id`, chaining it to the transaction's previous record.
    pub fn append(&self, txn_id: TransactionId, body: LogRecordBody) -> MemDbResult<Lsn> {
        let mut state = self.state.lock();
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let prev_lsn = state
            .txn_last_lsn
            .get(&txn_id)
            .copied()
            .unwrap_or(INVALID_LSN);
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            body,
        };
        let frame = encode_frame(&record)?;
        Self::track(&mut state, &record);
        state.buffer.push(PendingRecord {
            lsn,
            txn_id,
            prev_lsn,
            frame,
        });
        state.records_since_checkpoint += 1;
        Ok(lsn)
    }

    /// Make every record up to `target` durable (everything when `None`).
    /// Returns the new durable LSN.
    pub fn flush(&self, target: Option<Lsn>) -> MemDbResult<Lsn> {
        let mut state = self.state.lock();
        if state.fail_next_flush {
            state.fail_next_flush = false;
            return Err(MemDbError::Internal("wal flush failed".to_string()));
        }
        let target = target.unwrap_or(Lsn::MAX);
        let count = state
            .buffer
            .iter()
            .take_while(|record| record.lsn <= target)
            .count();
        if count == 0 {
            return Ok(self.durable_lsn());
        }
        let flushed: Vec<PendingRecord> = state.buffer.drain(..count).collect();
        for record in flushed.iter() {
            state.log.extend_from_slice(&record.frame);
        }
        state.durable_records += flushed.len() as u64;
        let new_durable = flushed.last().map(|r| r.lsn).unwrap_or(INVALID_LSN);
        self.durable_lsn.fetch_max(new_durable, Ordering::AcqRel);
        Ok(self.durable_lsn())
    }

    /// Drop a record that has not been flushed yet, restoring its
    /// transaction's chain. Returns false when it is already durable.
    pub fn discard_pending(&self, lsn: Lsn) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.buffer.iter().position(|r| r.lsn == lsn) else {
            return false;
        };
        let record = state.buffer.remove(pos);
        if record.prev_lsn == INVALID_LSN {
            state.txn_last_lsn.remove(&record.txn_id);
        } else {
            state.txn_last_lsn.insert(record.txn_id, record.prev_lsn);
        }
        true
    }

    /// Write and flush a CHECKPOINT carrying the live transaction and dirty page tables.
    pub fn checkpoint(&self) -> MemDbResult<Lsn> {
        let payload = {
            let state = self.state.lock();
            let mut active: Vec<(TransactionId, Lsn)> = state
                .txn_last_lsn
                .iter()
                .map(|(txn, lsn)| (*txn, *lsn))
                .collect();
            active.sort_unstable();
            CheckpointPayload {
                active_transactions: active,
                dirty_pages: state
                    .dirty_pages
                    .iter()
                    .map(|(page, lsn)| (*page, *lsn))
                    .collect(),
            }
        };
        let active = payload.active_transactions.len();
        let dirty = payload.dirty_pages.len();
        let lsn = self.append(0, LogRecordBody::Checkpoint(payload))?;
        self.flush(Some(lsn))?;
        let mut state = self.state.lock();
        state.last_checkpoint_lsn = Some(lsn);
        state.records_since_checkpoint = 0;
        state.checkpoints += 1;
        info!("checkpoint at lsn {lsn}: {active} active txns, {dirty} dirty pages");
        Ok(lsn)
    }

    /// True once `checkpoint_interval_records` records were appended since the last checkpoint.
    pub fn checkpoint_due(&self) -> bool {
        match self.config.checkpoint_interval_records {
            Some(interval) => self.state.lock().records_since_checkpoint >= interval,
            None => false,
        }
    }

    pub fn last_lsn_of(&self, txn_id: TransactionId) -> Option<Lsn> {
        self.state.lock().txn_last_lsn.get(&txn_id).copied()
    }

    /// Copy of the durable log. Pending records are not included.
    pub fn durable_image(&self) -> Bytes {
        self.state.lock().log.clone().freeze()
    }

    pub fn durable_records(&self) -> MemDbResult<Vec<LogRecord>> {
        let image = self.durable_image();
        WalReader::new(&image).read_all()
    }

    pub fn stats(&self) -> WalStats {
        let state = self.state.lock();
        WalStats {
            next_lsn: self.next_lsn.load(Ordering::Acquire),
            durable_lsn: self.durable_lsn(),
            durable_records: state.durable_records,
            pending_records: state.buffer.len(),
            log_bytes: state.log.len(),
            checkpoints: state.checkpoints,
            last_checkpoint_lsn: state.last_checkpoint_lsn,
        }
    }

    #[cfg(test)]
    pub(crate) fn fail_next_flush(&self) {
        self.state.lock().fail_next_flush = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::wal_record::{LogRecordKind, UpdatePayload};
    use crate::transaction::ResourceId;

    fn update_body(row: i64) -> LogRecordBody {
        LogRecordBody::Update(UpdatePayload {
            resource: ResourceId::new("t", row as u64),
            page_id: 1,
            before: None,
            after: Some(vec![row.into()]),
        })
    }

    #[test]
    fn lsns_chain_per_transaction() {
        let wal = WalManager::new(WalConfig::default());
        let b1 = wal.append(1, LogRecordBody::Begin).unwrap();
        let b2 = wal.append(2, LogRecordBody::Begin).unwrap();
        let u1 = wal.append(1, update_body(1)).unwrap();
        let c1 = wal.append(1, LogRecordBody::Commit).unwrap();
        assert!(b1 < b2 && b2 < u1 && u1 < c1);
        assert_eq!(wal.durable_lsn(), 0);
        assert_eq!(wal.flush(Some(u1)).unwrap(), u1);
        assert_eq!(wal.stats().pending_records, 1);
        wal.flush(None).unwrap();
        let records = wal.durable_records().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].prev_lsn, b1);
        assert_eq!(records[3].prev_lsn, u1);
        assert_eq!(records[3].kind(), LogRecordKind::Commit);
        assert_eq!(wal.last_lsn_of(2), Some(b2));
        assert_eq!(wal.last_lsn_of(1), None);
    }

    #[test]
    fn discarded_lsn_is_never_reused() {
        let wal = WalManager::new(WalConfig::default());
        let begin = wal.append(1, LogRecordBody::Begin).unwrap();
        let commit = wal.append(1, LogRecordBody::Commit).unwrap();
        assert!(wal.discard_pending(commit));
        assert_eq!(wal.last_lsn_of(1), Some(begin));
        let abort = wal.append(1, LogRecordBody::Abort).unwrap();
        assert!(abort > commit);
        wal.flush(None).unwrap();
        assert!(!wal.discard_pending(abort));
        let kinds: Vec<_> = wal
            .durable_records()
            .unwrap()
            .iter()
            .map(|r| r.kind())
            .collect();
        assert_eq!(kinds, vec![LogRecordKind::Begin, LogRecordKind::Abort]);
    }

    #[test]
    fn checkpoint_captures_tables_and_reopen_continues() {
        let config = WalConfig {
            checkpoint_interval_records: Some(3),
        };
        let wal = WalManager::new(config);
        wal.append(1, LogRecordBody::Begin).unwrap();
        let first = wal.append(1, update_body(1)).unwrap();
        assert!(!wal.checkpoint_due());
        wal.append(1, update_body(2)).unwrap();
        assert!(wal.checkpoint_due());
        let cp = wal.checkpoint().unwrap();
        assert!(!wal.checkpoint_due());
        let records = wal.durable_records().unwrap();
        let LogRecordBody::Checkpoint(payload) = &records.last().unwrap().body else {
            panic!("expected checkpoint");
        };
        assert_eq!(payload.active_transactions, vec![(1, first + 1)]);
        assert_eq!(payload.dirty_pages, vec![(1, first)]);

        let reopened = WalManager::open(config, &wal.durable_image()).unwrap();
        assert_eq!(reopened.max_assigned_lsn(), cp);
        assert_eq!(reopened.last_lsn_of(1), Some(first + 1));
        assert_eq!(reopened.stats().last_checkpoint_lsn, Some(cp));
        let next = reopened.append(1, LogRecordBody::Commit).unwrap();
        assert_eq!(next, cp + 1);
    }

    #[test]
    fn injected_flush_failure_keeps_records_pending() {
        let wal = WalManager::new(WalConfig::default());
        let lsn = wal.append(1, LogRecordBody::Begin).unwrap();
        wal.fail_next_flush();
        assert!(wal.flush(None).is_err());
        assert_eq!(wal.durable_lsn(), 0);
        assert_eq!(wal.flush(None).unwrap(), lsn);
    }
}
