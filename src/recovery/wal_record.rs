use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::buffer::PageId;
use crate::error::{MemDbError, MemDbResult};
use crate::recovery::Lsn;
use crate::storage::tuple::Row;
use crate::transaction::{ResourceId, TransactionId};

// WAL frame
// +-------------+-------------+---------------------------+
// | body_len(4) | crc32(4)    | body (bincode LogRecord)  |
// +-------------+-------------+---------------------------+
// - both header fields little-endian; the crc covers the body only
pub const WAL_FRAME_HEADER_LEN: usize = 4 + 4;

/// LSN 0 is never assigned; it marks "no previous record".
pub const INVALID_LSN: Lsn = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LogRecordKind {
    Begin,
    Update,
    Commit,
    Abort,
    Clr,
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub resource: ResourceId,
    pub page_id: PageId,
    /// `None` when the resource did not exist before (insert).
    pub before: Option<Row>,
    /// `None` when the write removed the resource (delete).
    pub after: Option<Row>,
}

/// Compensation record for one undone update. Redo installs `image`;
/// undo never revisits it and continues at `undo_next_lsn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClrPayload {
    pub resource: ResourceId,
    pub page_id: PageId,
    pub undone_lsn: Lsn,
    pub undo_next_lsn: Lsn,
    pub image: Option<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// Transaction table: (txn, last LSN written by it).
    pub active_transactions: Vec<(TransactionId, Lsn)>,
    /// Dirty page table: (page, recLSN).
    pub dirty_pages: Vec<(PageId, Lsn)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecordBody {
    Begin,
    Update(UpdatePayload),
    Commit,
    Abort,
    Clr(ClrPayload),
    Checkpoint(CheckpointPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TransactionId,
    /// Previous record of the same transaction, `INVALID_LSN` for the first.
    pub prev_lsn: Lsn,
    pub body: LogRecordBody,
}

impl LogRecord {
    pub fn kind(&self) -> LogRecordKind {
        match self.body {
            LogRecordBody::Begin => LogRecordKind::Begin,
            LogRecordBody::Update(_) => LogRecordKind::Update,
            LogRecordBody::Commit => LogRecordKind::Commit,
            LogRecordBody::Abort => LogRecordKind::Abort,
            LogRecordBody::Clr(_) => LogRecordKind::Clr,
            LogRecordBody::Checkpoint(_) => LogRecordKind::Checkpoint,
        }
    }

    /// Page touched by this record, for the dirty page table.
    pub fn page_id(&self) -> Option<PageId> {
        match &self.body {
            LogRecordBody::Update(update) => Some(update.page_id),
            LogRecordBody::Clr(clr) => Some(clr.page_id),
            _ => None,
        }
    }
}

pub fn encode_frame(record: &LogRecord) -> MemDbResult<Vec<u8>> {
    let body = bincode::serialize(record)?;
    let body_len = u32::try_from(body.len()).map_err(|_| {
        MemDbError::Internal(format!("wal record {} too large to frame", record.lsn))
    })?;
    let mut frame = Vec::with_capacity(WAL_FRAME_HEADER_LEN + body.len());
    frame.put_u32_le(body_len);
    frame.put_u32_le(crc32fast::hash(&body));
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the frame at the start of `bytes`. Returns the record and the
/// number of bytes consumed, or `None` when `bytes` is empty.
pub fn decode_frame(bytes: &[u8]) -> MemDbResult<Option<(LogRecord, usize)>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() < WAL_FRAME_HEADER_LEN {
        return Err(MemDbError::RecoveryFailure(format!(
            "truncated wal frame header ({} bytes)",
            bytes.len()
        )));
    }
    let mut header = &bytes[..WAL_FRAME_HEADER_LEN];
    let body_len = header.get_u32_le() as usize;
    let expected_crc = header.get_u32_le();
    let end = WAL_FRAME_HEADER_LEN + body_len;
    if bytes.len() < end {
        return Err(MemDbError::RecoveryFailure(format!(
            "truncated wal frame body: need {body_len} bytes, have {}",
            bytes.len() - WAL_FRAME_HEADER_LEN
        )));
    }
    let body = &bytes[WAL_FRAME_HEADER_LEN..end];
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err(MemDbError::RecoveryFailure(format!(
            "wal frame checksum mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }
    let record: LogRecord = bincode::deserialize(body)
        .map_err(|e| MemDbError::RecoveryFailure(format!("undecodable wal record: {e}")))?;
    Ok(Some((record, end)))
}

/// Sequential reader over a WAL image.
pub struct WalReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    last_lsn: Lsn,
}

impl<'a> WalReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            last_lsn: INVALID_LSN,
        }
    }

    pub fn next_record(&mut self) -> MemDbResult<Option<LogRecord>> {
        let Some((record, consumed)) = decode_frame(&self.bytes[self.offset..])? else {
            return Ok(None);
        };
        if record.lsn <= self.last_lsn {
            return Err(MemDbError::RecoveryFailure(format!(
                "wal lsn {} does not follow {}",
                record.lsn, self.last_lsn
            )));
        }
        self.offset += consumed;
        self.last_lsn = record.lsn;
        Ok(Some(record))
    }

    pub fn read_all(mut self) -> MemDbResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}
