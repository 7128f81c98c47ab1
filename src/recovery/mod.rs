pub mod analysis;
pub mod recovery_manager;
pub mod redo;
pub mod undo;
pub mod wal;
pub mod wal_record;

pub use recovery_manager::{RecoveredState, RecoveryManager, RecoverySummary, RecoveryTarget};
pub use wal::{Lsn, WalManager, WalStats};
pub use wal_record::{
    decode_frame, encode_frame, CheckpointPayload, ClrPayload, LogRecord, LogRecordBody,
    LogRecordKind, UpdatePayload, WalReader, INVALID_LSN,
};
