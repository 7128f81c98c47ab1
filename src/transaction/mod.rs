mod lock_manager;
mod mvcc;
mod transaction;
mod transaction_manager;

pub use lock_manager::{LockManager, LockMode, LockStats, TwoPhaseLockManager};
pub use mvcc::{MvccStore, Timestamp, Version};
pub use transaction::{
    PendingWrite, ResourceId, Transaction, TransactionId, TransactionState, UndoEntry,
};
pub use transaction_manager::{ReadOutcome, TransactionManager, TransactionStats};
