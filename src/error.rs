use thiserror::Error;

pub type MemDbResult<T, E = MemDbError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum MemDbError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lock conflict: {0}")]
    Conflict(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Recovery failure: {0}")]
    RecoveryFailure(String),

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("Not support: {0}")]
    NotSupport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Parser error: {0}")]
    Parser(#[from] sqlparser::parser::ParserError),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl MemDbError {
    /// Lock conflicts and deadlocks leave the transaction abortable; callers
    /// usually roll back and retry on these.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemDbError::Conflict(_) | MemDbError::Deadlock(_))
    }
}
