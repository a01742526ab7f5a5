use common::Version;
use thiserror::Error;
use uuid::Uuid;

/// The kind of record a store error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Book,
    Request,
    Loan,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Book => "book",
            RecordKind::Request => "request",
            RecordKind::Loan => "loan",
        };
        f.write_str(name)
    }
}

/// Errors that can occur when interacting with the library store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed since it was loaded.
    #[error("Concurrency conflict on {record} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        record: RecordKind,
        id: Uuid,
        expected: Version,
        actual: Version,
    },

    /// The database aborted the transaction to break a deadlock or a
    /// serialization failure. Safe to retry.
    #[error("Transaction aborted by the database: {0}")]
    TransactionAborted(String),

    /// The record to update or delete does not exist.
    #[error("{record} not found: {id}")]
    NotFound { record: RecordKind, id: Uuid },

    /// A unique constraint rejected the change.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A check constraint rejected the change.
    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// The change refers to a record that does not exist.
    #[error("Foreign key violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    /// A stored row could not be turned back into a record.
    #[error("Corrupt {record} row: {reason}")]
    Corrupt { record: RecordKind, reason: String },

    /// A unit of work was rejected before reaching the store.
    #[error("Invalid unit of work: {0}")]
    InvalidUnitOfWork(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if re-reading and re-applying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. } | StoreError::TransactionAborted(_)
        )
    }

    /// Returns true if the error is a unique or check violation of `constraint`.
    pub fn violates(&self, constraint: &str) -> bool {
        match self {
            StoreError::UniqueViolation { constraint: c }
            | StoreError::CheckViolation { constraint: c } => c == constraint,
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
