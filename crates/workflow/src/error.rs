//! Workflow error types.

use common::{BookId, UserId};
use domain::{InventoryError, LoanError, PermissionDenied, RequestError};
use serde::Serialize;
use store::{RecordKind, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Flat classification of every failure an entry point can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    DuplicateRequest,
    OutOfStock,
    InvalidTransition,
    NotApproved,
    AlreadyIssued,
    AlreadyReturned,
    InsufficientCopies,
    OverCapacity,
    InvalidBook,
    CopiesOnLoan,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::DuplicateRequest => "DuplicateRequest",
            ErrorKind::OutOfStock => "OutOfStock",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::NotApproved => "NotApproved",
            ErrorKind::AlreadyIssued => "AlreadyIssued",
            ErrorKind::AlreadyReturned => "AlreadyReturned",
            ErrorKind::InsufficientCopies => "InsufficientCopies",
            ErrorKind::OverCapacity => "OverCapacity",
            ErrorKind::InvalidBook => "InvalidBook",
            ErrorKind::CopiesOnLoan => "CopiesOnLoan",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Storage => "Storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while running a workflow operation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The addressed record does not exist.
    #[error("{record} not found: {id}")]
    NotFound { record: RecordKind, id: Uuid },

    #[error("Permission denied: {0}")]
    PermissionDenied(#[from] PermissionDenied),

    /// The student already has a pending or approved request for the book.
    #[error("Student {student_id} already has an open request for book {book_id}")]
    DuplicateRequest { student_id: UserId, book_id: BookId },

    /// No copy of the book is available.
    #[error("Book {book_id} is out of stock")]
    OutOfStock { book_id: BookId },

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Loan error: {0}")]
    Loan(#[from] LoanError),

    /// Every attempt lost a race with a concurrent writer.
    #[error("{operation} gave up after {attempts} conflicting attempts")]
    Conflict {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub(crate) fn not_found(record: RecordKind, id: impl Into<Uuid>) -> Self {
        WorkflowError::NotFound {
            record,
            id: id.into(),
        }
    }

    /// Returns true if the operation should be reloaded and tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Store(e) if e.is_retryable())
    }

    /// Flattens the error to its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            WorkflowError::DuplicateRequest { .. } => ErrorKind::DuplicateRequest,
            WorkflowError::OutOfStock { .. } => ErrorKind::OutOfStock,
            WorkflowError::Inventory(e) => match e {
                InventoryError::InvalidBook(_) => ErrorKind::InvalidBook,
                InventoryError::InsufficientCopies { .. } => ErrorKind::InsufficientCopies,
                InventoryError::OverCapacity { .. } => ErrorKind::OverCapacity,
                InventoryError::CopiesOnLoan { .. } => ErrorKind::CopiesOnLoan,
                InventoryError::InconsistentCounts { .. } => ErrorKind::Storage,
            },
            WorkflowError::Request(e) => match e {
                RequestError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                RequestError::NotApproved { .. } => ErrorKind::NotApproved,
                RequestError::AlreadyIssued { .. } => ErrorKind::AlreadyIssued,
            },
            WorkflowError::Loan(LoanError::AlreadyReturned { .. }) => ErrorKind::AlreadyReturned,
            WorkflowError::Conflict { .. } => ErrorKind::Conflict,
            WorkflowError::Store(e) => match e {
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::ConcurrencyConflict { .. } | StoreError::TransactionAborted(_) => {
                    ErrorKind::Conflict
                }
                _ => ErrorKind::Storage,
            },
        }
    }
}

/// Convenience type alias for workflow results.
pub type Result<T> = std::result::Result<T, WorkflowError>;
