//! Loans: copies issued against approved requests.

use chrono::{DateTime, Duration, Utc};
use common::{BookId, LoanId, RequestId, UserId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{BookRequest, RequestError};

/// Days a copy may be kept before it is due back.
pub const LOAN_PERIOD_DAYS: i64 = 14;

/// Errors that can occur when closing a loan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoanError {
    #[error("Loan {loan_id} was already returned at {returned_at}")]
    AlreadyReturned {
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    },
}

/// One copy of a book out to one student, tied to the request it fulfils.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedBook {
    pub id: LoanId,
    pub student_id: UserId,
    pub book_id: BookId,
    pub request_id: RequestId,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub version: Version,
}

impl IssuedBook {
    /// Opens a loan for an approved request, due [`LOAN_PERIOD_DAYS`] after `now`.
    pub fn for_request(request: &BookRequest, now: DateTime<Utc>) -> Result<Self, RequestError> {
        request.ensure_issuable()?;
        Ok(Self {
            id: LoanId::new(),
            student_id: request.student_id,
            book_id: request.book_id,
            request_id: request.id,
            issued_at: now,
            due_at: now + Duration::days(LOAN_PERIOD_DAYS),
            returned_at: None,
            version: Version::initial(),
        })
    }

    /// Returns true while the copy is still out.
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    /// Returns true if the copy is still out past its due date.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.due_at
    }

    /// Closes the loan.
    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> Result<(), LoanError> {
        if let Some(returned_at) = self.returned_at {
            return Err(LoanError::AlreadyReturned {
                loan_id: self.id,
                returned_at,
            });
        }
        self.returned_at = Some(now);
        Ok(())
    }
}
