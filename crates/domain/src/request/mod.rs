//! Book requests submitted by students.

mod state;

pub use state::{ParseStatusError, RequestStatus};

use chrono::{DateTime, Utc};
use common::{BookId, RequestId, UserId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when moving a request through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The requested transition is not allowed from the current status.
    #[error("Invalid transition for request {request_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Issuance needs an approved request.
    #[error("Request {request_id} is {status}, only approved requests can be issued")]
    NotApproved {
        request_id: RequestId,
        status: RequestStatus,
    },

    /// A copy was already issued for this request.
    #[error("Request {request_id} has already been issued")]
    AlreadyIssued { request_id: RequestId },
}

/// A student's request for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRequest {
    pub id: RequestId,
    pub student_id: UserId,
    pub book_id: BookId,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    /// When a librarian approved or rejected the request.
    pub decided_at: Option<DateTime<Utc>>,
    /// The librarian who approved or rejected the request.
    pub decided_by: Option<UserId>,
    pub version: Version,
}

impl BookRequest {
    /// Creates a pending request.
    pub fn new(student_id: UserId, book_id: BookId, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::new(),
            student_id,
            book_id,
            status: RequestStatus::Pending,
            requested_at: now,
            decided_at: None,
            decided_by: None,
            version: Version::initial(),
        }
    }

    /// Approves a pending request.
    pub fn approve(&mut self, librarian: UserId, now: DateTime<Utc>) -> Result<(), RequestError> {
        self.decide(RequestStatus::Approved, librarian, now)
    }

    /// Rejects a pending request.
    pub fn reject(&mut self, librarian: UserId, now: DateTime<Utc>) -> Result<(), RequestError> {
        self.decide(RequestStatus::Rejected, librarian, now)
    }

    /// Checks that a copy can be issued against this request.
    pub fn ensure_issuable(&self) -> Result<(), RequestError> {
        match self.status {
            RequestStatus::Approved => Ok(()),
            RequestStatus::Issued => Err(RequestError::AlreadyIssued {
                request_id: self.id,
            }),
            status => Err(RequestError::NotApproved {
                request_id: self.id,
                status,
            }),
        }
    }

    /// Flips an approved request to issued.
    pub fn mark_issued(&mut self) -> Result<(), RequestError> {
        self.ensure_issuable()?;
        self.status = RequestStatus::Issued;
        Ok(())
    }

    /// Applies any legal transition.
    ///
    /// `actor` is recorded as the decider for approve and reject; issuance
    /// keeps the first decider.
    pub fn transition(
        &mut self,
        to: RequestStatus,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        match to {
            RequestStatus::Approved => self.approve(actor, now),
            RequestStatus::Rejected => self.reject(actor, now),
            RequestStatus::Issued if self.status.can_issue() => self.mark_issued(),
            _ => Err(self.invalid(to)),
        }
    }

    fn decide(
        &mut self,
        to: RequestStatus,
        librarian: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        if !self.status.can_transition_to(to) {
            return Err(self.invalid(to));
        }
        self.status = to;
        self.decided_at = Some(now);
        self.decided_by = Some(librarian);
        Ok(())
    }

    fn invalid(&self, to: RequestStatus) -> RequestError {
        RequestError::InvalidTransition {
            request_id: self.id,
            from: self.status,
            to,
        }
    }
}
