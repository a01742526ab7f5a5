//! Book request state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored status or role string that is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// The status of a book request in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──approve──► Approved ──issue──► Issued
///    │
///    └─────reject────► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Submitted by a student, awaiting a librarian.
    #[default]
    Pending,

    /// Accepted by a librarian, awaiting issuance.
    Approved,

    /// Turned down by a librarian (terminal state).
    Rejected,

    /// A copy was handed out for this request (terminal state).
    Issued,
}

impl RequestStatus {
    /// Returns true if a librarian can approve the request in this state.
    pub fn can_approve(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    /// Returns true if a librarian can reject the request in this state.
    pub fn can_reject(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    /// Returns true if a copy can be issued against the request in this state.
    pub fn can_issue(&self) -> bool {
        matches!(self, RequestStatus::Approved)
    }

    /// Returns true while the request still blocks a new one for the same book.
    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Issued)
    }

    /// Returns true if moving from this state to `to` is a legal transition.
    pub fn can_transition_to(&self, to: RequestStatus) -> bool {
        match to {
            RequestStatus::Approved => self.can_approve(),
            RequestStatus::Rejected => self.can_reject(),
            RequestStatus::Issued => self.can_issue(),
            RequestStatus::Pending => false,
        }
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Issued => "issued",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "issued" => Ok(RequestStatus::Issued),
            other => Err(ParseStatusError {
                kind: "request status",
                value: other.to_string(),
            }),
        }
    }
}
