//! Summary views for the two dashboards.

use domain::{BookRequest, IssuedBook};
use serde::Serialize;

/// Number of records listed in each dashboard panel.
pub const DASHBOARD_LIST_LEN: usize = 5;

/// Library-wide counts plus the oldest work waiting on a librarian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibrarianDashboard {
    pub total_books: usize,
    pub active_loans: usize,
    pub pending_requests: usize,
    pub overdue_loans: usize,
    /// Oldest pending requests first.
    pub pending: Vec<BookRequest>,
    /// Oldest approved requests first, waiting to be issued.
    pub approved: Vec<BookRequest>,
}

/// One student's own counts and latest activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentDashboard {
    pub active_loans: usize,
    pub pending_requests: usize,
    pub returned_loans: usize,
    pub recent_loans: Vec<IssuedBook>,
    pub recent_requests: Vec<BookRequest>,
}
