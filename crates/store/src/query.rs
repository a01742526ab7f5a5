use chrono::{DateTime, Utc};
use common::{BookId, UserId};
use domain::{BookRequest, IssuedBook, RequestStatus};

/// Ordering of list results by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Latest first (request or issue time descending).
    #[default]
    NewestFirst,
    /// Earliest first, the order a queue is worked in.
    OldestFirst,
}

/// Builder for listing book requests.
#[derive(Debug, Clone, Default)]
pub struct RequestQuery {
    /// Filter by requesting student.
    pub student_id: Option<UserId>,

    /// Filter by requested book.
    pub book_id: Option<BookId>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<RequestStatus>>,

    /// Ordering by request time.
    pub order: SortOrder,

    /// Maximum number of requests to return.
    pub limit: Option<usize>,
}

impl RequestQuery {
    /// Creates a query matching every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one student's requests.
    pub fn for_student(student_id: UserId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Default::default()
        }
    }

    /// Filters by book.
    pub fn book_id(mut self, book_id: BookId) -> Self {
        self.book_id = Some(book_id);
        self
    }

    /// Filters by a single status.
    pub fn status(mut self, status: RequestStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    /// Filters by any of several statuses.
    pub fn statuses(mut self, statuses: Vec<RequestStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Restricts to requests that are still pending or approved.
    pub fn open(self) -> Self {
        self.statuses(vec![RequestStatus::Pending, RequestStatus::Approved])
    }

    /// Sets the ordering.
    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `request` passes every filter.
    pub fn matches(&self, request: &BookRequest) -> bool {
        if let Some(student_id) = self.student_id
            && request.student_id != student_id
        {
            return false;
        }
        if let Some(book_id) = self.book_id
            && request.book_id != book_id
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&request.status)
        {
            return false;
        }
        true
    }
}

/// Builder for listing loans. Loans are listed newest first.
#[derive(Debug, Clone, Default)]
pub struct LoanQuery {
    /// Filter by borrowing student.
    pub student_id: Option<UserId>,

    /// `Some(false)` for loans still out, `Some(true)` for returned loans.
    pub returned: Option<bool>,

    /// Filter by loans due strictly before this instant.
    pub due_before: Option<DateTime<Utc>>,

    /// Maximum number of loans to return.
    pub limit: Option<usize>,
}

impl LoanQuery {
    /// Creates a query matching every loan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one student's loans.
    pub fn for_student(student_id: UserId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Default::default()
        }
    }

    /// Restricts to loans that have not been returned.
    pub fn active(mut self) -> Self {
        self.returned = Some(false);
        self
    }

    /// Restricts to loans that have been returned.
    pub fn returned(mut self) -> Self {
        self.returned = Some(true);
        self
    }

    /// Restricts to loans due before `instant`.
    pub fn due_before(mut self, instant: DateTime<Utc>) -> Self {
        self.due_before = Some(instant);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `loan` passes every filter.
    pub fn matches(&self, loan: &IssuedBook) -> bool {
        if let Some(student_id) = self.student_id
            && loan.student_id != student_id
        {
            return false;
        }
        if let Some(returned) = self.returned
            && loan.returned_at.is_some() != returned
        {
            return false;
        }
        if let Some(instant) = self.due_before
            && loan.due_at >= instant
        {
            return false;
        }
        true
    }
}
