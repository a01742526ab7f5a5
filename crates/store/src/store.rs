use async_trait::async_trait;
use common::{BookId, LoanId, RequestId, UserId, Version};
use domain::{Book, BookRequest, IssuedBook};

use crate::{LoanQuery, RecordKind, RequestQuery, Result, StoreError};

/// Names of the constraints the store enforces on every commit.
///
/// The in-memory store reports the same names as the PostgreSQL schema.
pub mod constraints {
    /// A student holds at most one pending or approved request per book.
    pub const ONE_OPEN_REQUEST: &str = "book_requests_one_open_per_student";
    /// A request yields at most one loan.
    pub const ONE_LOAN_PER_REQUEST: &str = "issued_books_one_per_request";
    /// `0 <= available_copies <= total_copies`.
    pub const COPY_COUNTS: &str = "books_copy_counts";
    pub const BOOK_PKEY: &str = "books_pkey";
    pub const REQUEST_PKEY: &str = "book_requests_pkey";
    pub const LOAN_PKEY: &str = "issued_books_pkey";
    pub const REQUEST_BOOK_FKEY: &str = "book_requests_book_id_fkey";
    pub const LOAN_BOOK_FKEY: &str = "issued_books_book_id_fkey";
    pub const LOAN_REQUEST_FKEY: &str = "issued_books_request_id_fkey";
}

/// A single record change inside a [`UnitOfWork`].
///
/// Updated and deleted records carry the version they were loaded at; the
/// change only applies if the stored version still matches. Inserted records
/// are stored at [`Version::first`].
///
/// `TakeCopy` and `ReturnCopy` move one copy relative to the stored count
/// instead of comparing versions; [`constraints::COPY_COUNTS`] rejects a move
/// past either bound. Both still bump the book version.
#[derive(Debug, Clone)]
pub enum Change {
    InsertBook(Book),
    UpdateBook(Book),
    DeleteBook { id: BookId, version: Version },
    TakeCopy(BookId),
    ReturnCopy(BookId),
    InsertRequest(BookRequest),
    UpdateRequest(BookRequest),
    InsertLoan(IssuedBook),
    UpdateLoan(IssuedBook),
}

impl Change {
    /// The kind of record and id this change targets.
    pub fn target(&self) -> (RecordKind, uuid::Uuid) {
        match self {
            Change::InsertBook(book) | Change::UpdateBook(book) => {
                (RecordKind::Book, book.id.as_uuid())
            }
            Change::DeleteBook { id, .. } | Change::TakeCopy(id) | Change::ReturnCopy(id) => {
                (RecordKind::Book, id.as_uuid())
            }
            Change::InsertRequest(request) | Change::UpdateRequest(request) => {
                (RecordKind::Request, request.id.as_uuid())
            }
            Change::InsertLoan(loan) | Change::UpdateLoan(loan) => {
                (RecordKind::Loan, loan.id.as_uuid())
            }
        }
    }
}

/// An ordered list of changes applied atomically: all of them or none.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    changes: Vec<Change>,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_book(mut self, book: Book) -> Self {
        self.changes.push(Change::InsertBook(book));
        self
    }

    pub fn update_book(mut self, book: Book) -> Self {
        self.changes.push(Change::UpdateBook(book));
        self
    }

    pub fn delete_book(mut self, book: &Book) -> Self {
        self.changes.push(Change::DeleteBook {
            id: book.id,
            version: book.version,
        });
        self
    }

    /// Takes one copy of the book off the shelf.
    pub fn take_copy(mut self, book_id: BookId) -> Self {
        self.changes.push(Change::TakeCopy(book_id));
        self
    }

    /// Puts one copy of the book back on the shelf.
    pub fn return_copy(mut self, book_id: BookId) -> Self {
        self.changes.push(Change::ReturnCopy(book_id));
        self
    }

    pub fn insert_request(mut self, request: BookRequest) -> Self {
        self.changes.push(Change::InsertRequest(request));
        self
    }

    pub fn update_request(mut self, request: BookRequest) -> Self {
        self.changes.push(Change::UpdateRequest(request));
        self
    }

    pub fn insert_loan(mut self, loan: IssuedBook) -> Self {
        self.changes.push(Change::InsertLoan(loan));
        self
    }

    pub fn update_loan(mut self, loan: IssuedBook) -> Self {
        self.changes.push(Change::UpdateLoan(loan));
        self
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

/// Validates a unit of work before it is applied.
///
/// A unit must not be empty and must not touch the same record twice.
pub fn validate_unit_of_work(unit: &UnitOfWork) -> Result<()> {
    if unit.is_empty() {
        return Err(StoreError::InvalidUnitOfWork(
            "Cannot commit an empty unit of work".to_string(),
        ));
    }

    let mut seen = Vec::with_capacity(unit.len());
    for change in unit.changes() {
        let target = change.target();
        if seen.contains(&target) {
            return Err(StoreError::InvalidUnitOfWork(format!(
                "{} {} is changed more than once",
                target.0, target.1
            )));
        }
        seen.push(target);
    }

    Ok(())
}

/// Core trait for the durable store shared by every request handler.
///
/// All implementations must be thread-safe (Send + Sync). Reads return the
/// latest committed state; writes only happen through [`LibraryStore::commit`].
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Applies a unit of work atomically.
    ///
    /// Fails with `ConcurrencyConflict` if any updated record moved past the
    /// version it carries, and with `UniqueViolation`, `CheckViolation` or
    /// `ForeignKeyViolation` if a constraint rejects a change. On failure
    /// nothing is applied.
    async fn commit(&self, unit: UnitOfWork) -> Result<()>;

    /// Retrieves a book by id.
    async fn get_book(&self, id: BookId) -> Result<Option<Book>>;

    /// Lists every book, ordered by title.
    async fn list_books(&self) -> Result<Vec<Book>>;

    /// Retrieves a request by id.
    async fn get_request(&self, id: RequestId) -> Result<Option<BookRequest>>;

    /// Lists requests matching a query.
    async fn query_requests(&self, query: RequestQuery) -> Result<Vec<BookRequest>>;

    /// Retrieves a loan by id.
    async fn get_loan(&self, id: LoanId) -> Result<Option<IssuedBook>>;

    /// Lists loans matching a query.
    async fn query_loans(&self, query: LoanQuery) -> Result<Vec<IssuedBook>>;

    /// Counts every book.
    async fn count_books(&self) -> Result<usize>;

    /// Counts requests matching a query's filters. The limit is ignored.
    async fn count_requests(&self, query: RequestQuery) -> Result<usize>;

    /// Counts loans matching a query's filters. The limit is ignored.
    async fn count_loans(&self, query: LoanQuery) -> Result<usize>;
}

/// Extension trait providing convenience methods for library stores.
#[async_trait]
pub trait LibraryStoreExt: LibraryStore {
    /// Commits a unit of work holding a single change.
    async fn commit_one(&self, change: Change) -> Result<()> {
        let mut unit = UnitOfWork::new();
        unit.changes.push(change);
        self.commit(unit).await
    }

    /// Checks if the student has a pending or approved request for the book.
    async fn has_open_request(&self, student_id: UserId, book_id: BookId) -> Result<bool> {
        let open = self
            .query_requests(RequestQuery::for_student(student_id).book_id(book_id).open().limit(1))
            .await?;
        Ok(!open.is_empty())
    }

}

// Blanket implementation for all LibraryStore implementations
impl<T: LibraryStore + ?Sized> LibraryStoreExt for T {}
