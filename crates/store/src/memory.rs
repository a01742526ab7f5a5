use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{BookId, LoanId, RequestId, Version};
use domain::{Book, BookRequest, IssuedBook};
use tokio::sync::RwLock;

use crate::{
    LoanQuery, RecordKind, RequestQuery, Result, SortOrder, StoreError,
    store::{Change, LibraryStore, UnitOfWork, constraints, validate_unit_of_work},
};

#[derive(Debug, Clone, Default)]
struct Tables {
    books: HashMap<BookId, Book>,
    requests: HashMap<RequestId, BookRequest>,
    loans: HashMap<LoanId, IssuedBook>,
}

impl Tables {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::InsertBook(mut book) => {
                if self.books.contains_key(&book.id) {
                    return Err(unique(constraints::BOOK_PKEY));
                }
                book.version = Version::first();
                self.books.insert(book.id, book);
            }
            Change::UpdateBook(mut book) => {
                let current = self.books.get(&book.id).map(|b| b.version);
                book.version =
                    check_version(RecordKind::Book, book.id.as_uuid(), current, book.version)?;
                self.books.insert(book.id, book);
            }
            Change::DeleteBook { id, version } => {
                let current = self.books.get(&id).map(|b| b.version);
                check_version(RecordKind::Book, id.as_uuid(), current, version)?;
                self.books.remove(&id);
                // ON DELETE CASCADE
                self.requests.retain(|_, r| r.book_id != id);
                self.loans.retain(|_, l| l.book_id != id);
            }
            Change::TakeCopy(id) => {
                let book = self.book_mut(id)?;
                book.decrement_available().map_err(|_| check(constraints::COPY_COUNTS))?;
                book.version = book.version.next();
            }
            Change::ReturnCopy(id) => {
                let book = self.book_mut(id)?;
                book.increment_available().map_err(|_| check(constraints::COPY_COUNTS))?;
                book.version = book.version.next();
            }
            Change::InsertRequest(mut request) => {
                if self.requests.contains_key(&request.id) {
                    return Err(unique(constraints::REQUEST_PKEY));
                }
                if !self.books.contains_key(&request.book_id) {
                    return Err(foreign_key(constraints::REQUEST_BOOK_FKEY));
                }
                self.check_one_open_request(&request)?;
                request.version = Version::first();
                self.requests.insert(request.id, request);
            }
            Change::UpdateRequest(mut request) => {
                let current = self.requests.get(&request.id).map(|r| r.version);
                request.version = check_version(
                    RecordKind::Request,
                    request.id.as_uuid(),
                    current,
                    request.version,
                )?;
                self.check_one_open_request(&request)?;
                self.requests.insert(request.id, request);
            }
            Change::InsertLoan(mut loan) => {
                if self.loans.contains_key(&loan.id) {
                    return Err(unique(constraints::LOAN_PKEY));
                }
                if !self.books.contains_key(&loan.book_id) {
                    return Err(foreign_key(constraints::LOAN_BOOK_FKEY));
                }
                if !self.requests.contains_key(&loan.request_id) {
                    return Err(foreign_key(constraints::LOAN_REQUEST_FKEY));
                }
                if self.loans.values().any(|l| l.request_id == loan.request_id) {
                    return Err(unique(constraints::ONE_LOAN_PER_REQUEST));
                }
                loan.version = Version::first();
                self.loans.insert(loan.id, loan);
            }
            Change::UpdateLoan(mut loan) => {
                let current = self.loans.get(&loan.id).map(|l| l.version);
                loan.version =
                    check_version(RecordKind::Loan, loan.id.as_uuid(), current, loan.version)?;
                self.loans.insert(loan.id, loan);
            }
        }
        Ok(())
    }

    fn book_mut(&mut self, id: BookId) -> Result<&mut Book> {
        self.books.get_mut(&id).ok_or(StoreError::NotFound {
            record: RecordKind::Book,
            id: id.as_uuid(),
        })
    }

    fn check_one_open_request(&self, request: &BookRequest) -> Result<()> {
        if !request.status.is_open() {
            return Ok(());
        }
        let clash = self.requests.values().any(|r| {
            r.id != request.id
                && r.student_id == request.student_id
                && r.book_id == request.book_id
                && r.status.is_open()
        });
        if clash {
            return Err(unique(constraints::ONE_OPEN_REQUEST));
        }
        Ok(())
    }
}

/// Compares the stored version with the expected one and returns the version
/// the record is written at.
fn check_version(
    record: RecordKind,
    id: uuid::Uuid,
    current: Option<Version>,
    expected: Version,
) -> Result<Version> {
    match current {
        None => Err(StoreError::NotFound { record, id }),
        Some(actual) if actual != expected => Err(StoreError::ConcurrencyConflict {
            record,
            id,
            expected,
            actual,
        }),
        Some(actual) => Ok(actual.next()),
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn check(constraint: &str) -> StoreError {
    StoreError::CheckViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key(constraint: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        constraint: constraint.to_string(),
    }
}

fn truncate<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// In-memory library store for tests and single-process runs.
///
/// A commit holds the write lock for its whole duration and applies the
/// changes to a staged copy of the tables, which replaces the live tables only
/// if every change succeeds.
#[derive(Clone, Default)]
pub struct InMemoryLibraryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLibraryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        validate_unit_of_work(&unit)?;

        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for change in unit.into_changes() {
            staged.apply(change)?;
        }
        *tables = staged;
        Ok(())
    }

    async fn get_book(&self, id: BookId) -> Result<Option<Book>> {
        Ok(self.tables.read().await.books.get(&id).cloned())
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let tables = self.tables.read().await;
        let mut books: Vec<_> = tables.books.values().cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<BookRequest>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn query_requests(&self, query: RequestQuery) -> Result<Vec<BookRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<_> = tables
            .requests
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        requests.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then(a.id.cmp(&b.id))
        });
        if query.order == SortOrder::NewestFirst {
            requests.reverse();
        }

        Ok(truncate(requests, query.limit))
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<IssuedBook>> {
        Ok(self.tables.read().await.loans.get(&id).cloned())
    }

    async fn query_loans(&self, query: LoanQuery) -> Result<Vec<IssuedBook>> {
        let tables = self.tables.read().await;
        let mut loans: Vec<_> = tables
            .loans
            .values()
            .filter(|l| query.matches(l))
            .cloned()
            .collect();

        loans.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));

        Ok(truncate(loans, query.limit))
    }

    async fn count_books(&self) -> Result<usize> {
        Ok(self.tables.read().await.books.len())
    }

    async fn count_requests(&self, query: RequestQuery) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables.requests.values().filter(|r| query.matches(r)).count())
    }

    async fn count_loans(&self, query: LoanQuery) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables.loans.values().filter(|l| query.matches(l)).count())
    }
}
