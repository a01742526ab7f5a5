//! The workflow engine: every lending operation as one atomic unit of work.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use common::{BookId, LoanId, RequestId};
use domain::{
    Actor, Book, BookRequest, BookUpdate, InventoryError, IssuedBook, NewBook, RequestError,
    RequestStatus, Role,
};
use rand::Rng;
use store::{
    Change, LibraryStore, LibraryStoreExt, LoanQuery, RecordKind, RequestQuery, SortOrder,
    StoreError, UnitOfWork, constraints,
};

use crate::dashboard::{DASHBOARD_LIST_LEN, LibrarianDashboard, StudentDashboard};
use crate::error::{Result, WorkflowError};

/// Attempts made before a racing operation gives up with `Conflict`.
pub const MAX_ATTEMPTS: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_millis(2);
const BACKOFF_CAP: Duration = Duration::from_millis(50);

/// Orchestrates requests, approvals, issuance and returns over a shared store.
///
/// The engine keeps no state of its own. Each write operation loads the
/// records it needs, validates them, and commits one [`UnitOfWork`]. If the
/// commit loses a compare-and-set race the operation waits a jittered,
/// growing delay, reloads and runs again, up to [`MAX_ATTEMPTS`] times.
///
/// Copy counts move through [`Change::TakeCopy`] and [`Change::ReturnCopy`],
/// which the store applies relative to the current count, so issues and
/// returns of different requests on one title never race each other.
pub struct WorkflowEngine<S: LibraryStore> {
    store: S,
}

impl<S: LibraryStore> WorkflowEngine<S> {
    /// Creates a new workflow engine over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // -- Inventory --

    /// Lists every book, ordered by title.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_books(&self, actor: Actor) -> Result<Vec<Book>> {
        Ok(self.store.list_books().await?)
    }

    /// Retrieves a single book.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get_book(&self, actor: Actor, book_id: BookId) -> Result<Book> {
        self.load_book(book_id).await
    }

    /// Adds a title to the inventory with every copy available.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn add_book(&self, actor: Actor, new: NewBook) -> Result<Book> {
        actor.require(Role::Librarian, "add book")?;

        let mut book = Book::create(new)?;
        self.store
            .commit_one(Change::InsertBook(book.clone()))
            .await?;
        book.version = book.version.next();

        tracing::info!(book_id = %book.id, total_copies = book.total_copies(), "book added");
        Ok(book)
    }

    /// Edits a book. A new total keeps the number of copies on loan unchanged.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn update_book(
        &self,
        actor: Actor,
        book_id: BookId,
        update: BookUpdate,
    ) -> Result<Book> {
        actor.require(Role::Librarian, "update book")?;

        retry("update book", move || self.try_update_book(book_id, update.clone())).await
    }

    async fn try_update_book(&self, book_id: BookId, update: BookUpdate) -> Result<Book> {
        let mut book = self.load_book(book_id).await?;
        book.apply_update(update)?;

        self.store
            .commit_one(Change::UpdateBook(book.clone()))
            .await?;
        book.version = book.version.next();

        tracing::info!(
            book_id = %book.id,
            total_copies = book.total_copies(),
            available_copies = book.available_copies(),
            "book updated"
        );
        Ok(book)
    }

    /// Removes a book together with its requests and loans.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete_book(&self, actor: Actor, book_id: BookId) -> Result<()> {
        actor.require(Role::Librarian, "delete book")?;

        retry("delete book", move || self.try_delete_book(book_id)).await
    }

    async fn try_delete_book(&self, book_id: BookId) -> Result<()> {
        let book = self.load_book(book_id).await?;

        self.store
            .commit(UnitOfWork::new().delete_book(&book))
            .await?;

        tracing::info!(%book_id, "book deleted");
        Ok(())
    }

    // -- Requests --

    /// Submits a pending request for a book on behalf of a student.
    ///
    /// Fails with `OutOfStock` when no copy is on the shelf and with
    /// `DuplicateRequest` when the student already holds a pending or
    /// approved request for the same book.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn request_book(&self, actor: Actor, book_id: BookId) -> Result<BookRequest> {
        actor.require(Role::Student, "request book")?;

        let request = retry("request book", move || self.try_request_book(actor, book_id)).await?;

        metrics::counter!("library_requests_created").increment(1);
        tracing::info!(request_id = %request.id, %book_id, "book requested");
        Ok(request)
    }

    async fn try_request_book(&self, actor: Actor, book_id: BookId) -> Result<BookRequest> {
        let book = self.load_book(book_id).await?;
        if !book.is_available() {
            tracing::warn!(%book_id, "request refused, no copies available");
            return Err(WorkflowError::OutOfStock { book_id });
        }

        let duplicate = WorkflowError::DuplicateRequest {
            student_id: actor.user_id,
            book_id,
        };
        if self.store.has_open_request(actor.user_id, book_id).await? {
            return Err(duplicate);
        }

        let mut request = BookRequest::new(actor.user_id, book_id, Utc::now());
        match self
            .store
            .commit_one(Change::InsertRequest(request.clone()))
            .await
        {
            Ok(()) => {}
            // A concurrent submission got in between the check and the insert
            Err(e) if e.violates(constraints::ONE_OPEN_REQUEST) => return Err(duplicate),
            Err(StoreError::ForeignKeyViolation { .. }) => {
                return Err(WorkflowError::not_found(RecordKind::Book, book_id));
            }
            Err(e) => return Err(e.into()),
        }
        request.version = request.version.next();
        Ok(request)
    }

    /// Lists the student's own requests, newest first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_my_requests(&self, actor: Actor) -> Result<Vec<BookRequest>> {
        actor.require(Role::Student, "list own requests")?;

        Ok(self
            .store
            .query_requests(RequestQuery::for_student(actor.user_id))
            .await?)
    }

    /// Lists the student's own loans, newest first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_my_loans(&self, actor: Actor) -> Result<Vec<IssuedBook>> {
        actor.require(Role::Student, "list own loans")?;

        Ok(self
            .store
            .query_loans(LoanQuery::for_student(actor.user_id))
            .await?)
    }

    /// Approves a pending request.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn approve_request(
        &self,
        actor: Actor,
        request_id: RequestId,
    ) -> Result<BookRequest> {
        actor.require(Role::Librarian, "approve request")?;

        let request = retry("approve request", move || {
            self.try_decide(actor, request_id, RequestStatus::Approved)
        })
        .await?;

        metrics::counter!("library_requests_approved").increment(1);
        Ok(request)
    }

    /// Rejects a pending request.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn reject_request(
        &self,
        actor: Actor,
        request_id: RequestId,
    ) -> Result<BookRequest> {
        actor.require(Role::Librarian, "reject request")?;

        let request = retry("reject request", move || {
            self.try_decide(actor, request_id, RequestStatus::Rejected)
        })
        .await?;

        metrics::counter!("library_requests_rejected").increment(1);
        Ok(request)
    }

    async fn try_decide(
        &self,
        actor: Actor,
        request_id: RequestId,
        to: RequestStatus,
    ) -> Result<BookRequest> {
        let mut request = self.load_request(request_id).await?;
        let from = request.status;
        if let Err(e) = request.transition(to, actor.user_id, Utc::now()) {
            tracing::warn!(%request_id, %from, %to, "transition refused");
            return Err(e.into());
        }

        self.store
            .commit_one(Change::UpdateRequest(request.clone()))
            .await?;
        request.version = request.version.next();

        tracing::info!(%request_id, %from, %to, "request decided");
        Ok(request)
    }

    // -- Loans --

    /// Issues a copy against an approved request.
    ///
    /// Takes a copy off the shelf, opens a loan due fourteen days from now and
    /// marks the request issued, all in one unit of work.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn issue_book(&self, actor: Actor, request_id: RequestId) -> Result<IssuedBook> {
        actor.require(Role::Librarian, "issue book")?;
        let start = std::time::Instant::now();

        let loan = retry("issue book", move || self.try_issue_book(request_id)).await?;

        metrics::counter!("library_books_issued").increment(1);
        metrics::histogram!("library_issue_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(loan_id = %loan.id, %request_id, due_at = %loan.due_at, "book issued");
        Ok(loan)
    }

    async fn try_issue_book(&self, request_id: RequestId) -> Result<IssuedBook> {
        let mut request = self.load_request(request_id).await?;
        request.ensure_issuable()?;

        let book_id = request.book_id;
        let out_of_stock = || {
            tracing::warn!(%book_id, %request_id, "issue refused, no copies available");
            WorkflowError::OutOfStock { book_id }
        };

        let mut book = self.load_book(book_id).await?;
        book.decrement_available().map_err(|e| match e {
            InventoryError::InsufficientCopies { .. } => out_of_stock(),
            other => other.into(),
        })?;

        let mut loan = IssuedBook::for_request(&request, Utc::now())?;
        request.mark_issued()?;

        // The request goes first so a racing issue of the same request is a
        // version conflict rather than a stock failure.
        let unit = UnitOfWork::new()
            .update_request(request)
            .take_copy(book_id)
            .insert_loan(loan.clone());
        match self.store.commit(unit).await {
            Ok(()) => {}
            // The last copy went to a concurrent issue after the load
            Err(e) if e.violates(constraints::COPY_COUNTS) => return Err(out_of_stock()),
            Err(e) if e.violates(constraints::ONE_LOAN_PER_REQUEST) => {
                return Err(RequestError::AlreadyIssued { request_id }.into());
            }
            Err(e) => return Err(e.into()),
        }
        loan.version = loan.version.next();
        Ok(loan)
    }

    /// Closes a loan and puts the copy back on the shelf.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn return_book(&self, actor: Actor, loan_id: LoanId) -> Result<IssuedBook> {
        actor.require(Role::Librarian, "return book")?;

        let loan = retry("return book", move || self.try_return_book(loan_id)).await?;

        metrics::counter!("library_books_returned").increment(1);
        let late = loan.returned_at.is_some_and(|at| at > loan.due_at);
        tracing::info!(%loan_id, late, "book returned");
        Ok(loan)
    }

    async fn try_return_book(&self, loan_id: LoanId) -> Result<IssuedBook> {
        let mut loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(RecordKind::Loan, loan_id))?;
        if let Err(e) = loan.mark_returned(Utc::now()) {
            tracing::warn!(%loan_id, "return refused, loan already closed");
            return Err(e.into());
        }

        let mut book = self.load_book(loan.book_id).await?;
        book.increment_available()?;

        let unit = UnitOfWork::new()
            .update_loan(loan.clone())
            .return_copy(book.id);
        match self.store.commit(unit).await {
            Ok(()) => {}
            Err(e) if e.violates(constraints::COPY_COUNTS) => {
                return Err(InventoryError::OverCapacity {
                    book_id: book.id,
                    total_copies: book.total_copies(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
        loan.version = loan.version.next();
        Ok(loan)
    }

    // -- Librarian views --

    /// Lists requests waiting on a librarian: pending and approved, oldest first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_pending(&self, actor: Actor) -> Result<Vec<BookRequest>> {
        actor.require(Role::Librarian, "list pending requests")?;

        Ok(self
            .store
            .query_requests(RequestQuery::new().open().order(SortOrder::OldestFirst))
            .await?)
    }

    /// Lists every loan, active and returned, newest first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_issued(&self, actor: Actor) -> Result<Vec<IssuedBook>> {
        actor.require(Role::Librarian, "list loans")?;

        Ok(self.store.query_loans(LoanQuery::new()).await?)
    }

    /// Lists every request, newest first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_all_requests(&self, actor: Actor) -> Result<Vec<BookRequest>> {
        actor.require(Role::Librarian, "list requests")?;

        Ok(self.store.query_requests(RequestQuery::new()).await?)
    }

    // -- Dashboards --

    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn librarian_dashboard(&self, actor: Actor) -> Result<LibrarianDashboard> {
        actor.require(Role::Librarian, "view librarian dashboard")?;
        let now = Utc::now();

        let oldest = |status: RequestStatus| {
            RequestQuery::new()
                .status(status)
                .order(SortOrder::OldestFirst)
                .limit(DASHBOARD_LIST_LEN)
        };

        Ok(LibrarianDashboard {
            total_books: self.store.count_books().await?,
            active_loans: self.store.count_loans(LoanQuery::new().active()).await?,
            pending_requests: self
                .store
                .count_requests(RequestQuery::new().status(RequestStatus::Pending))
                .await?,
            overdue_loans: self
                .store
                .count_loans(LoanQuery::new().active().due_before(now))
                .await?,
            pending: self
                .store
                .query_requests(oldest(RequestStatus::Pending))
                .await?,
            approved: self
                .store
                .query_requests(oldest(RequestStatus::Approved))
                .await?,
        })
    }

    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn student_dashboard(&self, actor: Actor) -> Result<StudentDashboard> {
        actor.require(Role::Student, "view student dashboard")?;
        let me = actor.user_id;

        Ok(StudentDashboard {
            active_loans: self.store.count_loans(LoanQuery::for_student(me).active()).await?,
            pending_requests: self
                .store
                .count_requests(RequestQuery::for_student(me).status(RequestStatus::Pending))
                .await?,
            returned_loans: self
                .store
                .count_loans(LoanQuery::for_student(me).returned())
                .await?,
            recent_loans: self
                .store
                .query_loans(LoanQuery::for_student(me).active().limit(DASHBOARD_LIST_LEN))
                .await?,
            recent_requests: self
                .store
                .query_requests(RequestQuery::for_student(me).limit(DASHBOARD_LIST_LEN))
                .await?,
        })
    }

    async fn load_book(&self, book_id: BookId) -> Result<Book> {
        self.store
            .get_book(book_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(RecordKind::Book, book_id))
    }

    async fn load_request(&self, request_id: RequestId) -> Result<BookRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(RecordKind::Request, request_id))
    }
}

/// Runs `attempt` until it stops losing compare-and-set races.
async fn retry<T, F, Fut>(operation: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Err(e) if e.is_retryable() => {
                metrics::counter!("library_workflow_conflicts").increment(1);
                if attempts >= MAX_ATTEMPTS {
                    tracing::warn!(operation, attempts, "giving up after repeated conflicts");
                    return Err(WorkflowError::Conflict {
                        operation,
                        attempts,
                    });
                }
                let delay = backoff(attempts);
                tracing::debug!(operation, attempts, ?delay, error = %e, "conflict, reloading");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Full-jitter exponential backoff: a random delay up to
/// `BACKOFF_BASE * 2^(attempt - 1)`, capped at `BACKOFF_CAP`.
fn backoff(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(BACKOFF_CAP);
    let micros = rand::thread_rng().gen_range(0..=ceiling.as_micros() as u64);
    Duration::from_micros(micros)
}
