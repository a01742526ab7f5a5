//! Integration tests for the lending workflow on the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{BookId, LoanId, RequestId, UserId};
use domain::{
    Actor, Book, BookRequest, BookUpdate, IssuedBook, MAX_COPIES, NewBook, RequestStatus,
};
use futures_util::future::join_all;
use store::{InMemoryLibraryStore, LibraryStore, UnitOfWork};
use workflow::{ErrorKind, WorkflowEngine};

struct TestHarness {
    engine: WorkflowEngine<InMemoryLibraryStore>,
    librarian: Actor,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            engine: WorkflowEngine::new(InMemoryLibraryStore::new()),
            librarian: Actor::librarian(UserId::new()),
        }
    }

    fn student() -> Actor {
        Actor::student(UserId::new())
    }

    async fn add_book(&self, total_copies: u32) -> Book {
        self.engine
            .add_book(
                self.librarian,
                NewBook::new("The Left Hand of Darkness", "Ursula K. Le Guin", total_copies),
            )
            .await
            .unwrap()
    }

    async fn book(&self, book_id: BookId) -> Book {
        self.engine.get_book(self.librarian, book_id).await.unwrap()
    }

    async fn approved_request(&self, student: Actor, book_id: BookId) -> BookRequest {
        let request = self.engine.request_book(student, book_id).await.unwrap();
        self.engine
            .approve_request(self.librarian, request.id)
            .await
            .unwrap()
    }

    async fn issued_loan(&self, student: Actor, book_id: BookId) -> IssuedBook {
        let request = self.approved_request(student, book_id).await;
        self.engine
            .issue_book(self.librarian, request.id)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_full_lending_cycle() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(2).await;
    assert_eq!(book.available_copies(), 2);

    let request = h.engine.request_book(student, book.id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.student_id, student.user_id);

    let approved = h
        .engine
        .approve_request(h.librarian, request.id)
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.decided_by, Some(h.librarian.user_id));
    assert!(approved.decided_at.is_some());

    let loan = h.engine.issue_book(h.librarian, request.id).await.unwrap();
    assert_eq!(loan.request_id, request.id);
    assert_eq!(loan.student_id, student.user_id);
    assert_eq!(loan.due_at - loan.issued_at, Duration::days(14));
    assert!(loan.returned_at.is_none());

    assert_eq!(h.book(book.id).await.available_copies(), 1);
    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Issued);

    let returned = h.engine.return_book(h.librarian, loan.id).await.unwrap();
    assert!(returned.returned_at.is_some());
    assert_eq!(h.book(book.id).await.available_copies(), 2);
}

#[tokio::test]
async fn test_request_fails_when_out_of_stock() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    h.issued_loan(TestHarness::student(), book.id).await;

    let err = h
        .engine
        .request_book(TestHarness::student(), book.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfStock);
}

#[tokio::test]
async fn test_request_for_zero_copy_book_fails() {
    let h = TestHarness::new();
    let book = h.add_book(0).await;

    let err = h
        .engine
        .request_book(TestHarness::student(), book.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfStock);
}

#[tokio::test]
async fn test_duplicate_open_request_is_refused() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(3).await;

    h.engine.request_book(student, book.id).await.unwrap();
    let err = h.engine.request_book(student, book.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateRequest);

    // approved still counts as open
    let requests = h.engine.list_my_requests(student).await.unwrap();
    h.engine
        .approve_request(h.librarian, requests[0].id)
        .await
        .unwrap();
    let err = h.engine.request_book(student, book.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateRequest);
}

#[tokio::test]
async fn test_rejected_request_can_be_resubmitted() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(1).await;

    let first = h.engine.request_book(student, book.id).await.unwrap();
    let rejected = h
        .engine
        .reject_request(h.librarian, first.id)
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);

    let second = h.engine.request_book(student, book.id).await.unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_concurrent_duplicate_requests_only_one_wins() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(5).await;

    let results = join_all((0..4).map(|_| h.engine.request_book(student, book.id))).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert_eq!(err.kind(), ErrorKind::DuplicateRequest);
    }
}

#[tokio::test]
async fn test_issue_requires_approval_and_changes_nothing() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    let request = h
        .engine
        .request_book(TestHarness::student(), book.id)
        .await
        .unwrap();

    let err = h
        .engine
        .issue_book(h.librarian, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotApproved);

    assert_eq!(h.book(book.id).await.available_copies(), 1);
    assert!(h.engine.list_issued(h.librarian).await.unwrap().is_empty());
    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(stored.version, request.version);
}

#[tokio::test]
async fn test_issue_of_rejected_request_is_not_approved() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    let request = h
        .engine
        .request_book(TestHarness::student(), book.id)
        .await
        .unwrap();
    h.engine
        .reject_request(h.librarian, request.id)
        .await
        .unwrap();

    let err = h
        .engine
        .issue_book(h.librarian, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotApproved);
}

#[tokio::test]
async fn test_issuing_twice_fails_with_already_issued() {
    let h = TestHarness::new();
    let book = h.add_book(2).await;
    let request = h.approved_request(TestHarness::student(), book.id).await;

    h.engine.issue_book(h.librarian, request.id).await.unwrap();
    let err = h
        .engine
        .issue_book(h.librarian, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyIssued);
    assert_eq!(h.book(book.id).await.available_copies(), 1);
}

#[tokio::test]
async fn test_concurrent_issue_of_last_copy() {
    let h = TestHarness::new();
    let book = h.add_book(2).await;

    // Take one copy out so two approved requests race for the last one
    h.issued_loan(TestHarness::student(), book.id).await;
    let first = h.approved_request(TestHarness::student(), book.id).await;
    let second = h.approved_request(TestHarness::student(), book.id).await;

    let results = join_all([
        h.engine.issue_book(h.librarian, first.id),
        h.engine.issue_book(h.librarian, second.id),
    ])
    .await;

    let issued = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(issued, 1);
    let failure = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(failure.kind(), ErrorKind::OutOfStock);

    let book = h.book(book.id).await;
    assert_eq!(book.available_copies(), 0);
    assert_eq!(book.total_copies(), 2);
}

/// Approves `requests` requests for a book with `copies` copies, then issues
/// each from its own task. Returns the engine, the book id and the outcomes.
async fn issue_from_many_tasks(
    copies: u32,
    requests: usize,
) -> (
    Arc<WorkflowEngine<InMemoryLibraryStore>>,
    BookId,
    Vec<workflow::Result<IssuedBook>>,
) {
    let engine = Arc::new(WorkflowEngine::new(InMemoryLibraryStore::new()));
    let librarian = Actor::librarian(UserId::new());
    let book = engine
        .add_book(librarian, NewBook::new("Dune", "Frank Herbert", copies))
        .await
        .unwrap();

    let mut request_ids = Vec::with_capacity(requests);
    for _ in 0..requests {
        let request = engine
            .request_book(Actor::student(UserId::new()), book.id)
            .await
            .unwrap();
        engine.approve_request(librarian, request.id).await.unwrap();
        request_ids.push(request.id);
    }

    let handles: Vec<_> = request_ids
        .into_iter()
        .map(|request_id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.issue_book(librarian, request_id).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    (engine, book.id, outcomes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_issue_succeeds_while_copies_remain() {
    let (engine, book_id, outcomes) = issue_from_many_tasks(300, 300).await;

    for outcome in &outcomes {
        if let Err(e) = outcome {
            panic!("issue refused with copies on the shelf: {e}");
        }
    }

    let book = engine.store().get_book(book_id).await.unwrap().unwrap();
    assert_eq!(book.available_copies(), 0);
    assert_eq!(book.copies_on_loan(), 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_issue_from_many_tasks() {
    let (engine, book_id, outcomes) = issue_from_many_tasks(5, 40).await;

    let mut issued = 0;
    for outcome in outcomes {
        match outcome {
            Ok(_) => issued += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::OutOfStock, "unexpected error: {e}"),
        }
    }
    assert_eq!(issued, 5);

    let book = engine.store().get_book(book_id).await.unwrap().unwrap();
    assert_eq!(book.available_copies(), 0);
    assert_eq!(book.total_copies(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_returns_of_many_loans() {
    let (engine, book_id, outcomes) = issue_from_many_tasks(50, 50).await;
    let librarian = Actor::librarian(UserId::new());

    let handles: Vec<_> = outcomes
        .into_iter()
        .map(|outcome| {
            let engine = engine.clone();
            let loan_id = outcome.unwrap().id;
            tokio::spawn(async move { engine.return_book(librarian, loan_id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let book = engine.store().get_book(book_id).await.unwrap().unwrap();
    assert_eq!(book.available_copies(), 50);
}

#[tokio::test]
async fn test_return_twice_increments_once() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    let loan = h.issued_loan(TestHarness::student(), book.id).await;
    assert_eq!(h.book(book.id).await.available_copies(), 0);

    h.engine.return_book(h.librarian, loan.id).await.unwrap();
    let err = h
        .engine
        .return_book(h.librarian, loan.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyReturned);

    assert_eq!(h.book(book.id).await.available_copies(), 1);
}

#[tokio::test]
async fn test_concurrent_returns_increment_once() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    let loan = h.issued_loan(TestHarness::student(), book.id).await;

    let results = join_all((0..3).map(|_| h.engine.return_book(h.librarian, loan.id))).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(h.book(book.id).await.available_copies(), 1);
}

#[tokio::test]
async fn test_transitions_are_applied_once() {
    let h = TestHarness::new();
    let book = h.add_book(1).await;
    let request = h.approved_request(TestHarness::student(), book.id).await;

    let err = h
        .engine
        .approve_request(h.librarian, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let err = h
        .engine
        .reject_request(h.librarian, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn test_role_checks() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(1).await;

    let err = h
        .engine
        .add_book(student, NewBook::new("Emma", "Jane Austen", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = h.engine.request_book(h.librarian, book.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let request = h.engine.request_book(student, book.id).await.unwrap();
    for result in [
        h.engine.approve_request(student, request.id).await,
        h.engine.reject_request(student, request.id).await,
    ] {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::PermissionDenied);
    }
    let err = h.engine.issue_book(student, request.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = h.engine.list_pending(student).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = h.engine.student_dashboard(h.librarian).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // both roles can browse the inventory
    assert_eq!(h.engine.list_books(student).await.unwrap().len(), 1);
    assert_eq!(h.engine.list_books(h.librarian).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
    let h = TestHarness::new();
    let student = TestHarness::student();

    let err = h
        .engine
        .request_book(student, BookId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .engine
        .approve_request(h.librarian, RequestId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .engine
        .return_book(h.librarian, LoanId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_update_book_keeps_copies_on_loan() {
    let h = TestHarness::new();
    let book = h.add_book(3).await;
    h.issued_loan(TestHarness::student(), book.id).await;
    h.issued_loan(TestHarness::student(), book.id).await;

    let grown = h
        .engine
        .update_book(h.librarian, book.id, BookUpdate::total_copies(5))
        .await
        .unwrap();
    assert_eq!(grown.total_copies(), 5);
    assert_eq!(grown.available_copies(), 3);

    let err = h
        .engine
        .update_book(h.librarian, book.id, BookUpdate::total_copies(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CopiesOnLoan);

    let shrunk = h
        .engine
        .update_book(h.librarian, book.id, BookUpdate::total_copies(2))
        .await
        .unwrap();
    assert_eq!(shrunk.available_copies(), 0);
}

#[tokio::test]
async fn test_add_book_validates_fields() {
    let h = TestHarness::new();

    let err = h
        .engine
        .add_book(h.librarian, NewBook::new("  ", "Anonymous", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBook);

    // counts the database column cannot hold are refused up front
    let err = h
        .engine
        .add_book(h.librarian, NewBook::new("Ulysses", "James Joyce", 3_000_000_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBook);
    assert!(h.engine.list_books(h.librarian).await.unwrap().is_empty());

    let book = h.add_book(1).await;
    let err = h
        .engine
        .update_book(h.librarian, book.id, BookUpdate::total_copies(MAX_COPIES + 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBook);
    assert_eq!(h.book(book.id).await.total_copies(), 1);
}

#[tokio::test]
async fn test_delete_book_cascades() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let book = h.add_book(2).await;
    h.issued_loan(student, book.id).await;
    h.engine.request_book(TestHarness::student(), book.id).await.unwrap();

    h.engine.delete_book(h.librarian, book.id).await.unwrap();

    assert!(h.engine.list_books(h.librarian).await.unwrap().is_empty());
    assert!(h.engine.list_all_requests(h.librarian).await.unwrap().is_empty());
    assert!(h.engine.list_issued(h.librarian).await.unwrap().is_empty());
    assert!(h.engine.list_my_loans(student).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listings_and_ordering() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let first_book = h.add_book(2).await;
    let second_book = h
        .engine
        .add_book(h.librarian, NewBook::new("Kindred", "Octavia E. Butler", 2))
        .await
        .unwrap();

    let older = h.approved_request(student, first_book.id).await;
    let newer = h.engine.request_book(student, second_book.id).await.unwrap();
    h.engine
        .request_book(TestHarness::student(), second_book.id)
        .await
        .unwrap();

    let mine = h.engine.list_my_requests(student).await.unwrap();
    assert_eq!(
        mine.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![newer.id, older.id]
    );

    let pending = h.engine.list_pending(h.librarian).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].id, older.id);

    let all = h.engine.list_all_requests(h.librarian).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.last().map(|r| r.id), Some(older.id));

    let loan = h.engine.issue_book(h.librarian, older.id).await.unwrap();
    let loans = h.engine.list_my_loans(student).await.unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].id, loan.id);

    // issued requests leave the pending list
    assert_eq!(h.engine.list_pending(h.librarian).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_librarian_dashboard() {
    let h = TestHarness::new();
    let book = h.add_book(4).await;
    h.add_book(1).await;

    let loan = h.issued_loan(TestHarness::student(), book.id).await;
    let approved = h.approved_request(TestHarness::student(), book.id).await;
    let pending = h
        .engine
        .request_book(TestHarness::student(), book.id)
        .await
        .unwrap();

    // a loan issued a month ago is overdue
    let mut overdue_request = h.approved_request(TestHarness::student(), book.id).await;
    let month_ago = Utc::now() - Duration::days(30);
    let overdue = IssuedBook::for_request(&overdue_request, month_ago).unwrap();
    overdue_request.mark_issued().unwrap();
    h.engine
        .store()
        .commit(
            UnitOfWork::new()
                .take_copy(book.id)
                .update_request(overdue_request)
                .insert_loan(overdue),
        )
        .await
        .unwrap();

    let dashboard = h.engine.librarian_dashboard(h.librarian).await.unwrap();
    assert_eq!(dashboard.total_books, 2);
    assert_eq!(dashboard.active_loans, 2);
    assert_eq!(dashboard.pending_requests, 1);
    assert_eq!(dashboard.overdue_loans, 1);
    assert_eq!(dashboard.pending.len(), 1);
    assert_eq!(dashboard.pending[0].id, pending.id);
    assert_eq!(dashboard.approved.len(), 1);
    assert_eq!(dashboard.approved[0].id, approved.id);

    h.engine.return_book(h.librarian, loan.id).await.unwrap();
    let dashboard = h.engine.librarian_dashboard(h.librarian).await.unwrap();
    assert_eq!(dashboard.active_loans, 1);
}

#[tokio::test]
async fn test_student_dashboard() {
    let h = TestHarness::new();
    let student = TestHarness::student();
    let someone_else = TestHarness::student();
    let book = h.add_book(10).await;
    let other_book = h
        .engine
        .add_book(h.librarian, NewBook::new("Piranesi", "Susanna Clarke", 1))
        .await
        .unwrap();

    let returned = h.issued_loan(student, book.id).await;
    h.engine.return_book(h.librarian, returned.id).await.unwrap();
    let active = h.issued_loan(student, book.id).await;
    h.engine.request_book(student, other_book.id).await.unwrap();
    h.issued_loan(someone_else, book.id).await;

    let dashboard = h.engine.student_dashboard(student).await.unwrap();
    assert_eq!(dashboard.active_loans, 1);
    assert_eq!(dashboard.returned_loans, 1);
    assert_eq!(dashboard.pending_requests, 1);
    assert_eq!(dashboard.recent_loans.len(), 1);
    assert_eq!(dashboard.recent_loans[0].id, active.id);
    assert_eq!(dashboard.recent_requests.len(), 3);
    assert!(
        dashboard
            .recent_requests
            .iter()
            .all(|r| r.student_id == student.user_id)
    );
}
