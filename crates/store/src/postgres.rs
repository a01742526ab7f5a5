use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, LoanId, RequestId, UserId, Version};
use domain::{Book, BookRequest, IssuedBook, RequestStatus};
use sqlx::{
    PgConnection, PgPool, Postgres, Row,
    error::ErrorKind,
    postgres::{PgArguments, PgPoolOptions, PgQueryResult, PgRow},
    query::Query,
};
use uuid::Uuid;

use crate::{
    LoanQuery, RecordKind, RequestQuery, Result, SortOrder, StoreError,
    store::{Change, LibraryStore, UnitOfWork, validate_unit_of_work},
};

const BOOK_COLUMNS: &str = "id, title, author, total_copies, available_copies, version";
const REQUEST_COLUMNS: &str =
    "id, student_id, book_id, status, requested_at, decided_at, decided_by, version";
const LOAN_COLUMNS: &str =
    "id, student_id, book_id, request_id, issued_at, due_at, returned_at, version";

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL-backed library store.
///
/// Each unit of work runs in one transaction. Updates are compare-and-set on
/// the record version (`WHERE id = $1 AND version = $2`), so two transactions
/// racing on the same row cannot both succeed. Copy moves are relative
/// (`available_copies - 1`) and rely on the `books_copy_counts` check, so
/// concurrent issues of the same title queue on the row lock instead of
/// failing the version comparison.
#[derive(Clone)]
pub struct PostgresLibraryStore {
    pool: PgPool,
}

impl PostgresLibraryStore {
    /// Creates a new PostgreSQL library store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url` and wraps it in a store.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn apply(conn: &mut PgConnection, change: Change) -> Result<()> {
        match change {
            Change::InsertBook(book) => {
                sqlx::query(
                    r#"
                    INSERT INTO books (id, title, author, total_copies, available_copies, version)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(book.id.as_uuid())
                .bind(&book.title)
                .bind(&book.author)
                .bind(to_db_count(book.total_copies())?)
                .bind(to_db_count(book.available_copies())?)
                .bind(Version::first().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;
            }
            Change::UpdateBook(book) => {
                let result = sqlx::query(
                    r#"
                    UPDATE books
                    SET title = $1, author = $2, total_copies = $3, available_copies = $4,
                        version = version + 1
                    WHERE id = $5 AND version = $6
                    "#,
                )
                .bind(&book.title)
                .bind(&book.author)
                .bind(to_db_count(book.total_copies())?)
                .bind(to_db_count(book.available_copies())?)
                .bind(book.id.as_uuid())
                .bind(book.version.as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;

                ensure_applied(conn, result, RecordKind::Book, book.id.as_uuid(), book.version)
                    .await?;
            }
            Change::DeleteBook { id, version } => {
                let result = sqlx::query("DELETE FROM books WHERE id = $1 AND version = $2")
                    .bind(id.as_uuid())
                    .bind(version.as_i64())
                    .execute(&mut *conn)
                    .await
                    .map_err(map_db_error)?;

                ensure_applied(conn, result, RecordKind::Book, id.as_uuid(), version).await?;
            }
            Change::TakeCopy(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE books
                    SET available_copies = available_copies - 1, version = version + 1
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;

                ensure_found(result, RecordKind::Book, id.as_uuid())?;
            }
            Change::ReturnCopy(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE books
                    SET available_copies = available_copies + 1, version = version + 1
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;

                ensure_found(result, RecordKind::Book, id.as_uuid())?;
            }
            Change::InsertRequest(request) => {
                sqlx::query(
                    r#"
                    INSERT INTO book_requests
                        (id, student_id, book_id, status, requested_at, decided_at, decided_by, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(request.id.as_uuid())
                .bind(request.student_id.as_uuid())
                .bind(request.book_id.as_uuid())
                .bind(request.status.as_str())
                .bind(request.requested_at)
                .bind(request.decided_at)
                .bind(request.decided_by.map(|id| id.as_uuid()))
                .bind(Version::first().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;
            }
            Change::UpdateRequest(request) => {
                let result = sqlx::query(
                    r#"
                    UPDATE book_requests
                    SET status = $1, decided_at = $2, decided_by = $3, version = version + 1
                    WHERE id = $4 AND version = $5
                    "#,
                )
                .bind(request.status.as_str())
                .bind(request.decided_at)
                .bind(request.decided_by.map(|id| id.as_uuid()))
                .bind(request.id.as_uuid())
                .bind(request.version.as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;

                ensure_applied(
                    conn,
                    result,
                    RecordKind::Request,
                    request.id.as_uuid(),
                    request.version,
                )
                .await?;
            }
            Change::InsertLoan(loan) => {
                sqlx::query(
                    r#"
                    INSERT INTO issued_books
                        (id, student_id, book_id, request_id, issued_at, due_at, returned_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(loan.id.as_uuid())
                .bind(loan.student_id.as_uuid())
                .bind(loan.book_id.as_uuid())
                .bind(loan.request_id.as_uuid())
                .bind(loan.issued_at)
                .bind(loan.due_at)
                .bind(loan.returned_at)
                .bind(Version::first().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;
            }
            Change::UpdateLoan(loan) => {
                let result = sqlx::query(
                    r#"
                    UPDATE issued_books
                    SET returned_at = $1, due_at = $2, version = version + 1
                    WHERE id = $3 AND version = $4
                    "#,
                )
                .bind(loan.returned_at)
                .bind(loan.due_at)
                .bind(loan.id.as_uuid())
                .bind(loan.version.as_i64())
                .execute(&mut *conn)
                .await
                .map_err(map_db_error)?;

                ensure_applied(conn, result, RecordKind::Loan, loan.id.as_uuid(), loan.version)
                    .await?;
            }
        }
        Ok(())
    }

    fn row_to_book(row: PgRow) -> Result<Book> {
        let id = BookId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let total = from_db_count(RecordKind::Book, row.try_get("total_copies")?)?;
        let available = from_db_count(RecordKind::Book, row.try_get("available_copies")?)?;

        Book::restore(
            id,
            row.try_get("title")?,
            row.try_get("author")?,
            total,
            available,
            Version::new(row.try_get("version")?),
        )
        .map_err(|e| StoreError::Corrupt {
            record: RecordKind::Book,
            reason: e.to_string(),
        })
    }

    fn row_to_request(row: PgRow) -> Result<BookRequest> {
        let status: String = row.try_get("status")?;
        let status: RequestStatus = status.parse().map_err(|e: domain::ParseStatusError| {
            StoreError::Corrupt {
                record: RecordKind::Request,
                reason: e.to_string(),
            }
        })?;

        Ok(BookRequest {
            id: RequestId::from_uuid(row.try_get::<Uuid, _>("id")?),
            student_id: UserId::from_uuid(row.try_get::<Uuid, _>("student_id")?),
            book_id: BookId::from_uuid(row.try_get::<Uuid, _>("book_id")?),
            status,
            requested_at: row.try_get("requested_at")?,
            decided_at: row.try_get::<Option<DateTime<Utc>>, _>("decided_at")?,
            decided_by: row
                .try_get::<Option<Uuid>, _>("decided_by")?
                .map(UserId::from_uuid),
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_loan(row: PgRow) -> Result<IssuedBook> {
        Ok(IssuedBook {
            id: LoanId::from_uuid(row.try_get::<Uuid, _>("id")?),
            student_id: UserId::from_uuid(row.try_get::<Uuid, _>("student_id")?),
            book_id: BookId::from_uuid(row.try_get::<Uuid, _>("book_id")?),
            request_id: RequestId::from_uuid(row.try_get::<Uuid, _>("request_id")?),
            issued_at: row.try_get("issued_at")?,
            due_at: row.try_get("due_at")?,
            returned_at: row.try_get::<Option<DateTime<Utc>>, _>("returned_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }
}

/// Turns a zero-row guarded write into a conflict or not-found error.
async fn ensure_applied(
    conn: &mut PgConnection,
    result: PgQueryResult,
    record: RecordKind,
    id: Uuid,
    expected: Version,
) -> Result<()> {
    if result.rows_affected() > 0 {
        return Ok(());
    }

    let table = match record {
        RecordKind::Book => "books",
        RecordKind::Request => "book_requests",
        RecordKind::Loan => "issued_books",
    };
    let actual: Option<i64> =
        sqlx::query_scalar(&format!("SELECT version FROM {table} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    match actual {
        Some(actual) => Err(StoreError::ConcurrencyConflict {
            record,
            id,
            expected,
            actual: Version::new(actual),
        }),
        None => Err(StoreError::NotFound { record, id }),
    }
}

fn ensure_found(result: PgQueryResult, record: RecordKind, id: Uuid) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound { record, id });
    }
    Ok(())
}

/// Appends the filters of a request query, numbering parameters after
/// `param_count`.
fn push_request_filters(query: &RequestQuery, sql: &mut String, param_count: &mut usize) {
    if query.student_id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND student_id = ${param_count}"));
    }
    if query.book_id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND book_id = ${param_count}"));
    }
    if query.statuses.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND status = ANY(${param_count})"));
    }
}

fn bind_request_filters<'q>(mut sqlx_query: PgQuery<'q>, query: &RequestQuery) -> PgQuery<'q> {
    if let Some(student_id) = query.student_id {
        sqlx_query = sqlx_query.bind(student_id.as_uuid());
    }
    if let Some(book_id) = query.book_id {
        sqlx_query = sqlx_query.bind(book_id.as_uuid());
    }
    if let Some(statuses) = &query.statuses {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        sqlx_query = sqlx_query.bind(statuses);
    }
    sqlx_query
}

fn push_loan_filters(query: &LoanQuery, sql: &mut String, param_count: &mut usize) {
    if query.student_id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND student_id = ${param_count}"));
    }
    match query.returned {
        Some(true) => sql.push_str(" AND returned_at IS NOT NULL"),
        Some(false) => sql.push_str(" AND returned_at IS NULL"),
        None => {}
    }
    if query.due_before.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND due_at < ${param_count}"));
    }
}

fn bind_loan_filters<'q>(mut sqlx_query: PgQuery<'q>, query: &LoanQuery) -> PgQuery<'q> {
    if let Some(student_id) = query.student_id {
        sqlx_query = sqlx_query.bind(student_id.as_uuid());
    }
    if let Some(due_before) = query.due_before {
        sqlx_query = sqlx_query.bind(due_before);
    }
    sqlx_query
}

/// Maps constraint violations and aborted transactions to store errors.
fn map_db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        let constraint = db_err.constraint().unwrap_or_default().to_string();
        match db_err.kind() {
            ErrorKind::UniqueViolation => return StoreError::UniqueViolation { constraint },
            ErrorKind::CheckViolation => return StoreError::CheckViolation { constraint },
            ErrorKind::ForeignKeyViolation => {
                return StoreError::ForeignKeyViolation { constraint };
            }
            _ => {}
        }
        // 40001 serialization_failure, 40P01 deadlock_detected
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return StoreError::TransactionAborted(db_err.message().to_string());
        }
    }
    StoreError::Database(e)
}

fn to_db_count(count: u32) -> Result<i32> {
    i32::try_from(count)
        .map_err(|_| StoreError::InvalidUnitOfWork(format!("copy count {count} is out of range")))
}

fn from_db_count(record: RecordKind, count: i32) -> Result<u32> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt {
        record,
        reason: format!("negative copy count {count}"),
    })
}

#[async_trait]
impl LibraryStore for PostgresLibraryStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        validate_unit_of_work(&unit)?;

        // Start a transaction
        let mut tx = self.pool.begin().await?;

        for change in unit.into_changes() {
            // Dropping the transaction on error rolls it back
            Self::apply(&mut *tx, change).await?;
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    async fn get_book(&self, id: BookId) -> Result<Option<Book>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_book).transpose()
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY title ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_book).collect()
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<BookRequest>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM book_requests WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_request).transpose()
    }

    async fn query_requests(&self, query: RequestQuery) -> Result<Vec<BookRequest>> {
        let mut sql = format!("SELECT {REQUEST_COLUMNS} FROM book_requests WHERE 1=1");
        let mut param_count = 0;
        push_request_filters(&query, &mut sql, &mut param_count);

        sql.push_str(match query.order {
            SortOrder::NewestFirst => " ORDER BY requested_at DESC, id DESC",
            SortOrder::OldestFirst => " ORDER BY requested_at ASC, id ASC",
        });
        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = bind_request_filters(sqlx::query(&sql), &query);
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_request).collect()
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<IssuedBook>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM issued_books WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_loan).transpose()
    }

    async fn query_loans(&self, query: LoanQuery) -> Result<Vec<IssuedBook>> {
        let mut sql = format!("SELECT {LOAN_COLUMNS} FROM issued_books WHERE 1=1");
        let mut param_count = 0;
        push_loan_filters(&query, &mut sql, &mut param_count);

        sql.push_str(" ORDER BY issued_at DESC, id DESC");
        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = bind_loan_filters(sqlx::query(&sql), &query);
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_loan).collect()
    }

    async fn count_books(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn count_requests(&self, query: RequestQuery) -> Result<usize> {
        let mut sql = String::from("SELECT COUNT(*) FROM book_requests WHERE 1=1");
        push_request_filters(&query, &mut sql, &mut 0);

        let row = bind_request_filters(sqlx::query(&sql), &query)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as usize)
    }

    async fn count_loans(&self, query: LoanQuery) -> Result<usize> {
        let mut sql = String::from("SELECT COUNT(*) FROM issued_books WHERE 1=1");
        push_loan_filters(&query, &mut sql, &mut 0);

        let row = bind_loan_filters(sqlx::query(&sql), &query)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as usize)
    }
}
