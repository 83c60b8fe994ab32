//! Postgres backend using row locks inside sqlx transactions

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, Row, Transaction};
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{ActorId, Book, BookId, BorrowRecord, NewBorrowRecord, OpenLoan, RecordId, StudentId},
};

use super::{BorrowRecordStore, InventoryLedger, LendingStore, LendingTransaction};

#[derive(Clone)]
pub struct PgLendingStore {
    pool: Pool<Postgres>,
    lock_timeout: Duration,
}

impl PgLendingStore {
    pub fn new(pool: Pool<Postgres>, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LendingStore for PgLendingStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTransaction>> {
        let mut tx = self.pool.begin().await?;

        // Lock waits past this surface as 55P03 and are retried by the engine
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgLendingTransaction { tx }))
    }

    async fn open_loans(&self, today: NaiveDate) -> AppResult<Vec<OpenLoan>> {
        let rows = sqlx::query(
            r#"
            SELECT br.record_id, br.student_id, s.name AS student_name,
                   br.book_id, b.title, br.issue_date, br.due_date
            FROM borrow_records br
            JOIN students s ON br.student_id = s.student_id
            JOIN books b ON br.book_id = b.book_id
            WHERE br.returned = FALSE
            ORDER BY br.due_date, br.record_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let due_date: NaiveDate = row.get("due_date");
                OpenLoan {
                    record_id: row.get("record_id"),
                    student_id: row.get("student_id"),
                    student_name: row.get("student_name"),
                    book_id: row.get("book_id"),
                    title: row.get("title"),
                    issue_date: row.get("issue_date"),
                    due_date,
                    is_overdue: due_date < today,
                }
            })
            .collect())
    }
}

pub struct PgLendingTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryLedger for PgLendingTransaction {
    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            SELECT book_id, isbn, title, author, total_copies, available_copies
            FROM books
            WHERE book_id = $1
            FOR UPDATE
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(book)
    }

    async fn try_reserve(&mut self, book_id: BookId) -> AppResult<()> {
        let reserved = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies - 1
            WHERE book_id = $1 AND available_copies > 0
            "#,
        )
        .bind(book_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if reserved == 1 {
            return Ok(());
        }

        match self.lock_book(book_id).await? {
            Some(_) => Err(AppError::OutOfStock(book_id)),
            None => Err(AppError::InvalidReference(format!("book {} does not exist", book_id))),
        }
    }

    async fn release(&mut self, book_id: BookId) -> AppResult<()> {
        let released = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies + 1
            WHERE book_id = $1 AND available_copies < total_copies
            "#,
        )
        .bind(book_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if released == 1 {
            return Ok(());
        }

        match self.lock_book(book_id).await? {
            Some(book) => Err(AppError::InventoryCorruption(format!(
                "releasing a copy of book {} would exceed its total ({} of {} available)",
                book_id, book.available_copies, book.total_copies
            ))),
            None => Err(AppError::InventoryCorruption(format!(
                "book {} referenced by a borrow record does not exist",
                book_id
            ))),
        }
    }
}

#[async_trait]
impl BorrowRecordStore for PgLendingTransaction {
    async fn create_open_record(&mut self, record: NewBorrowRecord) -> AppResult<RecordId> {
        let result = sqlx::query_scalar::<_, RecordId>(
            r#"
            INSERT INTO borrow_records
                (student_id, book_id, issue_date, due_date, returned, fine, issued_by, created_at)
            VALUES ($1, $2, $3, $4, FALSE, 0, $5, $6)
            RETURNING record_id
            "#,
        )
        .bind(record.student_id)
        .bind(record.book_id)
        .bind(record.issue_date)
        .bind(record.due_date)
        .bind(record.issued_by)
        .bind(record.created_at)
        .fetch_one(&mut *self.tx)
        .await;

        match result {
            Ok(record_id) => Ok(record_id),
            // foreign_key_violation
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23503") => {
                Err(AppError::InvalidReference(format!(
                    "student {} or book {} does not exist",
                    record.student_id, record.book_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_open_record(&mut self, record_id: RecordId) -> AppResult<BorrowRecord> {
        let record = sqlx::query_as::<_, BorrowRecord>(
            r#"
            SELECT record_id, student_id, book_id, issue_date, due_date, return_date,
                   returned, fine, issued_by, returned_by, created_at
            FROM borrow_records
            WHERE record_id = $1
            FOR UPDATE
            "#,
        )
        .bind(record_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(AppError::RecordNotFound(record_id))?;

        if record.returned {
            return Err(AppError::AlreadyReturned(record_id));
        }
        Ok(record)
    }

    async fn close_record(
        &mut self,
        record_id: RecordId,
        returned_by: ActorId,
        return_date: NaiveDate,
        fine: Decimal,
    ) -> AppResult<()> {
        let closed = sqlx::query(
            r#"
            UPDATE borrow_records
            SET returned = TRUE, return_date = $2, fine = $3, returned_by = $4
            WHERE record_id = $1 AND returned = FALSE
            "#,
        )
        .bind(record_id)
        .bind(return_date)
        .bind(fine)
        .bind(returned_by)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if closed == 1 {
            return Ok(());
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE record_id = $1)")
                .bind(record_id)
                .fetch_one(&mut *self.tx)
                .await?;

        if exists {
            Err(AppError::AlreadyReturned(record_id))
        } else {
            Err(AppError::RecordNotFound(record_id))
        }
    }

    async fn count_open_for_book(&mut self, book_id: BookId) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrow_records WHERE book_id = $1 AND returned = FALSE",
        )
        .bind(book_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl LendingTransaction for PgLendingTransaction {
    async fn student_exists(&mut self, student_id: StudentId) -> AppResult<bool> {
        let found = sqlx::query("SELECT 1 FROM students WHERE student_id = $1 FOR KEY SHARE")
            .bind(student_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(found.is_some())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Seed helpers for the catalog and directory tables, used by tests and fixtures
pub async fn insert_student(pool: &Pool<Postgres>, name: &str) -> AppResult<StudentId> {
    let id = sqlx::query_scalar("INSERT INTO students (name) VALUES ($1) RETURNING student_id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn insert_book(
    pool: &Pool<Postgres>,
    isbn: &str,
    title: &str,
    author: &str,
    copies: i32,
) -> AppResult<BookId> {
    let id = sqlx::query_scalar(
        r#"
        INSERT INTO books (isbn, title, author, total_copies, available_copies)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING book_id
        "#,
    )
    .bind(isbn)
    .bind(title)
    .bind(author)
    .bind(copies)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_book(pool: &Pool<Postgres>, book_id: BookId) -> AppResult<Option<Book>> {
    let book = sqlx::query_as::<_, Book>(
        "SELECT book_id, isbn, title, author, total_copies, available_copies FROM books WHERE book_id = $1",
    )
    .bind(book_id)
    .fetch_optional(pool)
    .await?;
    Ok(book)
}
