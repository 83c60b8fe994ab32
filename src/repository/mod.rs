//! Repository layer: the transactional store behind the lending engine
//!
//! Every ledger and record operation runs inside a [`LendingTransaction`]
//! opened by [`LendingStore::begin`]. Nothing is visible to other readers
//! until [`LendingTransaction::commit`]; dropping a transaction rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    error::AppResult,
    models::{ActorId, Book, BookId, BorrowRecord, NewBorrowRecord, OpenLoan, RecordId, StudentId},
};

pub use memory::MemoryLendingStore;
pub use postgres::PgLendingStore;

/// Per-book copy counters
#[async_trait]
pub trait InventoryLedger: Send {
    /// Lock the book row until the transaction ends. `None` if the book does not exist.
    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>>;

    /// Take one copy. Fails with `OutOfStock` when no copy is available.
    async fn try_reserve(&mut self, book_id: BookId) -> AppResult<()>;

    /// Give one copy back. Exceeding `total_copies` is `InventoryCorruption`.
    async fn release(&mut self, book_id: BookId) -> AppResult<()>;
}

/// Open and closed borrow records
#[async_trait]
pub trait BorrowRecordStore: Send {
    /// Insert an open record. Fails with `InvalidReference` for an unknown student or book.
    async fn create_open_record(&mut self, record: NewBorrowRecord) -> AppResult<RecordId>;

    /// Lock and fetch a record that is still open.
    /// Fails with `RecordNotFound` or `AlreadyReturned`.
    async fn get_open_record(&mut self, record_id: RecordId) -> AppResult<BorrowRecord>;

    /// One-way OPEN -> CLOSED transition.
    async fn close_record(
        &mut self,
        record_id: RecordId,
        returned_by: ActorId,
        return_date: NaiveDate,
        fine: Decimal,
    ) -> AppResult<()>;

    async fn count_open_for_book(&mut self, book_id: BookId) -> AppResult<i64>;
}

/// One storage transaction spanning the ledger and the record store
#[async_trait]
pub trait LendingTransaction: InventoryLedger + BorrowRecordStore {
    /// Checks the student exists and keeps it from being removed until the transaction ends
    async fn student_exists(&mut self, student_id: StudentId) -> AppResult<bool>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LendingStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LendingTransaction>>;

    /// Committed open records with student name and book title, oldest due date first
    async fn open_loans(&self, today: NaiveDate) -> AppResult<Vec<OpenLoan>>;
}
