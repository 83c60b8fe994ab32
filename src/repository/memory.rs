//! In-process backend with per-row locks
//!
//! Each book and each committed record has its own mutex, held by a
//! transaction from first touch until commit or drop. Writes are staged on
//! the transaction and applied to the shared tables under one write lock at
//! commit, so readers only ever see whole transactions.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    error::{AppError, AppResult},
    models::{
        ActorId, Book, BookId, BorrowRecord, NewBorrowRecord, OpenLoan, RecordId, Student,
        StudentId,
    },
};

use super::{BorrowRecordStore, InventoryLedger, LendingStore, LendingTransaction};

type RowLock = Arc<Mutex<()>>;

#[derive(Default)]
struct Tables {
    books: HashMap<BookId, Book>,
    students: HashMap<StudentId, Student>,
    records: HashMap<RecordId, BorrowRecord>,
    book_locks: HashMap<BookId, RowLock>,
    record_locks: HashMap<RecordId, RowLock>,
}

#[derive(Clone)]
pub struct MemoryLendingStore {
    tables: Arc<RwLock<Tables>>,
    next_record_id: Arc<AtomicI64>,
    lock_timeout: Duration,
}

impl MemoryLendingStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_record_id: Arc::new(AtomicI64::new(1)),
            lock_timeout,
        }
    }

    /// Add or replace a catalog entry
    pub async fn insert_book(&self, book: Book) {
        let mut tables = self.tables.write().await;
        tables.book_locks.entry(book.book_id).or_default();
        tables.books.insert(book.book_id, book);
    }

    pub async fn insert_student(&self, student: Student) {
        self.tables
            .write()
            .await
            .students
            .insert(student.student_id, student);
    }

    /// Overwrite a book's counters outside any transaction, bypassing the ledger
    pub async fn set_available_copies(&self, book_id: BookId, available: i32) {
        if let Some(book) = self.tables.write().await.books.get_mut(&book_id) {
            book.available_copies = available;
        }
    }

    pub async fn book(&self, book_id: BookId) -> Option<Book> {
        self.tables.read().await.books.get(&book_id).cloned()
    }

    pub async fn record(&self, record_id: RecordId) -> Option<BorrowRecord> {
        self.tables.read().await.records.get(&record_id).cloned()
    }

    pub async fn records_for_book(&self, book_id: BookId) -> Vec<BorrowRecord> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .records
            .values()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.record_id);
        records
    }

    /// Starts a transaction with the concrete type, for callers that hold it open
    pub fn begin_memory(&self) -> MemoryTransaction {
        MemoryTransaction {
            tables: self.tables.clone(),
            next_record_id: self.next_record_id.clone(),
            lock_timeout: self.lock_timeout,
            guards: Vec::new(),
            books: HashMap::new(),
            records: HashMap::new(),
            created: Vec::new(),
        }
    }
}

impl Default for MemoryLendingStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl LendingStore for MemoryLendingStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTransaction>> {
        Ok(Box::new(self.begin_memory()))
    }

    async fn open_loans(&self, today: NaiveDate) -> AppResult<Vec<OpenLoan>> {
        let tables = self.tables.read().await;

        let mut loans: Vec<OpenLoan> = tables
            .records
            .values()
            .filter(|r| r.is_open())
            .filter_map(|r| {
                let student = tables.students.get(&r.student_id)?;
                let book = tables.books.get(&r.book_id)?;
                Some(OpenLoan {
                    record_id: r.record_id,
                    student_id: r.student_id,
                    student_name: student.name.clone(),
                    book_id: r.book_id,
                    title: book.title.clone(),
                    issue_date: r.issue_date,
                    due_date: r.due_date,
                    is_overdue: r.is_overdue(today),
                })
            })
            .collect();

        loans.sort_by_key(|l| (l.due_date, l.record_id));
        Ok(loans)
    }
}

pub struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    next_record_id: Arc<AtomicI64>,
    lock_timeout: Duration,
    guards: Vec<OwnedMutexGuard<()>>,
    /// Locked books, working copies
    books: HashMap<BookId, Book>,
    /// Locked committed records, working copies
    records: HashMap<RecordId, BorrowRecord>,
    /// Records inserted by this transaction
    created: Vec<BorrowRecord>,
}

impl MemoryTransaction {
    async fn acquire(&mut self, lock: RowLock, what: String) -> AppResult<()> {
        match tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.push(guard);
                Ok(())
            }
            Err(_) => Err(AppError::Conflict(format!(
                "timed out after {:?} waiting for {}",
                self.lock_timeout, what
            ))),
        }
    }

    async fn locked_book(&mut self, book_id: BookId) -> AppResult<Option<&mut Book>> {
        if !self.books.contains_key(&book_id) {
            let lock = self.tables.read().await.book_locks.get(&book_id).cloned();
            let Some(lock) = lock else {
                return Ok(None);
            };
            self.acquire(lock, format!("book {}", book_id)).await?;

            // Read after the lock is held so the value is the latest commit
            let book = self.tables.read().await.books.get(&book_id).cloned();
            match book {
                Some(book) => {
                    self.books.insert(book_id, book);
                }
                None => return Ok(None),
            }
        }
        Ok(self.books.get_mut(&book_id))
    }

    async fn locked_record(&mut self, record_id: RecordId) -> AppResult<Option<&mut BorrowRecord>> {
        if let Some(pos) = self.created.iter().position(|r| r.record_id == record_id) {
            return Ok(self.created.get_mut(pos));
        }
        if !self.records.contains_key(&record_id) {
            let lock = self.tables.read().await.record_locks.get(&record_id).cloned();
            let Some(lock) = lock else {
                return Ok(None);
            };
            self.acquire(lock, format!("borrow record {}", record_id)).await?;

            let record = self.tables.read().await.records.get(&record_id).cloned();
            match record {
                Some(record) => {
                    self.records.insert(record_id, record);
                }
                None => return Ok(None),
            }
        }
        Ok(self.records.get_mut(&record_id))
    }
}

#[async_trait]
impl InventoryLedger for MemoryTransaction {
    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        Ok(self.locked_book(book_id).await?.map(|b| b.clone()))
    }

    async fn try_reserve(&mut self, book_id: BookId) -> AppResult<()> {
        let book = self
            .locked_book(book_id)
            .await?
            .ok_or_else(|| AppError::InvalidReference(format!("book {} does not exist", book_id)))?;

        if book.available_copies <= 0 {
            return Err(AppError::OutOfStock(book_id));
        }
        book.available_copies -= 1;
        Ok(())
    }

    async fn release(&mut self, book_id: BookId) -> AppResult<()> {
        let book = self.locked_book(book_id).await?.ok_or_else(|| {
            AppError::InventoryCorruption(format!(
                "book {} referenced by a borrow record does not exist",
                book_id
            ))
        })?;

        if book.available_copies >= book.total_copies {
            return Err(AppError::InventoryCorruption(format!(
                "releasing a copy of book {} would exceed its total ({} of {} available)",
                book_id, book.available_copies, book.total_copies
            )));
        }
        book.available_copies += 1;
        Ok(())
    }
}

#[async_trait]
impl BorrowRecordStore for MemoryTransaction {
    async fn create_open_record(&mut self, record: NewBorrowRecord) -> AppResult<RecordId> {
        {
            let tables = self.tables.read().await;
            if !tables.students.contains_key(&record.student_id)
                || !tables.books.contains_key(&record.book_id)
            {
                return Err(AppError::InvalidReference(format!(
                    "student {} or book {} does not exist",
                    record.student_id, record.book_id
                )));
            }
        }

        let record_id = self.next_record_id.fetch_add(1, Ordering::Relaxed);
        self.created.push(record.into_record(record_id));
        Ok(record_id)
    }

    async fn get_open_record(&mut self, record_id: RecordId) -> AppResult<BorrowRecord> {
        let record = self
            .locked_record(record_id)
            .await?
            .ok_or(AppError::RecordNotFound(record_id))?;

        if record.returned {
            return Err(AppError::AlreadyReturned(record_id));
        }
        Ok(record.clone())
    }

    async fn close_record(
        &mut self,
        record_id: RecordId,
        returned_by: ActorId,
        return_date: NaiveDate,
        fine: Decimal,
    ) -> AppResult<()> {
        let record = self
            .locked_record(record_id)
            .await?
            .ok_or(AppError::RecordNotFound(record_id))?;

        if record.returned {
            return Err(AppError::AlreadyReturned(record_id));
        }
        record.returned = true;
        record.return_date = Some(return_date);
        record.fine = fine;
        record.returned_by = Some(returned_by);
        Ok(())
    }

    async fn count_open_for_book(&mut self, book_id: BookId) -> AppResult<i64> {
        let tables = self.tables.read().await;

        let committed = tables
            .records
            .values()
            .filter(|r| r.book_id == book_id)
            .filter(|r| match self.records.get(&r.record_id) {
                Some(staged) => staged.is_open(),
                None => r.is_open(),
            })
            .count();
        let created = self
            .created
            .iter()
            .filter(|r| r.book_id == book_id && r.is_open())
            .count();

        Ok((committed + created) as i64)
    }
}

#[async_trait]
impl LendingTransaction for MemoryTransaction {
    async fn student_exists(&mut self, student_id: StudentId) -> AppResult<bool> {
        Ok(self.tables.read().await.students.contains_key(&student_id))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let this = *self;
        let mut tables = this.tables.write().await;

        for (book_id, book) in this.books {
            tables.books.insert(book_id, book);
        }
        for (record_id, record) in this.records {
            tables.records.insert(record_id, record);
        }
        for record in this.created {
            tables.record_locks.entry(record.record_id).or_default();
            tables.records.insert(record.record_id, record);
        }

        // Row locks are released only after every write is in place
        drop(tables);
        drop(this.guards);
        Ok(())
    }
}
