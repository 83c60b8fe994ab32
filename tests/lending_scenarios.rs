//! Lending engine scenarios over the in-memory store

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{day, engine, lending_config, library, LIBRARIAN};
use lending_engine::{
    error::{AppError, AppResult},
    models::Book,
    repository::{LendingStore, LendingTransaction, MemoryLendingStore},
    services::LendingEngine,
};

async fn assert_consistent(store: &MemoryLendingStore, book_id: i64) {
    let book = store.book(book_id).await.unwrap();
    let open = store
        .records_for_book(book_id)
        .await
        .iter()
        .filter(|r| r.is_open())
        .count() as i32;
    assert!(book.available_copies >= 0);
    assert!(book.available_copies <= book.total_copies);
    assert_eq!(book.total_copies - book.available_copies, open);
}

#[tokio::test]
async fn test_issue_creates_open_record_and_takes_a_copy() {
    let store = library(2, 1).await;
    let engine = engine(&store);

    let issued = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap();

    let record = store.record(issued.record_id).await.unwrap();
    assert_eq!(issued.book_id, 1);
    assert_eq!(issued.due_date, record.due_date);
    assert!(record.is_open());
    assert_eq!(record.student_id, 1);
    assert_eq!(record.book_id, 1);
    assert_eq!(record.issued_by, LIBRARIAN);
    assert_eq!(record.issue_date, day(0).date_naive());
    assert_eq!(record.due_date, day(14).date_naive());
    assert_eq!(record.fine, Decimal::ZERO);
    assert_eq!(record.return_date, None);
    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
    assert_consistent(&store, 1).await;
}

#[tokio::test]
async fn test_lending_scenario() {
    let store = library(2, 3).await;
    let engine = engine(&store);

    let first = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;
    assert_eq!(store.book(1).await.unwrap().available_copies, 1);

    engine.issue(2, 1, LIBRARIAN, day(0)).await.unwrap();
    assert_eq!(store.book(1).await.unwrap().available_copies, 0);

    let err = engine.issue(3, 1, LIBRARIAN, day(1)).await.unwrap_err();
    assert!(matches!(err, AppError::OutOfStock(1)));
    assert_consistent(&store, 1).await;

    let receipt = engine.return_book(first, LIBRARIAN, day(16)).await.unwrap();
    assert_eq!(receipt.overdue_days, 2);
    assert_eq!(receipt.fine, Decimal::new(100, 2));
    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
    assert_consistent(&store, 1).await;
}

#[tokio::test]
async fn test_return_before_due_date_has_no_fine() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let record_id = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;
    let receipt = engine.return_book(record_id, LIBRARIAN, day(10)).await.unwrap();

    assert_eq!(receipt.overdue_days, 0);
    assert_eq!(receipt.fine, Decimal::ZERO);
}

#[tokio::test]
async fn test_late_return_is_fined_per_day() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let record_id = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;
    let receipt = engine.return_book(record_id, 77, day(20)).await.unwrap();

    assert_eq!(receipt.overdue_days, 6);
    assert_eq!(receipt.fine, Decimal::from(6) * lending_config().fine_per_day);

    let record = store.record(record_id).await.unwrap();
    assert!(record.returned);
    assert_eq!(record.return_date, Some(day(20).date_naive()));
    assert_eq!(record.returned_by, Some(77));
    assert_eq!(record.fine, receipt.fine);
}

#[tokio::test]
async fn test_second_return_is_rejected() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let record_id = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;
    let receipt = engine.return_book(record_id, LIBRARIAN, day(20)).await.unwrap();

    let err = engine.return_book(record_id, LIBRARIAN, day(30)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyReturned(id) if id == record_id));

    let record = store.record(record_id).await.unwrap();
    assert_eq!(record.fine, receipt.fine);
    assert_eq!(record.return_date, Some(day(20).date_naive()));
    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
}

#[tokio::test]
async fn test_unknown_student_leaves_inventory_untouched() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let err = engine.issue(999, 1, LIBRARIAN, day(0)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidReference(_)));

    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
    assert!(store.records_for_book(1).await.is_empty());
}

#[tokio::test]
async fn test_unknown_book_is_invalid_reference() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let err = engine.issue(1, 42, LIBRARIAN, day(0)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidReference(_)));
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let store = library(1, 1).await;
    let engine = engine(&store);

    let err = engine.return_book(12345, LIBRARIAN, day(0)).await.unwrap_err();
    assert!(matches!(err, AppError::RecordNotFound(12345)));
}

#[tokio::test]
async fn test_student_may_hold_several_copies() {
    let store = library(3, 1).await;
    let engine = engine(&store);

    engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap();
    engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap();

    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
    assert_consistent(&store, 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issues_on_last_copy() {
    const CALLERS: i64 = 16;
    let store = library(1, CALLERS).await;
    let engine = engine(&store);

    let handles: Vec<_> = (1..=CALLERS)
        .map(|student_id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.issue(student_id, 1, LIBRARIAN, day(0)).await })
        })
        .collect();

    let mut issued = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(AppError::OutOfStock(1)) => out_of_stock += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(issued, 1);
    assert_eq!(out_of_stock, CALLERS - 1);
    assert_eq!(store.book(1).await.unwrap().available_copies, 0);
    assert_consistent(&store, 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_returns_of_one_record() {
    let store = library(1, 1).await;
    let engine = engine(&store);
    let record_id = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.return_book(record_id, LIBRARIAN, day(3)).await })
        })
        .collect();

    let mut returned = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => returned += 1,
            Err(AppError::AlreadyReturned(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(returned, 1);
    assert_eq!(rejected, 7);
    assert_eq!(store.book(1).await.unwrap().available_copies, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churn_keeps_ledger_consistent() {
    let store = library(3, 10).await;
    let engine = engine(&store);

    let handles: Vec<_> = (1..=10)
        .map(|student_id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for round in 0..5 {
                    match engine.issue(student_id, 1, LIBRARIAN, day(round)).await {
                        Ok(issued) => {
                            engine
                                .return_book(issued.record_id, LIBRARIAN, day(round + 1))
                                .await
                                .unwrap();
                        }
                        Err(AppError::OutOfStock(_)) => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.book(1).await.unwrap().available_copies, 3);
    let audit = engine.audit_book(1).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.open_records, 0);
}

#[tokio::test]
async fn test_release_past_total_is_corruption_and_rolls_back() {
    let store = library(1, 1).await;
    let engine = engine(&store);
    let record_id = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;

    // Counter tampered with outside the engine
    store.set_available_copies(1, 1).await;

    let err = engine.return_book(record_id, LIBRARIAN, day(5)).await.unwrap_err();
    assert!(matches!(err, AppError::InventoryCorruption(_)));
    assert!(store.record(record_id).await.unwrap().is_open());

    let err = engine.audit_book(1).await.unwrap_err();
    assert!(matches!(err, AppError::InventoryCorruption(_)));
}

#[tokio::test]
async fn test_open_records_flags_overdue_loans() {
    let store = library(2, 2).await;
    store
        .insert_book(Book::new(2, "9780141439518", "Pride and Prejudice", "Jane Austen", 1))
        .await;
    let engine = engine(&store);

    let late = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap().record_id;
    let on_time = engine.issue(2, 2, LIBRARIAN, day(10)).await.unwrap().record_id;
    let returned = engine.issue(2, 1, LIBRARIAN, day(10)).await.unwrap().record_id;
    engine.return_book(returned, LIBRARIAN, day(11)).await.unwrap();

    let today: NaiveDate = day(20).date_naive();
    let loans = engine.open_records(today).await.unwrap();

    assert_eq!(loans.len(), 2);
    assert_eq!(loans[0].record_id, late);
    assert_eq!(loans[0].student_name, "Student 1");
    assert!(loans[0].is_overdue);
    assert_eq!(loans[1].record_id, on_time);
    assert_eq!(loans[1].title, "Pride and Prejudice");
    assert!(!loans[1].is_overdue);
}

/// Fails the first `failures` transactions with a transient conflict
struct FlakyStore {
    inner: MemoryLendingStore,
    failures: u32,
    begun: AtomicU32,
}

#[async_trait]
impl LendingStore for FlakyStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTransaction>> {
        if self.begun.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(AppError::Conflict("could not obtain lock".to_string()));
        }
        self.inner.begin().await
    }

    async fn open_loans(&self, today: NaiveDate) -> AppResult<Vec<lending_engine::models::OpenLoan>> {
        self.inner.open_loans(today).await
    }
}

#[tokio::test]
async fn test_transient_conflicts_are_retried() {
    let memory = library(1, 1).await;
    let store = Arc::new(FlakyStore {
        inner: memory.clone(),
        failures: 2,
        begun: AtomicU32::new(0),
    });
    let engine = LendingEngine::new(store.clone(), lending_config());

    engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap();

    assert_eq!(store.begun.load(Ordering::SeqCst), 3);
    assert_eq!(memory.book(1).await.unwrap().available_copies, 0);
}

#[tokio::test]
async fn test_exhausted_retries_surface_busy() {
    let memory = library(1, 1).await;
    let store = Arc::new(FlakyStore {
        inner: memory.clone(),
        failures: u32::MAX,
        begun: AtomicU32::new(0),
    });
    let engine = LendingEngine::new(store.clone(), lending_config());

    let err = engine.issue(1, 1, LIBRARIAN, day(0)).await.unwrap_err();
    assert!(matches!(err, AppError::Busy { attempts: 5 }));
    assert_eq!(memory.book(1).await.unwrap().available_copies, 1);
}
