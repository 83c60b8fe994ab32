//! Lending transaction engine: issue, return and inventory audit

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        ActorId, BookId, InventoryAudit, IssueReceipt, NewBorrowRecord, OpenLoan, RecordId,
        ReturnReceipt, StudentId,
    },
    repository::LendingStore,
};

use super::fines::FinePolicy;

#[derive(Clone)]
pub struct LendingEngine {
    store: Arc<dyn LendingStore>,
    fines: FinePolicy,
    config: LendingConfig,
}

impl LendingEngine {
    pub fn new(store: Arc<dyn LendingStore>, config: LendingConfig) -> Self {
        Self {
            store,
            fines: FinePolicy::from_config(&config),
            config,
        }
    }

    /// Lend one copy of `book_id` to `student_id`
    pub async fn issue(
        &self,
        student_id: StudentId,
        book_id: BookId,
        issued_by: ActorId,
        now: DateTime<Utc>,
    ) -> AppResult<IssueReceipt> {
        let receipt = self
            .with_retry("issue", move || self.try_issue(student_id, book_id, issued_by, now))
            .await?;

        tracing::info!(
            record_id = receipt.record_id,
            student_id,
            book_id,
            issued_by,
            due_date = %receipt.due_date,
            "Book issued"
        );
        Ok(receipt)
    }

    async fn try_issue(
        &self,
        student_id: StudentId,
        book_id: BookId,
        issued_by: ActorId,
        now: DateTime<Utc>,
    ) -> AppResult<IssueReceipt> {
        let mut tx = self.store.begin().await?;

        if !tx.student_exists(student_id).await? {
            return Err(AppError::InvalidReference(format!(
                "student {} does not exist",
                student_id
            )));
        }
        if tx.lock_book(book_id).await?.is_none() {
            return Err(AppError::InvalidReference(format!("book {} does not exist", book_id)));
        }

        tx.try_reserve(book_id).await?;

        let issue_date = now.date_naive();
        let due_date = self.fines.due_date(issue_date)?;
        let record_id = tx
            .create_open_record(NewBorrowRecord {
                student_id,
                book_id,
                issue_date,
                due_date,
                issued_by,
                created_at: now,
            })
            .await?;

        tx.commit().await?;
        Ok(IssueReceipt {
            record_id,
            book_id,
            due_date,
        })
    }

    /// Close an open record, give its copy back and compute the fine
    pub async fn return_book(
        &self,
        record_id: RecordId,
        returned_by: ActorId,
        now: DateTime<Utc>,
    ) -> AppResult<ReturnReceipt> {
        let receipt = self
            .with_retry("return", move || self.try_return(record_id, returned_by, now))
            .await?;

        tracing::info!(
            record_id,
            book_id = receipt.book_id,
            returned_by,
            overdue_days = receipt.overdue_days,
            fine = %receipt.fine,
            "Book returned"
        );
        Ok(receipt)
    }

    async fn try_return(
        &self,
        record_id: RecordId,
        returned_by: ActorId,
        now: DateTime<Utc>,
    ) -> AppResult<ReturnReceipt> {
        let mut tx = self.store.begin().await?;

        let record = tx.get_open_record(record_id).await?;

        let return_date = now.date_naive();
        let overdue_days = self.fines.overdue_days(record.due_date, return_date);
        let fine = self.fines.fine(overdue_days);

        tx.close_record(record_id, returned_by, return_date, fine).await?;
        tx.release(record.book_id).await?;
        tx.commit().await?;

        Ok(ReturnReceipt {
            record_id,
            book_id: record.book_id,
            due_date: record.due_date,
            return_date,
            overdue_days,
            fine,
        })
    }

    /// Open loans as of `today`, for the return desk
    pub async fn open_records(&self, today: NaiveDate) -> AppResult<Vec<OpenLoan>> {
        self.store.open_loans(today).await
    }

    /// Check `0 <= available <= total` and `total - available == open records`
    pub async fn audit_book(&self, book_id: BookId) -> AppResult<InventoryAudit> {
        let audit = self
            .with_retry("audit", move || async move {
                let mut tx = self.store.begin().await?;
                let book = tx.lock_book(book_id).await?.ok_or_else(|| {
                    AppError::InvalidReference(format!("book {} does not exist", book_id))
                })?;
                let open_records = tx.count_open_for_book(book_id).await?;
                tx.commit().await?;

                Ok(InventoryAudit::from_book(&book, open_records))
            })
            .await?;

        if !audit.is_consistent() {
            let err = AppError::InventoryCorruption(format!(
                "book {}: {} total, {} available, {} open records",
                audit.book_id, audit.total_copies, audit.available_copies, audit.open_records
            ));
            tracing::error!(error = %err, "Inventory audit failed");
            return Err(err);
        }
        Ok(audit)
    }

    /// Run one transaction, retrying transient conflicts with jittered backoff
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.max_attempts {
                        tracing::warn!(operation, attempt, error = %e, "Giving up on contended transaction");
                        return Err(AppError::Busy { attempts: attempt });
                    }

                    let backoff = self.config.backoff(attempt);
                    let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                    let delay = backoff + std::time::Duration::from_millis(jitter);
                    tracing::warn!(operation, attempt, ?delay, error = %e, "Retrying transaction");

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e @ AppError::InventoryCorruption(_)) => {
                    tracing::error!(operation, error = %e, "Inventory invariant violated");
                    return Err(e);
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockLendingStore;

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_as_busy() {
        let mut store = MockLendingStore::new();
        store
            .expect_begin()
            .times(3)
            .returning(|| Err(AppError::Conflict("lock timeout".to_string())));

        let config = LendingConfig {
            max_attempts: 3,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let engine = LendingEngine::new(Arc::new(store), config);

        let err = engine.issue(1, 1, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Busy { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_user_errors_are_not_retried() {
        let mut store = MockLendingStore::new();
        store
            .expect_begin()
            .times(1)
            .returning(|| Err(AppError::RecordNotFound(42)));

        let engine = LendingEngine::new(Arc::new(store), LendingConfig::default());

        let err = engine.return_book(42, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::RecordNotFound(42)));
    }

    #[tokio::test]
    async fn test_corruption_is_not_retried() {
        let mut store = MockLendingStore::new();
        store
            .expect_begin()
            .times(1)
            .returning(|| Err(AppError::InventoryCorruption("available > total".to_string())));

        let engine = LendingEngine::new(Arc::new(store), LendingConfig::default());

        let err = engine.return_book(7, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::InventoryCorruption(_)));
    }
}
