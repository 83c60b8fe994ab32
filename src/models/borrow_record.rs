//! Borrow record model: one per issue event

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::{ActorId, BookId, RecordId, StudentId};

/// Borrow record from storage. Open while `returned` is false, closed forever after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowRecord {
    pub record_id: RecordId,
    pub student_id: StudentId,
    pub book_id: BookId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub returned: bool,
    pub fine: Decimal,
    pub issued_by: ActorId,
    pub returned_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}

impl BorrowRecord {
    pub fn is_open(&self) -> bool {
        !self.returned
    }

    /// Still held and past its due date as of `today`
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_open() && self.due_date < today
    }
}

/// Values for a new open record, built by the engine
#[derive(Debug, Clone)]
pub struct NewBorrowRecord {
    pub student_id: StudentId,
    pub book_id: BookId,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub issued_by: ActorId,
    pub created_at: DateTime<Utc>,
}

impl NewBorrowRecord {
    pub fn into_record(self, record_id: RecordId) -> BorrowRecord {
        BorrowRecord {
            record_id,
            student_id: self.student_id,
            book_id: self.book_id,
            issue_date: self.issue_date,
            due_date: self.due_date,
            return_date: None,
            returned: false,
            fine: Decimal::ZERO,
            issued_by: self.issued_by,
            returned_by: None,
            created_at: self.created_at,
        }
    }
}

/// Outcome of a successful issue, as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IssueReceipt {
    pub record_id: RecordId,
    pub book_id: BookId,
    pub due_date: NaiveDate,
}

/// Outcome of a successful return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReturnReceipt {
    pub record_id: RecordId,
    pub book_id: BookId,
    pub due_date: NaiveDate,
    pub return_date: NaiveDate,
    pub overdue_days: i64,
    pub fine: Decimal,
}

/// Open record joined with the student and book it links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OpenLoan {
    pub record_id: RecordId,
    pub student_id: StudentId,
    pub student_name: String,
    pub book_id: BookId,
    pub title: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub is_overdue: bool,
}
