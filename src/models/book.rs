//! Book model and copy counters

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::BookId;

/// Book row as held by the inventory ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub book_id: BookId,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub total_copies: i32,
    pub available_copies: i32,
}

impl Book {
    pub fn new(book_id: BookId, isbn: &str, title: &str, author: &str, copies: i32) -> Self {
        Self {
            book_id,
            isbn: isbn.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            total_copies: copies,
            available_copies: copies,
        }
    }
}

/// Result of cross-checking a book's counters against its open records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct InventoryAudit {
    pub book_id: BookId,
    pub total_copies: i32,
    pub available_copies: i32,
    pub open_records: i64,
}

impl InventoryAudit {
    pub fn from_book(book: &Book, open_records: i64) -> Self {
        Self {
            book_id: book.book_id,
            total_copies: book.total_copies,
            available_copies: book.available_copies,
            open_records,
        }
    }

    /// `0 <= available <= total` and every missing copy has an open record
    pub fn is_consistent(&self) -> bool {
        let on_loan = i64::from(self.total_copies) - i64::from(self.available_copies);
        self.available_copies >= 0
            && self.available_copies <= self.total_copies
            && on_loan == self.open_records
    }
}
