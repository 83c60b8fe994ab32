//! Data models for the lending engine

pub mod book;
pub mod borrow_record;
pub mod student;

// Re-export commonly used types
pub use book::{Book, InventoryAudit};
pub use borrow_record::{BorrowRecord, IssueReceipt, NewBorrowRecord, OpenLoan, ReturnReceipt};
pub use student::Student;

pub type BookId = i64;
pub type StudentId = i64;
pub type RecordId = i64;
/// Staff member performing an issue or a return
pub type ActorId = i64;
