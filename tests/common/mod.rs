//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use lending_engine::{
    config::LendingConfig,
    models::{Book, Student},
    repository::MemoryLendingStore,
    services::LendingEngine,
};

pub const LIBRARIAN: i64 = 500;

/// Midday on day `n` counted from 2024-01-01
pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
}

pub fn lending_config() -> LendingConfig {
    LendingConfig {
        loan_period_days: 14,
        fine_per_day: "0.50".parse().unwrap(),
        max_attempts: 5,
        retry_backoff_ms: 1,
        lock_timeout_ms: 2000,
    }
}

/// Store with `students` students (ids 1..=n) and one book (id 1) with `copies` copies
pub async fn library(copies: i32, students: i64) -> MemoryLendingStore {
    let store = MemoryLendingStore::new(lending_config().lock_timeout());
    store
        .insert_book(Book::new(1, "9780261103573", "The Hobbit", "J.R.R. Tolkien", copies))
        .await;
    for student_id in 1..=students {
        store
            .insert_student(Student {
                student_id,
                name: format!("Student {}", student_id),
            })
            .await;
    }
    store
}

pub fn engine(store: &MemoryLendingStore) -> LendingEngine {
    LendingEngine::new(Arc::new(store.clone()), lending_config())
}
