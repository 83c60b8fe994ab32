//! Loan period and overdue fine computation

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
};

#[derive(Debug, Clone)]
pub struct FinePolicy {
    loan_period_days: i64,
    fine_per_day: Decimal,
}

impl FinePolicy {
    pub fn new(loan_period_days: i64, fine_per_day: Decimal) -> Self {
        Self {
            loan_period_days,
            fine_per_day,
        }
    }

    pub fn from_config(config: &LendingConfig) -> Self {
        Self::new(config.loan_period_days, config.fine_per_day)
    }

    pub fn due_date(&self, issue_date: NaiveDate) -> AppResult<NaiveDate> {
        Duration::try_days(self.loan_period_days)
            .and_then(|period| issue_date.checked_add_signed(period))
            .ok_or_else(|| {
                AppError::Validation(format!("due date out of range for issue date {}", issue_date))
            })
    }

    /// Whole days past the due date, zero when returned on or before it
    pub fn overdue_days(&self, due_date: NaiveDate, return_date: NaiveDate) -> i64 {
        (return_date - due_date).num_days().max(0)
    }

    pub fn fine(&self, overdue_days: i64) -> Decimal {
        (Decimal::from(overdue_days.max(0)) * self.fine_per_day).round_dp(2)
    }
}
