//! Application-wide error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in wallet")]
    InsufficientFunds,

    #[error("Insufficient savings balance")]
    InsufficientSavings,

    #[error("Loan limit exceeded: at most {available} more can be borrowed")]
    LoanLimitExceeded { available: rust_decimal::Decimal },

    #[error("Savings are locked until {0}")]
    SavingsLocked(DateTime<Utc>),

    #[error("Repayment exceeds the outstanding loan")]
    LoanOverpayment,

    #[error("Amount is out of range")]
    AmountOverflow,

    #[error("Transaction {0} is not pending")]
    TransactionNotPending(i64),

    #[error("Transaction {0} does not belong to this participant")]
    NotTransactionOwner(i64),

    #[error("Participant {0} not found")]
    ParticipantNotFound(i64),

    #[error("Course {0} not found")]
    CourseNotFound(i64),

    #[error("Transaction {0} not found")]
    TransactionNotFound(i64),

    #[error("Course {0} is finished")]
    CourseFinished(i64),

    #[error("A course named {0:?} already exists")]
    DuplicateCourseName(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// `true` for infrastructure failures (the StorageError family); callers
    /// decide whether to retry these.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Migrate(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
