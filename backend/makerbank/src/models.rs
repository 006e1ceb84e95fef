//! Ledger entities and their closed vocabularies.
//!
//! Rows are decoded by hand (`FromRow`) because currency columns are stored as
//! TEXT and timestamps as Unix seconds; decoding turns both into their typed
//! forms so nothing downstream handles raw strings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::clock::from_unix;
use crate::money;

/// Format used for `courses.interest_time`.
pub const INTEREST_TIME_FORMAT: &str = "%H:%M";

/// One of a participant's three balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wallet {
    /// Spendable main balance.
    Wallet,
    /// Interest-bearing savings, locked for a while after each deposit.
    Savings,
    /// Outstanding loan, accruing interest.
    Loan,
}

impl Wallet {
    /// Column backing this balance in `participants`.
    pub fn column(self) -> &'static str {
        match self {
            Self::Wallet => "wallet_balance",
            Self::Savings => "savings_balance",
            Self::Loan => "loan_balance",
        }
    }
}

/// Which balance a rate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Savings,
    Loan,
}

impl RateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Savings => "savings",
            Self::Loan => "loan",
        }
    }
}

impl FromStr for RateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "savings" => Ok(Self::Savings),
            "loan" => Ok(Self::Loan),
            other => Err(format!("unknown rate kind {other:?}")),
        }
    }
}

/// Journal entry types. Direction is implied by the type; amounts are never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    CashWithdrawal,
    CashDeposit,
    SavingsDeposit,
    SavingsWithdraw,
    SavingsInterest,
    LoanBorrow,
    LoanRepay,
    LoanInterest,
    OperatorAdjustment,
}

impl TxType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CashWithdrawal => "cash_withdrawal",
            Self::CashDeposit => "cash_deposit",
            Self::SavingsDeposit => "savings_deposit",
            Self::SavingsWithdraw => "savings_withdraw",
            Self::SavingsInterest => "savings_interest",
            Self::LoanBorrow => "loan_borrow",
            Self::LoanRepay => "loan_repay",
            Self::LoanInterest => "loan_interest",
            Self::OperatorAdjustment => "operator_adjustment",
        }
    }

    /// Cash requests start `pending`; everything else is created `completed`.
    pub fn initial_status(self) -> TxStatus {
        match self {
            Self::CashWithdrawal | Self::CashDeposit => TxStatus::Pending,
            _ => TxStatus::Completed,
        }
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cash_withdrawal" => Self::CashWithdrawal,
            "cash_deposit" => Self::CashDeposit,
            "savings_deposit" => Self::SavingsDeposit,
            "savings_withdraw" => Self::SavingsWithdraw,
            "savings_interest" => Self::SavingsInterest,
            "loan_borrow" => Self::LoanBorrow,
            "loan_repay" => Self::LoanRepay,
            "loan_interest" => Self::LoanInterest,
            "operator_adjustment" => Self::OperatorAdjustment,
            other => return Err(format!("unknown transaction type {other:?}")),
        })
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle.
///
/// ```text
/// pending ──► completed
///    ├──────► declined
///    └──────► canceled
/// ```
///
/// All three outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Declined,
    Canceled,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "declined" => Ok(Self::Declined),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown transaction status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Admin who owns the course and approves its cash requests.
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub finish_date: Option<DateTime<Utc>>,
    /// Ceiling on any participant's loan balance.
    pub max_loan_amount: Decimal,
    /// Lock period in days after a savings deposit.
    pub savings_withdrawal_delay: i64,
    /// Weekday of the interest accrual, 0 = Monday.
    pub interest_day: u8,
    /// Time of day (UTC) of the interest accrual.
    pub interest_time: NaiveTime,
    /// Scheduled instant of the last applied accrual.
    pub last_interest_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub email: String,
    pub registration_code: String,
    pub telegram_id: Option<i64>,
    pub is_registered: bool,
    pub wallet_balance: Decimal,
    pub savings_balance: Decimal,
    pub loan_balance: Decimal,
    pub last_savings_deposit_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn balance(&self, wallet: Wallet) -> Decimal {
        match wallet {
            Wallet::Wallet => self.wallet_balance,
            Wallet::Savings => self.savings_balance,
            Wallet::Loan => self.loan_balance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEntry {
    pub id: i64,
    pub course_id: i64,
    pub kind: RateKind,
    /// Weekly percentage.
    pub rate: Decimal,
    pub set_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub participant_id: i64,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub amount: Decimal,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────

fn parse_column<T>(column: &str, raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

fn money_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    money::decode(column, &raw)
}

fn optional_time(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let secs: Option<i64> = row.try_get(column)?;
    Ok(secs.map(from_unix))
}

impl<'r> FromRow<'r, SqliteRow> for Course {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let interest_time: String = row.try_get("interest_time")?;
        let interest_time = NaiveTime::parse_from_str(&interest_time, INTEREST_TIME_FORMAT)
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "interest_time".to_string(),
                source: Box::new(e),
            })?;
        let interest_day: i64 = row.try_get("interest_day")?;

        Ok(Course {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            creator_id: row.try_get("creator_id")?,
            created_at: from_unix(row.try_get("created_at")?),
            is_active: row.try_get("is_active")?,
            finish_date: optional_time(row, "finish_date")?,
            max_loan_amount: money_column(row, "max_loan_amount")?,
            savings_withdrawal_delay: row.try_get("savings_withdrawal_delay")?,
            interest_day: u8::try_from(interest_day).map_err(|e| sqlx::Error::ColumnDecode {
                index: "interest_day".to_string(),
                source: Box::new(e),
            })?,
            interest_time,
            last_interest_at: optional_time(row, "last_interest_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Participant {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Participant {
            id: row.try_get("id")?,
            course_id: row.try_get("course_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            registration_code: row.try_get("registration_code")?,
            telegram_id: row.try_get("telegram_id")?,
            is_registered: row.try_get("is_registered")?,
            wallet_balance: money_column(row, "wallet_balance")?,
            savings_balance: money_column(row, "savings_balance")?,
            loan_balance: money_column(row, "loan_balance")?,
            last_savings_deposit_at: optional_time(row, "last_savings_deposit_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for RateEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(RateEntry {
            id: row.try_get("id")?,
            course_id: row.try_get("course_id")?,
            kind: parse_column("kind", &kind)?,
            rate: money_column(row, "rate")?,
            set_at: from_unix(row.try_get("set_at")?),
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let tx_type: String = row.try_get("type")?;
        let status: String = row.try_get("status")?;
        Ok(Transaction {
            id: row.try_get("id")?,
            participant_id: row.try_get("participant_id")?,
            tx_type: parse_column("type", &tx_type)?,
            amount: money_column(row, "amount")?,
            status: parse_column("status", &status)?,
            created_at: from_unix(row.try_get("created_at")?),
            processed_at: optional_time(row, "processed_at")?,
        })
    }
}
