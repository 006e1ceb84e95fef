//! Ledger store: connection pool, migrations, the write unit and queries.
//!
//! Reads go straight to the pool. Every mutation runs inside a [`WriteUnit`]:
//! one SQLite transaction, held under the store's writer lock, so validation
//! reads, balance writes and the journal entry commit together and no two
//! read-check-then-write sequences interleave.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteExecutor, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::errors::{LedgerError, Result};
use crate::models::{Course, Participant, RateKind, Transaction, TxStatus, TxType, Wallet};
use crate::money;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory database for tests. The connection is never
/// recycled, otherwise the database would vanish with it.
#[cfg(test)]
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Owner of the pool and of the writer lock.
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl LedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a write unit. Waits until no other unit is in flight.
    pub async fn begin(&self) -> Result<WriteUnit> {
        let guard = self.writer.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteUnit { tx, _guard: guard })
    }
}

/// One durable unit of work. Dropping it without [`WriteUnit::commit`] rolls
/// every write back.
pub struct WriteUnit {
    tx: sqlx::Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteUnit {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Courses
// ─────────────────────────────────────────────────────────

const COURSE_COLUMNS: &str = r#"
    id, name, description, creator_id, created_at, is_active, finish_date,
    max_loan_amount, savings_withdrawal_delay, interest_day, interest_time,
    last_interest_at
"#;

pub struct NewCourse<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub creator_id: i64,
    pub max_loan_amount: Decimal,
    pub savings_withdrawal_delay: i64,
    pub interest_day: u8,
    pub interest_time: &'a str,
}

pub async fn insert_course<'e>(
    ex: impl SqliteExecutor<'e>,
    course: &NewCourse<'_>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO courses
            (name, description, creator_id, created_at, max_loan_amount,
             savings_withdrawal_delay, interest_day, interest_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(course.name)
    .bind(course.description)
    .bind(course.creator_id)
    .bind(now.timestamp())
    .bind(money::encode(course.max_loan_amount))
    .bind(course.savings_withdrawal_delay)
    .bind(i64::from(course.interest_day))
    .bind(course.interest_time)
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn fetch_course<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(course)
}

/// Like [`fetch_course`] but a missing row is an error.
pub async fn require_course<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> Result<Course> {
    fetch_course(ex, id)
        .await?
        .ok_or(LedgerError::CourseNotFound(id))
}

pub async fn fetch_course_by_name<'e>(
    ex: impl SqliteExecutor<'e>,
    name: &str,
) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE name = ?1"
    ))
    .bind(name)
    .fetch_optional(ex)
    .await?;
    Ok(course)
}

/// Courses owned by an admin, newest first.
pub async fn list_courses_by_creator<'e>(
    ex: impl SqliteExecutor<'e>,
    creator_id: i64,
    active_only: bool,
) -> Result<Vec<Course>> {
    let rows = sqlx::query_as::<_, Course>(&format!(
        r#"
        SELECT {COURSE_COLUMNS}
        FROM   courses
        WHERE  creator_id = ?1 AND (?2 = 0 OR is_active = 1)
        ORDER  BY created_at DESC, id DESC
        "#
    ))
    .bind(creator_id)
    .bind(active_only)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

pub async fn list_active_courses<'e>(ex: impl SqliteExecutor<'e>) -> Result<Vec<Course>> {
    let rows = sqlx::query_as::<_, Course>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE is_active = 1 ORDER BY id ASC"
    ))
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// Persist the editable settings of a course.
pub async fn save_course_settings<'e>(ex: impl SqliteExecutor<'e>, course: &Course) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE courses
        SET    name = ?2, description = ?3, max_loan_amount = ?4,
               savings_withdrawal_delay = ?5, interest_day = ?6, interest_time = ?7
        WHERE  id = ?1
        "#,
    )
    .bind(course.id)
    .bind(&course.name)
    .bind(&course.description)
    .bind(money::encode(course.max_loan_amount))
    .bind(course.savings_withdrawal_delay)
    .bind(i64::from(course.interest_day))
    .bind(
        course
            .interest_time
            .format(crate::models::INTEREST_TIME_FORMAT)
            .to_string(),
    )
    .execute(ex)
    .await?;
    Ok(())
}

/// Mark a course finished. Returns `false` when it was already finished.
pub async fn finish_course<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE courses SET is_active = 0, finish_date = ?2 WHERE id = ?1 AND is_active = 1",
    )
    .bind(id)
    .bind(now.timestamp())
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn set_last_interest_at<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
    scheduled: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE courses SET last_interest_at = ?2 WHERE id = ?1")
        .bind(course_id)
        .bind(scheduled.timestamp())
        .execute(ex)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Participants
// ─────────────────────────────────────────────────────────

const PARTICIPANT_COLUMNS: &str = r#"
    id, course_id, name, email, registration_code, telegram_id, is_registered,
    wallet_balance, savings_balance, loan_balance, last_savings_deposit_at
"#;

pub async fn insert_participant<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
    name: &str,
    email: &str,
    registration_code: &str,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO participants (course_id, name, email, registration_code)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(course_id)
    .bind(name)
    .bind(email)
    .bind(registration_code)
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn fetch_participant<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<Participant>> {
    let participant = sqlx::query_as::<_, Participant>(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(participant)
}

/// Like [`fetch_participant`] but a missing row is an error.
pub async fn require_participant<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> Result<Participant> {
    fetch_participant(ex, id)
        .await?
        .ok_or(LedgerError::ParticipantNotFound(id))
}

pub async fn fetch_participant_by_code<'e>(
    ex: impl SqliteExecutor<'e>,
    code: &str,
) -> Result<Option<Participant>> {
    let participant = sqlx::query_as::<_, Participant>(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE registration_code = ?1"
    ))
    .bind(code)
    .fetch_optional(ex)
    .await?;
    Ok(participant)
}

/// Registered participant bound to a chat account.
pub async fn fetch_participant_by_telegram_id<'e>(
    ex: impl SqliteExecutor<'e>,
    telegram_id: i64,
) -> Result<Option<Participant>> {
    let participant = sqlx::query_as::<_, Participant>(&format!(
        r#"
        SELECT {PARTICIPANT_COLUMNS}
        FROM   participants
        WHERE  telegram_id = ?1 AND is_registered = 1
        ORDER  BY id DESC
        LIMIT  1
        "#
    ))
    .bind(telegram_id)
    .fetch_optional(ex)
    .await?;
    Ok(participant)
}

pub async fn list_participants<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
) -> Result<Vec<Participant>> {
    let rows = sqlx::query_as::<_, Participant>(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE course_id = ?1 ORDER BY id ASC"
    ))
    .bind(course_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// Bind a chat account to a participant. Returns `false` if the code was
/// already consumed.
pub async fn mark_registered<'e>(
    ex: impl SqliteExecutor<'e>,
    participant_id: i64,
    telegram_id: i64,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE participants
        SET    telegram_id = ?2, is_registered = 1
        WHERE  id = ?1 AND is_registered = 0
        "#,
    )
    .bind(participant_id)
    .bind(telegram_id)
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Overwrite one balance column. Only the balance primitive calls this.
pub(crate) async fn write_balance<'e>(
    ex: impl SqliteExecutor<'e>,
    participant_id: i64,
    wallet: Wallet,
    value: Decimal,
    savings_anchor: Option<DateTime<Utc>>,
) -> Result<()> {
    let column = wallet.column();
    let sql = if savings_anchor.is_some() {
        format!(
            "UPDATE participants SET {column} = ?2, last_savings_deposit_at = ?3 WHERE id = ?1"
        )
    } else {
        format!("UPDATE participants SET {column} = ?2 WHERE id = ?1")
    };

    let mut query = sqlx::query(&sql)
        .bind(participant_id)
        .bind(money::encode(value));
    if let Some(anchor) = savings_anchor {
        query = query.bind(anchor.timestamp());
    }
    query.execute(ex).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Rate history
// ─────────────────────────────────────────────────────────

pub async fn insert_rate<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
    kind: RateKind,
    rate: Decimal,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO rate_history (course_id, kind, rate, set_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(course_id)
    .bind(kind.as_str())
    .bind(money::encode(rate))
    .bind(now.timestamp())
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Latest rate for `(course, kind)`; `0` when none was ever set.
pub async fn current_rate<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
    kind: RateKind,
) -> Result<Decimal> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT rate
        FROM   rate_history
        WHERE  course_id = ?1 AND kind = ?2
        ORDER  BY set_at DESC, id DESC
        LIMIT  1
        "#,
    )
    .bind(course_id)
    .bind(kind.as_str())
    .fetch_optional(ex)
    .await?;

    match row {
        Some((raw,)) => Ok(money::decode("rate", &raw)?),
        None => Ok(money::round(Decimal::ZERO)),
    }
}

// ─────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────

const TRANSACTION_COLUMNS: &str =
    "id, participant_id, type, amount, status, created_at, processed_at";

/// Append a journal entry in the type's initial status.
pub async fn insert_transaction<'e>(
    ex: impl SqliteExecutor<'e>,
    participant_id: i64,
    tx_type: TxType,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let status = tx_type.initial_status();
    let processed_at = status.is_terminal().then(|| now.timestamp());

    let tx = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        INSERT INTO transactions (participant_id, type, amount, status, created_at, processed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(participant_id)
    .bind(tx_type.as_str())
    .bind(money::encode(amount))
    .bind(status.as_str())
    .bind(now.timestamp())
    .bind(processed_at)
    .fetch_one(ex)
    .await?;
    Ok(tx)
}

pub async fn fetch_transaction<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<Transaction>> {
    let tx = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(tx)
}

/// Compare-and-set `pending → to`. Returns `false` when the transaction had
/// already left `pending`.
pub async fn settle_transaction<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    to: TxStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE transactions
        SET    status = ?2, processed_at = ?3
        WHERE  id = ?1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(to.as_str())
    .bind(now.timestamp())
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Pending cash requests of a course, oldest first.
pub async fn list_pending<'e>(ex: impl SqliteExecutor<'e>, course_id: i64) -> Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT t.id, t.participant_id, t.type, t.amount, t.status, t.created_at, t.processed_at
        FROM   transactions t
        JOIN   participants p ON p.id = t.participant_id
        WHERE  p.course_id = ?1
          AND  t.status = 'pending'
          AND  t.type IN ('cash_withdrawal', 'cash_deposit')
        ORDER  BY t.created_at ASC, t.id ASC
        "#,
    )
    .bind(course_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// A participant's journal, newest first.
pub async fn list_transactions<'e>(
    ex: impl SqliteExecutor<'e>,
    participant_id: i64,
) -> Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM   transactions
        WHERE  participant_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#
    ))
    .bind(participant_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// Whether any interest entry was posted for the course at or after `since`.
pub async fn interest_posted_since<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
    since: DateTime<Utc>,
) -> Result<bool> {
    let (found,): (i64,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM   transactions t
            JOIN   participants p ON p.id = t.participant_id
            WHERE  p.course_id = ?1
              AND  t.type IN ('savings_interest', 'loan_interest')
              AND  t.created_at >= ?2
        )
        "#,
    )
    .bind(course_id)
    .bind(since.timestamp())
    .fetch_one(ex)
    .await?;
    Ok(found != 0)
}
