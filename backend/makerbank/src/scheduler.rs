//! Long-running background task that posts weekly interest.
//!
//! Each tick loads the active courses and, for every course whose scheduled
//! instant this week has passed, accrues interest for all its participants in
//! one write unit. A course counts as applied for the week when its
//! `last_interest_at` has reached the scheduled instant or any interest entry
//! exists at or after it, so restarts and repeated ticks never double-post.
//! Only the current week is considered; missed earlier weeks are not
//! back-filled.

use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::balance;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::models::{Course, Participant, RateKind, TxType, Wallet};
use crate::money;

/// What a course-level accrual did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Accrual {
    /// This week's instant is still ahead, or the course is finished.
    NotDue,
    /// Interest for this week was already posted.
    AlreadyApplied,
    Applied { postings: Vec<Posting> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posting {
    pub participant_id: i64,
    pub tx_id: i64,
    pub tx_type: TxType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub courses_checked: usize,
    pub courses_applied: usize,
    pub postings: usize,
    pub failures: usize,
}

/// This week's interest instant for `course`, weeks starting on Monday (UTC).
pub fn scheduled_instant(course: &Course, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let week_start = today - chrono::Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let day = week_start + chrono::Duration::days(i64::from(course.interest_day));
    day.and_time(course.interest_time).and_utc()
}

/// Weekly interest on `balance` at `rate` percent, rounded to cents.
pub fn interest_due(balance: Decimal, rate: Decimal) -> Result<Decimal> {
    let interest = money::checked_mul(balance, rate)?
        .checked_div(Decimal::ONE_HUNDRED)
        .ok_or(LedgerError::AmountOverflow)?;
    Ok(money::round(interest))
}

/// Run the scheduler until `shutdown` fires.
pub async fn run(ledger: Ledger, poll_interval: Duration, shutdown: CancellationToken) {
    info!(
        "Interest scheduler starting, polling every {}s",
        poll_interval.as_secs()
    );

    loop {
        // A panicking tick is contained in its own task.
        let tick = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.accrue_due_interest().await }
        });
        match tick.await {
            Ok(Ok(report)) if report.courses_applied > 0 || report.failures > 0 => {
                info!(
                    checked = report.courses_checked,
                    applied = report.courses_applied,
                    postings = report.postings,
                    failures = report.failures,
                    "interest tick finished"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Interest tick error: {e}"),
            Err(e) => error!("Interest tick aborted: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("Interest scheduler stopped");
}

impl Ledger {
    /// One scheduler tick over every active course.
    ///
    /// A failing course is logged and skipped; the others still accrue.
    pub async fn accrue_due_interest(&self) -> Result<TickReport> {
        let courses = db::list_active_courses(self.store().pool()).await?;
        let mut report = TickReport {
            courses_checked: courses.len(),
            ..TickReport::default()
        };

        for course in courses {
            match self.accrue_course_interest(course.id).await {
                Ok(Accrual::Applied { postings }) => {
                    report.courses_applied += 1;
                    report.postings += postings.len();
                }
                Ok(_) => {}
                Err(e) => {
                    report.failures += 1;
                    if e.is_storage() {
                        error!(course_id = course.id, "interest accrual failed: {e}");
                    } else {
                        warn!(course_id = course.id, "interest accrual skipped: {e}");
                    }
                }
            }
        }
        Ok(report)
    }

    /// Accrue this week's interest for one course if it is due and not yet applied.
    pub async fn accrue_course_interest(&self, course_id: i64) -> Result<Accrual> {
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let course = db::require_course(unit.conn(), course_id).await?;
        if !course.is_active {
            return Ok(Accrual::NotDue);
        }

        let scheduled = scheduled_instant(&course, now);
        if now < scheduled {
            return Ok(Accrual::NotDue);
        }
        if course.last_interest_at.is_some_and(|last| last >= scheduled)
            || db::interest_posted_since(unit.conn(), course_id, scheduled).await?
        {
            return Ok(Accrual::AlreadyApplied);
        }

        let savings_rate = db::current_rate(unit.conn(), course_id, RateKind::Savings).await?;
        let loan_rate = db::current_rate(unit.conn(), course_id, RateKind::Loan).await?;

        let mut postings = Vec::new();
        let mut credited: Vec<Participant> = Vec::new();
        for mut participant in db::list_participants(unit.conn(), course_id).await? {
            let legs = [
                (Wallet::Savings, savings_rate, TxType::SavingsInterest),
                (Wallet::Loan, loan_rate, TxType::LoanInterest),
            ];
            let before = postings.len();
            for (wallet, rate, tx_type) in legs {
                let balance = participant.balance(wallet);
                if balance <= Decimal::ZERO || rate <= Decimal::ZERO {
                    continue;
                }
                let interest = interest_due(balance, rate)?;
                if interest <= Decimal::ZERO {
                    continue;
                }
                balance::credit_interest(unit.conn(), &mut participant, wallet, interest).await?;
                let tx = db::insert_transaction(unit.conn(), participant.id, tx_type, interest, now)
                    .await?;
                postings.push(Posting {
                    participant_id: participant.id,
                    tx_id: tx.id,
                    tx_type,
                    amount: interest,
                });
            }
            if postings.len() > before {
                credited.push(participant);
            }
        }

        db::set_last_interest_at(unit.conn(), course_id, scheduled).await?;
        unit.commit().await?;

        info!(
            course_id,
            scheduled = %scheduled,
            %savings_rate,
            %loan_rate,
            postings = postings.len(),
            "weekly interest applied"
        );
        if postings.is_empty() {
            warn!(course_id, "no participant was eligible for interest this week");
        }

        for participant in &credited {
            let lines: Vec<String> = postings
                .iter()
                .filter(|p| p.participant_id == participant.id)
                .map(|p| match p.tx_type {
                    TxType::SavingsInterest => format!(
                        "+{} savings interest (savings: {})",
                        p.amount, participant.savings_balance
                    ),
                    _ => format!(
                        "+{} loan interest (loan: {})",
                        p.amount, participant.loan_balance
                    ),
                })
                .collect();
            self.notify_participant(participant, format!("Weekly interest: {}", lines.join("; ")));
        }

        Ok(Accrual::Applied { postings })
    }
}
