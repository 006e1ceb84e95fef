//! Course administration: settings, rates, participant import and
//! registration, plus the read-side queries the request layer needs.

use std::collections::HashSet;

use chrono::NaiveTime;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, NewCourse};
use crate::errors::{LedgerError, Result};
use crate::ledger::{ensure_active, Ledger};
use crate::models::{Course, Participant, RateEntry, RateKind, Transaction, INTEREST_TIME_FORMAT};
use crate::money;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 8;

/// Largest rate accepted, in percent.
pub const MAX_RATE: Decimal = Decimal::from_parts(99_999, 0, 0, false, 2);

/// Longest savings lock, ten years.
pub const MAX_WITHDRAWAL_DELAY_DAYS: i64 = 3650;

/// Tunables fixed at course creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseSettings {
    pub max_loan_amount: Decimal,
    pub savings_withdrawal_delay: i64,
    pub interest_day: u8,
    pub interest_time: NaiveTime,
}

impl Default for CourseSettings {
    fn default() -> Self {
        Self {
            max_loan_amount: Decimal::new(10_000, 2),
            savings_withdrawal_delay: 7,
            interest_day: 0,
            interest_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        }
    }
}

/// Partial edit of a course. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseUpdate {
    pub name: Option<String>,
    /// `Some(None)` (JSON `null`) clears the description.
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub max_loan_amount: Option<Decimal>,
    pub savings_withdrawal_delay: Option<i64>,
    pub interest_day: Option<u8>,
    /// `HH:MM`, UTC.
    pub interest_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParticipant {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedCode {
    pub participant_id: i64,
    pub email: String,
    pub registration_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "participant", rename_all = "snake_case")]
pub enum Registration {
    Registered(Participant),
    AlreadyRegistered(Participant),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    pub total: i64,
    pub registered: i64,
    pub avg_balance: Decimal,
}

/// Maps a field that is present, even as `null`, to `Some`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Parse an `HH:MM` interest time.
pub fn parse_interest_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), INTEREST_TIME_FORMAT)
        .map_err(|_| LedgerError::InvalidSetting(format!("interest_time {raw:?} is not HH:MM")))
}

fn validate_settings(settings: &CourseSettings) -> Result<()> {
    if settings.max_loan_amount < Decimal::ZERO || settings.max_loan_amount > money::MAX_AMOUNT {
        return Err(LedgerError::InvalidSetting(format!(
            "max_loan_amount must be between 0 and {}",
            money::MAX_AMOUNT
        )));
    }
    if !(0..=MAX_WITHDRAWAL_DELAY_DAYS).contains(&settings.savings_withdrawal_delay) {
        return Err(LedgerError::InvalidSetting(format!(
            "savings_withdrawal_delay must be 0-{MAX_WITHDRAWAL_DELAY_DAYS} days, got {}",
            settings.savings_withdrawal_delay
        )));
    }
    if settings.interest_day > 6 {
        return Err(LedgerError::InvalidSetting(format!(
            "interest_day must be 0-6, got {}",
            settings.interest_day
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidSetting("course name must not be empty".to_string()));
    }
    Ok(name)
}

fn generate_code<R: Rng>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

impl Ledger {
    pub async fn create_course(
        &self,
        name: &str,
        description: Option<&str>,
        creator_id: i64,
        settings: CourseSettings,
    ) -> Result<Course> {
        let name = validate_name(name)?;
        validate_settings(&settings)?;
        let interest_time = settings.interest_time.format(INTEREST_TIME_FORMAT).to_string();

        let mut unit = self.store().begin().await?;
        if db::fetch_course_by_name(unit.conn(), name).await?.is_some() {
            return Err(LedgerError::DuplicateCourseName(name.to_string()));
        }
        let id = db::insert_course(
            unit.conn(),
            &NewCourse {
                name,
                description,
                creator_id,
                max_loan_amount: money::round(settings.max_loan_amount),
                savings_withdrawal_delay: settings.savings_withdrawal_delay,
                interest_day: settings.interest_day,
                interest_time: &interest_time,
            },
            self.now(),
        )
        .await?;
        let course = db::require_course(unit.conn(), id).await?;
        unit.commit().await?;

        info!(course_id = id, creator_id, "course {name:?} created");
        Ok(course)
    }

    pub async fn get_course(&self, course_id: i64) -> Result<Course> {
        db::require_course(self.store().pool(), course_id).await
    }

    pub async fn list_courses_by_creator(&self, creator_id: i64, active_only: bool) -> Result<Vec<Course>> {
        db::list_courses_by_creator(self.store().pool(), creator_id, active_only).await
    }

    pub async fn update_course(&self, course_id: i64, update: CourseUpdate) -> Result<Course> {
        let mut unit = self.store().begin().await?;
        let mut course = db::require_course(unit.conn(), course_id).await?;
        ensure_active(&course)?;

        if let Some(name) = update.name.as_deref() {
            let name = validate_name(name)?;
            if let Some(existing) = db::fetch_course_by_name(unit.conn(), name).await? {
                if existing.id != course_id {
                    return Err(LedgerError::DuplicateCourseName(name.to_string()));
                }
            }
            course.name = name.to_string();
        }
        if let Some(description) = update.description {
            course.description = description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
        }

        let mut settings = CourseSettings {
            max_loan_amount: course.max_loan_amount,
            savings_withdrawal_delay: course.savings_withdrawal_delay,
            interest_day: course.interest_day,
            interest_time: course.interest_time,
        };
        if let Some(limit) = update.max_loan_amount {
            settings.max_loan_amount = money::round(limit);
        }
        if let Some(delay) = update.savings_withdrawal_delay {
            settings.savings_withdrawal_delay = delay;
        }
        if let Some(day) = update.interest_day {
            settings.interest_day = day;
        }
        if let Some(time) = update.interest_time.as_deref() {
            settings.interest_time = parse_interest_time(time)?;
        }
        validate_settings(&settings)?;

        course.max_loan_amount = settings.max_loan_amount;
        course.savings_withdrawal_delay = settings.savings_withdrawal_delay;
        course.interest_day = settings.interest_day;
        course.interest_time = settings.interest_time;

        db::save_course_settings(unit.conn(), &course).await?;
        unit.commit().await?;

        info!(course_id, "course settings updated");
        Ok(course)
    }

    /// Close a course for good. Balances stay readable; mutations stop.
    pub async fn finish_course(&self, course_id: i64) -> Result<Course> {
        let now = self.now();
        let mut unit = self.store().begin().await?;
        db::require_course(unit.conn(), course_id).await?;
        if !db::finish_course(unit.conn(), course_id, now).await? {
            return Err(LedgerError::CourseFinished(course_id));
        }
        let course = db::require_course(unit.conn(), course_id).await?;
        unit.commit().await?;

        info!(course_id, "course finished");
        Ok(course)
    }

    /// Append a new weekly rate; it applies from the next scheduled accrual.
    pub async fn set_rate(&self, course_id: i64, kind: RateKind, rate: Decimal) -> Result<RateEntry> {
        let rate = money::round(rate);
        if rate < Decimal::ZERO || rate > MAX_RATE {
            return Err(LedgerError::InvalidSetting(format!(
                "rate must be between 0 and {MAX_RATE}, got {rate}"
            )));
        }
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let course = db::require_course(unit.conn(), course_id).await?;
        ensure_active(&course)?;
        let id = db::insert_rate(unit.conn(), course_id, kind, rate, now).await?;
        unit.commit().await?;

        info!(course_id, kind = kind.as_str(), %rate, "rate set");
        Ok(RateEntry {
            id,
            course_id,
            kind,
            rate,
            set_at: crate::clock::from_unix(now.timestamp()),
        })
    }

    pub async fn get_current_rate(&self, course_id: i64, kind: RateKind) -> Result<Decimal> {
        let pool = self.store().pool();
        db::require_course(pool, course_id).await?;
        db::current_rate(pool, course_id, kind).await
    }

    /// Bulk-create participants, each with a fresh registration code.
    pub async fn import_participants(
        &self,
        course_id: i64,
        people: Vec<NewParticipant>,
    ) -> Result<Vec<IssuedCode>> {
        let mut unit = self.store().begin().await?;
        let course = db::require_course(unit.conn(), course_id).await?;
        ensure_active(&course)?;

        let mut taken = HashSet::new();
        let mut issued = Vec::with_capacity(people.len());
        for person in people {
            let code = loop {
                let candidate = generate_code(&mut rand::thread_rng());
                if taken.contains(&candidate) {
                    continue;
                }
                if db::fetch_participant_by_code(unit.conn(), &candidate).await?.is_none() {
                    break candidate;
                }
            };
            taken.insert(code.clone());

            let participant_id = db::insert_participant(
                unit.conn(),
                course_id,
                person.name.trim(),
                person.email.trim(),
                &code,
            )
            .await?;
            issued.push(IssuedCode {
                participant_id,
                email: person.email.trim().to_string(),
                registration_code: code,
            });
        }
        unit.commit().await?;

        info!(course_id, count = issued.len(), "participants imported");
        Ok(issued)
    }

    /// Consume a registration code, binding it to a chat account.
    pub async fn register_by_code(&self, code: &str, telegram_id: i64) -> Result<Registration> {
        let code = code.trim().to_uppercase();
        let mut unit = self.store().begin().await?;
        let Some(participant) = db::fetch_participant_by_code(unit.conn(), &code).await? else {
            return Ok(Registration::NotFound);
        };
        if participant.is_registered
            || !db::mark_registered(unit.conn(), participant.id, telegram_id).await?
        {
            return Ok(Registration::AlreadyRegistered(participant));
        }
        let participant = db::require_participant(unit.conn(), participant.id).await?;
        unit.commit().await?;

        info!(participant_id = participant.id, telegram_id, "participant registered");
        Ok(Registration::Registered(participant))
    }

    pub async fn get_participant(&self, participant_id: i64) -> Result<Participant> {
        db::require_participant(self.store().pool(), participant_id).await
    }

    /// Look up a participant by registration code, consumed or not.
    pub async fn participant_by_code(&self, code: &str) -> Result<Option<Participant>> {
        db::fetch_participant_by_code(self.store().pool(), &code.trim().to_uppercase()).await
    }

    pub async fn participant_by_telegram_id(&self, telegram_id: i64) -> Result<Option<Participant>> {
        db::fetch_participant_by_telegram_id(self.store().pool(), telegram_id).await
    }

    /// Pending cash requests awaiting the course admin, oldest first.
    pub async fn list_pending(&self, course_id: i64) -> Result<Vec<Transaction>> {
        let pool = self.store().pool();
        db::require_course(pool, course_id).await?;
        db::list_pending(pool, course_id).await
    }

    pub async fn list_transactions(&self, participant_id: i64) -> Result<Vec<Transaction>> {
        let pool = self.store().pool();
        db::require_participant(pool, participant_id).await?;
        db::list_transactions(pool, participant_id).await
    }

    pub async fn course_stats(&self, course_id: i64) -> Result<CourseStats> {
        let pool = self.store().pool();
        db::require_course(pool, course_id).await?;
        let participants = db::list_participants(pool, course_id).await?;

        let total = participants.len() as i64;
        let registered = participants.iter().filter(|p| p.is_registered).count() as i64;
        let sum = participants
            .iter()
            .try_fold(Decimal::ZERO, |sum, p| money::checked_add(sum, p.wallet_balance))?;
        let avg_balance = if total == 0 {
            money::round(Decimal::ZERO)
        } else {
            money::round(sum / Decimal::from(total))
        };

        Ok(CourseStats {
            total,
            registered,
            avg_balance,
        })
    }
}
