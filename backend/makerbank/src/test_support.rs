//! Shared fixtures for the ledger tests: an in-memory store, a manual clock,
//! a recording notifier and one course with default settings.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::clock::ManualClock;
use crate::courses::CourseSettings;
use crate::db::{self, LedgerStore};
use crate::ledger::Ledger;
use crate::models::{Course, Participant, Transaction};
use crate::money;
use crate::notify::RecordingNotifier;

/// Admin id owning the fixture course.
pub const CREATOR_ID: i64 = 777;

static NEXT_CODE: AtomicU32 = AtomicU32::new(1);

pub struct Fixture {
    pub ledger: Ledger,
    pub store: LedgerStore,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub course: Course,
}

/// Monday 2024-03-04 08:00 UTC, one hour before the default interest instant.
pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_settings(CourseSettings::default()).await
    }

    pub async fn with_settings(settings: CourseSettings) -> Self {
        let pool = db::init_memory_pool().await.unwrap();
        let store = LedgerStore::new(pool);
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let notifier = Arc::new(RecordingNotifier::default());
        let ledger = Ledger::new(store.clone(), clock.clone(), notifier.clone());
        let course = ledger
            .create_course("Econ 101", Some("fixture course"), CREATOR_ID, settings)
            .await
            .unwrap();

        Self {
            ledger,
            store,
            clock,
            notifier,
            course,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use crate::clock::Clock;
        self.clock.now()
    }

    /// Registered participant of the fixture course with the given balances.
    pub async fn participant_with(
        &self,
        wallet: Decimal,
        savings: Decimal,
        loan: Decimal,
    ) -> Participant {
        self.participant_in(self.course.id, wallet, savings, loan).await
    }

    pub async fn participant_in(
        &self,
        course_id: i64,
        wallet: Decimal,
        savings: Decimal,
        loan: Decimal,
    ) -> Participant {
        let pool = self.store.pool();
        let code = format!("FX{:06}", NEXT_CODE.fetch_add(1, Ordering::Relaxed));
        let id = db::insert_participant(pool, course_id, "Student", "student@example.com", &code)
            .await
            .unwrap();
        db::mark_registered(pool, id, 10_000 + id).await.unwrap();
        sqlx::query(
            r#"
            UPDATE participants
            SET    wallet_balance = ?2, savings_balance = ?3, loan_balance = ?4
            WHERE  id = ?1
            "#,
        )
        .bind(id)
        .bind(money::encode(wallet))
        .bind(money::encode(savings))
        .bind(money::encode(loan))
        .execute(pool)
        .await
        .unwrap();
        self.participant(id).await
    }

    pub async fn participant(&self, id: i64) -> Participant {
        db::require_participant(self.store.pool(), id).await.unwrap()
    }

    pub async fn transaction(&self, id: i64) -> Transaction {
        db::fetch_transaction(self.store.pool(), id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn transactions(&self, participant_id: i64) -> Vec<Transaction> {
        db::list_transactions(self.store.pool(), participant_id)
            .await
            .unwrap()
    }

    pub async fn course(&self) -> Course {
        db::require_course(self.store.pool(), self.course.id).await.unwrap()
    }
}
