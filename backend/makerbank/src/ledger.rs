//! The ledger service handle shared by the request layer and the scheduler.
//!
//! Operations live in their own modules as `impl Ledger` blocks:
//!
//! | Module        | Operations                                              |
//! |---------------|---------------------------------------------------------|
//! | [`workflow`]  | cash requests, approve / decline / cancel               |
//! | [`accounts`]  | savings deposit / withdraw, loan borrow / repay         |
//! | [`courses`]   | course settings, rates, import, registration, queries   |
//! | [`scheduler`] | weekly interest accrual                                 |
//!
//! [`workflow`]: crate::workflow
//! [`accounts`]: crate::accounts
//! [`courses`]: crate::courses
//! [`scheduler`]: crate::scheduler

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::db::LedgerStore;
use crate::errors::{LedgerError, Result};
use crate::models::{Course, Participant};
use crate::notify::Notifier;

#[derive(Clone)]
pub struct Ledger {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl Ledger {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Tell a participant something, if they have bound a chat account.
    pub(crate) fn notify_participant(&self, participant: &Participant, text: String) {
        if let Some(target) = participant.telegram_id {
            self.notifier.notify(target, text);
        }
    }

    pub(crate) fn notify_creator(&self, course: &Course, text: String) {
        self.notifier.notify(course.creator_id, text);
    }
}

/// Reject mutations against a finished course.
pub(crate) fn ensure_active(course: &Course) -> Result<()> {
    if course.is_active {
        Ok(())
    } else {
        Err(LedgerError::CourseFinished(course.id))
    }
}
