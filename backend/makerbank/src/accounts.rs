//! Savings and loan self-service.
//!
//! Each operation validates, moves money between two balances and journals one
//! `completed` transaction, all in a single write unit. A failed check leaves
//! nothing behind.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::balance;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::ledger::{ensure_active, Ledger};
use crate::models::{Course, Participant, Transaction, TxType, Wallet};
use crate::money;

/// Outcome of a self-service operation.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub transaction: Transaction,
    pub participant: Participant,
}

/// Two balance moves that make up one operation.
type Legs = [(Wallet, Decimal); 2];

impl Ledger {
    /// Wallet → savings. Restarts the savings lock period.
    pub async fn move_to_savings(&self, participant_id: i64, amount: Decimal) -> Result<Receipt> {
        self.self_service(participant_id, amount, TxType::SavingsDeposit, |p, _, amount, _| {
            if amount > p.wallet_balance {
                return Err(LedgerError::InsufficientFunds);
            }
            Ok([(Wallet::Wallet, -amount), (Wallet::Savings, amount)])
        })
        .await
    }

    /// Savings → wallet, once the lock period since the last deposit has passed.
    pub async fn withdraw_from_savings(&self, participant_id: i64, amount: Decimal) -> Result<Receipt> {
        self.self_service(participant_id, amount, TxType::SavingsWithdraw, |p, course, amount, now| {
            if amount > p.savings_balance {
                return Err(LedgerError::InsufficientSavings);
            }
            if let Some(unlock_at) = savings_unlock_at(p, course) {
                if now < unlock_at {
                    return Err(LedgerError::SavingsLocked(unlock_at));
                }
            }
            Ok([(Wallet::Savings, -amount), (Wallet::Wallet, amount)])
        })
        .await
    }

    /// Borrow into the wallet, up to the course's loan ceiling.
    pub async fn take_loan(&self, participant_id: i64, amount: Decimal) -> Result<Receipt> {
        self.self_service(participant_id, amount, TxType::LoanBorrow, |p, course, amount, _| {
            if money::checked_add(p.loan_balance, amount)? > course.max_loan_amount {
                let available = (course.max_loan_amount - p.loan_balance).max(Decimal::ZERO);
                return Err(LedgerError::LoanLimitExceeded {
                    available: money::round(available),
                });
            }
            Ok([(Wallet::Loan, amount), (Wallet::Wallet, amount)])
        })
        .await
    }

    /// Pay loan principal back from the wallet. Overpaying is refused.
    pub async fn repay_loan(&self, participant_id: i64, amount: Decimal) -> Result<Receipt> {
        self.self_service(participant_id, amount, TxType::LoanRepay, |p, _, amount, _| {
            if amount > p.wallet_balance {
                return Err(LedgerError::InsufficientFunds);
            }
            if amount > p.loan_balance {
                return Err(LedgerError::LoanOverpayment);
            }
            Ok([(Wallet::Wallet, -amount), (Wallet::Loan, -amount)])
        })
        .await
    }

    async fn self_service<F>(
        &self,
        participant_id: i64,
        amount: Decimal,
        tx_type: TxType,
        validate: F,
    ) -> Result<Receipt>
    where
        F: FnOnce(&Participant, &Course, Decimal, DateTime<Utc>) -> Result<Legs>,
    {
        let amount = money::positive_amount(amount)?;
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let mut participant = db::require_participant(unit.conn(), participant_id).await?;
        let course = db::require_course(unit.conn(), participant.course_id).await?;
        ensure_active(&course)?;

        let legs = validate(&participant, &course, amount, now)?;
        for (wallet, delta) in legs {
            balance::adjust(unit.conn(), &mut participant, wallet, delta, now).await?;
        }
        let transaction =
            db::insert_transaction(unit.conn(), participant.id, tx_type, amount, now).await?;
        unit.commit().await?;

        info!(
            tx_id = transaction.id,
            participant_id,
            %amount,
            wallet = %participant.wallet_balance,
            savings = %participant.savings_balance,
            loan = %participant.loan_balance,
            "{tx_type} completed"
        );
        Ok(Receipt {
            transaction,
            participant,
        })
    }
}

/// End of the lock period started by the last savings deposit, if any.
///
/// A delay that does not fit the calendar locks until the end of time.
pub fn savings_unlock_at(participant: &Participant, course: &Course) -> Option<DateTime<Utc>> {
    participant.last_savings_deposit_at.map(|anchor| {
        Duration::try_days(course.savings_withdrawal_delay)
            .and_then(|delay| anchor.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}
