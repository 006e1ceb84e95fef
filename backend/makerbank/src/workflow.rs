//! Cash transaction workflow: participant requests, operator settles.
//!
//! A cash request is journaled `pending` and moves no money. Exactly one of
//! approve / decline / cancel takes it to a terminal state; only approve
//! touches a balance. The status change is a compare-and-set inside the same
//! unit as the balance effect, so a second settle attempt always sees
//! `TransactionNotPending`.

use rust_decimal::Decimal;
use tracing::info;

use crate::balance;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::ledger::{ensure_active, Ledger};
use crate::models::{Transaction, TxStatus, TxType, Wallet};
use crate::money;

impl Ledger {
    /// Ask the operator for cash out of the wallet. Funds move on approval.
    pub async fn request_withdrawal(&self, participant_id: i64, amount: Decimal) -> Result<Transaction> {
        self.open_cash_request(participant_id, TxType::CashWithdrawal, amount)
            .await
    }

    /// Announce a cash hand-in. The wallet is credited on approval.
    pub async fn request_deposit(&self, participant_id: i64, amount: Decimal) -> Result<Transaction> {
        self.open_cash_request(participant_id, TxType::CashDeposit, amount)
            .await
    }

    async fn open_cash_request(
        &self,
        participant_id: i64,
        tx_type: TxType,
        amount: Decimal,
    ) -> Result<Transaction> {
        let amount = money::positive_amount(amount)?;
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let participant = db::require_participant(unit.conn(), participant_id).await?;
        let course = db::require_course(unit.conn(), participant.course_id).await?;
        ensure_active(&course)?;

        if tx_type == TxType::CashWithdrawal && amount > participant.wallet_balance {
            return Err(LedgerError::InsufficientFunds);
        }

        let tx = db::insert_transaction(unit.conn(), participant.id, tx_type, amount, now).await?;
        unit.commit().await?;

        info!(
            tx_id = tx.id,
            participant_id,
            %amount,
            "{tx_type} request created"
        );
        let verb = match tx_type {
            TxType::CashWithdrawal => "withdraw",
            _ => "deposit",
        };
        self.notify_creator(
            &course,
            format!(
                "{} ({}) wants to {verb} {amount}. Request #{} awaits approval.",
                participant.name, participant.email, tx.id
            ),
        );
        Ok(tx)
    }

    /// Complete a pending cash request and apply its balance effect.
    ///
    /// A withdrawal whose amount no longer fits the wallet is refused with
    /// `InsufficientFunds` and stays pending.
    pub async fn approve(&self, tx_id: i64) -> Result<Transaction> {
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let tx = pending_transaction(unit.conn(), tx_id).await?;
        let mut participant = db::require_participant(unit.conn(), tx.participant_id).await?;

        let delta = match tx.tx_type {
            TxType::CashDeposit => tx.amount,
            TxType::CashWithdrawal => {
                if tx.amount > participant.wallet_balance {
                    return Err(LedgerError::InsufficientFunds);
                }
                -tx.amount
            }
            _ => return Err(LedgerError::TransactionNotPending(tx_id)),
        };

        if !db::settle_transaction(unit.conn(), tx_id, TxStatus::Completed, now).await? {
            return Err(LedgerError::TransactionNotPending(tx_id));
        }
        let wallet = balance::adjust(unit.conn(), &mut participant, Wallet::Wallet, delta, now).await?;
        let settled = reload(unit.conn(), tx_id).await?;
        unit.commit().await?;

        info!(
            tx_id,
            participant_id = participant.id,
            amount = %tx.amount,
            %wallet,
            "{} approved",
            tx.tx_type
        );
        self.notify_participant(
            &participant,
            format!(
                "Your request #{tx_id} for {} was approved. Wallet balance: {wallet}.",
                tx.amount
            ),
        );
        Ok(settled)
    }

    /// Refuse a pending cash request. No balance changes.
    pub async fn decline(&self, tx_id: i64) -> Result<Transaction> {
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let tx = pending_transaction(unit.conn(), tx_id).await?;
        if !db::settle_transaction(unit.conn(), tx_id, TxStatus::Declined, now).await? {
            return Err(LedgerError::TransactionNotPending(tx_id));
        }
        let participant = db::require_participant(unit.conn(), tx.participant_id).await?;
        let settled = reload(unit.conn(), tx_id).await?;
        unit.commit().await?;

        info!(tx_id, participant_id = participant.id, "{} declined", tx.tx_type);
        self.notify_participant(
            &participant,
            format!("Your request #{tx_id} for {} was declined.", tx.amount),
        );
        Ok(settled)
    }

    /// Withdraw one's own pending cash request. No balance changes.
    pub async fn cancel_transaction(&self, participant_id: i64, tx_id: i64) -> Result<Transaction> {
        let now = self.now();

        let mut unit = self.store().begin().await?;
        let tx = db::fetch_transaction(unit.conn(), tx_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(tx_id))?;
        if tx.participant_id != participant_id {
            return Err(LedgerError::NotTransactionOwner(tx_id));
        }
        if tx.status != TxStatus::Pending
            || !db::settle_transaction(unit.conn(), tx_id, TxStatus::Canceled, now).await?
        {
            return Err(LedgerError::TransactionNotPending(tx_id));
        }
        let participant = db::require_participant(unit.conn(), participant_id).await?;
        let course = db::require_course(unit.conn(), participant.course_id).await?;
        let settled = reload(unit.conn(), tx_id).await?;
        unit.commit().await?;

        info!(tx_id, participant_id, "{} canceled by participant", tx.tx_type);
        self.notify_creator(
            &course,
            format!("{} canceled request #{tx_id}.", participant.name),
        );
        Ok(settled)
    }
}

async fn pending_transaction(conn: &mut sqlx::SqliteConnection, tx_id: i64) -> Result<Transaction> {
    let tx = db::fetch_transaction(conn, tx_id)
        .await?
        .ok_or(LedgerError::TransactionNotFound(tx_id))?;
    if tx.status != TxStatus::Pending {
        return Err(LedgerError::TransactionNotPending(tx_id));
    }
    Ok(tx)
}

async fn reload(conn: &mut sqlx::SqliteConnection, tx_id: i64) -> Result<Transaction> {
    db::fetch_transaction(conn, tx_id)
        .await?
        .ok_or(LedgerError::TransactionNotFound(tx_id))
}
