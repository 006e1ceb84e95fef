//! Balance adjustment primitive. The only code path that mutates balances.
//!
//! It rounds, stamps the savings lock anchor and persists. It does not check
//! ceilings or non-negativity; callers validate before they call it, inside
//! the same write unit that journals the transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db;
use crate::errors::Result;
use crate::models::{Participant, Wallet};
use crate::money;

/// Apply `delta` to one balance of `participant` and return the new value.
///
/// A positive savings delta is a contribution and restarts the withdrawal
/// lock period. `participant` must have been read inside the same unit as
/// `conn`; it is updated in place so later checks in the unit see the new
/// balance.
pub async fn adjust(
    conn: &mut SqliteConnection,
    participant: &mut Participant,
    wallet: Wallet,
    delta: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal> {
    let anchor = (wallet == Wallet::Savings && delta > Decimal::ZERO).then_some(now);
    apply(conn, participant, wallet, delta, anchor).await
}

/// Post accrued interest. Same rounding as [`adjust`], but interest is not a
/// contribution and leaves the savings lock anchor alone.
pub async fn credit_interest(
    conn: &mut SqliteConnection,
    participant: &mut Participant,
    wallet: Wallet,
    interest: Decimal,
) -> Result<Decimal> {
    apply(conn, participant, wallet, interest, None).await
}

async fn apply(
    conn: &mut SqliteConnection,
    participant: &mut Participant,
    wallet: Wallet,
    delta: Decimal,
    savings_anchor: Option<DateTime<Utc>>,
) -> Result<Decimal> {
    let new_balance = money::round(money::checked_add(participant.balance(wallet), delta)?);

    db::write_balance(conn, participant.id, wallet, new_balance, savings_anchor).await?;

    match wallet {
        Wallet::Wallet => participant.wallet_balance = new_balance,
        Wallet::Savings => participant.savings_balance = new_balance,
        Wallet::Loan => participant.loan_balance = new_balance,
    }
    if let Some(anchor) = savings_anchor {
        participant.last_savings_deposit_at = Some(anchor);
    }

    debug!(
        participant_id = participant.id,
        ?wallet,
        %delta,
        %new_balance,
        "balance adjusted"
    );
    Ok(new_balance)
}
