//! Fixed-point money helpers.
//!
//! Every currency value in the ledger carries exactly two fractional digits and
//! is rounded half-up (ties away from zero). Values are persisted as canonical
//! TEXT so SQLite never sees a float.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::{LedgerError, Result};

/// Number of fractional digits kept for balances, amounts and rates.
pub const SCALE: u32 = 2;

/// Round to two decimal places, half-up, and pin the scale so that
/// `to_string` always yields e.g. `"150.00"`.
pub fn round(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Largest amount a single operation or course limit may carry: 1,000,000,000.00.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_215_752_192, 23, 0, false, 2);

/// Validate an operation amount: rounded to two places it must be strictly
/// positive and at most [`MAX_AMOUNT`].
pub fn positive_amount(amount: Decimal) -> Result<Decimal> {
    let amount = round(amount);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must not exceed {MAX_AMOUNT}, got {amount}"
        )));
    }
    Ok(amount)
}

/// `a + b`, or `AmountOverflow` when the sum leaves the Decimal range.
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or(LedgerError::AmountOverflow)
}

/// `a * b`, or `AmountOverflow` when the product leaves the Decimal range.
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_mul(b).ok_or(LedgerError::AmountOverflow)
}

/// Parse a user-supplied amount string such as `"12.5"`.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let parsed = Decimal::from_str(raw.trim())
        .map_err(|_| LedgerError::InvalidAmount(format!("{raw:?} is not a number")))?;
    positive_amount(parsed)
}

/// Decode a TEXT column written by [`encode`].
pub fn decode(column: &str, raw: &str) -> std::result::Result<Decimal, sqlx::Error> {
    Decimal::from_str(raw).map(round).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Canonical TEXT form for storage.
pub fn encode(value: Decimal) -> String {
    round(value).to_string()
}
