#![allow(dead_code)]

use rust_decimal::Decimal;

use crate::models::{Course, Participant, Transaction, TxStatus};

/// Every balance stays non-negative.
pub fn assert_balances_non_negative(participant: &Participant) {
    for (label, value) in [
        ("wallet", participant.wallet_balance),
        ("savings", participant.savings_balance),
        ("loan", participant.loan_balance),
    ] {
        assert!(
            value >= Decimal::ZERO,
            "participant {} has negative {label} balance ({value})",
            participant.id
        );
    }
}

/// Borrowing never pushes the loan above the course ceiling.
pub fn assert_loan_within_ceiling(participant: &Participant, course: &Course) {
    assert!(
        participant.loan_balance <= course.max_loan_amount,
        "participant {} owes {} above the ceiling {}",
        participant.id,
        participant.loan_balance,
        course.max_loan_amount
    );
}

/// Balances carry exactly two fractional digits.
pub fn assert_two_decimal_places(participant: &Participant) {
    for value in [
        participant.wallet_balance,
        participant.savings_balance,
        participant.loan_balance,
    ] {
        assert_eq!(
            value.round_dp(2),
            value,
            "participant {} balance {value} has more than two decimals",
            participant.id
        );
    }
}

/// Journal amounts are strictly positive; direction lives in the type.
pub fn assert_amount_positive(tx: &Transaction) {
    assert!(
        tx.amount > Decimal::ZERO,
        "transaction {} has non-positive amount {}",
        tx.id,
        tx.amount
    );
}

/// `processed_at` is set exactly when the transaction left `pending`.
pub fn assert_processed_stamp(tx: &Transaction) {
    assert_eq!(
        tx.processed_at.is_some(),
        tx.status.is_terminal(),
        "transaction {} in {:?} has processed_at {:?}",
        tx.id,
        tx.status,
        tx.processed_at
    );
}

/// Only `pending` may move, and only to a terminal state.
pub fn assert_valid_status_transition(from: TxStatus, to: TxStatus) {
    let valid = from == to
        || matches!(
            (from, to),
            (TxStatus::Pending, TxStatus::Completed)
                | (TxStatus::Pending, TxStatus::Declined)
                | (TxStatus::Pending, TxStatus::Canceled)
        );
    assert!(valid, "invalid status transition from {from:?} to {to:?}");
}

pub fn assert_all_participant_invariants(participant: &Participant, course: &Course) {
    assert_balances_non_negative(participant);
    assert_loan_within_ceiling(participant, course);
    assert_two_decimal_places(participant);
}

pub fn assert_all_transaction_invariants(transactions: &[Transaction]) {
    for tx in transactions {
        assert_amount_positive(tx);
        assert_processed_stamp(tx);
    }
}
