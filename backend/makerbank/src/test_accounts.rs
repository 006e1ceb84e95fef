use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::courses::CourseUpdate;
use crate::errors::LedgerError;
use crate::invariants::{assert_all_participant_invariants, assert_all_transaction_invariants};
use crate::models::{TxStatus, TxType};
use crate::test_support::Fixture;

#[tokio::test]
async fn test_move_to_savings() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(100.00), dec!(0), dec!(0)).await;

    let receipt = fx.ledger.move_to_savings(participant.id, dec!(40)).await.unwrap();
    assert_eq!(receipt.transaction.tx_type, TxType::SavingsDeposit);
    assert_eq!(receipt.transaction.status, TxStatus::Completed);
    assert_eq!(receipt.transaction.amount, dec!(40.00));
    assert_eq!(receipt.participant.wallet_balance, dec!(60.00));
    assert_eq!(receipt.participant.savings_balance, dec!(40.00));
    assert_eq!(receipt.participant.last_savings_deposit_at, Some(fx.clock_now()));
    assert_eq!(fx.participant(participant.id).await, receipt.participant);

    assert!(matches!(
        fx.ledger.move_to_savings(participant.id, dec!(60.01)).await,
        Err(LedgerError::InsufficientFunds)
    ));
    assert!(matches!(
        fx.ledger.move_to_savings(participant.id, dec!(0)).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert_eq!(fx.transactions(participant.id).await.len(), 1);
}

#[tokio::test]
async fn test_savings_lock_period() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(50.00), dec!(0), dec!(0)).await;
    let t0 = fx.clock_now();

    fx.ledger.move_to_savings(participant.id, dec!(50)).await.unwrap();

    fx.clock.set(t0 + Duration::days(3));
    match fx.ledger.withdraw_from_savings(participant.id, dec!(10)).await {
        Err(LedgerError::SavingsLocked(unlock_at)) => assert_eq!(unlock_at, t0 + Duration::days(7)),
        other => panic!("expected SavingsLocked, got {other:?}"),
    }
    assert_eq!(fx.participant(participant.id).await.savings_balance, dec!(50.00));

    fx.clock.set(t0 + Duration::days(8));
    let receipt = fx.ledger.withdraw_from_savings(participant.id, dec!(10)).await.unwrap();
    assert_eq!(receipt.transaction.tx_type, TxType::SavingsWithdraw);
    assert_eq!(receipt.participant.savings_balance, dec!(40.00));
    assert_eq!(receipt.participant.wallet_balance, dec!(10.00));
    // Withdrawals do not restart the lock.
    assert_eq!(receipt.participant.last_savings_deposit_at, Some(t0));
}

#[tokio::test]
async fn test_lock_ends_exactly_at_the_delay() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(20.00), dec!(0), dec!(0)).await;
    let t0 = fx.clock_now();
    fx.ledger.move_to_savings(participant.id, dec!(20)).await.unwrap();

    fx.clock.set(t0 + Duration::days(7) - Duration::seconds(1));
    assert!(matches!(
        fx.ledger.withdraw_from_savings(participant.id, dec!(5)).await,
        Err(LedgerError::SavingsLocked(_))
    ));
    fx.clock.set(t0 + Duration::days(7));
    fx.ledger.withdraw_from_savings(participant.id, dec!(5)).await.unwrap();
}

#[tokio::test]
async fn test_new_deposit_restarts_lock() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(100.00), dec!(0), dec!(0)).await;
    let t0 = fx.clock_now();
    fx.ledger.move_to_savings(participant.id, dec!(50)).await.unwrap();

    fx.clock.set(t0 + Duration::days(6));
    fx.ledger.move_to_savings(participant.id, dec!(1)).await.unwrap();

    fx.clock.set(t0 + Duration::days(8));
    match fx.ledger.withdraw_from_savings(participant.id, dec!(10)).await {
        Err(LedgerError::SavingsLocked(unlock_at)) => assert_eq!(unlock_at, t0 + Duration::days(13)),
        other => panic!("expected SavingsLocked, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_delay_course_never_locks() {
    let fx = Fixture::new().await;
    fx.ledger
        .update_course(
            fx.course.id,
            CourseUpdate {
                savings_withdrawal_delay: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let participant = fx.participant_with(dec!(10.00), dec!(0), dec!(0)).await;

    fx.ledger.move_to_savings(participant.id, dec!(10)).await.unwrap();
    let receipt = fx.ledger.withdraw_from_savings(participant.id, dec!(10)).await.unwrap();
    assert_eq!(receipt.participant.savings_balance, dec!(0.00));
}

#[tokio::test]
async fn test_withdraw_more_than_savings() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(0), dec!(5.00), dec!(0)).await;

    assert!(matches!(
        fx.ledger.withdraw_from_savings(participant.id, dec!(5.01)).await,
        Err(LedgerError::InsufficientSavings)
    ));
    // Seeded savings have no deposit anchor and are not locked.
    fx.ledger.withdraw_from_savings(participant.id, dec!(5)).await.unwrap();
}

#[tokio::test]
async fn test_loan_ceiling() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(0), dec!(0), dec!(80.00)).await;

    match fx.ledger.take_loan(participant.id, dec!(30)).await {
        Err(LedgerError::LoanLimitExceeded { available }) => assert_eq!(available, dec!(20.00)),
        other => panic!("expected LoanLimitExceeded, got {other:?}"),
    }
    let unchanged = fx.participant(participant.id).await;
    assert_eq!(unchanged.loan_balance, dec!(80.00));
    assert_eq!(unchanged.wallet_balance, dec!(0.00));
    assert!(fx.transactions(participant.id).await.is_empty());

    // Borrowing right up to the ceiling is allowed.
    let receipt = fx.ledger.take_loan(participant.id, dec!(20)).await.unwrap();
    assert_eq!(receipt.transaction.tx_type, TxType::LoanBorrow);
    assert_eq!(receipt.participant.loan_balance, dec!(100.00));
    assert_eq!(receipt.participant.wallet_balance, dec!(20.00));
}

#[tokio::test]
async fn test_repay_loan() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(0), dec!(0), dec!(0)).await;

    fx.ledger.take_loan(participant.id, dec!(60)).await.unwrap();
    let receipt = fx.ledger.repay_loan(participant.id, dec!(25.50)).await.unwrap();
    assert_eq!(receipt.transaction.tx_type, TxType::LoanRepay);
    assert_eq!(receipt.participant.loan_balance, dec!(34.50));
    assert_eq!(receipt.participant.wallet_balance, dec!(34.50));
}

#[tokio::test]
async fn test_repay_checks_wallet_then_loan() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(100.00), dec!(0), dec!(30.00)).await;

    assert!(matches!(
        fx.ledger.repay_loan(participant.id, dec!(30.01)).await,
        Err(LedgerError::LoanOverpayment)
    ));
    assert!(matches!(
        fx.ledger.repay_loan(participant.id, dec!(100.01)).await,
        Err(LedgerError::InsufficientFunds)
    ));
    let unchanged = fx.participant(participant.id).await;
    assert_eq!(unchanged.wallet_balance, dec!(100.00));
    assert_eq!(unchanged.loan_balance, dec!(30.00));

    fx.ledger.repay_loan(participant.id, dec!(30)).await.unwrap();
    assert_eq!(fx.participant(participant.id).await.loan_balance, dec!(0.00));
}

#[tokio::test]
async fn test_invariants_hold_across_mixed_operations() {
    let fx = Fixture::new().await;
    let course = fx.course().await;
    let participant = fx.participant_with(dec!(37.13), dec!(0), dec!(0)).await;

    let amounts = [
        dec!(12.34),
        dec!(0.01),
        dec!(55.55),
        dec!(99.99),
        dec!(7),
        dec!(100),
        dec!(0.5),
        dec!(33.333),
    ];
    for (step, amount) in amounts.iter().cycle().take(48).enumerate() {
        fx.clock.advance(Duration::days(2));
        let id = participant.id;
        // Rejections are expected; what matters is that nothing breaks.
        let _ = match step % 5 {
            0 => fx.ledger.take_loan(id, *amount).await.map(|_| ()),
            1 => fx.ledger.move_to_savings(id, *amount).await.map(|_| ()),
            2 => fx.ledger.withdraw_from_savings(id, *amount).await.map(|_| ()),
            3 => fx.ledger.repay_loan(id, *amount).await.map(|_| ()),
            _ => match fx.ledger.request_withdrawal(id, *amount).await {
                Ok(tx) => fx.ledger.approve(tx.id).await.map(|_| ()),
                Err(e) => Err(e),
            },
        };

        let current = fx.participant(id).await;
        assert_all_participant_invariants(&current, &course);
    }

    let history = fx.transactions(participant.id).await;
    assert!(!history.is_empty());
    assert_all_transaction_invariants(&history);

    // The journal explains the wallet exactly.
    let wallet: Decimal = history
        .iter()
        .filter(|tx| tx.status == TxStatus::Completed)
        .map(|tx| match tx.tx_type {
            TxType::CashDeposit | TxType::SavingsWithdraw | TxType::LoanBorrow => tx.amount,
            TxType::CashWithdrawal | TxType::SavingsDeposit | TxType::LoanRepay => -tx.amount,
            _ => Decimal::ZERO,
        })
        .sum();
    assert_eq!(
        fx.participant(participant.id).await.wallet_balance,
        dec!(37.13) + wallet
    );
}

#[tokio::test]
async fn test_finished_course_blocks_self_service() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(10.00), dec!(0), dec!(0)).await;
    fx.ledger.finish_course(fx.course.id).await.unwrap();

    assert!(matches!(
        fx.ledger.move_to_savings(participant.id, dec!(1)).await,
        Err(LedgerError::CourseFinished(_))
    ));
    assert!(matches!(
        fx.ledger.take_loan(participant.id, dec!(1)).await,
        Err(LedgerError::CourseFinished(_))
    ));
    // Balances stay readable.
    assert_eq!(
        fx.ledger.get_participant(participant.id).await.unwrap().wallet_balance,
        dec!(10.00)
    );
}

#[tokio::test]
async fn test_amounts_above_the_cap_are_rejected() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(10.00), dec!(0), dec!(0)).await;
    let huge = dec!(50000000000000000000000000000);

    assert!(matches!(
        fx.ledger.request_deposit(participant.id, huge).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        fx.ledger.take_loan(participant.id, huge).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        fx.ledger.move_to_savings(participant.id, crate::money::MAX_AMOUNT + dec!(1)).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(fx.transactions(participant.id).await.is_empty());
}

#[tokio::test]
async fn test_overflowing_balance_rolls_back() {
    let fx = Fixture::new().await;
    let participant = fx.participant_with(dec!(10.00), Decimal::MAX, Decimal::MAX).await;

    assert!(matches!(
        fx.ledger.move_to_savings(participant.id, dec!(10)).await,
        Err(LedgerError::AmountOverflow)
    ));
    assert!(matches!(
        fx.ledger.take_loan(participant.id, dec!(1)).await,
        Err(LedgerError::AmountOverflow)
    ));

    let unchanged = fx.participant(participant.id).await;
    assert_eq!(unchanged.wallet_balance, dec!(10.00));
    assert_eq!(unchanged.savings_balance, Decimal::MAX);
    assert!(fx.transactions(participant.id).await.is_empty());
}

#[tokio::test]
async fn test_out_of_range_stored_delay_locks_without_panicking() {
    let fx = Fixture::new().await;
    // Rows written before the delay was bounded can still hold huge values.
    sqlx::query("UPDATE courses SET savings_withdrawal_delay = ?2 WHERE id = ?1")
        .bind(fx.course.id)
        .bind(1_000_000_000_000_i64)
        .execute(fx.store.pool())
        .await
        .unwrap();
    let participant = fx.participant_with(dec!(10.00), dec!(0), dec!(0)).await;
    fx.ledger.move_to_savings(participant.id, dec!(10)).await.unwrap();

    fx.clock.advance(Duration::days(365 * 50));
    match fx.ledger.withdraw_from_savings(participant.id, dec!(10)).await {
        Err(LedgerError::SavingsLocked(until)) => {
            assert_eq!(until, chrono::DateTime::<chrono::Utc>::MAX_UTC)
        }
        other => panic!("expected SavingsLocked, got {other:?}"),
    }
}
