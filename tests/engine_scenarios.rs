//! End-to-end engine scenarios: reservations, settlement, cancellation,
//! refunds and the cash-out versus close race.
#![allow(clippy::panic)]

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use wager_gateway::app::build_engine_with;
use wager_gateway::config::EngineConfig;
use wager_gateway::domain::{
    AdminId, Bet, BetStatus, Currency, FixedOutcome, OperationType, OutcomeError,
    OutcomeGenerator, Round, RoundSeed, RoundStatus, UserId,
};
use wager_gateway::error::EngineError;
use wager_gateway::ledger::Posting;
use wager_gateway::service::{PlaceBetRequest, ResolveAction, RoundEngine};

fn usd() -> Currency {
    let Ok(c) = Currency::parse("USD") else {
        panic!("USD is a valid code");
    };
    c
}

fn engine(outcome: Decimal) -> RoundEngine {
    engine_with(Arc::new(FixedOutcome(outcome)))
}

fn engine_with(generator: Arc<dyn OutcomeGenerator>) -> RoundEngine {
    build_engine_with(&EngineConfig::default(), generator)
}

async fn funded(engine: &RoundEngine, amount: Decimal) -> UserId {
    let user = UserId::new();
    let deposit = Posting::new(user, usd(), amount, OperationType::Deposit, format!("dep-{user}"));
    let Ok(_) = engine.ledger().credit(deposit).await else {
        panic!("deposit failed");
    };
    user
}

async fn open(engine: &RoundEngine) -> Round {
    assert_ok!(engine.open_round().await)
}

async fn bet(engine: &RoundEngine, round: &Round, user: UserId, amount: Decimal, key: &str) -> Bet {
    let request = PlaceBetRequest {
        user_id: user,
        currency: usd(),
        amount,
        client_tx_id: key.to_string(),
        auto_cashout: None,
    };
    match engine.place_bet(round.id, request).await {
        Ok(bet) => bet,
        Err(e) => panic!("bet failed: {e}"),
    }
}

async fn start(engine: &RoundEngine, round: &Round) {
    let started = assert_ok!(engine.start_round(round.id).await);
    assert_eq!(started.status, RoundStatus::InProgress);
}

/// Advances until the live value reaches `target`.
async fn rise_to(engine: &RoundEngine, round: &Round, target: Decimal) {
    loop {
        let Ok(snapshot) = engine.advance(round.id).await else {
            panic!("advance failed");
        };
        assert_eq!(snapshot.status, RoundStatus::InProgress);
        if snapshot.current_value >= target {
            return;
        }
    }
}

/// Releases a bet's reservation under an unrelated key, so the engine's
/// own settlement of that bet fails.
async fn drain_reservation(engine: &RoundEngine, bet: &Bet) {
    let release = Posting::new(
        bet.user_id,
        usd(),
        bet.amount,
        OperationType::BetCanceled,
        format!("drain-{}", bet.id),
    );
    assert_ok!(engine.ledger().release(release).await);
}

/// Puts a drained reservation back so a refund can release it.
async fn restore_reservation(engine: &RoundEngine, bet: &Bet) {
    let reserve = Posting::new(
        bet.user_id,
        usd(),
        bet.amount,
        OperationType::PlaceBet,
        format!("restore-{}", bet.id),
    );
    assert_ok!(engine.ledger().reserve(reserve).await);
}

async fn stored_bet(engine: &RoundEngine, bet: &Bet) -> Bet {
    let Ok(found) = engine.store().bet(bet.id).await else {
        panic!("bet {} not stored", bet.id);
    };
    found
}

#[tokio::test]
async fn scenario_a_stake_is_reserved() {
    let engine = engine(dec!(2));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;

    let placed = bet(&engine, &round, user, dec!(10), "a1").await;
    assert_eq!(placed.status, BetStatus::Placed);

    let account = engine.ledger().get_balance(user, &usd()).await;
    assert_eq!(account.amount, dec!(100));
    assert_eq!(account.reserved, dec!(10));
    assert_eq!(account.available, dec!(90));
}

#[tokio::test]
async fn scenario_b_uncashed_bet_loses_the_stake() {
    let engine = engine(dec!(2.00));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let placed = bet(&engine, &round, user, dec!(10), "a1").await;
    start(&engine, &round).await;

    let Ok(summary) = engine.close_round(round.id, None).await else {
        panic!("close failed");
    };
    assert_eq!(summary.round.status, RoundStatus::Closed);
    assert_eq!(summary.round.outcome, Some(dec!(2.00)));
    assert_eq!((summary.won, summary.lost, summary.failed), (0, 1, 0));

    assert_eq!(stored_bet(&engine, &placed).await.status, BetStatus::Lost);
    let account = engine.ledger().get_balance(user, &usd()).await;
    assert_eq!(account.amount, dec!(90));
    assert_eq!(account.reserved, Decimal::ZERO);
    assert_eq!(account.available, dec!(90));
}

#[tokio::test]
async fn scenario_c_cashout_credits_the_payout() {
    let engine = engine(dec!(2.00));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let placed = bet(&engine, &round, user, dec!(10), "a1").await;
    start(&engine, &round).await;
    rise_to(&engine, &round, dec!(1.5)).await;

    let action = ResolveAction::CashOut {
        bet_id: None,
        multiplier: Some(dec!(1.5)),
    };
    let Ok(settlement) = engine.resolve(round.id, user, action).await else {
        panic!("cash-out failed");
    };
    assert_eq!(settlement.payout, dec!(15.0));
    assert_eq!(settlement.bet.status, BetStatus::Won);
    assert_eq!(settlement.entry.change_amount, dec!(15.0));
    assert_eq!(settlement.entry.operation_type, OperationType::BetCashout);

    let Ok(summary) = engine.close_round(round.id, None).await else {
        panic!("close failed");
    };
    assert_eq!((summary.won, summary.lost), (0, 0));
    assert_eq!(stored_bet(&engine, &placed).await.payout, Some(dec!(15.0)));

    let account = engine.ledger().get_balance(user, &usd()).await;
    assert_eq!(account.amount, dec!(105));
    assert_eq!(account.reserved, Decimal::ZERO);
}

#[tokio::test]
async fn scenario_d_second_manual_refund_is_a_no_op() {
    let engine = engine(dec!(2));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let placed = bet(&engine, &round, user, dec!(10), "a1").await;
    start(&engine, &round).await;

    drain_reservation(&engine, &placed).await;
    let Ok(summary) = engine.close_round(round.id, None).await else {
        panic!("close failed");
    };
    assert_eq!(summary.failed, 1);
    restore_reservation(&engine, &placed).await;

    let admin = AdminId::new();
    let Ok(first) = engine.failures().manual_refund(round.id, user, admin).await else {
        panic!("first refund failed");
    };
    let Ok(second) = engine.failures().manual_refund(round.id, user, admin).await else {
        panic!("second refund failed");
    };
    assert!(first.iter().all(|r| !r.already_refunded));
    assert!(second.iter().all(|r| r.already_refunded));

    let refunds = engine
        .ledger()
        .transaction_entries(&placed.transaction_id())
        .await
        .into_iter()
        .filter(|e| e.operation_type == OperationType::Refund)
        .count();
    assert_eq!(refunds, 1);

    let account = engine.ledger().get_balance(user, &usd()).await;
    assert_eq!(account.amount, dec!(100));
    assert_eq!(account.reserved, Decimal::ZERO);
    assert_eq!(stored_bet(&engine, &placed).await.status, BetStatus::Refunded);
}

#[tokio::test]
async fn repeated_client_tx_id_returns_the_first_bet() {
    let engine = engine(dec!(2));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;

    let first = bet(&engine, &round, user, dec!(10), "same-key").await;
    let second = bet(&engine, &round, user, dec!(10), "same-key").await;
    assert_eq!(first.id, second.id);

    let Ok(bets) = engine.round_bets(round.id).await else {
        panic!("round vanished");
    };
    assert_eq!(bets.len(), 1);
    assert_eq!(
        engine
            .ledger()
            .transaction_entries(&first.transaction_id())
            .await
            .len(),
        1
    );
    assert_eq!(engine.ledger().get_balance(user, &usd()).await.reserved, dec!(10));
}

#[tokio::test]
async fn retried_bet_after_start_and_close_returns_the_original() {
    let engine = engine(dec!(2));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let first = bet(&engine, &round, user, dec!(10), "late-retry").await;
    start(&engine, &round).await;

    let retried = bet(&engine, &round, user, dec!(10), "late-retry").await;
    assert_eq!(retried.id, first.id);
    assert_eq!(retried.status, BetStatus::Placed);

    let changed = PlaceBetRequest {
        user_id: user,
        currency: usd(),
        amount: dec!(11),
        client_tx_id: "late-retry".to_string(),
        auto_cashout: None,
    };
    assert!(matches!(
        engine.place_bet(round.id, changed.clone()).await,
        Err(EngineError::DuplicateBet(id)) if id == first.id
    ));
    let fresh = PlaceBetRequest {
        client_tx_id: "new-key".to_string(),
        amount: dec!(10),
        ..changed.clone()
    };
    assert!(matches!(
        engine.place_bet(round.id, fresh.clone()).await,
        Err(EngineError::RoundNotOpen { .. })
    ));

    assert_ok!(engine.close_round(round.id, None).await);
    let after_close = bet(&engine, &round, user, dec!(10), "late-retry").await;
    assert_eq!(after_close.id, first.id);
    assert_eq!(after_close.status, BetStatus::Lost);
    assert!(matches!(
        engine.place_bet(round.id, changed).await,
        Err(EngineError::DuplicateBet(id)) if id == first.id
    ));
    assert!(matches!(
        engine.place_bet(round.id, fresh).await,
        Err(EngineError::RoundNotOpen { .. })
    ));

    let placements = engine
        .ledger()
        .transaction_entries(&first.transaction_id())
        .await
        .into_iter()
        .filter(|e| e.operation_type == OperationType::PlaceBet)
        .count();
    assert_eq!(placements, 1);
    assert_eq!(engine.ledger().get_balance(user, &usd()).await.amount, dec!(90));
}

#[tokio::test]
async fn suspension_mid_round_still_settles_open_bets() {
    let engine = engine(dec!(2));
    let loser = funded(&engine, dec!(100)).await;
    let winner = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let lost_bet = bet(&engine, &round, loser, dec!(10), "l").await;
    let won_bet = bet(&engine, &round, winner, dec!(10), "w").await;
    start(&engine, &round).await;
    rise_to(&engine, &round, dec!(1.5)).await;

    engine.ledger().set_suspended(loser, &usd(), true).await;
    engine.ledger().set_suspended(winner, &usd(), true).await;

    let action = ResolveAction::CashOut {
        bet_id: None,
        multiplier: Some(dec!(1.5)),
    };
    let Ok(settlement) = engine.resolve(round.id, winner, action).await else {
        panic!("cash-out of a suspended account failed");
    };
    assert_eq!(settlement.payout, dec!(15.0));

    let Ok(summary) = engine.close_round(round.id, None).await else {
        panic!("close failed");
    };
    assert_eq!((summary.lost, summary.failed), (1, 0));
    assert_eq!(stored_bet(&engine, &lost_bet).await.status, BetStatus::Lost);
    assert_eq!(stored_bet(&engine, &won_bet).await.status, BetStatus::Won);
    assert!(engine.failures().get(lost_bet.id).await.is_none());
    assert_eq!(engine.failures().pending_count().await, 0);

    let lost = engine.ledger().get_balance(loser, &usd()).await;
    assert_eq!((lost.amount, lost.reserved), (dec!(90), Decimal::ZERO));
    let won = engine.ledger().get_balance(winner, &usd()).await;
    assert_eq!((won.amount, won.reserved), (dec!(105), Decimal::ZERO));

    // New exposure stays blocked.
    let next = open(&engine).await;
    let request = PlaceBetRequest {
        user_id: loser,
        currency: usd(),
        amount: dec!(10),
        client_tx_id: "after-suspension".to_string(),
        auto_cashout: None,
    };
    assert!(matches!(
        engine.place_bet(next.id, request).await,
        Err(EngineError::AccountSuspended(_))
    ));
}

#[tokio::test]
async fn concurrent_bets_reserve_exactly_their_stakes() {
    let engine = engine(dec!(2));
    let round = open(&engine).await;

    let mut users = Vec::new();
    for _ in 0..25 {
        users.push(funded(&engine, dec!(50)).await);
    }

    let mut tasks = Vec::new();
    for (i, user) in users.iter().copied().enumerate() {
        let engine = engine.clone();
        let round_id = round.id;
        let amount = Decimal::from(i + 1);
        tasks.push(tokio::spawn(async move {
            let request = PlaceBetRequest {
                user_id: user,
                currency: usd(),
                amount,
                client_tx_id: format!("tx-{i}"),
                auto_cashout: None,
            };
            engine.place_bet(round_id, request).await.map(|b| b.amount)
        }));
    }

    let mut staked = Decimal::ZERO;
    for task in tasks {
        let Ok(Ok(amount)) = task.await else {
            panic!("concurrent bet failed");
        };
        staked += amount;
    }

    let mut reserved = Decimal::ZERO;
    for user in &users {
        reserved += engine.ledger().get_balance(*user, &usd()).await.reserved;
    }
    assert_eq!(staked, dec!(325));
    assert_eq!(reserved, staked);
}

#[tokio::test]
async fn cashouts_racing_the_close_settle_exactly_once() {
    let engine = engine(dec!(3));
    let round = open(&engine).await;

    let mut bets = Vec::new();
    for i in 0..12 {
        let user = funded(&engine, dec!(100)).await;
        bets.push(bet(&engine, &round, user, dec!(10), &format!("race-{i}")).await);
    }
    start(&engine, &round).await;
    rise_to(&engine, &round, dec!(1.2)).await;

    let mut tasks = Vec::new();
    for placed in &bets {
        let engine = engine.clone();
        let (round_id, user) = (round.id, placed.user_id);
        tasks.push(tokio::spawn(async move {
            let action = ResolveAction::CashOut {
                bet_id: None,
                multiplier: None,
            };
            engine.resolve(round_id, user, action).await
        }));
    }
    let closer = {
        let engine = engine.clone();
        let round_id = round.id;
        tokio::spawn(async move { engine.close_round(round_id, None).await })
    };

    let mut cashed = 0;
    for task in tasks {
        match task.await {
            Ok(Ok(settlement)) => {
                assert_eq!(settlement.bet.status, BetStatus::Won);
                cashed += 1;
            }
            Ok(Err(EngineError::RoundAlreadyClosed(_))) => {}
            Ok(Err(e)) => panic!("unexpected cash-out error: {e}"),
            Err(e) => panic!("cash-out task failed: {e}"),
        }
    }
    let Ok(Ok(summary)) = closer.await else {
        panic!("close failed");
    };
    assert_eq!(summary.won + summary.lost + cashed, bets.len());
    assert_eq!(summary.failed, 0);

    for placed in &bets {
        let entries = engine
            .ledger()
            .transaction_entries(&placed.transaction_id())
            .await;
        let credited = entries
            .iter()
            .any(|e| e.operation_type == OperationType::BetCashout);
        let lost = entries
            .iter()
            .any(|e| e.operation_type == OperationType::BetLost);
        assert!(credited != lost, "bet {} settled twice or never", placed.id);

        let status = stored_bet(&engine, placed).await.status;
        assert!(matches!(status, BetStatus::Won | BetStatus::Lost));
        assert_eq!(
            engine
                .ledger()
                .get_balance(placed.user_id, &usd())
                .await
                .reserved,
            Decimal::ZERO
        );
    }
}

#[tokio::test]
async fn canceled_round_returns_every_stake_once() {
    let engine = engine(dec!(2));
    let round = open(&engine).await;
    let mut bets = Vec::new();
    for i in 0..3 {
        let user = funded(&engine, dec!(40)).await;
        bets.push(bet(&engine, &round, user, dec!(15), &format!("c{i}")).await);
    }

    let Ok(summary) = engine.cancel_round(round.id, "operator drill").await else {
        panic!("cancel failed");
    };
    assert_eq!((summary.refunded, summary.failed), (3, 0));
    assert!(matches!(
        engine.cancel_round(round.id, "again").await,
        Err(EngineError::RoundAlreadyClosed(_))
    ));

    for placed in &bets {
        let account = engine.ledger().get_balance(placed.user_id, &usd()).await;
        assert_eq!(account.amount, dec!(40));
        assert_eq!(account.available, dec!(40));
        let releases = engine
            .ledger()
            .transaction_entries(&placed.transaction_id())
            .await
            .into_iter()
            .filter(|e| e.operation_type == OperationType::BetCanceled)
            .count();
        assert_eq!(releases, 1);
        assert_eq!(stored_bet(&engine, placed).await.status, BetStatus::Canceled);
    }
}

#[tokio::test]
async fn one_failed_settlement_does_not_stop_the_rest() {
    let engine = engine(dec!(2));
    let blocked = funded(&engine, dec!(100)).await;
    let healthy = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let blocked_bet = bet(&engine, &round, blocked, dec!(10), "b").await;
    let healthy_bet = bet(&engine, &round, healthy, dec!(10), "h").await;
    start(&engine, &round).await;

    drain_reservation(&engine, &blocked_bet).await;
    let Ok(summary) = engine.close_round(round.id, None).await else {
        panic!("close failed");
    };
    assert_eq!((summary.lost, summary.failed), (1, 1));

    assert_eq!(stored_bet(&engine, &healthy_bet).await.status, BetStatus::Lost);
    let Some(failed) = engine.failures().get(blocked_bet.id).await else {
        panic!("failed bet not recorded");
    };
    assert_eq!(failed.amount, dec!(10));
    assert_eq!(engine.failures().pending_count().await, 1);
}

#[derive(Debug)]
struct BrokenGenerator;

impl OutcomeGenerator for BrokenGenerator {
    fn generate(&self, _seed: &RoundSeed) -> Result<Decimal, OutcomeError> {
        Err(OutcomeError::Unavailable("entropy source down".to_string()))
    }
}

#[tokio::test]
async fn generator_failure_cancels_and_releases() {
    let engine = engine_with(Arc::new(BrokenGenerator));
    let user = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let placed = bet(&engine, &round, user, dec!(25), "g").await;

    assert!(matches!(
        engine.start_round(round.id).await,
        Err(EngineError::Outcome(_))
    ));
    let Ok(after) = engine.get_round(round.id).await else {
        panic!("round vanished");
    };
    assert_eq!(after.status, RoundStatus::Canceled);
    assert_eq!(stored_bet(&engine, &placed).await.status, BetStatus::Canceled);

    let account = engine.ledger().get_balance(user, &usd()).await;
    assert_eq!(account.reserved, Decimal::ZERO);
    assert_eq!(account.available, dec!(100));
}

#[tokio::test]
async fn bets_after_start_are_rejected() {
    let engine = engine(dec!(2));
    let early = funded(&engine, dec!(100)).await;
    let late = funded(&engine, dec!(100)).await;
    let round = open(&engine).await;
    let _ = bet(&engine, &round, early, dec!(10), "e").await;
    start(&engine, &round).await;

    let request = PlaceBetRequest {
        user_id: late,
        currency: usd(),
        amount: dec!(10),
        client_tx_id: "l".to_string(),
        auto_cashout: None,
    };
    assert!(matches!(
        engine.place_bet(round.id, request).await,
        Err(EngineError::RoundNotOpen { .. })
    ));
    assert_eq!(engine.ledger().get_balance(late, &usd()).await.reserved, Decimal::ZERO);
}
