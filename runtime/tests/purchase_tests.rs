//! Purchase coordinator behaviour under contention and retries.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::future::join_all;
use rifa_core::payment::ChargeOutcome;
use rifa_core::types::{
    IdempotencyKey, LedgerState, Money, RaffleId, RaffleState, TicketState, UserId,
};
use rifa_runtime::{PurchaseConfig, PurchaseCoordinator, PurchaseError, PurchaseRequest};
use rifa_testing::fixtures::RaffleFixture;
use rifa_testing::{test_clock, InMemoryStore, MockPaymentGateway};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(
    store: &InMemoryStore,
    gateway: &MockPaymentGateway,
) -> Arc<PurchaseCoordinator<InMemoryStore>> {
    Arc::new(PurchaseCoordinator::new(
        store.clone(),
        Arc::new(gateway.clone()),
        Arc::new(test_clock()),
        PurchaseConfig::default(),
    ))
}

fn request(raffle_id: RaffleId, user_id: UserId, quantity: u32, key: &str) -> PurchaseRequest {
    PurchaseRequest {
        raffle_id,
        user_id,
        quantity,
        idempotency_key: IdempotencyKey::parse(key).unwrap(),
    }
}

#[tokio::test]
async fn buys_lowest_numbered_tickets_and_records_ledger_entry() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    let raffle = RaffleFixture::active(10, 1).seed(&store).await;
    let user = UserId::new();

    let receipt = coordinator(&store, &gateway)
        .purchase(request(raffle.id, user, 3, "order-1"))
        .await
        .unwrap();

    assert_eq!(receipt.status, LedgerState::Succeeded);
    let numbers: Vec<u32> = receipt.tickets.iter().map(|t| t.sequence).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(receipt
        .tickets
        .iter()
        .all(|t| t.state == TicketState::Sold && t.owner == Some(user)));

    let entries = store.ledger_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, receipt.ledger_entry_id);
    assert_eq!(entries[0].amount, Money::from_minor(3_000));
    assert_eq!(entries[0].state, LedgerState::Succeeded);
    assert_eq!(store.count_tickets(raffle.id, TicketState::Available).await, 7);
}

#[tokio::test]
async fn two_buyers_race_for_the_last_two_tickets() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    let raffle = RaffleFixture::active(10, 1).seed(&store).await;
    let coordinator = coordinator(&store, &gateway);

    coordinator
        .purchase(request(raffle.id, UserId::new(), 8, "first-eight"))
        .await
        .unwrap();

    let a = tokio::spawn({
        let c = Arc::clone(&coordinator);
        async move { c.purchase(request(raffle.id, UserId::new(), 2, "a")).await }
    });
    let b = tokio::spawn({
        let c = Arc::clone(&coordinator);
        async move { c.purchase(request(raffle.id, UserId::new(), 2, "b")).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let won: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(won.len(), 1);
    let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        *lost,
        PurchaseError::InsufficientInventory {
            requested: 2,
            available: 0
        }
    );
    assert_eq!(store.count_tickets(raffle.id, TicketState::Sold).await, 10);
}

#[tokio::test]
async fn concurrent_buyers_never_oversell() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    let raffle = RaffleFixture::active(50, 1).seed(&store).await;
    let coordinator = coordinator(&store, &gateway);

    let attempts = (0..30u32).map(|i| {
        let c = Arc::clone(&coordinator);
        let quantity = i % 4 + 1;
        tokio::spawn(async move {
            c.purchase(request(raffle.id, UserId::new(), quantity, &format!("buyer-{i}")))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let sold_by_receipts: usize = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|receipt| receipt.tickets.len())
        .sum();
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(failure, PurchaseError::InsufficientInventory { .. }));
    }

    let tickets = store.tickets(raffle.id).await;
    let sold: Vec<_> = tickets
        .iter()
        .filter(|t| t.state == TicketState::Sold)
        .collect();
    assert!(sold.len() <= 50);
    assert_eq!(sold.len(), sold_by_receipts);

    let unique: HashSet<_> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .flat_map(|receipt| receipt.tickets.iter().map(|t| t.id))
        .collect();
    assert_eq!(unique.len(), sold_by_receipts);
}

#[tokio::test]
async fn concurrent_retries_with_one_key_make_one_purchase() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    gateway.set_latency(Duration::from_millis(5));
    let raffle = RaffleFixture::active(10, 1).seed(&store).await;
    let coordinator = coordinator(&store, &gateway);
    let user = UserId::new();

    let calls = (0..8).map(|_| {
        let c = Arc::clone(&coordinator);
        tokio::spawn(async move { c.purchase(request(raffle.id, user, 2, "same-key")).await })
    });
    let receipts: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let first = &receipts[0];
    assert!(receipts.iter().all(|r| r == first));
    assert_eq!(first.tickets.len(), 2);
    assert_eq!(store.ledger_entries().await.len(), 1);
    assert_eq!(gateway.distinct_charges(), 1);
    assert_eq!(store.count_tickets(raffle.id, TicketState::Sold).await, 2);
}

#[tokio::test]
async fn declined_charge_is_replayed_as_declined() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    gateway.set_default_outcome(ChargeOutcome::Failed {
        reason: "card_declined".to_string(),
    });
    let raffle = RaffleFixture::active(10, 1).seed(&store).await;
    let coordinator = coordinator(&store, &gateway);
    let user = UserId::new();

    for _ in 0..2 {
        let err = coordinator
            .purchase(request(raffle.id, user, 3, "declined"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PurchaseError::PaymentDeclined {
                reason: "card_declined".to_string()
            }
        );
    }

    assert_eq!(gateway.distinct_charges(), 1);
    assert_eq!(store.count_tickets(raffle.id, TicketState::Available).await, 10);
    let entries = store.ledger_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, LedgerState::Failed);
}

#[tokio::test]
async fn purchases_are_refused_outside_active_state() {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    let coordinator = coordinator(&store, &gateway);

    for state in [RaffleState::Pending, RaffleState::Closed, RaffleState::Cancelled] {
        let raffle = RaffleFixture::with_state(5, 1, state).seed(&store).await;
        let err = coordinator
            .purchase(request(raffle.id, UserId::new(), 1, &format!("k-{state}")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PurchaseError::RaffleNotActive {
                raffle_id: raffle.id,
                state
            }
        );
    }
    assert!(gateway.charge_requests().is_empty());
}
