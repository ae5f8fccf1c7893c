//! Settlement worker: closing, recalculation, reconciliation and payouts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use rifa_core::environment::Clock;
use rifa_core::payment::{ChargeOutcome, GatewayError};
use rifa_core::store::{InventoryStore, LedgerStore, Store, UnitOfWork, WinnerStore};
use rifa_core::types::{
    IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerKind, LedgerState, Money, Raffle,
    RaffleState, TicketState, UserId, Winner, WinnerId,
};
use rifa_runtime::{
    PurchaseConfig, PurchaseCoordinator, PurchaseReceipt, PurchaseRequest, SettlementConfig,
    SettlementError, SettlementWorker, WebhookOutcome, WebhookProcessor,
};
use rifa_testing::fixtures::RaffleFixture;
use rifa_testing::{test_clock, InMemoryStore, MockPaymentGateway, MockResultsProvider};
use std::sync::Arc;

struct World {
    store: InMemoryStore,
    gateway: MockPaymentGateway,
    results: MockResultsProvider,
    worker: SettlementWorker<InMemoryStore>,
}

fn world() -> World {
    let store = InMemoryStore::new();
    let gateway = MockPaymentGateway::new();
    let results = MockResultsProvider::new();
    let worker = SettlementWorker::new(
        store.clone(),
        Arc::new(results.clone()),
        Arc::new(gateway.clone()),
        Arc::new(test_clock()),
        SettlementConfig::default(),
    );
    World {
        store,
        gateway,
        results,
        worker,
    }
}

/// Sell `count` tickets, one buyer each.
async fn sell(w: &World, raffle: &Raffle, count: u32) {
    let coordinator = PurchaseCoordinator::new(
        w.store.clone(),
        Arc::new(w.gateway.clone()),
        Arc::new(test_clock()),
        PurchaseConfig::default(),
    );
    for n in 0..count {
        coordinator
            .purchase(PurchaseRequest {
                raffle_id: raffle.id,
                user_id: UserId::new(),
                quantity: 1,
                idempotency_key: IdempotencyKey::parse(&format!("{}-{n}", raffle.id)).unwrap(),
            })
            .await
            .unwrap();
    }
}

/// One purchase of `quantity` tickets whose charge stays `processing`.
/// Returns the provider reference the webhook will name.
async fn buy_pending(w: &World, raffle: &Raffle, quantity: u32) -> (PurchaseReceipt, String) {
    w.gateway.set_default_outcome(ChargeOutcome::Processing);
    let coordinator = PurchaseCoordinator::new(
        w.store.clone(),
        Arc::new(w.gateway.clone()),
        Arc::new(test_clock()),
        PurchaseConfig::default(),
    );
    let receipt = coordinator
        .purchase(PurchaseRequest {
            raffle_id: raffle.id,
            user_id: UserId::new(),
            quantity,
            idempotency_key: IdempotencyKey::parse(format!("{}-pending", raffle.id)).unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.status, LedgerState::Pending);
    w.gateway.set_default_outcome(ChargeOutcome::Succeeded);

    let provider_ref = w
        .store
        .ledger_entries()
        .await
        .into_iter()
        .find(|e| e.id == receipt.ledger_entry_id)
        .and_then(|e| e.provider_ref)
        .unwrap();
    (receipt, provider_ref)
}

async fn fail_charge(w: &World, provider_ref: &str) -> WebhookOutcome {
    let processor = WebhookProcessor::new(
        w.store.clone(),
        Arc::new(w.gateway.clone()),
        Arc::new(test_clock()),
    );
    let payload = serde_json::json!({
        "type": "payment_intent.payment_failed",
        "data": { "object": { "id": provider_ref } }
    })
    .to_string()
    .into_bytes();
    let signature = w.gateway.sign_webhook(&payload, test_clock().now());
    processor.handle(&payload, &signature).await.unwrap()
}

fn publish(w: &World, raffle: &Raffle, prizes: &[(&str, &str)]) {
    w.results
        .publish(raffle.draw_date(), raffle.lottery_id.as_str(), prizes);
}

#[tokio::test]
async fn sweep_closes_due_raffle_and_assigns_matching_ticket() {
    let w = world();
    let raffle = RaffleFixture::active(10, 1).seed(&w.store).await;
    sell(&w, &raffle, 10).await;
    publish(&w, &raffle, &[("Primer Premio", "00007")]);

    let report = w.worker.close_due_raffles().await.unwrap();
    assert_eq!(report.closed, vec![raffle.id]);
    assert!(report.failures.is_empty());

    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Closed));
    let winners = w.store.winners().await;
    assert_eq!(winners.len(), 1);
    // pot 10 x 1000, first prize takes half
    assert_eq!(winners[0].amount, Money::from_minor(5_000));
    assert_eq!(winners[0].prize_tier, "Primer Premio");

    let tickets = w.store.tickets(raffle.id).await;
    let winner_ticket = tickets.iter().find(|t| t.id == winners[0].ticket_id).unwrap();
    assert_eq!(winner_ticket.sequence, 7);
    assert_eq!(winner_ticket.state, TicketState::Winner);
}

#[tokio::test]
async fn too_few_sold_tickets_keeps_raffle_active() {
    let w = world();
    let raffle = RaffleFixture::active(10, 3).seed(&w.store).await;
    sell(&w, &raffle, 2).await;
    publish(&w, &raffle, &[("Primer Premio", "00001")]);

    let err = w.worker.close_raffle(raffle.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::NotEnoughSoldTickets {
            sold: 2,
            required: 3
        }
    ));

    let report = w.worker.close_due_raffles().await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Active));
    assert!(w.store.winners().await.is_empty());
}

#[tokio::test]
async fn missing_results_leave_raffle_for_the_next_sweep() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;

    let report = w.worker.close_due_raffles().await.unwrap();
    assert_eq!(report.awaiting_results, vec![raffle.id]);
    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Active));

    publish(&w, &raffle, &[("Primer Premio", "00003")]);
    let report = w.worker.close_due_raffles().await.unwrap();
    assert_eq!(report.closed, vec![raffle.id]);
}

#[tokio::test]
async fn repeated_sweeps_never_double_assign() {
    let w = world();
    let raffle = RaffleFixture::active(10, 1).seed(&w.store).await;
    sell(&w, &raffle, 10).await;
    publish(
        &w,
        &raffle,
        &[("Primer Premio", "00004"), ("Segundo Premio", "00009")],
    );

    let (a, b) = tokio::join!(w.worker.close_due_raffles(), w.worker.close_due_raffles());
    let closed = a.unwrap().closed.len() + b.unwrap().closed.len();
    assert_eq!(closed, 1);
    w.worker.close_due_raffles().await.unwrap();

    let winners = w.store.winners().await;
    assert_eq!(winners.len(), 2);
    assert_eq!(w.store.count_tickets(raffle.id, TicketState::Winner).await, 2);
}

#[tokio::test]
async fn raffles_not_yet_due_are_left_alone() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1)
        .ending_at(test_clock().now() + Duration::hours(2))
        .seed(&w.store)
        .await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00001")]);

    let report = w.worker.close_due_raffles().await.unwrap();
    assert!(report.closed.is_empty());

    // reconciliation sees the results but does not close early
    let report = w.worker.reconcile().await.unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(report.entries[0].results_available);
    assert!(!report.entries[0].closed);
    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Active));
}

#[tokio::test]
async fn reconcile_closes_due_raffles_once_results_exist() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;

    let report = w.worker.reconcile().await.unwrap();
    assert!(!report.entries[0].results_available);

    publish(&w, &raffle, &[("Primer Premio", "00002")]);
    let report = w.worker.reconcile().await.unwrap();
    assert!(report.entries[0].results_available);
    assert!(report.entries[0].closed);
}

#[tokio::test]
async fn close_requires_active_and_recalculate_requires_closed() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00002")]);

    let err = w.worker.recalculate(raffle.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidState {
            expected: RaffleState::Closed,
            actual: RaffleState::Active,
            ..
        }
    ));

    w.worker.close_raffle(raffle.id).await.unwrap();

    let err = w.worker.close_raffle(raffle.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidState {
            expected: RaffleState::Active,
            actual: RaffleState::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn recalculate_follows_corrected_results() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00002")]);
    w.worker.close_raffle(raffle.id).await.unwrap();

    publish(&w, &raffle, &[("Primer Premio", "00005")]);
    let winners = w.worker.recalculate(raffle.id).await.unwrap();
    assert_eq!(winners.len(), 1);

    let tickets = w.store.tickets(raffle.id).await;
    let by_sequence = |n: u32| tickets.iter().find(|t| t.sequence == n).unwrap();
    assert_eq!(by_sequence(2).state, TicketState::Sold);
    assert_eq!(by_sequence(5).state, TicketState::Winner);
    assert_eq!(winners[0].ticket_id, by_sequence(5).id);
}

#[tokio::test]
async fn recalculate_refuses_after_payout() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00002")]);
    w.worker.close_raffle(raffle.id).await.unwrap();
    w.worker.process_payouts(Some(raffle.id)).await.unwrap();

    let err = w.worker.recalculate(raffle.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::PayoutsAlreadyIssued { paid: 1, .. }
    ));
}

#[tokio::test]
async fn payouts_are_made_once() {
    let w = world();
    let raffle = RaffleFixture::active(10, 1).seed(&w.store).await;
    sell(&w, &raffle, 10).await;
    publish(&w, &raffle, &[("Primer Premio", "00001"), ("Segundo Premio", "00002")]);
    w.worker.close_raffle(raffle.id).await.unwrap();

    let (a, b) = tokio::join!(w.worker.process_payouts(None), w.worker.process_payouts(None));
    let paid = a.unwrap().paid.len() + b.unwrap().paid.len();
    assert_eq!(paid, 2);
    let again = w.worker.process_payouts(None).await.unwrap();
    assert!(again.paid.is_empty());

    assert_eq!(w.gateway.distinct_payouts(), 2);
    let winners = w.store.winners().await;
    assert!(winners.iter().all(|w| w.is_paid()));

    let payouts: Vec<_> = w
        .store
        .ledger_entries()
        .await
        .into_iter()
        .filter(|e| e.kind == LedgerKind::Payout)
        .collect();
    assert_eq!(payouts.len(), 2);
    assert!(payouts.iter().all(|e| e.state == LedgerState::Succeeded));
    let total: u64 = payouts.iter().map(|e| e.amount.minor_units()).sum();
    // 50% + 30% of a 10 000 pot
    assert_eq!(total, 8_000);
}

#[tokio::test]
async fn failed_payout_is_retried_on_the_next_pass() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00003")]);
    w.worker.close_raffle(raffle.id).await.unwrap();

    w.gateway.push_payout_error(GatewayError::Timeout);
    let first = w.worker.process_payouts(None).await.unwrap();
    assert!(first.paid.is_empty());
    assert_eq!(first.failures.len(), 1);
    assert!(!w.store.winners().await[0].is_paid());

    let second = w.worker.process_payouts(None).await.unwrap();
    assert_eq!(second.paid.len(), 1);
    assert!(w.store.winners().await[0].is_paid());
}

#[tokio::test]
async fn pending_charge_cannot_win_and_its_failure_pays_nothing() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 1).await;
    let (_, provider_ref) = buy_pending(&w, &raffle, 3).await;
    publish(&w, &raffle, &[("Primer Premio", "00002")]);

    // ticket 2 matches but its charge is still processing
    let winners = w.worker.close_raffle(raffle.id).await.unwrap();
    assert!(winners.is_empty());
    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Closed));

    let outcome = fail_charge(&w, &provider_ref).await;
    assert!(matches!(
        outcome,
        WebhookOutcome::Settled {
            state: LedgerState::Failed,
            ..
        }
    ));

    let report = w.worker.process_payouts(None).await.unwrap();
    assert!(report.paid.is_empty());
    assert_eq!(w.gateway.distinct_payouts(), 0);

    // the raffle no longer sells, so the released tickets are voided
    assert_eq!(w.store.count_tickets(raffle.id, TicketState::Voided).await, 3);
    assert_eq!(w.store.count_tickets(raffle.id, TicketState::Available).await, 1);
}

#[tokio::test]
async fn pending_tickets_do_not_count_towards_winner_slots() {
    let w = world();
    let raffle = RaffleFixture::active(5, 2).seed(&w.store).await;
    sell(&w, &raffle, 1).await;
    buy_pending(&w, &raffle, 2).await;
    publish(&w, &raffle, &[("Primer Premio", "00001")]);

    let err = w.worker.close_raffle(raffle.id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::NotEnoughSoldTickets {
            sold: 1,
            required: 2
        }
    ));
    assert_eq!(w.store.raffle_state(raffle.id).await, Some(RaffleState::Active));
}

#[tokio::test]
async fn failed_charge_removes_an_unpaid_winner_row() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 1).await;
    let (receipt, provider_ref) = buy_pending(&w, &raffle, 1).await;
    publish(&w, &raffle, &[("Primer Premio", "00001")]);
    w.worker.close_raffle(raffle.id).await.unwrap();

    // a winner row left on the unpaid ticket by an earlier selection
    let ticket_id = receipt.tickets[0].id;
    let mut uow = w.store.begin().await.unwrap();
    uow.insert_winner(&Winner {
        id: WinnerId::new(),
        raffle_id: raffle.id,
        ticket_id,
        prize_tier: "Segundo Premio".to_string(),
        amount: Money::from_minor(1_500),
        paid_at: None,
        payout_ref: None,
        created_at: test_clock().now(),
    })
    .await
    .unwrap();
    uow.set_ticket_states(&[ticket_id], TicketState::Sold, TicketState::Winner)
        .await
        .unwrap();
    uow.commit().await.unwrap();
    assert_eq!(w.store.winners().await.len(), 2);

    fail_charge(&w, &provider_ref).await;

    let winners = w.store.winners().await;
    assert_eq!(winners.len(), 1);
    assert_ne!(winners[0].ticket_id, ticket_id);
    let report = w.worker.process_payouts(None).await.unwrap();
    assert_eq!(report.paid.len(), 1);
    assert_eq!(w.gateway.distinct_payouts(), 1);
}

#[tokio::test]
async fn payout_refuses_a_key_held_by_another_entry() {
    let w = world();
    let raffle = RaffleFixture::active(5, 1).seed(&w.store).await;
    sell(&w, &raffle, 5).await;
    publish(&w, &raffle, &[("Primer Premio", "00003")]);
    let winners = w.worker.close_raffle(raffle.id).await.unwrap();
    let winner_id = winners[0].id;

    let mut uow = w.store.begin().await.unwrap();
    let squatter = LedgerEntry {
        id: LedgerEntryId::new(),
        kind: LedgerKind::Purchase,
        user_id: UserId::new(),
        amount: Money::from_minor(1_000),
        currency: "COP".to_string(),
        provider: "mock".to_string(),
        provider_ref: None,
        idempotency_key: IdempotencyKey::for_payout(winner_id),
        state: LedgerState::Succeeded,
        failure_reason: None,
        created_at: test_clock().now(),
    };
    assert!(uow.insert_ledger_entry(&squatter).await.unwrap());
    uow.commit().await.unwrap();

    let report = w.worker.process_payouts(None).await.unwrap();
    assert!(report.paid.is_empty());
    assert_eq!(
        report.failures,
        vec![(winner_id, SettlementError::PayoutKeyTaken(winner_id))]
    );
    assert!(!w.store.winners().await[0].is_paid());
    assert_eq!(w.gateway.distinct_payouts(), 0);
}
