//! Settlement worker.
//!
//! Closes raffles against published lottery results, records winners and
//! pays them. Every operation is safe to run concurrently with itself:
//!
//! - results are fetched before any unit of work is opened, so a slow
//!   provider never holds a row lock
//! - closing re-reads the raffle under an exclusive lock and only proceeds
//!   from `active`; a raffle closed by a concurrent run is reported, not
//!   closed twice
//! - winner rows are unique per ticket and existing rows are skipped
//! - only tickets whose charge has succeeded are candidates; a charge still
//!   pending at close time cannot win
//! - each payout runs in its own unit of work that re-checks `paid_at` under
//!   an exclusive lock before calling the provider

use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::metrics::SettlementMetrics;
use crate::prize::{prize_amount, select_winners};
use chrono::{DateTime, Utc};
use rifa_core::environment::Clock;
use rifa_core::payment::{PaymentGateway, PayoutRequest};
use rifa_core::results::{ResultSet, ResultsProvider};
use rifa_core::store::{
    InventoryStore, LedgerStore, RaffleStore, RowLock, Store, StoreError, UnitOfWork,
    WinnerStore,
};
use rifa_core::types::{
    IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerKind, LedgerState, Raffle, RaffleId,
    RaffleState, TicketState, Winner, WinnerId,
};
use serde::Serialize;
use std::sync::Arc;

/// What happened to one raffle during a sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Raffles closed by this run
    pub closed: Vec<RaffleId>,
    /// Raffles left active because results were not published yet
    pub awaiting_results: Vec<RaffleId>,
    /// Raffles that failed; the sweep continued past them
    pub failures: Vec<(RaffleId, SettlementError)>,
}

/// Result of probing one raffle during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileEntry {
    /// Raffle probed
    pub raffle_id: RaffleId,
    /// Whether the draw has been published
    pub results_available: bool,
    /// Whether this run closed the raffle
    pub closed: bool,
}

/// Reconciliation sweep report.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Per-raffle outcome
    pub entries: Vec<ReconcileEntry>,
    /// Raffles that failed; the sweep continued past them
    pub failures: Vec<(RaffleId, SettlementError)>,
}

/// Payout pass report.
#[derive(Debug, Default)]
pub struct PayoutReport {
    /// Winners paid by this run
    pub paid: Vec<WinnerId>,
    /// Winners found already paid when re-checked
    pub already_paid: Vec<WinnerId>,
    /// Winners whose payout failed; they stay unpaid for the next run
    pub failures: Vec<(WinnerId, SettlementError)>,
}

/// How a close attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This call closed the raffle
    Closed(Vec<Winner>),
    /// A concurrent run closed it first
    AlreadyClosed,
}

enum PayoutOutcome {
    Paid,
    AlreadyPaid,
}

/// Background settlement of raffles.
pub struct SettlementWorker<S: Store> {
    store: S,
    results: Arc<dyn ResultsProvider>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
}

impl<S: Store> SettlementWorker<S> {
    /// Creates a settlement worker
    #[must_use]
    pub fn new(
        store: S,
        results: Arc<dyn ResultsProvider>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            results,
            gateway,
            clock,
            config,
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Close every active raffle whose sales window has ended.
    ///
    /// Failures are collected per raffle.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] only if the due raffles cannot be
    /// listed.
    #[tracing::instrument(skip(self))]
    pub async fn close_due_raffles(&self) -> Result<SweepReport, SettlementError> {
        let now = self.clock.now();
        let due = self.active_raffles_ending_before(now).await?;
        let mut report = SweepReport::default();

        for raffle in due {
            match self.close(raffle.id, false).await {
                Ok(CloseOutcome::Closed(_)) => report.closed.push(raffle.id),
                Ok(CloseOutcome::AlreadyClosed) => {}
                Err(SettlementError::ResultsNotAvailable { date }) => {
                    tracing::info!(raffle_id = %raffle.id, %date, "Results not published yet");
                    SettlementMetrics::skipped();
                    report.awaiting_results.push(raffle.id);
                }
                Err(error) => {
                    tracing::warn!(raffle_id = %raffle.id, error = %error, "Raffle settlement failed");
                    SettlementMetrics::error();
                    report.failures.push((raffle.id, error));
                }
            }
        }

        tracing::info!(
            closed = report.closed.len(),
            awaiting_results = report.awaiting_results.len(),
            failures = report.failures.len(),
            "Closing sweep finished"
        );
        Ok(report)
    }

    /// Close one raffle on operator request.
    ///
    /// Requires the raffle to be `active` with at least `winner_count` paid-for
    /// tickets and published results. Returns the winners recorded.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::RaffleNotFound`]
    /// - [`SettlementError::InvalidState`] unless the raffle is `active`
    /// - [`SettlementError::NotEnoughSoldTickets`]; the raffle stays `active`
    /// - [`SettlementError::ResultsNotAvailable`]; the raffle stays `active`
    #[tracing::instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn close_raffle(&self, raffle_id: RaffleId) -> Result<Vec<Winner>, SettlementError> {
        match self.close(raffle_id, true).await? {
            CloseOutcome::Closed(winners) => Ok(winners),
            CloseOutcome::AlreadyClosed => Err(SettlementError::InvalidState {
                raffle_id,
                expected: RaffleState::Active,
                actual: RaffleState::Closed,
            }),
        }
    }

    /// Re-run winner selection for a `closed` raffle.
    ///
    /// Deletes its winner rows, returns their tickets to `sold` and selects
    /// again from the current results. Refused once any winner was paid.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::RaffleNotFound`]
    /// - [`SettlementError::InvalidState`] unless the raffle is `closed`
    /// - [`SettlementError::ResultsNotAvailable`]
    /// - [`SettlementError::PayoutsAlreadyIssued`]
    #[tracing::instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn recalculate(&self, raffle_id: RaffleId) -> Result<Vec<Winner>, SettlementError> {
        let raffle = self.load_raffle(raffle_id).await?;
        require_state(&raffle, RaffleState::Closed)?;

        let results = self.fetch_results(&raffle).await?;

        let mut uow = self.store.begin().await?;
        let raffle = uow
            .raffle(raffle_id, RowLock::Update)
            .await?
            .ok_or(SettlementError::RaffleNotFound(raffle_id))?;
        require_state(&raffle, RaffleState::Closed)?;

        let previous = uow.winners_for_raffle(raffle_id).await?;
        let paid = previous.iter().filter(|w| w.is_paid()).count();
        if paid > 0 {
            return Err(SettlementError::PayoutsAlreadyIssued { raffle_id, paid });
        }

        let freed = uow.delete_winners(raffle_id).await?;
        uow.set_ticket_states(&freed, TicketState::Winner, TicketState::Sold)
            .await?;

        let winners = self.record_winners(&mut uow, &raffle, &results).await?;
        uow.commit().await?;

        tracing::info!(
            removed = freed.len(),
            winners = winners.len(),
            "Raffle recalculated"
        );
        Ok(winners)
    }

    /// Probe results for active raffles ending within the look-ahead window
    /// and close those whose sales window has ended once results exist.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] only if the raffles cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, SettlementError> {
        let now = self.clock.now();
        let lookahead = chrono::Duration::from_std(self.config.reconcile_lookahead)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let candidates = self.active_raffles_ending_before(now + lookahead).await?;
        let mut report = ReconcileReport::default();

        for raffle in candidates {
            let available = match self
                .results
                .get_results(raffle.draw_date(), &raffle.lottery_id)
                .await
            {
                Ok(results) => results.is_some(),
                Err(error) => {
                    tracing::warn!(raffle_id = %raffle.id, error = %error, "Results lookup failed");
                    report.failures.push((raffle.id, error.into()));
                    continue;
                }
            };

            let mut closed = false;
            if available && raffle.is_due(now) {
                match self.close(raffle.id, false).await {
                    Ok(CloseOutcome::Closed(_)) => closed = true,
                    Ok(CloseOutcome::AlreadyClosed) => {}
                    Err(error) => {
                        tracing::warn!(raffle_id = %raffle.id, error = %error, "Reconciliation close failed");
                        SettlementMetrics::error();
                        report.failures.push((raffle.id, error));
                    }
                }
            }

            report.entries.push(ReconcileEntry {
                raffle_id: raffle.id,
                results_available: available,
                closed,
            });
        }

        Ok(report)
    }

    /// Pay every unpaid winner, optionally only those of one raffle.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Store`] only if the unpaid winners cannot be
    /// listed. Per-winner failures are collected in the report.
    #[tracing::instrument(skip(self))]
    pub async fn process_payouts(
        &self,
        raffle_id: Option<RaffleId>,
    ) -> Result<PayoutReport, SettlementError> {
        let unpaid = {
            let mut uow = self.store.begin().await?;
            let unpaid = uow.unpaid_winners(raffle_id).await?;
            uow.rollback().await?;
            unpaid
        };

        let mut report = PayoutReport::default();
        for winner in unpaid {
            match self.pay_winner(winner.id).await {
                Ok(PayoutOutcome::Paid) => {
                    SettlementMetrics::paid();
                    report.paid.push(winner.id);
                }
                Ok(PayoutOutcome::AlreadyPaid) => report.already_paid.push(winner.id),
                Err(error) => {
                    tracing::warn!(winner_id = %winner.id, error = %error, "Payout failed");
                    SettlementMetrics::payout_error();
                    report.failures.push((winner.id, error));
                }
            }
        }

        tracing::info!(
            paid = report.paid.len(),
            already_paid = report.already_paid.len(),
            failures = report.failures.len(),
            "Payout pass finished"
        );
        Ok(report)
    }

    async fn pay_winner(&self, winner_id: WinnerId) -> Result<PayoutOutcome, SettlementError> {
        let mut uow = self.store.begin().await?;
        let winner = uow
            .winner(winner_id, RowLock::Update)
            .await?
            .ok_or(SettlementError::WinnerNotFound(winner_id))?;
        if winner.is_paid() {
            uow.rollback().await?;
            return Ok(PayoutOutcome::AlreadyPaid);
        }

        let owner = uow
            .ticket(winner.ticket_id)
            .await?
            .and_then(|ticket| ticket.owner)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("winning ticket {} has no owner", winner.ticket_id))
            })?;

        let key = IdempotencyKey::for_payout(winner.id);
        if uow.ledger_by_key(&key).await?.is_some() {
            return Err(SettlementError::PayoutKeyTaken(winner.id));
        }
        let payout = self
            .gateway
            .execute_payout(PayoutRequest {
                winner_id: winner.id,
                user_id: owner,
                amount: winner.amount,
                currency: self.config.currency.clone(),
                idempotency_key: key.clone(),
            })
            .await?;

        let now = self.clock.now();
        if !uow.mark_winner_paid(winner.id, now, payout.as_str()).await? {
            uow.rollback().await?;
            return Ok(PayoutOutcome::AlreadyPaid);
        }
        let recorded = uow
            .insert_ledger_entry(&LedgerEntry {
                id: LedgerEntryId::new(),
                kind: LedgerKind::Payout,
                user_id: owner,
                amount: winner.amount,
                currency: self.config.currency.clone(),
                provider: self.gateway.provider_name().to_string(),
                provider_ref: Some(payout.as_str().to_string()),
                idempotency_key: key,
                state: LedgerState::Succeeded,
                failure_reason: None,
                created_at: now,
            })
            .await?;
        if !recorded {
            return Err(SettlementError::PayoutKeyTaken(winner.id));
        }
        uow.commit().await?;

        tracing::info!(winner_id = %winner.id, payout = %payout, amount = winner.amount.minor_units(), "Winner paid");
        Ok(PayoutOutcome::Paid)
    }

    /// Close one raffle. `strict` reports a non-active raffle as an error
    /// instead of skipping it.
    async fn close(&self, raffle_id: RaffleId, strict: bool) -> Result<CloseOutcome, SettlementError> {
        let raffle = self.load_raffle(raffle_id).await?;
        if raffle.state != RaffleState::Active {
            if !strict && raffle.state == RaffleState::Closed {
                return Ok(CloseOutcome::AlreadyClosed);
            }
            return Err(SettlementError::InvalidState {
                raffle_id,
                expected: RaffleState::Active,
                actual: raffle.state,
            });
        }
        self.require_paid_tickets(&raffle).await?;

        let results = self.fetch_results(&raffle).await?;

        let mut uow = self.store.begin().await?;
        let raffle = uow
            .raffle(raffle_id, RowLock::Update)
            .await?
            .ok_or(SettlementError::RaffleNotFound(raffle_id))?;
        match raffle.state {
            RaffleState::Active => {}
            RaffleState::Closed if !strict => {
                uow.rollback().await?;
                return Ok(CloseOutcome::AlreadyClosed);
            }
            actual => {
                return Err(SettlementError::InvalidState {
                    raffle_id,
                    expected: RaffleState::Active,
                    actual,
                });
            }
        }

        let paid = uow.paid_tickets(raffle_id).await?.len() as u64;
        if paid < u64::from(raffle.winner_count) {
            return Err(SettlementError::NotEnoughSoldTickets {
                sold: paid,
                required: raffle.winner_count,
            });
        }

        self.record_winners(&mut uow, &raffle, &results).await?;
        if !uow
            .set_raffle_state(raffle_id, RaffleState::Active, RaffleState::Closed)
            .await?
        {
            return Err(SettlementError::Store(StoreError::Database(format!(
                "raffle {raffle_id} changed state while locked"
            ))));
        }
        let winners = uow.winners_for_raffle(raffle_id).await?;
        uow.commit().await?;

        SettlementMetrics::closed(winners.len());
        tracing::info!(raffle_id = %raffle_id, winners = winners.len(), "Raffle closed");
        Ok(CloseOutcome::Closed(winners))
    }

    /// Select winners among paid-for tickets and record the ones not already
    /// recorded. Returns every winner of the raffle afterwards.
    async fn record_winners(
        &self,
        uow: &mut S::UnitOfWork,
        raffle: &Raffle,
        results: &ResultSet,
    ) -> Result<Vec<Winner>, SettlementError> {
        let paid = uow.paid_tickets(raffle.id).await?;
        if paid.len() < raffle.winner_count as usize {
            tracing::warn!(
                raffle_id = %raffle.id,
                paid = paid.len(),
                "Fewer paid-for tickets than winner slots"
            );
        }
        let selections = select_winners(&paid, results, raffle.winner_count, self.config.number_width);

        let candidate_ids: Vec<_> = selections.iter().map(|s| s.ticket_id).collect();
        let existing = uow.existing_winner_tickets(&candidate_ids).await?;
        let now = self.clock.now();

        for selection in selections {
            if existing.contains(&selection.ticket_id) {
                tracing::debug!(ticket_id = %selection.ticket_id, "Winner already recorded, skipping");
                continue;
            }
            let amount = prize_amount(raffle.total_tickets, raffle.unit_price(), &selection.tier)
                .ok_or(SettlementError::AmountOverflow)?;
            let winner = Winner {
                id: WinnerId::new(),
                raffle_id: raffle.id,
                ticket_id: selection.ticket_id,
                prize_tier: selection.tier,
                amount,
                paid_at: None,
                payout_ref: None,
                created_at: now,
            };
            if uow.insert_winner(&winner).await? {
                uow.set_ticket_states(&[winner.ticket_id], TicketState::Sold, TicketState::Winner)
                    .await?;
            }
        }

        Ok(uow.winners_for_raffle(raffle.id).await?)
    }

    async fn load_raffle(&self, raffle_id: RaffleId) -> Result<Raffle, SettlementError> {
        let mut uow = self.store.begin().await?;
        let raffle = uow.raffle(raffle_id, RowLock::None).await?;
        uow.rollback().await?;
        raffle.ok_or(SettlementError::RaffleNotFound(raffle_id))
    }

    async fn require_paid_tickets(&self, raffle: &Raffle) -> Result<(), SettlementError> {
        let mut uow = self.store.begin().await?;
        let paid = uow.paid_tickets(raffle.id).await?.len() as u64;
        uow.rollback().await?;
        if paid < u64::from(raffle.winner_count) {
            return Err(SettlementError::NotEnoughSoldTickets {
                sold: paid,
                required: raffle.winner_count,
            });
        }
        Ok(())
    }

    async fn active_raffles_ending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Raffle>, SettlementError> {
        let mut uow = self.store.begin().await?;
        let raffles = uow.active_raffles_ending_before(cutoff).await?;
        uow.rollback().await?;
        Ok(raffles)
    }

    async fn fetch_results(&self, raffle: &Raffle) -> Result<ResultSet, SettlementError> {
        let date = raffle.draw_date();
        self.results
            .get_results(date, &raffle.lottery_id)
            .await?
            .ok_or(SettlementError::ResultsNotAvailable { date })
    }
}

fn require_state(raffle: &Raffle, expected: RaffleState) -> Result<(), SettlementError> {
    if raffle.state == expected {
        Ok(())
    } else {
        Err(SettlementError::InvalidState {
            raffle_id: raffle.id,
            expected,
            actual: raffle.state,
        })
    }
}
