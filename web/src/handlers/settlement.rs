//! Operator settlement endpoints.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use rifa_core::store::Store;
use rifa_core::types::{RaffleId, TicketId, Winner, WinnerId};
use rifa_runtime::settlement::ReconcileEntry;
use serde::{Deserialize, Serialize};

/// Winners selected for a raffle.
#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    /// Raffle settled
    pub raffle_id: RaffleId,
    /// Winning tickets, ordered by ticket sequence number
    pub winners: Vec<TicketId>,
}

impl SettlementResponse {
    fn new(raffle_id: RaffleId, winners: &[Winner]) -> Self {
        Self {
            raffle_id,
            winners: winners.iter().map(|w| w.ticket_id).collect(),
        }
    }
}

/// `POST /api/v1/raffles/:raffle_id/close`: close an `active` raffle now.
///
/// # Errors
///
/// - 404 if the raffle does not exist
/// - 400 unless it is `active` with at least `winner_count` sold tickets
/// - 409 while the draw has not been published
pub async fn close<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<SettlementResponse>, AppError> {
    let winners = state.settlement.close_raffle(raffle_id).await?;
    Ok(Json(SettlementResponse::new(raffle_id, &winners)))
}

/// `POST /api/v1/raffles/:raffle_id/recalculate`: reselect winners of a
/// `closed` raffle from the current results.
///
/// # Errors
///
/// - 404 if the raffle does not exist
/// - 400 unless it is `closed`
/// - 409 once a winner has been paid
pub async fn recalculate<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<SettlementResponse>, AppError> {
    let winners = state.settlement.recalculate(raffle_id).await?;
    Ok(Json(SettlementResponse::new(raffle_id, &winners)))
}

/// Optional payout filter.
#[derive(Debug, Default, Deserialize)]
pub struct PayoutQuery {
    /// Only pay winners of this raffle
    pub raffle_id: Option<RaffleId>,
}

/// One failed payout.
#[derive(Debug, Serialize)]
pub struct PayoutFailure {
    /// Winner left unpaid
    pub winner_id: WinnerId,
    /// Why
    pub error: String,
}

/// Payout pass summary.
#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    /// Paid by this call
    pub paid: Vec<WinnerId>,
    /// Found already paid
    pub already_paid: Vec<WinnerId>,
    /// Left unpaid for the next pass
    pub failures: Vec<PayoutFailure>,
}

/// `POST /api/v1/payouts[?raffle_id=...]`: pay unpaid winners.
///
/// # Errors
///
/// 503/500 only if the unpaid winners cannot be listed; per-winner
/// failures are reported in the body.
pub async fn payouts<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<PayoutQuery>,
) -> Result<Json<PayoutResponse>, AppError> {
    let report = state.settlement.process_payouts(query.raffle_id).await?;
    Ok(Json(PayoutResponse {
        paid: report.paid,
        already_paid: report.already_paid,
        failures: report
            .failures
            .into_iter()
            .map(|(winner_id, error)| PayoutFailure {
                winner_id,
                error: error.to_string(),
            })
            .collect(),
    }))
}

/// Reconciliation summary.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// Per-raffle outcome
    pub entries: Vec<ReconcileEntry>,
    /// Raffles whose probe failed, with the reason
    pub failures: Vec<(RaffleId, String)>,
}

/// `POST /api/v1/settlement/reconcile`: run one reconciliation sweep.
///
/// # Errors
///
/// 503/500 only if the candidate raffles cannot be listed.
pub async fn reconcile<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let report = state.settlement.reconcile().await?;
    Ok(Json(ReconcileResponse {
        entries: report.entries,
        failures: report
            .failures
            .into_iter()
            .map(|(raffle_id, error)| (raffle_id, error.to_string()))
            .collect(),
    }))
}
