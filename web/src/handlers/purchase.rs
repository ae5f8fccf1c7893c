//! Ticket purchase endpoint.
//!
//! ```text
//! POST /api/v1/raffles/:raffle_id/tickets
//! X-User-Id: <uuid>
//!
//! {"raffle_id": "...", "user_id": "...", "quantity": 3, "idempotency_key": "order-1"}
//! ```
//!
//! Every attempt is recorded as structured audit events on the
//! `rifa::audit` target.

use crate::error::AppError;
use crate::extractors::{ApiJson, Caller, ClientIp};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rifa_core::store::Store;
use rifa_core::types::{
    IdempotencyKey, LedgerEntryId, LedgerState, RaffleId, Ticket, TicketId, TicketState, UserId,
};
use rifa_runtime::{PurchaseReceipt, PurchaseRequest};
use serde::{Deserialize, Serialize};

/// Purchase request body.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseBody {
    /// Must match the path
    pub raffle_id: RaffleId,
    /// Must match the caller
    pub user_id: UserId,
    /// Tickets to buy
    pub quantity: u32,
    /// Client-chosen retry key
    pub idempotency_key: IdempotencyKey,
}

/// A purchased ticket.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    /// Ticket id
    pub id: TicketId,
    /// Ticket number
    pub sequence_number: u32,
    /// Ticket state
    pub state: TicketState,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            sequence_number: ticket.sequence,
            state: ticket.state,
        }
    }
}

/// Purchase response body.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseResponse {
    /// Ledger entry recording the charge
    pub ledger_entry_id: LedgerEntryId,
    /// `succeeded`, or `pending` while the provider confirms
    pub status: LedgerState,
    /// Tickets bought, by number
    pub tickets: Vec<TicketView>,
}

impl From<PurchaseReceipt> for PurchaseResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            ledger_entry_id: receipt.ledger_entry_id,
            status: receipt.status,
            tickets: receipt.tickets.into_iter().map(TicketView::from).collect(),
        }
    }
}

/// Buy tickets.
///
/// Answers 200 once paid, or 202 while the provider is still confirming.
/// A retry with the same idempotency key returns the same body.
///
/// # Errors
///
/// - 400 if the body's raffle differs from the path, or the purchase is
///   refused (inactive raffle, sold out, declined)
/// - 401/403 if the caller is unknown or buys for someone else
/// - 404 if the raffle does not exist
/// - 503 if the payment provider is unavailable; retry with the same key
pub async fn purchase<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
    Caller(caller): Caller,
    ClientIp(ip): ClientIp,
    ApiJson(body): ApiJson<PurchaseBody>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    if body.raffle_id != raffle_id {
        return Err(AppError::bad_request("Raffle ID mismatch"));
    }
    if body.user_id != caller {
        return Err(AppError::forbidden("Cannot purchase for other users"));
    }

    tracing::info!(
        target: "rifa::audit",
        event = "purchase_attempt",
        user_id = %caller,
        raffle_id = %raffle_id,
        quantity = body.quantity,
        idempotency_key = %body.idempotency_key,
        ip_address = %ip,
    );

    let request = PurchaseRequest {
        raffle_id,
        user_id: caller,
        quantity: body.quantity,
        idempotency_key: body.idempotency_key,
    };

    match state.purchases.purchase(request).await {
        Ok(receipt) => {
            tracing::info!(
                target: "rifa::audit",
                event = "purchase_succeeded",
                user_id = %caller,
                raffle_id = %raffle_id,
                ledger_entry_id = %receipt.ledger_entry_id,
                status = %receipt.status,
                ticket_count = receipt.tickets.len(),
            );
            let status = if receipt.status == LedgerState::Pending {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(receipt.into())))
        }
        Err(error) => {
            tracing::warn!(
                target: "rifa::audit",
                event = "purchase_failed",
                user_id = %caller,
                raffle_id = %raffle_id,
                quantity = body.quantity,
                code = error.code(),
                error = %error,
            );
            Err(error.into())
        }
    }
}
