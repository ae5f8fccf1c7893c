//! The caller's tickets.
//!
//! ```text
//! GET /api/v1/tickets?page=1&per_page=20
//! X-User-Id: <uuid>
//! ```

use crate::error::AppError;
use crate::extractors::Caller;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::{DateTime, Utc};
use rifa_core::store::Store;
use rifa_core::types::{RaffleId, Ticket, TicketId, TicketState};
use rifa_runtime::{Page, PageRequest};
use serde::Serialize;

/// A ticket owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OwnedTicket {
    /// Ticket id
    pub id: TicketId,
    /// Raffle the ticket belongs to
    pub raffle_id: RaffleId,
    /// Ticket number
    pub sequence_number: u32,
    /// Ticket state
    pub state: TicketState,
    /// When it was bought
    pub purchased_at: Option<DateTime<Utc>>,
}

impl From<Ticket> for OwnedTicket {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            raffle_id: ticket.raffle_id,
            sequence_number: ticket.sequence,
            state: ticket.state,
            purchased_at: ticket.purchased_at,
        }
    }
}

/// `GET /api/v1/tickets`: tickets the caller owns, most recent purchase
/// first.
///
/// # Errors
///
/// 401 without a caller, 400 for a malformed query, 422 for an
/// out-of-range page.
pub async fn mine<S: Store>(
    State(state): State<AppState<S>>,
    Caller(caller): Caller,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<OwnedTicket>>, AppError> {
    let Query(page) = page.map_err(|e| AppError::bad_request(e.body_text()))?;
    let tickets = state.raffles.tickets_for_owner(caller, page).await?;
    Ok(Json(Page {
        items: tickets.items.into_iter().map(OwnedTicket::from).collect(),
        page: tickets.page,
        per_page: tickets.per_page,
        total: tickets.total,
    }))
}
