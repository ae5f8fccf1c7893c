//! Raffle administration endpoints.

use crate::error::AppError;
use crate::extractors::ApiJson;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use rifa_core::store::Store;
use rifa_core::types::{Raffle, RaffleId};
use rifa_runtime::{NewRaffle, Page, PageRequest};
use serde::Serialize;

/// `POST /api/v1/raffles`: create a `pending` raffle and its tickets.
///
/// # Errors
///
/// 422 for an invalid definition or unknown lottery.
pub async fn create<S: Store>(
    State(state): State<AppState<S>>,
    ApiJson(new): ApiJson<NewRaffle>,
) -> Result<(StatusCode, Json<Raffle>), AppError> {
    let raffle = state.raffles.create(new).await?;
    Ok((StatusCode::CREATED, Json(raffle)))
}

/// `GET /api/v1/raffles?page=&per_page=`: raffles, newest first.
///
/// # Errors
///
/// 400 for a malformed query, 422 for an out-of-range page.
pub async fn list<S: Store>(
    State(state): State<AppState<S>>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<Raffle>>, AppError> {
    let Query(page) = page.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(state.raffles.list(page).await?))
}

/// `GET /api/v1/raffles/:raffle_id`
///
/// # Errors
///
/// 404 if the raffle does not exist.
pub async fn get<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(state.raffles.get(raffle_id).await?))
}

/// `POST /api/v1/raffles/:raffle_id/activate`
///
/// # Errors
///
/// 404 if missing, 409 unless the raffle is `pending`.
pub async fn activate<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(state.raffles.activate(raffle_id).await?))
}

/// `POST /api/v1/raffles/:raffle_id/cancel`
///
/// # Errors
///
/// 404 if missing, 409 once the raffle is closed or cancelled.
pub async fn cancel<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(state.raffles.cancel(raffle_id).await?))
}

/// Result of a provisioning call.
#[derive(Debug, Serialize)]
pub struct Provisioned {
    /// Tickets created by this call
    pub inserted: u32,
}

/// `POST /api/v1/raffles/:raffle_id/provision`: top up missing tickets.
///
/// # Errors
///
/// 404 if missing, 409 once the raffle is closed or cancelled.
pub async fn provision<S: Store>(
    State(state): State<AppState<S>>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Provisioned>, AppError> {
    let inserted = state.raffles.provision_tickets(raffle_id).await?;
    Ok(Json(Provisioned { inserted }))
}
