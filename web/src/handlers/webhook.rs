//! Payment provider webhook.
//!
//! ```text
//! POST /api/v1/webhooks/stripe
//! Stripe-Signature: t=<unix>,v1=<hex>
//! ```
//!
//! The raw body is handed to the processor untouched; the signature covers
//! the exact bytes.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rifa_core::store::Store;
use rifa_core::webhook::SignatureError;
use rifa_runtime::{WebhookError, WebhookOutcome};

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Verify and apply one provider event.
///
/// Answers 409 when no ledger entry carries the event's charge reference,
/// so the provider redelivers it after the purchase commits.
///
/// # Errors
///
/// 400 for a missing or invalid signature; nothing is written then.
pub async fn stripe<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookOutcome>), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(WebhookError::Signature(SignatureError::Missing))?
        .to_str()
        .map_err(|e| WebhookError::Signature(SignatureError::Malformed(e.to_string())))?;

    let outcome = state.webhooks.handle(&body, signature).await?;
    let status = match outcome {
        WebhookOutcome::UnknownCharge { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}
