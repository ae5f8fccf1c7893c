//! Error types for web handlers.
//!
//! [`AppError`] is the single error type handlers return. The `From`
//! conversions below fix how each engine error surfaces over HTTP.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use rifa_core::store::StoreError;
use rifa_runtime::retry::Retryable;
use rifa_runtime::{PurchaseError, RaffleError, SettlementError, WebhookError};
use serde::Serialize;
use std::fmt;

/// Seconds a client is told to wait before retrying a 503.
const RETRY_AFTER_SECS: u32 = 2;

/// Application error type for web handlers.
///
/// Carries the HTTP status, a machine-readable code and a user-facing
/// message. The optional source is logged for server errors and never
/// sent to the client.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    retry_after: Option<u32>,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            retry_after: None,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// 403 Forbidden.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// 422 Unprocessable Entity.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// 502 Bad Gateway, for upstream providers answering nonsense.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message, "UPSTREAM_ERROR")
    }

    /// 503 Service Unavailable with a `Retry-After` hint.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        let mut error = Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE");
        error.retry_after = Some(RETRY_AFTER_SECS);
        error
    }

    /// Replace the machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            retryable: self.retry_after.is_some(),
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            Self::unavailable("Storage is temporarily unavailable").with_source(err)
        } else {
            Self::internal("An internal error occurred").with_source(err)
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        let code = err.code();
        match err {
            PurchaseError::RaffleNotFound(id) => Self::not_found("Raffle", id).with_code(code),
            PurchaseError::ProviderUnavailable { .. } => {
                Self::unavailable(err.to_string()).with_code(code)
            }
            PurchaseError::Store(store) => Self::from(store),
            PurchaseError::Validation(_)
            | PurchaseError::RaffleNotActive { .. }
            | PurchaseError::InsufficientInventory { .. }
            | PurchaseError::PaymentDeclined { .. } => {
                Self::bad_request(err.to_string()).with_code(code)
            }
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::RaffleNotFound(id) => Self::not_found("Raffle", id),
            SettlementError::WinnerNotFound(id) => Self::not_found("Winner", id),
            SettlementError::InvalidState { .. } => {
                Self::bad_request(err.to_string()).with_code("INVALID_STATE")
            }
            SettlementError::NotEnoughSoldTickets { .. } => {
                Self::bad_request(err.to_string()).with_code("NOT_ENOUGH_SOLD_TICKETS")
            }
            SettlementError::ResultsNotAvailable { .. } => {
                Self::conflict(err.to_string()).with_code("RESULTS_NOT_AVAILABLE")
            }
            SettlementError::PayoutsAlreadyIssued { .. } => {
                Self::conflict(err.to_string()).with_code("PAYOUTS_ALREADY_ISSUED")
            }
            SettlementError::Store(store) => Self::from(store),
            SettlementError::Results(_) | SettlementError::Gateway(_) if err.is_retryable() => {
                Self::unavailable(err.to_string())
            }
            SettlementError::Results(_) | SettlementError::Gateway(_) => {
                Self::bad_gateway(err.to_string())
            }
            SettlementError::AmountOverflow | SettlementError::PayoutKeyTaken(_) => {
                Self::internal("An internal error occurred").with_source(err)
            }
        }
    }
}

impl From<RaffleError> for AppError {
    fn from(err: RaffleError) -> Self {
        match err {
            RaffleError::NotFound(id) => Self::not_found("Raffle", id),
            RaffleError::Validation(_) => Self::validation(err.to_string()),
            RaffleError::InvalidPage(_) => {
                Self::validation(err.to_string()).with_code("INVALID_PAGE")
            }
            RaffleError::UnknownLottery(_) => {
                Self::validation(err.to_string()).with_code("UNKNOWN_LOTTERY")
            }
            RaffleError::InvalidTransition { .. } => {
                Self::conflict(err.to_string()).with_code("INVALID_TRANSITION")
            }
            RaffleError::Results(results) if results.is_retryable() => {
                Self::unavailable(results.to_string())
            }
            RaffleError::Results(results) => Self::bad_gateway(results.to_string()),
            RaffleError::Store(store) => Self::from(store),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Signature(signature) => {
                Self::bad_request(signature.to_string()).with_code("INVALID_SIGNATURE")
            }
            WebhookError::Store(store) => Self::from(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rifa_core::types::{RaffleId, RaffleState};
    use rifa_core::webhook::SignatureError;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Raffle", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] Raffle with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn purchase_errors_map_to_client_codes() {
        let inventory = AppError::from(PurchaseError::InsufficientInventory {
            requested: 3,
            available: 1,
        });
        assert_eq!(inventory.status(), StatusCode::BAD_REQUEST);
        assert_eq!(inventory.code(), "INSUFFICIENT_INVENTORY");

        let inactive = AppError::from(PurchaseError::RaffleNotActive {
            raffle_id: RaffleId::new(),
            state: RaffleState::Closed,
        });
        assert_eq!(inactive.status(), StatusCode::BAD_REQUEST);

        let missing = AppError::from(PurchaseError::RaffleNotFound(RaffleId::new()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let store = AppError::from(PurchaseError::Store(StoreError::Database("boom".into())));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_errors_split_between_500_and_503() {
        for err in [
            StoreError::Database("null value in column".into()),
            StoreError::Corrupt("bad state".into()),
            StoreError::IllegalTransition {
                kind: "ticket",
                from: "voided",
                to: "sold",
            },
        ] {
            let app = AppError::from(err);
            assert_eq!(app.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(app.retry_after.is_none());
        }

        for err in [
            StoreError::Unavailable("pool timed out".into()),
            StoreError::Conflict("could not serialize access".into()),
        ] {
            let app = AppError::from(err);
            assert_eq!(app.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert!(app.retry_after.is_some());
        }
    }

    #[test]
    fn provider_outage_is_a_retryable_503() {
        let err = AppError::from(PurchaseError::ProviderUnavailable {
            reason: "timeout".to_string(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = err.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(RETRY_AFTER_SECS))
        );
    }

    #[test]
    fn settlement_state_errors_are_bad_requests() {
        let err = AppError::from(SettlementError::InvalidState {
            raffle_id: RaffleId::new(),
            expected: RaffleState::Active,
            actual: RaffleState::Closed,
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn bad_signatures_are_rejected_with_400() {
        let err = AppError::from(WebhookError::Signature(SignatureError::Mismatch));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }
}
