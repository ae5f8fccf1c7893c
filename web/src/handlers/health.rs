//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to probe the service.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use rifa_core::store::{Store, UnitOfWork};
use serde::Serialize;

/// Liveness: the process is up. Does not touch dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `unavailable`
    pub status: &'static str,
    /// Store failure, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness: a unit of work can be opened against the store.
///
/// Returns 503 while the store is unreachable.
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness<S: Store>(State(state): State<AppState<S>>) -> (StatusCode, Json<Readiness>) {
    let probe = async {
        let uow = state.store.begin().await?;
        uow.rollback().await
    };

    match probe.await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                error: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(error = %error, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    error: Some(error.to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
