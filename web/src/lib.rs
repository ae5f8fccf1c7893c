//! Axum HTTP surface for the rifa engine.
//!
//! Handlers translate requests into calls on the runtime components held
//! in [`AppState`] and map their errors through [`AppError`]. No business
//! rule lives here beyond request shape and caller checks.
//!
//! # Routes
//!
//! | method | path | handler |
//! |--------|------|---------|
//! | GET  | `/health` | liveness |
//! | GET  | `/health/ready` | store readiness |
//! | POST | `/api/v1/raffles` | create |
//! | GET  | `/api/v1/raffles?page=&per_page=` | list, newest first |
//! | GET  | `/api/v1/raffles/:raffle_id` | fetch |
//! | POST | `/api/v1/raffles/:raffle_id/activate` | `pending` → `active` |
//! | POST | `/api/v1/raffles/:raffle_id/cancel` | → `cancelled` |
//! | POST | `/api/v1/raffles/:raffle_id/provision` | top up tickets |
//! | POST | `/api/v1/raffles/:raffle_id/tickets` | purchase |
//! | POST | `/api/v1/raffles/:raffle_id/close` | close now |
//! | POST | `/api/v1/raffles/:raffle_id/recalculate` | reselect winners |
//! | GET  | `/api/v1/tickets?page=&per_page=` | caller's tickets |
//! | POST | `/api/v1/payouts` | pay unpaid winners |
//! | POST | `/api/v1/settlement/reconcile` | reconciliation sweep |
//! | POST | `/api/v1/webhooks/stripe` | provider events |
//!
//! # Example
//!
//! ```
//! use rifa_runtime::{PurchaseConfig, SettlementConfig};
//! use rifa_testing::{test_clock, InMemoryStore, MockPaymentGateway, MockResultsProvider};
//! use rifa_web::{router, AppState};
//! use std::sync::Arc;
//!
//! let state = AppState::new(
//!     InMemoryStore::new(),
//!     MockPaymentGateway::shared(),
//!     Arc::new(MockResultsProvider::new()),
//!     Arc::new(test_clock()),
//!     PurchaseConfig::default(),
//!     SettlementConfig::default(),
//! );
//! let app: axum::Router = router(state);
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use extractors::{ApiJson, Caller, ClientIp, CorrelationId, USER_ID_HEADER};
pub use middleware::CORRELATION_ID_HEADER;
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{health, purchase, raffles, settlement, tickets, webhook};
use rifa_core::store::Store;
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn router<S: Store>(state: AppState<S>) -> Router {
    let api = Router::new()
        .route("/raffles", post(raffles::create::<S>).get(raffles::list::<S>))
        .route("/raffles/:raffle_id", get(raffles::get::<S>))
        .route("/raffles/:raffle_id/activate", post(raffles::activate::<S>))
        .route("/raffles/:raffle_id/cancel", post(raffles::cancel::<S>))
        .route("/raffles/:raffle_id/provision", post(raffles::provision::<S>))
        .route("/raffles/:raffle_id/tickets", post(purchase::purchase::<S>))
        .route("/raffles/:raffle_id/close", post(settlement::close::<S>))
        .route(
            "/raffles/:raffle_id/recalculate",
            post(settlement::recalculate::<S>),
        )
        .route("/tickets", get(tickets::mine::<S>))
        .route("/payouts", post(settlement::payouts::<S>))
        .route("/settlement/reconcile", post(settlement::reconcile::<S>))
        .route("/webhooks/stripe", post(webhook::stripe::<S>));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness::<S>))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::correlation_id))
        .with_state(state)
}
