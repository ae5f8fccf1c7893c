//! # rifa runtime
//!
//! Orchestration for the raffle engine. Everything here is written against
//! the traits in `rifa-core`, so the same code runs over PostgreSQL in
//! production and over the in-memory store in tests.
//!
//! ## Components
//!
//! - [`PurchaseCoordinator`]: reserve, charge and commit ticket purchases
//!   exactly once per idempotency key
//! - [`SettlementWorker`]: close due raffles against lottery results, record
//!   winners and pay them
//! - [`WebhookProcessor`]: settle charges the provider confirmed late
//! - [`RaffleService`]: create raffles, provision tickets, activate, cancel
//! - [`Scheduler`]: run the settlement jobs periodically with retries
//!
//! ## Example
//!
//! ```
//! use rifa_runtime::{PurchaseConfig, PurchaseCoordinator, PurchaseRequest};
//! use rifa_core::types::{IdempotencyKey, UserId};
//! use rifa_testing::{fixtures::RaffleFixture, test_clock, InMemoryStore, MockPaymentGateway};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! let raffle = RaffleFixture::active(10, 1).seed(&store).await;
//!
//! let coordinator = PurchaseCoordinator::new(
//!     store.clone(),
//!     MockPaymentGateway::shared(),
//!     Arc::new(test_clock()),
//!     PurchaseConfig::default(),
//! );
//!
//! let receipt = coordinator
//!     .purchase(PurchaseRequest {
//!         raffle_id: raffle.id,
//!         user_id: UserId::new(),
//!         quantity: 3,
//!         idempotency_key: IdempotencyKey::parse("order-1").unwrap(),
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(receipt.tickets.len(), 3);
//! # });
//! ```

/// Circuit breaker around the payment provider
pub mod circuit_breaker;

/// Component settings
pub mod config;

/// Ticket purchase orchestration
pub mod coordinator;

/// Error taxonomy of the orchestration layer
pub mod error;

/// Metric names and recorders
pub mod metrics;

pub mod prize;

/// Raffle creation and lifecycle
pub mod raffles;

/// Retry logic with exponential backoff
pub mod retry;

/// Periodic settlement jobs
pub mod scheduler;

/// Winner selection and payouts
pub mod settlement;

/// Late payment confirmations
pub mod webhook;

pub use circuit_breaker::{BreakerConfig, GuardedGateway};
pub use config::{PurchaseConfig, SettlementConfig};
pub use coordinator::{PurchaseCoordinator, PurchaseReceipt, PurchaseRequest};
pub use error::{PurchaseError, RaffleError, SettlementError, WebhookError};
pub use raffles::{NewRaffle, Page, PageRequest, RaffleService};
pub use retry::{retry, RetryPolicy, Retryable};
pub use scheduler::{Job, Scheduler};
pub use settlement::{PayoutReport, ReconcileReport, SettlementWorker, SweepReport};
pub use webhook::{WebhookOutcome, WebhookProcessor};
