//! Payment provider capability.
//!
//! The purchase coordinator and the settlement worker talk to the external
//! processor only through [`PaymentGateway`]. Concrete providers (the mock in
//! `rifa-testing`, the Stripe-style HTTP client in `rifa-server`) are chosen at
//! startup and shared as `Arc<dyn PaymentGateway>`.

use crate::types::{IdempotencyKey, Money, RaffleId, UserId, WinnerId};
use crate::webhook::SignatureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by gateway calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider rejected the charge. Terminal for this attempt.
    #[error("Payment declined: {reason}")]
    Declined {
        /// Decline reason
        reason: String,
    },

    /// The provider could not be reached or answered with a server error.
    #[error("Payment provider unavailable: {reason}")]
    Unavailable {
        /// Failure detail
        reason: String,
    },

    /// The provider did not answer in time.
    #[error("Payment provider timed out")]
    Timeout,

    /// The request was malformed (bad amount, unknown charge).
    #[error("Invalid payment request: {reason}")]
    InvalidRequest {
        /// Failure detail
        reason: String,
    },
}

impl GatewayError {
    /// Whether the same request may succeed if retried with the same key.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

/// Provider-side identifier of a charge or payout.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderRef(String);

impl ProviderRef {
    /// Wrap a provider identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to a charge on the provider side.
///
/// Lets the provider dedupe its own retries and lets operators trace a charge
/// back to the raffle without our database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    /// Raffle being purchased
    pub raffle_id: RaffleId,
    /// Buyer
    pub user_id: UserId,
    /// Number of tickets
    pub quantity: u32,
    /// Purchase idempotency key
    pub idempotency_key: IdempotencyKey,
}

/// A request to create a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Total amount
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Provider-side metadata
    pub metadata: ChargeMetadata,
}

/// Result of confirming a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Funds captured
    Succeeded,
    /// Accepted; the final outcome arrives by webhook
    Processing,
    /// Rejected
    Failed {
        /// Failure reason
        reason: String,
    },
}

/// A request to pay a prize to a winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    /// Winner being paid
    pub winner_id: WinnerId,
    /// Recipient
    pub user_id: UserId,
    /// Prize amount
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// `payout:<winner id>`
    pub idempotency_key: IdempotencyKey,
}

/// A verified inbound provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// A charge settled successfully
    ChargeSucceeded {
        /// Provider charge id
        provider_ref: String,
    },
    /// A charge failed after being accepted
    ChargeFailed {
        /// Provider charge id
        provider_ref: String,
        /// Failure reason if the provider gave one
        reason: Option<String>,
    },
    /// A well-formed event this system does not act on
    Ignored {
        /// Provider event type
        event_type: String,
    },
}

/// Payment gateway trait
///
/// Abstraction over the external payment processor.
pub trait PaymentGateway: Send + Sync {
    /// Provider name recorded on ledger entries.
    fn provider_name(&self) -> &str;

    /// Create a charge for the amount. Must be idempotent on
    /// `metadata.idempotency_key`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider rejects or cannot be reached.
    fn create_charge(&self, request: ChargeRequest) -> GatewayFuture<'_, ProviderRef>;

    /// Confirm a previously created charge.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider cannot be reached.
    fn confirm_charge(&self, charge: &ProviderRef) -> GatewayFuture<'_, ChargeOutcome>;

    /// Pay a prize. Must be idempotent on `request.idempotency_key`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider rejects or cannot be reached.
    fn execute_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, ProviderRef>;

    /// Verify the signature of an inbound webhook and parse its event.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] if the signature is missing, stale or
    /// wrong, or the payload is not a provider event.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentEvent, SignatureError>;
}
