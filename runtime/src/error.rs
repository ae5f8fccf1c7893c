//! Error taxonomy of the purchase, settlement and webhook paths.

use crate::retry::Retryable;
use chrono::NaiveDate;
use rifa_core::payment::GatewayError;
use rifa_core::results::ResultsError;
use rifa_core::store::StoreError;
use rifa_core::types::{RaffleId, RaffleState, WinnerId};
use rifa_core::webhook::SignatureError;
use thiserror::Error;

/// Purchase failure reported to the caller.
///
/// `InsufficientInventory`, `RaffleNotActive` and `PaymentDeclined` are final
/// for the attempt. `ProviderUnavailable` may be retried with the same
/// idempotency key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    /// Malformed request, rejected before touching the store
    #[error("Invalid purchase request: {0}")]
    Validation(String),

    /// No such raffle
    #[error("Raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    /// Raffle is not selling
    #[error("Raffle {raffle_id} is not active (state: {state})")]
    RaffleNotActive {
        /// Raffle
        raffle_id: RaffleId,
        /// Its current state
        state: RaffleState,
    },

    /// Fewer available tickets than requested at lock time
    #[error("Insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Tickets requested
        requested: u32,
        /// Tickets that could be reserved
        available: u32,
    },

    /// The provider rejected the charge; the tickets were released
    #[error("Payment declined: {reason}")]
    PaymentDeclined {
        /// Provider reason
        reason: String,
    },

    /// Transient provider failure or deadline exceeded; retry with the same key
    #[error("Payment provider unavailable: {reason}")]
    ProviderUnavailable {
        /// Failure detail
        reason: String,
    },

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Retryable for PurchaseError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl PurchaseError {
    /// Short machine-readable code for logs and responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::RaffleNotFound(_) => "RAFFLE_NOT_FOUND",
            Self::RaffleNotActive { .. } => "RAFFLE_NOT_ACTIVE",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::PaymentDeclined { .. } => "PAYMENT_DECLINED",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

/// Settlement failure for one raffle or winner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// No such raffle
    #[error("Raffle not found: {0}")]
    RaffleNotFound(RaffleId),

    /// Raffle is in the wrong lifecycle state for the operation
    #[error("Raffle {raffle_id} must be {expected}, but is {actual}")]
    InvalidState {
        /// Raffle
        raffle_id: RaffleId,
        /// Required state
        expected: RaffleState,
        /// Actual state
        actual: RaffleState,
    },

    /// Fewer paid-for tickets than winner slots
    #[error("Not enough sold tickets: {sold} paid for, {required} required")]
    NotEnoughSoldTickets {
        /// Tickets sold with a succeeded charge
        sold: u64,
        /// Winner count
        required: u32,
    },

    /// The lottery has not published the draw yet
    #[error("Results for {date} not available yet")]
    ResultsNotAvailable {
        /// Draw date
        date: NaiveDate,
    },

    /// Recalculation would discard winners that were already paid
    #[error("Raffle {raffle_id} already has {paid} paid winners")]
    PayoutsAlreadyIssued {
        /// Raffle
        raffle_id: RaffleId,
        /// Paid winners
        paid: usize,
    },

    /// No such winner
    #[error("Winner not found: {0}")]
    WinnerNotFound(WinnerId),

    /// Prize amount does not fit the money type
    #[error("Prize amount overflows")]
    AmountOverflow,

    /// Another ledger entry already holds the winner's payout key
    #[error("Payout key for winner {0} is already taken by another ledger entry")]
    PayoutKeyTaken(WinnerId),

    /// Results provider failure
    #[error(transparent)]
    Results(#[from] ResultsError),

    /// Payment provider failure (payouts)
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Retryable for SettlementError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Results(e) => e.is_retryable(),
            Self::Gateway(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Raffle administration failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaffleError {
    /// Malformed raffle definition
    #[error("Invalid raffle: {0}")]
    Validation(String),

    /// No such raffle
    #[error("Raffle not found: {0}")]
    NotFound(RaffleId),

    /// Transition not allowed from the current state
    #[error("Raffle {raffle_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Raffle
        raffle_id: RaffleId,
        /// Current state
        from: RaffleState,
        /// Requested state
        to: RaffleState,
    },

    /// The results provider does not know the lottery
    #[error("Unknown lottery: {0}")]
    UnknownLottery(String),

    /// Page outside the accepted range
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Results provider failure
    #[error(transparent)]
    Results(#[from] ResultsError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Webhook processing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// Signature verification failed; nothing was written
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Retryable for WebhookError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Signature(_) => false,
            Self::Store(e) => e.is_retryable(),
        }
    }
}
