//! # rifa-core
//!
//! Domain model and capability seams for the raffle ticket purchase and
//! settlement engine.
//!
//! This crate holds no I/O. It defines:
//!
//! - **Types**: raffles, numbered tickets, ledger entries, winners and their
//!   lifecycle state machines ([`types`])
//! - **Stores**: the transactional unit-of-work seam implemented by
//!   `rifa-postgres` and `rifa-testing` ([`store`])
//! - **Providers**: payment processor and lottery results capabilities
//!   ([`payment`], [`results`])
//! - **Webhooks**: provider signature verification ([`webhook`])
//! - **Environment**: injected clock ([`environment`])

pub mod payment;
pub mod results;
pub mod store;
pub mod types;
pub mod webhook;

pub use payment::{
    ChargeMetadata, ChargeOutcome, ChargeRequest, GatewayError, GatewayResult, PaymentEvent,
    PaymentGateway, PayoutRequest, ProviderRef,
};
pub use results::{PrizeResult, ResultSet, ResultsError, ResultsProvider};
pub use store::{
    InventoryStore, LedgerStore, RaffleStore, RowLock, Store, StoreError, UnitOfWork,
    WinnerStore,
};
pub use types::{
    Category, IdempotencyKey, InvalidIdempotencyKey, LedgerEntry, LedgerEntryId, LedgerKind,
    LedgerState, LotteryId, Money, Raffle, RaffleId, RaffleState, Ticket, TicketId, TicketState,
    UserId, Winner, WinnerId,
};
pub use webhook::SignatureError;

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use rifa_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
