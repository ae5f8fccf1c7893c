//! # rifa-testing
//!
//! Test doubles for the rifa engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a transactional in-memory implementation of every
//!   store trait
//! - [`MockPaymentGateway`]: a scriptable payment provider
//! - [`MockResultsProvider`]: a lottery results provider with canned draws
//! - [`mocks::FixedClock`]: deterministic time
//! - [`fixtures`]: raffle builders
//!
//! ## Example
//!
//! ```
//! use rifa_testing::{fixtures::RaffleFixture, InMemoryStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! let raffle = RaffleFixture::active(10, 1).seed(&store).await;
//! assert_eq!(store.tickets(raffle.id).await.len(), 10);
//! # });
//! ```

pub mod fixtures;
mod memory;
mod payment;
mod results;

pub use memory::{InMemoryStore, InMemoryUnitOfWork, MemorySnapshot};
pub use payment::{DEFAULT_WEBHOOK_SECRET, MockPaymentGateway};
pub use results::MockResultsProvider;

use chrono::{DateTime, Utc};
use rifa_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::advance`] or
    /// [`FixedClock::set`].
    ///
    /// # Example
    ///
    /// ```
    /// use rifa_testing::mocks::FixedClock;
    /// use rifa_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = FixedClock::new(start);
    /// assert_eq!(clock.now(), clock.now());
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now(), start + Duration::hours(1));
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use mocks::{test_clock, FixedClock};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; output goes through the test harness capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
