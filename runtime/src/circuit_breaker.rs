//! Circuit breaker in front of the payment provider.
//!
//! When the provider keeps timing out or answering with outages, purchases
//! would otherwise hold their ticket locks for the full payment deadline
//! before failing. The breaker opens after `failure_threshold` consecutive
//! outages and fails calls immediately with [`GatewayError::Unavailable`]
//! until `open_for` has passed. It then lets calls through again
//! (half-open) and closes after `success_threshold` successes.
//!
//! Only retryable errors count as failures. A declined card is a healthy
//! provider giving a business answer.
//!
//! # Example
//!
//! ```
//! use rifa_runtime::circuit_breaker::{BreakerConfig, GuardedGateway};
//! use rifa_testing::MockPaymentGateway;
//! use std::sync::Arc;
//!
//! let gateway = GuardedGateway::new(
//!     Arc::new(MockPaymentGateway::new()),
//!     BreakerConfig::default(),
//! );
//! ```

use chrono::{DateTime, Utc};
use rifa_core::payment::{
    ChargeOutcome, ChargeRequest, GatewayError, GatewayFuture, GatewayResult, PaymentEvent,
    PaymentGateway, PayoutRequest, ProviderRef,
};
use rifa_core::webhook::SignatureError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive outages before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open
    pub open_for: Duration,
    /// Successes needed in half-open state to close again
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls pass through
    Closed,
    /// Calls fail immediately
    Open,
    /// Calls pass through on probation
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Tracks provider health.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Arc<RwLock<Inner>>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state.
    pub async fn state(&self) -> State {
        self.inner.read().await.state
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unavailable`] while open, otherwise whatever the
    /// operation returns.
    pub async fn call<F, Fut, T>(&self, operation: &str, f: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if !self.allow().await {
            tracing::warn!(operation, "Payment provider circuit open, rejecting call");
            metrics::counter!("rifa_gateway_rejected_total").increment(1);
            return Err(GatewayError::Unavailable {
                reason: "payment provider circuit open".to_string(),
            });
        }

        let result = f().await;
        match &result {
            Err(error) if error.is_retryable() => self.on_failure(operation).await,
            _ => self.on_success().await,
        }
        result
    }

    async fn allow(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_for);
                if expired {
                    tracing::info!("Payment provider circuit half-open");
                    inner.state = State::HalfOpen;
                    inner.successes = 0;
                }
                expired
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!("Payment provider circuit closed");
                    inner.state = State::Closed;
                    inner.failures = 0;
                    inner.opened_at = None;
                }
            }
            State::Closed | State::Open => inner.failures = 0,
        }
    }

    async fn on_failure(&self, operation: &str) {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(operation, failures = inner.failures, "Payment provider circuit opened");
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                tracing::warn!(operation, "Payment provider still failing, circuit re-opened");
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.successes = 0;
            }
            State::Open => {}
        }
    }
}

/// A [`PaymentGateway`] whose outbound calls go through a [`CircuitBreaker`].
///
/// Webhook verification is local and bypasses the breaker.
pub struct GuardedGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
}

impl GuardedGateway {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn PaymentGateway>, config: BreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    /// The breaker, for health reporting.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl PaymentGateway for GuardedGateway {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn create_charge(&self, request: ChargeRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(
            self.breaker
                .call("create_charge", || self.inner.create_charge(request)),
        )
    }

    fn confirm_charge(&self, charge: &ProviderRef) -> GatewayFuture<'_, ChargeOutcome> {
        let charge = charge.clone();
        Box::pin(async move {
            self.breaker
                .call("confirm_charge", || self.inner.confirm_charge(&charge))
                .await
        })
    }

    fn execute_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(
            self.breaker
                .call("execute_payout", || self.inner.execute_payout(request)),
        )
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentEvent, SignatureError> {
        self.inner.verify_webhook(payload, signature, now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rifa_core::payment::ChargeMetadata;
    use rifa_core::types::{IdempotencyKey, Money, RaffleId, UserId};
    use rifa_testing::MockPaymentGateway;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            open_for: Duration::from_millis(50),
            success_threshold: 1,
        }
    }

    fn charge(key: &str) -> ChargeRequest {
        ChargeRequest {
            amount: Money::from_minor(1_000),
            currency: "COP".to_string(),
            metadata: ChargeMetadata {
                raffle_id: RaffleId::new(),
                user_id: UserId::new(),
                quantity: 1,
                idempotency_key: IdempotencyKey::parse(key).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_outages_and_recovers() {
        let mock = MockPaymentGateway::new();
        let gateway = GuardedGateway::new(Arc::new(mock.clone()), config());

        mock.push_create_error(GatewayError::Timeout);
        mock.push_create_error(GatewayError::Timeout);
        assert!(gateway.create_charge(charge("a")).await.is_err());
        assert!(gateway.create_charge(charge("b")).await.is_err());
        assert_eq!(gateway.breaker().state().await, State::Open);

        // rejected without reaching the provider
        let calls_before = mock.charge_requests().len();
        let err = gateway.create_charge(charge("c")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
        assert_eq!(mock.charge_requests().len(), calls_before);

        tokio::time::sleep(Duration::from_millis(60)).await;
        gateway.create_charge(charge("d")).await.unwrap();
        assert_eq!(gateway.breaker().state().await, State::Closed);
    }

    #[tokio::test]
    async fn declines_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            let result: GatewayResult<()> = breaker
                .call("create_charge", || async {
                    Err(GatewayError::Declined {
                        reason: "card_declined".to_string(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state().await, State::Closed);
    }
}
