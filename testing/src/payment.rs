//! Scriptable payment provider.

use chrono::{DateTime, Utc};
use rifa_core::payment::{
    ChargeOutcome, ChargeRequest, GatewayError, GatewayFuture, PaymentEvent, PaymentGateway,
    PayoutRequest, ProviderRef,
};
use rifa_core::webhook::{self, SignatureError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Secret used when none is configured.
pub const DEFAULT_WEBHOOK_SECRET: &str = "whsec_mock";

#[derive(Debug)]
struct GatewayState {
    default_outcome: ChargeOutcome,
    confirm_script: VecDeque<Result<ChargeOutcome, GatewayError>>,
    create_script: VecDeque<GatewayError>,
    payout_script: VecDeque<GatewayError>,
    charges_by_key: HashMap<String, ProviderRef>,
    charge_requests: Vec<ChargeRequest>,
    confirmations: Vec<ProviderRef>,
    payouts_by_key: HashMap<String, ProviderRef>,
    payout_requests: Vec<PayoutRequest>,
    latency: Option<Duration>,
}

/// Mock payment gateway.
///
/// Succeeds by default. Outcomes can be scripted per call; charges and
/// payouts are idempotent on their idempotency key, like a real provider.
#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
    webhook_secret: String,
}

impl MockPaymentGateway {
    /// Creates a gateway that approves every charge
    #[must_use]
    pub fn new() -> Self {
        Self::with_webhook_secret(DEFAULT_WEBHOOK_SECRET)
    }

    /// Creates a gateway verifying webhooks with `secret`
    #[must_use]
    pub fn with_webhook_secret(secret: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                default_outcome: ChargeOutcome::Succeeded,
                confirm_script: VecDeque::new(),
                create_script: VecDeque::new(),
                payout_script: VecDeque::new(),
                charges_by_key: HashMap::new(),
                charge_requests: Vec::new(),
                confirmations: Vec::new(),
                payouts_by_key: HashMap::new(),
                payout_requests: Vec::new(),
                latency: None,
            })),
            webhook_secret: secret.into(),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcome of every confirmation not otherwise scripted.
    pub fn set_default_outcome(&self, outcome: ChargeOutcome) {
        self.state().default_outcome = outcome;
    }

    /// Script the next confirmation.
    pub fn push_confirm(&self, result: Result<ChargeOutcome, GatewayError>) {
        self.state().confirm_script.push_back(result);
    }

    /// Make the next charge creation fail.
    pub fn push_create_error(&self, error: GatewayError) {
        self.state().create_script.push_back(error);
    }

    /// Make the next payout fail.
    pub fn push_payout_error(&self, error: GatewayError) {
        self.state().payout_script.push_back(error);
    }

    /// Delay every provider call.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Every charge creation request received, including replays.
    #[must_use]
    pub fn charge_requests(&self) -> Vec<ChargeRequest> {
        self.state().charge_requests.clone()
    }

    /// Distinct charges created.
    #[must_use]
    pub fn distinct_charges(&self) -> usize {
        self.state().charges_by_key.len()
    }

    /// Every confirmation received.
    #[must_use]
    pub fn confirmations(&self) -> Vec<ProviderRef> {
        self.state().confirmations.clone()
    }

    /// Every payout request received, including replays.
    #[must_use]
    pub fn payout_requests(&self) -> Vec<PayoutRequest> {
        self.state().payout_requests.clone()
    }

    /// Distinct payouts executed.
    #[must_use]
    pub fn distinct_payouts(&self) -> usize {
        self.state().payouts_by_key.len()
    }

    /// Sign a webhook body the way the provider would.
    #[must_use]
    pub fn sign_webhook(&self, payload: &[u8], at: DateTime<Utc>) -> String {
        webhook::sign(payload, &self.webhook_secret, at.timestamp())
    }

    async fn delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn create_charge(&self, request: ChargeRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(async move {
            let latency = self.state().latency;
            Self::delay(latency).await;

            let mut state = self.state();
            state.charge_requests.push(request.clone());
            if let Some(error) = state.create_script.pop_front() {
                return Err(error);
            }

            let key = request.metadata.idempotency_key.as_str().to_string();
            let charge = state
                .charges_by_key
                .entry(key)
                .or_insert_with(|| ProviderRef::new(format!("pi_mock_{}", uuid::Uuid::new_v4().simple())))
                .clone();

            tracing::debug!(
                charge = %charge,
                amount = request.amount.minor_units(),
                "Mock charge created"
            );
            Ok(charge)
        })
    }

    fn confirm_charge(&self, charge: &ProviderRef) -> GatewayFuture<'_, ChargeOutcome> {
        let charge = charge.clone();
        Box::pin(async move {
            let latency = self.state().latency;
            Self::delay(latency).await;

            let mut state = self.state();
            state.confirmations.push(charge);
            match state.confirm_script.pop_front() {
                Some(result) => result,
                None => Ok(state.default_outcome.clone()),
            }
        })
    }

    fn execute_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(async move {
            let latency = self.state().latency;
            Self::delay(latency).await;

            let mut state = self.state();
            state.payout_requests.push(request.clone());
            if let Some(error) = state.payout_script.pop_front() {
                return Err(error);
            }

            let payout = state
                .payouts_by_key
                .entry(request.idempotency_key.as_str().to_string())
                .or_insert_with(|| ProviderRef::new(format!("po_mock_{}", uuid::Uuid::new_v4().simple())))
                .clone();
            Ok(payout)
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentEvent, SignatureError> {
        webhook::verify_and_parse(
            payload,
            signature,
            &self.webhook_secret,
            now,
            webhook::DEFAULT_TOLERANCE_SECS,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rifa_core::payment::ChargeMetadata;
    use rifa_core::types::{IdempotencyKey, Money, RaffleId, UserId};

    fn request(key: &str) -> ChargeRequest {
        ChargeRequest {
            amount: Money::from_minor(3_000),
            currency: "COP".to_string(),
            metadata: ChargeMetadata {
                raffle_id: RaffleId::new(),
                user_id: UserId::new(),
                quantity: 3,
                idempotency_key: IdempotencyKey::parse(key).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn charges_are_idempotent_on_key() {
        let gateway = MockPaymentGateway::new();
        let first = gateway.create_charge(request("k1")).await.unwrap();
        let second = gateway.create_charge(request("k1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.distinct_charges(), 1);
        assert_eq!(gateway.charge_requests().len(), 2);
    }

    #[tokio::test]
    async fn scripted_confirmation_is_used_once() {
        let gateway = MockPaymentGateway::new();
        gateway.push_confirm(Ok(ChargeOutcome::Failed {
            reason: "card_declined".to_string(),
        }));
        let charge = gateway.create_charge(request("k1")).await.unwrap();

        assert!(matches!(
            gateway.confirm_charge(&charge).await.unwrap(),
            ChargeOutcome::Failed { .. }
        ));
        assert_eq!(
            gateway.confirm_charge(&charge).await.unwrap(),
            ChargeOutcome::Succeeded
        );
    }
}
