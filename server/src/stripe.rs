//! Stripe `PaymentIntents` client.
//!
//! Charges are created with `POST /v1/payment_intents` and confirmed with
//! `POST /v1/payment_intents/{id}/confirm`; prizes go out through
//! `POST /v1/payouts`. Every mutating call carries an `Idempotency-Key`
//! header so a retried request never charges or pays twice.

use crate::config::PaymentsConfig;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rifa_core::payment::{
    ChargeOutcome, ChargeRequest, GatewayError, GatewayFuture, GatewayResult, PaymentEvent,
    PaymentGateway, PayoutRequest, ProviderRef,
};
use rifa_core::webhook::{self, SignatureError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const PROVIDER_NAME: &str = "stripe";

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    last_payment_error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Payout {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl ApiErrorDetail {
    fn reason(self, fallback: &str) -> String {
        self.message
            .or(self.code)
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Stripe payment gateway
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    /// Build a client from the payments configuration.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`reqwest::Error`] if the HTTP client cannot
    /// be constructed (TLS backend initialization).
    pub fn new(config: &PaymentsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    fn post(&self, path: &str, idempotency_key: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
    }

    async fn create_intent(&self, request: ChargeRequest) -> GatewayResult<ProviderRef> {
        let metadata = &request.metadata;
        let form = [
            ("amount", request.amount.minor_units().to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("metadata[raffle_id]", metadata.raffle_id.to_string()),
            ("metadata[user_id]", metadata.user_id.to_string()),
            ("metadata[quantity]", metadata.quantity.to_string()),
            (
                "metadata[idempotency_key]",
                metadata.idempotency_key.as_str().to_string(),
            ),
        ];

        let response = self
            .post("/v1/payment_intents", metadata.idempotency_key.as_str())
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::PAYMENT_REQUIRED => Err(GatewayError::Declined {
                reason: api_error(response).await.reason("card_declined"),
            }),
            _ => {
                let intent: PaymentIntent = success_body(response).await?;
                tracing::debug!(payment_intent = %intent.id, status = %intent.status, "PaymentIntent created");
                Ok(ProviderRef::new(intent.id))
            }
        }
    }

    async fn confirm_intent(&self, charge: ProviderRef) -> GatewayResult<ChargeOutcome> {
        let response = self
            .post(
                &format!("/v1/payment_intents/{charge}/confirm"),
                &format!("confirm:{charge}"),
            )
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            return Ok(ChargeOutcome::Failed {
                reason: api_error(response).await.reason("card_declined"),
            });
        }

        let intent: PaymentIntent = success_body(response).await?;
        Ok(outcome_for(intent))
    }

    async fn create_payout(&self, request: PayoutRequest) -> GatewayResult<ProviderRef> {
        let form = [
            ("amount", request.amount.minor_units().to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("metadata[winner_id]", request.winner_id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
        ];

        let response = self
            .post("/v1/payouts", request.idempotency_key.as_str())
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let payout: Payout = success_body(response).await?;
        Ok(ProviderRef::new(payout.id))
    }
}

fn outcome_for(intent: PaymentIntent) -> ChargeOutcome {
    match intent.status.as_str() {
        "succeeded" => ChargeOutcome::Succeeded,
        // 3-D Secure and delayed methods resolve through the webhook
        "processing" | "requires_capture" | "requires_action" => ChargeOutcome::Processing,
        status => ChargeOutcome::Failed {
            reason: intent
                .last_payment_error
                .unwrap_or_default()
                .reason(status),
        },
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable {
            reason: e.to_string(),
        }
    }
}

async fn api_error(response: Response) -> ApiErrorDetail {
    response
        .json::<ApiErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_default()
}

async fn success_body<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Unavailable {
                reason: format!("Unreadable provider response: {e}"),
            });
    }

    let reason = api_error(response).await.reason(status.as_str());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(GatewayError::Unavailable { reason })
    } else {
        Err(GatewayError::InvalidRequest { reason })
    }
}

impl PaymentGateway for StripeGateway {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn create_charge(&self, request: ChargeRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(self.create_intent(request))
    }

    fn confirm_charge(&self, charge: &ProviderRef) -> GatewayFuture<'_, ChargeOutcome> {
        Box::pin(self.confirm_intent(charge.clone()))
    }

    fn execute_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, ProviderRef> {
        Box::pin(self.create_payout(request))
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
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn intent(status: &str) -> PaymentIntent {
        PaymentIntent {
            id: "pi_1".to_string(),
            status: status.to_string(),
            last_payment_error: None,
        }
    }

    #[test]
    fn intent_statuses_map_to_outcomes() {
        assert_eq!(outcome_for(intent("succeeded")), ChargeOutcome::Succeeded);
        assert_eq!(outcome_for(intent("processing")), ChargeOutcome::Processing);
        assert_eq!(outcome_for(intent("requires_action")), ChargeOutcome::Processing);
        assert_eq!(
            outcome_for(intent("canceled")),
            ChargeOutcome::Failed {
                reason: "canceled".to_string()
            }
        );
    }

    #[test]
    fn failure_reason_prefers_the_provider_message() {
        let mut failed = intent("requires_payment_method");
        failed.last_payment_error = Some(ApiErrorDetail {
            message: Some("Your card has insufficient funds.".to_string()),
            code: Some("card_declined".to_string()),
        });
        assert_eq!(
            outcome_for(failed),
            ChargeOutcome::Failed {
                reason: "Your card has insufficient funds.".to_string()
            }
        );
    }
}
