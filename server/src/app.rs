//! Process wiring and lifecycle.
//!
//! [`RifaApp::new`] connects the store, picks the providers named in the
//! configuration and builds the HTTP state. [`RifaApp::run`] serves HTTP and
//! runs the settlement jobs until SIGINT/SIGTERM, then drains both.

use crate::config::{Config, PaymentProvider, PaymentsConfig, ResultsConfig, ResultsSource};
use crate::lottery::HttpResultsProvider;
use crate::stripe::StripeGateway;
use anyhow::Context;
use rifa_core::environment::{Clock, SystemClock};
use rifa_core::payment::PaymentGateway;
use rifa_core::results::ResultsProvider;
use rifa_postgres::PostgresStore;
use rifa_runtime::{GuardedGateway, Scheduler};
use rifa_testing::{MockPaymentGateway, MockResultsProvider};
use rifa_web::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

/// Payment gateway named by the configuration, behind a circuit breaker.
///
/// # Errors
///
/// Fails if the HTTP client cannot be built.
pub fn payment_gateway(config: &PaymentsConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    let inner: Arc<dyn PaymentGateway> = match config.provider {
        PaymentProvider::Stripe => Arc::new(
            StripeGateway::new(config).context("Failed to build the Stripe client")?,
        ),
        PaymentProvider::Mock => {
            tracing::warn!("Using the mock payment provider; every charge succeeds");
            Arc::new(MockPaymentGateway::with_webhook_secret(
                config.webhook_secret.clone(),
            ))
        }
    };
    Ok(Arc::new(GuardedGateway::new(inner, config.breaker)))
}

/// Results provider named by the configuration.
///
/// # Errors
///
/// Fails if the HTTP client cannot be built.
pub fn results_provider(config: &ResultsConfig) -> anyhow::Result<Arc<dyn ResultsProvider>> {
    Ok(match config.provider {
        ResultsSource::Http => Arc::new(
            HttpResultsProvider::new(config).context("Failed to build the results client")?,
        ),
        ResultsSource::Mock => {
            tracing::warn!("Using the mock results provider; draws are canned or generated");
            Arc::new(MockResultsProvider::with_canned_draws())
        }
    })
}

/// A wired rifa server, ready to run.
pub struct RifaApp {
    config: Config,
    state: AppState<PostgresStore>,
    scheduler: Scheduler<PostgresStore>,
}

impl RifaApp {
    /// Connect, migrate and wire every component.
    ///
    /// # Errors
    ///
    /// Fails if the database is unreachable, a migration fails, or a provider
    /// client cannot be built.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Connecting to PostgreSQL...");
        let store = PostgresStore::connect(&config.postgres.url, &config.postgres.pool_settings())
            .await
            .context("Failed to connect to PostgreSQL")?;
        store.migrate().await.context("Failed to apply migrations")?;
        tracing::info!("Database ready");

        let gateway = payment_gateway(&config.payments)?;
        let results = results_provider(&config.results)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let state = AppState::new(
            store,
            gateway,
            results,
            clock,
            config.purchase.clone(),
            config.settlement.clone(),
        );
        let scheduler = Scheduler::new(Arc::clone(&state.settlement));
        rifa_runtime::metrics::describe();

        Ok(Self {
            config,
            state,
            scheduler,
        })
    }

    /// Serve until a shutdown signal, then stop the jobs.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot bind or the server stops with an I/O error.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!(address = %addr, "Server listening");

        let handles = self.scheduler.spawn();
        tracing::info!(jobs = handles.len(), "Settlement jobs started");

        axum::serve(listener, rifa_web::router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;
        tracing::info!("HTTP server stopped");

        self.scheduler.shutdown();
        let grace = Duration::from_secs(self.config.server.shutdown_timeout);
        let drained = tokio::time::timeout(grace, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Settlement job ended abnormally");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                timeout_secs = grace.as_secs(),
                "Settlement jobs still running at shutdown deadline"
            );
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        Config::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap()
    }

    #[test]
    fn mock_gateway_verifies_with_the_configured_secret() {
        let config = config(&[("STRIPE_WEBHOOK_SECRET", "whsec_local")]);
        let gateway = payment_gateway(&config.payments).unwrap();
        assert_eq!(gateway.provider_name(), "mock");

        let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let now = Utc::now();
        let header = rifa_core::webhook::sign(payload, "whsec_local", now.timestamp());
        assert!(gateway.verify_webhook(payload, &header, now).is_ok());

        let forged = rifa_core::webhook::sign(payload, "whsec_other", now.timestamp());
        assert!(gateway.verify_webhook(payload, &forged, now).is_err());
    }

    #[test]
    fn stripe_gateway_is_selected_with_credentials() {
        let config = config(&[
            ("PAYMENT_PROVIDER", "stripe"),
            ("STRIPE_SECRET_KEY", "sk_test_1"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_1"),
        ]);
        let gateway = payment_gateway(&config.payments).unwrap();
        assert_eq!(gateway.provider_name(), "stripe");
    }

    #[tokio::test]
    async fn mock_results_know_the_default_lotteries() {
        let provider = results_provider(&config(&[]).results).unwrap();
        let known = rifa_core::types::LotteryId::new("baloto");
        assert!(provider.validate_lottery(&known).await.unwrap());
    }

    #[tokio::test]
    async fn mock_results_publish_draws_for_settlement() {
        let provider = results_provider(&config(&[]).results).unwrap();
        let lottery = rifa_core::types::LotteryId::new("loteria-nacional");

        let canned = chrono::NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        let draw = provider.get_results(canned, &lottery).await.unwrap().unwrap();
        assert_eq!(draw.prizes[0].winning_number, "12345");

        let today = Utc::now().date_naive();
        assert!(provider.get_results(today, &lottery).await.unwrap().is_some());
    }
}
