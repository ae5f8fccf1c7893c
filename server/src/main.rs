//! rifa server process.
//!
//! Loads `.env`, installs the tracing subscriber, then runs [`RifaApp`]
//! until SIGINT/SIGTERM.

use rifa_server::{Config, RifaApp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rifa=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        address = %config.bind_address(),
        payments = ?config.payments.provider,
        results = ?config.results.provider,
        currency = %config.purchase.currency,
        "Configuration loaded"
    );

    RifaApp::new(config).await?.run().await
}
