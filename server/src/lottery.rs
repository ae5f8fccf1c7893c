//! Lottery results over HTTP.
//!
//! ```text
//! GET {base}/lotteries/{lottery_id}                    200 known, 404 unknown
//! GET {base}/lotteries/{lottery_id}/results/{date}     200 draw, 404 not published
//! ```
//!
//! A draw is `{"date": "2025-03-01", "prizes": [{"tier": "...", "winning_number": "..."}]}`
//! with prize tiers in published order.

use crate::config::ResultsConfig;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rifa_core::results::{PrizeResult, ResultSet, ResultsError, ResultsProvider};
use rifa_core::types::LotteryId;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Draw {
    date: NaiveDate,
    prizes: Vec<PrizeResult>,
}

/// HTTP lottery results provider
#[derive(Debug, Clone)]
pub struct HttpResultsProvider {
    client: Client,
    base_url: String,
}

impl HttpResultsProvider {
    /// Build a client from the results configuration.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`reqwest::Error`] if the HTTP client cannot
    /// be constructed.
    pub fn new(config: &ResultsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_results(
        &self,
        date: NaiveDate,
        lottery_id: &LotteryId,
    ) -> Result<Option<ResultSet>, ResultsError> {
        let url = format!(
            "{}/lotteries/{}/results/{}",
            self.base_url,
            lottery_id,
            date.format("%Y-%m-%d")
        );
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResultsError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let draw: Draw = response
                    .json()
                    .await
                    .map_err(|e| ResultsError::InvalidResponse(e.to_string()))?;
                if draw.date != date {
                    return Err(ResultsError::InvalidResponse(format!(
                        "Asked for the {date} draw, got {}",
                        draw.date
                    )));
                }
                if draw.prizes.is_empty() {
                    return Ok(None);
                }
                Ok(Some(ResultSet {
                    date,
                    lottery_id: lottery_id.clone(),
                    prizes: draw.prizes,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status)),
        }
    }

    async fn lottery_exists(&self, lottery_id: &LotteryId) -> Result<bool, ResultsError> {
        let response = self
            .client
            .get(format!("{}/lotteries/{lottery_id}", self.base_url))
            .send()
            .await
            .map_err(|e| ResultsError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected(status)),
        }
    }
}

fn unexpected(status: StatusCode) -> ResultsError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ResultsError::Unavailable(format!("Results API answered {status}"))
    } else {
        ResultsError::InvalidResponse(format!("Results API answered {status}"))
    }
}

impl ResultsProvider for HttpResultsProvider {
    fn get_results<'a>(
        &'a self,
        date: NaiveDate,
        lottery_id: &'a LotteryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResultSet>, ResultsError>> + Send + 'a>> {
        Box::pin(self.fetch_results(date, lottery_id))
    }

    fn validate_lottery<'a>(
        &'a self,
        lottery_id: &'a LotteryId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ResultsError>> + Send + 'a>> {
        Box::pin(self.lottery_exists(lottery_id))
    }
}
