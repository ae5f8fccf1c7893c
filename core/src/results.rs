//! Lottery results capability.

use crate::types::LotteryId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Results provider error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultsError {
    /// The lottery id is not known to the provider
    #[error("Unknown lottery: {0}")]
    UnknownLottery(String),

    /// The provider could not be reached
    #[error("Results provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with something unusable
    #[error("Invalid results response: {0}")]
    InvalidResponse(String),
}

impl ResultsError {
    /// Whether the lookup may succeed if retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One prize tier of a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeResult {
    /// Tier name, e.g. "Primer Premio"
    pub tier: String,
    /// Winning number as published (digits, possibly zero-padded)
    pub winning_number: String,
}

/// The published results of one lottery draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Draw date
    pub date: NaiveDate,
    /// Lottery
    pub lottery_id: LotteryId,
    /// Tiers in published order
    pub prizes: Vec<PrizeResult>,
}

/// External lottery-results lookup.
pub trait ResultsProvider: Send + Sync {
    /// Results of the draw on `date`, or `None` if not yet published.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsError`] if the lookup itself fails.
    fn get_results<'a>(
        &'a self,
        date: NaiveDate,
        lottery_id: &'a LotteryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResultSet>, ResultsError>> + Send + 'a>>;

    /// Whether the lottery id is known.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsError`] if the lookup itself fails.
    fn validate_lottery<'a>(
        &'a self,
        lottery_id: &'a LotteryId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ResultsError>> + Send + 'a>>;
}
