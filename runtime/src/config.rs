//! Component settings.
//!
//! Built once at startup (see `rifa-server`) and handed to each component by
//! value. Nothing here is global.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Purchase coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseConfig {
    /// ISO currency code charged
    pub currency: String,
    /// Deadline for the whole reservation transaction, payment calls included
    pub payment_timeout: Duration,
    /// Largest quantity accepted in one purchase
    pub max_quantity: u32,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            currency: "COP".to_string(),
            payment_timeout: Duration::from_secs(10),
            max_quantity: 100,
        }
    }
}

/// Settlement worker and scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// ISO currency code of payouts
    pub currency: String,
    /// Digits a ticket number is padded to before matching a winning number
    pub number_width: usize,
    /// Cadence of the closing sweep
    pub close_interval: Duration,
    /// Cadence of the results reconciliation sweep
    pub reconcile_interval: Duration,
    /// Cadence of the payout pass
    pub payout_interval: Duration,
    /// How far ahead of `ends_at` the reconciliation sweep starts probing
    pub reconcile_lookahead: Duration,
    /// Retry policy wrapped around each scheduled run
    pub retry: RetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "COP".to_string(),
            number_width: 5,
            close_interval: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(300),
            payout_interval: Duration::from_secs(900),
            reconcile_lookahead: Duration::from_secs(86_400),
            retry: RetryPolicy::default(),
        }
    }
}
