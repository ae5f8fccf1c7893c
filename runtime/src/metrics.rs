//! Metric names and recorders.
//!
//! Counters go through the `metrics` facade. Installing an exporter is left
//! to the embedding binary; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register descriptions for every metric this crate emits.
///
/// Call once after installing a recorder.
pub fn describe() {
    describe_counter!(
        "rifa_purchase_attempts_total",
        "Purchase requests that reached the coordinator"
    );
    describe_counter!(
        "rifa_purchase_succeeded_total",
        "Purchases committed with a succeeded or pending ledger entry"
    );
    describe_counter!(
        "rifa_purchase_replayed_total",
        "Purchases answered from an existing ledger entry"
    );
    describe_counter!(
        "rifa_purchase_failed_total",
        "Purchases that failed, labelled by error code"
    );
    describe_histogram!(
        "rifa_purchase_duration_seconds",
        "Time from request to commit or rollback"
    );
    describe_counter!(
        "rifa_settlement_closed_total",
        "Raffles closed with winners assigned"
    );
    describe_counter!("rifa_settlement_winners_total", "Winner rows recorded");
    describe_counter!(
        "rifa_settlement_skipped_total",
        "Raffles left active because results were not yet published"
    );
    describe_counter!(
        "rifa_settlement_errors_total",
        "Raffles whose settlement failed during a sweep"
    );
    describe_counter!("rifa_payout_executed_total", "Winners paid");
    describe_counter!("rifa_payout_errors_total", "Payout attempts that failed");
    describe_counter!(
        "rifa_webhook_events_total",
        "Verified provider events, labelled by outcome"
    );
    describe_counter!(
        "rifa_gateway_rejected_total",
        "Payment provider calls refused while the circuit was open"
    );
    describe_counter!(
        "rifa_retry_attempts_total",
        "Retries of scheduled jobs"
    );
    describe_counter!(
        "rifa_retry_exhausted_total",
        "Scheduled jobs that ran out of retries"
    );
}

/// Purchase path recorder.
pub struct PurchaseMetrics;

impl PurchaseMetrics {
    /// A request reached the coordinator.
    pub fn attempt() {
        counter!("rifa_purchase_attempts_total").increment(1);
    }

    /// A purchase committed.
    pub fn succeeded(duration: Duration) {
        counter!("rifa_purchase_succeeded_total").increment(1);
        histogram!("rifa_purchase_duration_seconds").record(duration.as_secs_f64());
    }

    /// A purchase was answered from its ledger entry.
    pub fn replayed() {
        counter!("rifa_purchase_replayed_total").increment(1);
    }

    /// A purchase failed with `code`.
    pub fn failed(code: &'static str, duration: Duration) {
        counter!("rifa_purchase_failed_total", "code" => code).increment(1);
        histogram!("rifa_purchase_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Settlement recorder.
pub struct SettlementMetrics;

impl SettlementMetrics {
    /// A raffle closed.
    pub fn closed(winners: usize) {
        counter!("rifa_settlement_closed_total").increment(1);
        counter!("rifa_settlement_winners_total").increment(winners as u64);
    }

    /// A raffle waited for results.
    pub fn skipped() {
        counter!("rifa_settlement_skipped_total").increment(1);
    }

    /// A raffle failed to settle.
    pub fn error() {
        counter!("rifa_settlement_errors_total").increment(1);
    }

    /// A winner was paid.
    pub fn paid() {
        counter!("rifa_payout_executed_total").increment(1);
    }

    /// A payout failed.
    pub fn payout_error() {
        counter!("rifa_payout_errors_total").increment(1);
    }
}
