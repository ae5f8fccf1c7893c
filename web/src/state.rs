//! Application state shared by the handlers.

use rifa_core::environment::Clock;
use rifa_core::payment::PaymentGateway;
use rifa_core::results::ResultsProvider;
use rifa_core::store::Store;
use rifa_runtime::{
    PurchaseConfig, PurchaseCoordinator, RaffleService, SettlementConfig, SettlementWorker,
    WebhookProcessor,
};
use std::sync::Arc;

/// The engine components behind the HTTP routes, all over one store.
///
/// Cheap to clone; every component sits behind an `Arc`.
pub struct AppState<S: Store> {
    /// Store, used directly only by the readiness probe
    pub store: S,
    /// Ticket purchases
    pub purchases: Arc<PurchaseCoordinator<S>>,
    /// Raffle administration
    pub raffles: Arc<RaffleService<S>>,
    /// Closing, recalculation and payouts
    pub settlement: Arc<SettlementWorker<S>>,
    /// Provider webhooks
    pub webhooks: Arc<WebhookProcessor<S>>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            purchases: Arc::clone(&self.purchases),
            raffles: Arc::clone(&self.raffles),
            settlement: Arc::clone(&self.settlement),
            webhooks: Arc::clone(&self.webhooks),
        }
    }
}

impl<S: Store> AppState<S> {
    /// Wire every component to the same store and providers.
    #[must_use]
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        results: Arc<dyn ResultsProvider>,
        clock: Arc<dyn Clock>,
        purchase: PurchaseConfig,
        settlement: SettlementConfig,
    ) -> Self {
        Self {
            purchases: Arc::new(PurchaseCoordinator::new(
                store.clone(),
                Arc::clone(&gateway),
                Arc::clone(&clock),
                purchase,
            )),
            raffles: Arc::new(RaffleService::new(
                store.clone(),
                Arc::clone(&results),
                Arc::clone(&clock),
            )),
            settlement: Arc::new(SettlementWorker::new(
                store.clone(),
                results,
                Arc::clone(&gateway),
                Arc::clone(&clock),
                settlement,
            )),
            webhooks: Arc::new(WebhookProcessor::new(store.clone(), gateway, clock)),
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rifa_testing::{InMemoryStore, MockPaymentGateway, MockResultsProvider, test_clock};

    #[test]
    fn state_is_clone_and_shares_components() {
        let state = AppState::new(
            InMemoryStore::new(),
            MockPaymentGateway::shared(),
            Arc::new(MockResultsProvider::new()),
            Arc::new(test_clock()),
            PurchaseConfig::default(),
            SettlementConfig::default(),
        );
        let copy = state.clone();
        assert!(Arc::ptr_eq(&state.purchases, &copy.purchases));
        assert!(Arc::ptr_eq(&state.settlement, &copy.settlement));
    }
}
