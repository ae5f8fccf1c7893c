//! Raffle fixtures.

use crate::memory::InMemoryStore;
use chrono::{DateTime, Duration, Utc};
use rifa_core::environment::Clock;
use rifa_core::store::{InventoryStore, RaffleStore, Store, UnitOfWork};
use rifa_core::types::{Category, LotteryId, Money, Raffle, RaffleId, RaffleState, Ticket};

/// Default ticket price used by fixtures (COP).
pub const TICKET_PRICE: u64 = 1_000;

/// Builder for seeded raffles.
#[derive(Debug, Clone)]
pub struct RaffleFixture {
    raffle: Raffle,
    provision: bool,
}

impl RaffleFixture {
    /// An `active` raffle with `total` tickets, ending one hour before the
    /// default test clock so it is due for closing.
    #[must_use]
    pub fn active(total: u32, winner_count: u32) -> Self {
        Self::with_state(total, winner_count, RaffleState::Active)
    }

    /// A raffle in `state`.
    #[must_use]
    pub fn with_state(total: u32, winner_count: u32, state: RaffleState) -> Self {
        let now = crate::test_clock().now();
        Self {
            raffle: Raffle {
                id: RaffleId::new(),
                name: "Rifa de prueba".to_string(),
                category: Category::priced("estandar", Money::from_minor(TICKET_PRICE)),
                lottery_id: LotteryId::new("loteria-nacional"),
                total_tickets: total,
                winner_count,
                starts_at: Some(now - Duration::days(7)),
                ends_at: now - Duration::hours(1),
                state,
                created_at: now - Duration::days(8),
            },
            provision: true,
        }
    }

    /// Override the end of the sales window.
    #[must_use]
    pub fn ending_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.raffle.ends_at = ends_at;
        self
    }

    /// Override the lottery.
    #[must_use]
    pub fn lottery(mut self, lottery_id: &str) -> Self {
        self.raffle.lottery_id = LotteryId::new(lottery_id);
        self
    }

    /// Override the ticket price.
    #[must_use]
    pub fn priced(mut self, price: u64) -> Self {
        self.raffle.category.ticket_price = Money::from_minor(price);
        self
    }

    /// Skip ticket provisioning.
    #[must_use]
    pub const fn without_tickets(mut self) -> Self {
        self.provision = false;
        self
    }

    /// The raffle as built, without touching a store.
    #[must_use]
    pub fn build(&self) -> Raffle {
        self.raffle.clone()
    }

    /// Tickets `1..=total` at the category price.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        (1..=self.raffle.total_tickets)
            .map(|n| Ticket::available(self.raffle.id, n, self.raffle.unit_price()))
            .collect()
    }

    /// Insert the raffle (and its tickets) into the store.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the writes.
    #[allow(clippy::expect_used)]
    pub async fn seed(self, store: &InMemoryStore) -> Raffle {
        let mut uow = store.begin().await.expect("begin");
        uow.insert_raffle(&self.raffle).await.expect("insert raffle");
        if self.provision {
            uow.insert_tickets(&self.tickets()).await.expect("insert tickets");
        }
        uow.commit().await.expect("commit");
        self.raffle
    }
}
