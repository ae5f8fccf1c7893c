//! Raffle administration: creation, ticket provisioning, lifecycle moves
//! and paginated listings.

use crate::error::RaffleError;
use chrono::{DateTime, Utc};
use rifa_core::environment::Clock;
use rifa_core::results::ResultsProvider;
use rifa_core::store::{InventoryStore, RaffleStore, RowLock, Store, UnitOfWork};
use rifa_core::types::{Category, LotteryId, Raffle, RaffleId, RaffleState, Ticket, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ticket numbers are matched as five-digit strings.
pub const MAX_TOTAL_TICKETS: u32 = 99_999;

/// Tickets inserted per statement while provisioning.
const PROVISION_BATCH: usize = 1_000;

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Which slice of a listing to return. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    /// Page number, starting at 1
    #[serde(default = "first_page")]
    pub page: u32,
    /// Items per page
    #[serde(default = "default_page_size")]
    pub per_page: u32,
}

const fn first_page() -> u32 {
    1
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: first_page(),
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    fn validate(self) -> Result<Self, RaffleError> {
        if self.page == 0 {
            return Err(RaffleError::InvalidPage("page starts at 1".to_string()));
        }
        if self.per_page == 0 || self.per_page > MAX_PAGE_SIZE {
            return Err(RaffleError::InvalidPage(format!(
                "per_page must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(self)
    }

    fn offset(self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Page number
    pub page: u32,
    /// Requested page size
    pub per_page: u32,
    /// Items across all pages
    pub total: u64,
}

/// Definition of a raffle to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRaffle {
    /// Display name
    pub name: String,
    /// Pricing rules
    pub category: Category,
    /// Lottery whose draw decides the winners
    pub lottery_id: LotteryId,
    /// Inventory size
    pub total_tickets: u32,
    /// Winners per prize tier
    pub winner_count: u32,
    /// Sales open
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Sales close
    pub ends_at: DateTime<Utc>,
}

/// Creates raffles and moves them through their lifecycle.
pub struct RaffleService<S: Store> {
    store: S,
    results: Arc<dyn ResultsProvider>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> RaffleService<S> {
    /// Creates a raffle service
    #[must_use]
    pub fn new(store: S, results: Arc<dyn ResultsProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            results,
            clock,
        }
    }

    /// Create a `pending` raffle with its full ticket inventory.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::Validation`] for an inconsistent definition
    /// - [`RaffleError::UnknownLottery`] if the results provider does not
    ///   know `lottery_id`
    #[tracing::instrument(skip(self, new), fields(name = %new.name, lottery_id = %new.lottery_id))]
    pub async fn create(&self, new: NewRaffle) -> Result<Raffle, RaffleError> {
        let now = self.clock.now();
        validate(&new, now)?;

        if !self.results.validate_lottery(&new.lottery_id).await? {
            return Err(RaffleError::UnknownLottery(new.lottery_id.to_string()));
        }

        let raffle = Raffle {
            id: RaffleId::new(),
            name: new.name,
            category: new.category,
            lottery_id: new.lottery_id,
            total_tickets: new.total_tickets,
            winner_count: new.winner_count,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            state: RaffleState::Pending,
            created_at: now,
        };

        let mut uow = self.store.begin().await?;
        uow.insert_raffle(&raffle).await?;
        let inserted = provision(&mut uow, &raffle).await?;
        uow.commit().await?;

        tracing::info!(raffle_id = %raffle.id, tickets = inserted, "Raffle created");
        Ok(raffle)
    }

    /// Insert whatever tickets are missing up to `total_tickets`.
    ///
    /// Returns how many were inserted; zero once the inventory is complete.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NotFound`]
    /// - [`RaffleError::InvalidTransition`] for closed or cancelled raffles
    pub async fn provision_tickets(&self, raffle_id: RaffleId) -> Result<u32, RaffleError> {
        let mut uow = self.store.begin().await?;
        let raffle = uow
            .raffle(raffle_id, RowLock::Update)
            .await?
            .ok_or(RaffleError::NotFound(raffle_id))?;
        if !matches!(raffle.state, RaffleState::Pending | RaffleState::Active) {
            return Err(RaffleError::InvalidTransition {
                raffle_id,
                from: raffle.state,
                to: raffle.state,
            });
        }
        let inserted = provision(&mut uow, &raffle).await?;
        uow.commit().await?;
        Ok(inserted)
    }

    /// Open a `pending` raffle for sales, completing its inventory first.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NotFound`]
    /// - [`RaffleError::InvalidTransition`] unless the raffle is `pending`
    #[tracing::instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn activate(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.transition(raffle_id, RaffleState::Active).await
    }

    /// Cancel a `pending` or `active` raffle and void its unsold tickets.
    ///
    /// Sold tickets are left as they are; refunding them is the operator's
    /// call.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NotFound`]
    /// - [`RaffleError::InvalidTransition`] for closed or cancelled raffles
    #[tracing::instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn cancel(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.transition(raffle_id, RaffleState::Cancelled).await
    }

    /// Read a raffle.
    ///
    /// # Errors
    ///
    /// [`RaffleError::NotFound`] or a store failure.
    pub async fn get(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        let mut uow = self.store.begin().await?;
        let raffle = uow.raffle(raffle_id, RowLock::None).await?;
        uow.rollback().await?;
        raffle.ok_or(RaffleError::NotFound(raffle_id))
    }

    /// List raffles, newest first.
    ///
    /// # Errors
    ///
    /// [`RaffleError::InvalidPage`] for an out-of-range page or a store
    /// failure.
    pub async fn list(&self, page: PageRequest) -> Result<Page<Raffle>, RaffleError> {
        let page = page.validate()?;
        let mut uow = self.store.begin().await?;
        let items = uow.list_raffles(page.offset(), page.per_page).await?;
        let total = uow.count_raffles().await?;
        uow.rollback().await?;
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    /// List the tickets a user owns across raffles, most recent purchase
    /// first.
    ///
    /// # Errors
    ///
    /// [`RaffleError::InvalidPage`] for an out-of-range page or a store
    /// failure.
    pub async fn tickets_for_owner(
        &self,
        owner: UserId,
        page: PageRequest,
    ) -> Result<Page<Ticket>, RaffleError> {
        let page = page.validate()?;
        let mut uow = self.store.begin().await?;
        let items = uow
            .tickets_for_owner(owner, page.offset(), page.per_page)
            .await?;
        let total = uow.count_for_owner(owner).await?;
        uow.rollback().await?;
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    async fn transition(&self, raffle_id: RaffleId, to: RaffleState) -> Result<Raffle, RaffleError> {
        let mut uow = self.store.begin().await?;
        let mut raffle = uow
            .raffle(raffle_id, RowLock::Update)
            .await?
            .ok_or(RaffleError::NotFound(raffle_id))?;
        let from = raffle.state;
        if !from.can_transition_to(to) {
            return Err(RaffleError::InvalidTransition {
                raffle_id,
                from,
                to,
            });
        }

        match to {
            RaffleState::Active => {
                provision(&mut uow, &raffle).await?;
            }
            RaffleState::Cancelled => {
                let voided = uow.void_available(raffle_id).await?;
                tracing::info!(voided, "Unsold tickets voided");
            }
            RaffleState::Pending | RaffleState::Closed => {}
        }

        if !uow.set_raffle_state(raffle_id, from, to).await? {
            return Err(RaffleError::InvalidTransition {
                raffle_id,
                from,
                to,
            });
        }
        uow.commit().await?;

        raffle.state = to;
        tracing::info!(%from, %to, "Raffle state changed");
        Ok(raffle)
    }
}

async fn provision<U: UnitOfWork>(uow: &mut U, raffle: &Raffle) -> Result<u32, RaffleError> {
    let next = uow.next_sequence_number(raffle.id).await?;
    if next > raffle.total_tickets {
        return Ok(0);
    }

    let missing: Vec<Ticket> = (next..=raffle.total_tickets)
        .map(|sequence| Ticket::available(raffle.id, sequence, raffle.unit_price()))
        .collect();
    for batch in missing.chunks(PROVISION_BATCH) {
        uow.insert_tickets(batch).await?;
    }
    tracing::debug!(raffle_id = %raffle.id, from = next, count = missing.len(), "Tickets provisioned");
    Ok(raffle.total_tickets - next + 1)
}

fn validate(new: &NewRaffle, now: DateTime<Utc>) -> Result<(), RaffleError> {
    let invalid = |msg: &str| Err(RaffleError::Validation(msg.to_string()));

    if new.name.trim().is_empty() {
        return invalid("name must not be empty");
    }
    if new.total_tickets == 0 || new.total_tickets > MAX_TOTAL_TICKETS {
        return invalid("total_tickets must be between 1 and 99999");
    }
    if new.winner_count == 0 || new.winner_count > new.total_tickets {
        return invalid("winner_count must be between 1 and total_tickets");
    }
    if new.category.ticket_price.is_zero() {
        return invalid("ticket price must be positive");
    }
    if new.category.rake_bps > 10_000 {
        return invalid("rake_bps must not exceed 10000");
    }
    if new.ends_at <= now {
        return invalid("ends_at must be in the future");
    }
    if new.starts_at.is_some_and(|starts| starts >= new.ends_at) {
        return invalid("starts_at must be before ends_at");
    }
    if new
        .category
        .ticket_price
        .checked_multiply(new.total_tickets)
        .is_none()
    {
        return invalid("ticket price times total_tickets overflows");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rifa_core::types::{LedgerEntryId, Money, TicketState};
    use rifa_testing::fixtures::RaffleFixture;
    use rifa_testing::{test_clock, InMemoryStore, MockResultsProvider};

    fn service(store: &InMemoryStore) -> RaffleService<InMemoryStore> {
        RaffleService::new(
            store.clone(),
            Arc::new(MockResultsProvider::new()),
            Arc::new(test_clock()),
        )
    }

    fn new_raffle(total: u32) -> NewRaffle {
        NewRaffle {
            name: "Rifa de prueba".to_string(),
            category: Category::priced("general", Money::from_minor(2_000)),
            lottery_id: LotteryId::new("baloto"),
            total_tickets: total,
            winner_count: 1,
            starts_at: None,
            ends_at: test_clock().now() + chrono::Duration::days(7),
        }
    }

    #[tokio::test]
    async fn create_provisions_full_inventory() {
        let store = InMemoryStore::new();
        let raffle = service(&store).create(new_raffle(25)).await.unwrap();

        assert_eq!(raffle.state, RaffleState::Pending);
        let tickets = store.tickets(raffle.id).await;
        assert_eq!(tickets.len(), 25);
        assert_eq!(tickets.first().unwrap().sequence, 1);
        assert_eq!(tickets.last().unwrap().sequence, 25);
        assert!(tickets.iter().all(|t| t.price == Money::from_minor(2_000)));
    }

    #[tokio::test]
    async fn create_rejects_unknown_lottery() {
        let store = InMemoryStore::new();
        let mut new = new_raffle(10);
        new.lottery_id = LotteryId::new("powerball");

        let err = service(&store).create(new).await.unwrap_err();
        assert_eq!(err, RaffleError::UnknownLottery("powerball".to_string()));
    }

    #[tokio::test]
    async fn create_validates_definition() {
        let store = InMemoryStore::new();
        let svc = service(&store);

        let mut zero_winners = new_raffle(10);
        zero_winners.winner_count = 0;
        assert!(matches!(
            svc.create(zero_winners).await,
            Err(RaffleError::Validation(_))
        ));

        let mut past = new_raffle(10);
        past.ends_at = test_clock().now() - chrono::Duration::hours(1);
        assert!(matches!(svc.create(past).await, Err(RaffleError::Validation(_))));

        let mut too_many = new_raffle(MAX_TOTAL_TICKETS);
        too_many.total_tickets += 1;
        assert!(matches!(
            svc.create(too_many).await,
            Err(RaffleError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn activate_tops_up_partial_inventory() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::with_state(10, 1, RaffleState::Pending)
            .without_tickets()
            .seed(&store)
            .await;

        let svc = service(&store);
        assert_eq!(svc.provision_tickets(raffle.id).await.unwrap(), 10);
        assert_eq!(svc.provision_tickets(raffle.id).await.unwrap(), 0);

        let active = svc.activate(raffle.id).await.unwrap();
        assert_eq!(active.state, RaffleState::Active);
        assert_eq!(store.tickets(raffle.id).await.len(), 10);
    }

    #[tokio::test]
    async fn cancel_voids_unsold_tickets_only() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(4, 1).seed(&store).await;
        {
            let ids: Vec<_> = store.tickets(raffle.id).await[..1].iter().map(|t| t.id).collect();
            let mut uow = store.begin().await.unwrap();
            uow.set_ticket_states(&ids, TicketState::Available, TicketState::Sold)
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }

        let cancelled = service(&store).cancel(raffle.id).await.unwrap();
        assert_eq!(cancelled.state, RaffleState::Cancelled);
        assert_eq!(store.count_tickets(raffle.id, TicketState::Voided).await, 3);
        assert_eq!(store.count_tickets(raffle.id, TicketState::Sold).await, 1);
    }

    #[tokio::test]
    async fn closed_raffles_cannot_be_cancelled() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::with_state(4, 1, RaffleState::Closed)
            .seed(&store)
            .await;

        let err = service(&store).cancel(raffle.id).await.unwrap_err();
        assert_eq!(
            err,
            RaffleError::InvalidTransition {
                raffle_id: raffle.id,
                from: RaffleState::Closed,
                to: RaffleState::Cancelled,
            }
        );
    }

    #[tokio::test]
    async fn list_pages_through_raffles() {
        let store = InMemoryStore::new();
        for _ in 0..5 {
            RaffleFixture::active(2, 1).seed(&store).await;
        }
        let svc = service(&store);

        let first = svc
            .list(PageRequest {
                page: 1,
                per_page: 2,
            })
            .await
            .unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);

        let last = svc
            .list(PageRequest {
                page: 3,
                per_page: 2,
            })
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(first.items.iter().all(|r| r.id != last.items[0].id));

        let past_the_end = svc
            .list(PageRequest {
                page: 4,
                per_page: 2,
            })
            .await
            .unwrap();
        assert!(past_the_end.items.is_empty());
        assert_eq!(past_the_end.total, 5);
    }

    #[tokio::test]
    async fn out_of_range_pages_are_refused() {
        let store = InMemoryStore::new();
        let svc = service(&store);

        let zero = PageRequest {
            page: 0,
            per_page: 10,
        };
        assert!(matches!(svc.list(zero).await, Err(RaffleError::InvalidPage(_))));

        let huge = PageRequest {
            page: 1,
            per_page: MAX_PAGE_SIZE + 1,
        };
        assert!(matches!(
            svc.tickets_for_owner(UserId::new(), huge).await,
            Err(RaffleError::InvalidPage(_))
        ));
    }

    #[tokio::test]
    async fn owner_sees_only_their_tickets() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(6, 1).seed(&store).await;
        let owner = UserId::new();
        {
            let mut uow = store.begin().await.unwrap();
            let mine: Vec<_> = uow
                .reserve_available(raffle.id, 3)
                .await
                .unwrap()
                .iter()
                .map(|t| t.id)
                .collect();
            uow.bulk_mark_sold(&mine, owner, LedgerEntryId::new(), test_clock().now())
                .await
                .unwrap();
            let theirs: Vec<_> = uow
                .reserve_available(raffle.id, 1)
                .await
                .unwrap()
                .iter()
                .map(|t| t.id)
                .collect();
            uow.bulk_mark_sold(&theirs, UserId::new(), LedgerEntryId::new(), test_clock().now())
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }

        let page = service(&store)
            .tickets_for_owner(owner, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.per_page, DEFAULT_PAGE_SIZE);
        assert!(page.items.iter().all(|t| t.owner == Some(owner)));
    }
}
