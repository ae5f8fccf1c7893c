//! Transactional in-memory store.
//!
//! A unit of work holds the store-wide lock for its whole lifetime and writes
//! to a private copy of the state. `commit` publishes the copy; dropping or
//! rolling back discards it. Units of work are therefore fully serialized,
//! which is stricter than row locking but gives the same observable
//! guarantees: no two reservations ever see the same available ticket.

use chrono::{DateTime, Utc};
use rifa_core::store::{
    InventoryStore, LedgerStore, RaffleStore, RowLock, Store, StoreError, UnitOfWork,
    WinnerStore, check_ledger_transition, check_ticket_transition,
};
use rifa_core::types::{
    IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerState, Raffle, RaffleId, RaffleState,
    Ticket, TicketId, TicketState, UserId, Winner, WinnerId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Everything the store holds.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    /// Raffles by id
    pub raffles: HashMap<RaffleId, Raffle>,
    /// Tickets ordered by raffle then sequence number
    pub tickets: BTreeMap<(RaffleId, u32), Ticket>,
    /// Ledger entries by id
    pub ledger: HashMap<LedgerEntryId, LedgerEntry>,
    /// Winners by id
    pub winners: HashMap<WinnerId, Winner>,
}

impl MemorySnapshot {
    fn raffle_tickets(&self, raffle_id: RaffleId) -> impl Iterator<Item = &Ticket> {
        self.tickets
            .range((raffle_id, 0)..=(raffle_id, u32::MAX))
            .map(|(_, ticket)| ticket)
    }

    fn ticket_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.tickets.values_mut().find(|t| t.id == id)
    }

    fn ticket_sequence(&self, id: TicketId) -> u32 {
        self.tickets
            .values()
            .find(|t| t.id == id)
            .map_or(u32::MAX, |t| t.sequence)
    }
}

/// In-memory implementation of [`Store`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemorySnapshot>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemorySnapshot {
        self.state.lock().await.clone()
    }

    /// Committed tickets of a raffle, ordered by sequence number.
    pub async fn tickets(&self, raffle_id: RaffleId) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .raffle_tickets(raffle_id)
            .cloned()
            .collect()
    }

    /// Committed tickets of a raffle in `state`.
    pub async fn count_tickets(&self, raffle_id: RaffleId, state: TicketState) -> usize {
        self.state
            .lock()
            .await
            .raffle_tickets(raffle_id)
            .filter(|t| t.state == state)
            .count()
    }

    /// Committed raffle.
    pub async fn raffle_state(&self, raffle_id: RaffleId) -> Option<RaffleState> {
        self.state
            .lock()
            .await
            .raffles
            .get(&raffle_id)
            .map(|r| r.state)
    }

    /// Committed ledger entries.
    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self.state.lock().await.ledger.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Committed winners.
    pub async fn winners(&self) -> Vec<Winner> {
        let state = self.state.lock().await;
        let mut winners: Vec<_> = state.winners.values().cloned().collect();
        winners.sort_by_key(|w| state.ticket_sequence(w.ticket_id));
        winners
    }
}

impl Store for InMemoryStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryUnitOfWork { guard, staged })
    }
}

/// A serialized transaction over [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<MemorySnapshot>,
    staged: MemorySnapshot,
}

impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl RaffleStore for InMemoryUnitOfWork {
    async fn insert_raffle(&mut self, raffle: &Raffle) -> Result<(), StoreError> {
        if self.staged.raffles.contains_key(&raffle.id) {
            return Err(StoreError::Database(format!("duplicate raffle {}", raffle.id)));
        }
        self.staged.raffles.insert(raffle.id, raffle.clone());
        Ok(())
    }

    async fn raffle(&mut self, id: RaffleId, _lock: RowLock) -> Result<Option<Raffle>, StoreError> {
        Ok(self.staged.raffles.get(&id).cloned())
    }

    async fn list_raffles(&mut self, offset: u64, limit: u32) -> Result<Vec<Raffle>, StoreError> {
        let mut raffles: Vec<_> = self.staged.raffles.values().cloned().collect();
        raffles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(raffles
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect())
    }

    async fn count_raffles(&mut self) -> Result<u64, StoreError> {
        Ok(self.staged.raffles.len() as u64)
    }

    async fn active_raffles_ending_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Raffle>, StoreError> {
        let mut due: Vec<_> = self
            .staged
            .raffles
            .values()
            .filter(|r| r.state == RaffleState::Active && r.ends_at <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.ends_at);
        Ok(due)
    }

    async fn set_raffle_state(
        &mut self,
        id: RaffleId,
        from: RaffleState,
        to: RaffleState,
    ) -> Result<bool, StoreError> {
        match self.staged.raffles.get_mut(&id) {
            Some(raffle) if raffle.state == from => {
                raffle.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl InventoryStore for InMemoryUnitOfWork {
    async fn reserve_available(
        &mut self,
        raffle_id: RaffleId,
        quantity: u32,
    ) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .staged
            .raffle_tickets(raffle_id)
            .filter(|t| t.state == TicketState::Available)
            .take(quantity as usize)
            .cloned()
            .collect())
    }

    async fn bulk_mark_sold(
        &mut self,
        ticket_ids: &[TicketId],
        owner: UserId,
        ledger_entry_id: LedgerEntryId,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut changed = 0;
        for id in ticket_ids {
            if let Some(ticket) = self.staged.ticket_mut(*id) {
                if ticket.state == TicketState::Available {
                    ticket.state = TicketState::Sold;
                    ticket.owner = Some(owner);
                    ticket.purchased_at = Some(at);
                    ticket.ledger_entry_id = Some(ledger_entry_id);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn next_sequence_number(&mut self, raffle_id: RaffleId) -> Result<u32, StoreError> {
        Ok(self
            .staged
            .raffle_tickets(raffle_id)
            .map(|t| t.sequence)
            .max()
            .map_or(1, |max| max + 1))
    }

    async fn insert_tickets(&mut self, tickets: &[Ticket]) -> Result<(), StoreError> {
        for ticket in tickets {
            let key = (ticket.raffle_id, ticket.sequence);
            if self.staged.tickets.contains_key(&key) {
                return Err(StoreError::Database(format!(
                    "duplicate ticket {} for raffle {}",
                    ticket.sequence, ticket.raffle_id
                )));
            }
            self.staged.tickets.insert(key, ticket.clone());
        }
        Ok(())
    }

    async fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.staged.tickets.values().find(|t| t.id == id).cloned())
    }

    async fn tickets_for_ledger_entry(
        &mut self,
        ledger_entry_id: LedgerEntryId,
    ) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<_> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.ledger_entry_id == Some(ledger_entry_id))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.sequence);
        Ok(tickets)
    }

    async fn tickets_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .staged
            .raffle_tickets(raffle_id)
            .filter(|t| t.state == state)
            .cloned()
            .collect())
    }

    async fn paid_tickets(&mut self, raffle_id: RaffleId) -> Result<Vec<Ticket>, StoreError> {
        let ledger = &self.staged.ledger;
        Ok(self
            .staged
            .raffle_tickets(raffle_id)
            .filter(|t| t.state == TicketState::Sold)
            .filter(|t| {
                t.ledger_entry_id
                    .and_then(|id| ledger.get(&id))
                    .is_some_and(|e| e.state == LedgerState::Succeeded)
            })
            .cloned()
            .collect())
    }

    async fn tickets_for_owner(
        &mut self,
        owner: UserId,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Ticket>, StoreError> {
        let mut owned: Vec<_> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.owner == Some(owner))
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.purchased_at
                .cmp(&a.purchased_at)
                .then(a.raffle_id.cmp(&b.raffle_id))
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect())
    }

    async fn count_for_owner(&mut self, owner: UserId) -> Result<u64, StoreError> {
        Ok(self
            .staged
            .tickets
            .values()
            .filter(|t| t.owner == Some(owner))
            .count() as u64)
    }

    async fn count_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> Result<u64, StoreError> {
        Ok(self
            .staged
            .raffle_tickets(raffle_id)
            .filter(|t| t.state == state)
            .count() as u64)
    }

    async fn set_ticket_states(
        &mut self,
        ticket_ids: &[TicketId],
        from: TicketState,
        to: TicketState,
    ) -> Result<u64, StoreError> {
        check_ticket_transition(from, to)?;
        let mut changed = 0;
        for id in ticket_ids {
            if let Some(ticket) = self.staged.ticket_mut(*id) {
                if ticket.state == from {
                    ticket.state = to;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn release_tickets(&mut self, ledger_entry_id: LedgerEntryId) -> Result<u64, StoreError> {
        let mut changed = 0;
        for ticket in self.staged.tickets.values_mut() {
            if ticket.ledger_entry_id == Some(ledger_entry_id) && ticket.state == TicketState::Sold
            {
                ticket.state = TicketState::Available;
                ticket.owner = None;
                ticket.purchased_at = None;
                ticket.ledger_entry_id = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn void_available(&mut self, raffle_id: RaffleId) -> Result<u64, StoreError> {
        let mut changed = 0;
        for (_, ticket) in self
            .staged
            .tickets
            .range_mut((raffle_id, 0)..=(raffle_id, u32::MAX))
        {
            if ticket.state == TicketState::Available {
                ticket.state = TicketState::Voided;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl LedgerStore for InMemoryUnitOfWork {
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<bool, StoreError> {
        if self
            .staged
            .ledger
            .values()
            .any(|e| e.idempotency_key == entry.idempotency_key)
        {
            return Ok(false);
        }
        self.staged.ledger.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn ledger_entry(&mut self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.staged.ledger.get(&id).cloned())
    }

    async fn ledger_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .staged
            .ledger
            .values()
            .find(|e| &e.idempotency_key == key)
            .cloned())
    }

    async fn ledger_by_provider_ref(
        &mut self,
        provider_ref: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .staged
            .ledger
            .values()
            .find(|e| e.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn set_provider_ref(
        &mut self,
        id: LedgerEntryId,
        provider_ref: &str,
    ) -> Result<(), StoreError> {
        let entry = self
            .staged
            .ledger
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("ledger entry {id} not found")))?;
        entry.provider_ref = Some(provider_ref.to_string());
        Ok(())
    }

    async fn transition_ledger(
        &mut self,
        id: LedgerEntryId,
        from: LedgerState,
        to: LedgerState,
    ) -> Result<bool, StoreError> {
        check_ledger_transition(from, to)?;
        match self.staged.ledger.get_mut(&id) {
            Some(entry) if entry.state == from => {
                entry.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl WinnerStore for InMemoryUnitOfWork {
    async fn existing_winner_tickets(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> Result<Vec<TicketId>, StoreError> {
        Ok(self
            .staged
            .winners
            .values()
            .filter(|w| ticket_ids.contains(&w.ticket_id))
            .map(|w| w.ticket_id)
            .collect())
    }

    async fn insert_winner(&mut self, winner: &Winner) -> Result<bool, StoreError> {
        if self
            .staged
            .winners
            .values()
            .any(|w| w.ticket_id == winner.ticket_id)
        {
            return Ok(false);
        }
        self.staged.winners.insert(winner.id, winner.clone());
        Ok(true)
    }

    async fn winners_for_raffle(&mut self, raffle_id: RaffleId) -> Result<Vec<Winner>, StoreError> {
        let mut winners: Vec<_> = self
            .staged
            .winners
            .values()
            .filter(|w| w.raffle_id == raffle_id)
            .cloned()
            .collect();
        winners.sort_by_key(|w| self.staged.ticket_sequence(w.ticket_id));
        Ok(winners)
    }

    async fn delete_winners(&mut self, raffle_id: RaffleId) -> Result<Vec<TicketId>, StoreError> {
        let mut freed = Vec::new();
        self.staged.winners.retain(|_, w| {
            if w.raffle_id == raffle_id {
                freed.push(w.ticket_id);
                false
            } else {
                true
            }
        });
        Ok(freed)
    }

    async fn delete_unpaid_winners(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> Result<Vec<TicketId>, StoreError> {
        let mut freed = Vec::new();
        self.staged.winners.retain(|_, w| {
            if w.paid_at.is_none() && ticket_ids.contains(&w.ticket_id) {
                freed.push(w.ticket_id);
                false
            } else {
                true
            }
        });
        Ok(freed)
    }

    async fn unpaid_winners(
        &mut self,
        raffle_id: Option<RaffleId>,
    ) -> Result<Vec<Winner>, StoreError> {
        let mut unpaid: Vec<_> = self
            .staged
            .winners
            .values()
            .filter(|w| w.paid_at.is_none() && raffle_id.is_none_or(|id| w.raffle_id == id))
            .cloned()
            .collect();
        unpaid.sort_by_key(|w| w.created_at);
        Ok(unpaid)
    }

    async fn winner(&mut self, id: WinnerId, _lock: RowLock) -> Result<Option<Winner>, StoreError> {
        Ok(self.staged.winners.get(&id).cloned())
    }

    async fn mark_winner_paid(
        &mut self,
        id: WinnerId,
        at: DateTime<Utc>,
        payout_ref: &str,
    ) -> Result<bool, StoreError> {
        match self.staged.winners.get_mut(&id) {
            Some(winner) if winner.paid_at.is_none() => {
                winner.paid_at = Some(at);
                winner.payout_ref = Some(payout_ref.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures::RaffleFixture;

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(3, 1).seed(&store).await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.void_available(raffle.id).await.unwrap();
        }

        assert_eq!(
            store.count_tickets(raffle.id, TicketState::Available).await,
            3
        );
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(3, 1).seed(&store).await;

        let mut uow = store.begin().await.unwrap();
        uow.void_available(raffle.id).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.count_tickets(raffle.id, TicketState::Voided).await, 3);
    }

    #[tokio::test]
    async fn reservation_takes_lowest_sequence_numbers() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(5, 1).seed(&store).await;

        let mut uow = store.begin().await.unwrap();
        let reserved = uow.reserve_available(raffle.id, 2).await.unwrap();
        let numbers: Vec<_> = reserved.iter().map(|t| t.sequence).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(uow.next_sequence_number(raffle.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn illegal_ticket_transition_is_refused() {
        let store = InMemoryStore::new();
        let raffle = RaffleFixture::active(2, 1).seed(&store).await;
        let ids: Vec<_> = store.tickets(raffle.id).await.iter().map(|t| t.id).collect();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .set_ticket_states(&ids, TicketState::Voided, TicketState::Available)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { kind: "ticket", .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unavailable_store_refuses_to_begin() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.begin().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
