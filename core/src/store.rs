//! Durable storage seams: raffles, inventory, ledger and winners.
//!
//! All mutations happen through a [`UnitOfWork`] obtained from a [`Store`].
//! A unit of work is a single database transaction: it either commits every
//! write made through it or none of them. Dropping a unit of work without
//! calling [`UnitOfWork::commit`] rolls it back, so every early return and
//! every panic releases its row locks.

use crate::types::{
    IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerState, Raffle, RaffleId, RaffleState,
    Ticket, TicketId, TicketState, UserId, Winner, WinnerId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

/// Errors raised by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Query failed
    #[error("Database error: {0}")]
    Database(String),

    /// A row could not be mapped back into a domain value
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The store could not be reached (pool exhausted, connection refused)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The transaction lost a serialization race or a deadlock
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// A compare-and-set asked for a state change the lifecycle forbids
    #[error("Illegal {kind} transition: {from} -> {to}")]
    IllegalTransition {
        /// Which lifecycle
        kind: &'static str,
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },
}

impl StoreError {
    /// Whether retrying the whole unit of work may succeed.
    ///
    /// Only outages and lost transaction races qualify. Constraint
    /// violations, decode failures and other query errors fail the same way
    /// on every attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

/// Refuse a ticket compare-and-set the lifecycle forbids.
///
/// # Errors
///
/// Returns [`StoreError::IllegalTransition`] unless `from -> to` is legal.
pub const fn check_ticket_transition(from: TicketState, to: TicketState) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            kind: "ticket",
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Refuse a ledger compare-and-set the lifecycle forbids.
///
/// # Errors
///
/// Returns [`StoreError::IllegalTransition`] unless `from -> to` is legal.
pub const fn check_ledger_transition(from: LedgerState, to: LedgerState) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            kind: "ledger",
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Row-lock mode for reads inside a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// Plain read
    None,
    /// Shared lock: blocks writers of the row, not other readers
    Share,
    /// Exclusive lock
    Update,
}

/// Factory for units of work.
pub trait Store: Send + Sync + Clone + 'static {
    /// The transaction type
    type UnitOfWork: UnitOfWork;

    /// Open a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be acquired.
    fn begin(&self) -> impl Future<Output = Result<Self::UnitOfWork, StoreError>> + Send;
}

/// A scoped transaction spanning every store.
pub trait UnitOfWork: RaffleStore + InventoryStore + LedgerStore + WinnerStore + Send {
    /// Make every write visible atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails; nothing is applied then.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write and release all locks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the rollback could not be sent. The
    /// transaction is discarded either way.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Raffle metadata and lifecycle.
pub trait RaffleStore {
    /// Insert a new raffle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn insert_raffle(&mut self, raffle: &Raffle)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load a raffle, optionally locking its row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn raffle(
        &mut self,
        id: RaffleId,
        lock: RowLock,
    ) -> impl Future<Output = Result<Option<Raffle>, StoreError>> + Send;

    /// One page of raffles, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn list_raffles(
        &mut self,
        offset: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Raffle>, StoreError>> + Send;

    /// Number of raffles.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn count_raffles(&mut self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Active raffles whose `ends_at` is at or before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn active_raffles_ending_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Raffle>, StoreError>> + Send;

    /// Compare-and-set the raffle state. Returns `false` if the raffle was
    /// not in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn set_raffle_state(
        &mut self,
        id: RaffleId,
        from: RaffleState,
        to: RaffleState,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Numbered ticket inventory.
pub trait InventoryStore {
    /// Lock up to `quantity` available tickets of the raffle, lowest sequence
    /// numbers first. Rows locked by a concurrent unit of work are never
    /// returned. May return fewer than `quantity` tickets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn reserve_available(
        &mut self,
        raffle_id: RaffleId,
        quantity: u32,
    ) -> impl Future<Output = Result<Vec<Ticket>, StoreError>> + Send;

    /// Mark reserved tickets `sold` to `owner` under `ledger_entry_id`.
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn bulk_mark_sold(
        &mut self,
        ticket_ids: &[TicketId],
        owner: UserId,
        ledger_entry_id: LedgerEntryId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Highest existing sequence number plus one (1 for an empty raffle).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn next_sequence_number(
        &mut self,
        raffle_id: RaffleId,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// Insert freshly provisioned tickets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure, including a duplicate
    /// `(raffle, sequence)` pair.
    fn insert_tickets(
        &mut self,
        tickets: &[Ticket],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load a single ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn ticket(
        &mut self,
        id: TicketId,
    ) -> impl Future<Output = Result<Option<Ticket>, StoreError>> + Send;

    /// Tickets paid for by a ledger entry, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn tickets_for_ledger_entry(
        &mut self,
        ledger_entry_id: LedgerEntryId,
    ) -> impl Future<Output = Result<Vec<Ticket>, StoreError>> + Send;

    /// Tickets of a raffle in `state`, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn tickets_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> impl Future<Output = Result<Vec<Ticket>, StoreError>> + Send;

    /// `sold` tickets of a raffle whose ledger entry has `succeeded`,
    /// ordered by sequence number. Only these tickets may win.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn paid_tickets(
        &mut self,
        raffle_id: RaffleId,
    ) -> impl Future<Output = Result<Vec<Ticket>, StoreError>> + Send;

    /// One page of a user's tickets across raffles, most recent purchase
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn tickets_for_owner(
        &mut self,
        owner: UserId,
        offset: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Ticket>, StoreError>> + Send;

    /// Number of tickets a user owns across raffles.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn count_for_owner(
        &mut self,
        owner: UserId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Number of tickets of a raffle in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn count_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Compare-and-set the state of several tickets. Only rows currently in
    /// `from` change. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] if `from -> to` is not a
    /// legal ticket transition, or [`StoreError`] on write failure.
    fn set_ticket_states(
        &mut self,
        ticket_ids: &[TicketId],
        from: TicketState,
        to: TicketState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Return the `sold` tickets of a ledger entry to `available`, clearing
    /// owner, purchase time and ledger link.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn release_tickets(
        &mut self,
        ledger_entry_id: LedgerEntryId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Void every `available` ticket of the raffle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn void_available(
        &mut self,
        raffle_id: RaffleId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

/// Money-movement records.
pub trait LedgerStore {
    /// Insert a ledger entry. Returns `false` without writing if an entry
    /// with the same idempotency key already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn insert_ledger_entry(
        &mut self,
        entry: &LedgerEntry,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Load an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn ledger_entry(
        &mut self,
        id: LedgerEntryId,
    ) -> impl Future<Output = Result<Option<LedgerEntry>, StoreError>> + Send;

    /// Look up an entry by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn ledger_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<Option<LedgerEntry>, StoreError>> + Send;

    /// Look up an entry by the provider's charge reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn ledger_by_provider_ref(
        &mut self,
        provider_ref: &str,
    ) -> impl Future<Output = Result<Option<LedgerEntry>, StoreError>> + Send;

    /// Attach the provider's charge reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn set_provider_ref(
        &mut self,
        id: LedgerEntryId,
        provider_ref: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Compare-and-set the entry state. Returns `false` if the entry was not
    /// in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] if `from -> to` is not a
    /// legal ledger transition, or [`StoreError`] on write failure.
    fn transition_ledger(
        &mut self,
        id: LedgerEntryId,
        from: LedgerState,
        to: LedgerState,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Winner records.
pub trait WinnerStore {
    /// Which of `ticket_ids` already have a winner row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn existing_winner_tickets(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> impl Future<Output = Result<Vec<TicketId>, StoreError>> + Send;

    /// Insert a winner. Returns `false` without writing if the ticket already
    /// has a winner row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn insert_winner(
        &mut self,
        winner: &Winner,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Winners of a raffle, ordered by ticket sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn winners_for_raffle(
        &mut self,
        raffle_id: RaffleId,
    ) -> impl Future<Output = Result<Vec<Winner>, StoreError>> + Send;

    /// Delete every winner row of a raffle, returning the freed ticket ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn delete_winners(
        &mut self,
        raffle_id: RaffleId,
    ) -> impl Future<Output = Result<Vec<TicketId>, StoreError>> + Send;

    /// Delete the unpaid winner rows of `ticket_ids`, returning the freed
    /// ticket ids. Paid rows are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn delete_unpaid_winners(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> impl Future<Output = Result<Vec<TicketId>, StoreError>> + Send;

    /// Winners not yet paid, optionally limited to one raffle, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn unpaid_winners(
        &mut self,
        raffle_id: Option<RaffleId>,
    ) -> impl Future<Output = Result<Vec<Winner>, StoreError>> + Send;

    /// Load a winner, optionally locking its row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    fn winner(
        &mut self,
        id: WinnerId,
        lock: RowLock,
    ) -> impl Future<Output = Result<Option<Winner>, StoreError>> + Send;

    /// Set the payout time and reference if the winner is still unpaid.
    /// Returns `false` if it was already paid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    fn mark_winner_paid(
        &mut self,
        id: WinnerId,
        at: DateTime<Utc>,
        payout_ref: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
