//! Ticket rows.

use crate::rows::{self, TICKET_COLUMNS, money_to_sql, offset_to_sql, u32_to_sql, uuids};
use crate::{PgUnitOfWork, db_error};
use chrono::{DateTime, Utc};
use rifa_core::store::{InventoryStore, StoreError, check_ticket_transition};
use rifa_core::types::{LedgerEntryId, RaffleId, Ticket, TicketId, TicketState, UserId};

impl InventoryStore for PgUnitOfWork {
    async fn reserve_available(
        &mut self,
        raffle_id: RaffleId,
        quantity: u32,
    ) -> Result<Vec<Ticket>, StoreError> {
        // rows locked by concurrent buyers are skipped, not waited on
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE raffle_id = $1 AND state = 'available' \
             ORDER BY sequence LIMIT $2 FOR UPDATE SKIP LOCKED"
        );
        let found = sqlx::query(&sql)
            .bind(raffle_id.as_uuid())
            .bind(i64::from(quantity))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::ticket).collect()
    }

    async fn bulk_mark_sold(
        &mut self,
        ticket_ids: &[TicketId],
        owner: UserId,
        ledger_entry_id: LedgerEntryId,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE tickets
            SET state = 'sold', owner_id = $2, ledger_entry_id = $3, purchased_at = $4
            WHERE id = ANY($1) AND state = 'available'
            ",
        )
        .bind(uuids(ticket_ids, |id| *id.as_uuid()))
        .bind(owner.as_uuid())
        .bind(ledger_entry_id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn next_sequence_number(&mut self, raffle_id: RaffleId) -> Result<u32, StoreError> {
        let next: i32 =
            sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) + 1 FROM tickets WHERE raffle_id = $1")
                .bind(raffle_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(db_error)?;
        u32::try_from(next).map_err(|e| StoreError::Corrupt(format!("sequence: {e}")))
    }

    async fn insert_tickets(&mut self, tickets: &[Ticket]) -> Result<(), StoreError> {
        if tickets.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(tickets.len());
        let mut raffle_ids = Vec::with_capacity(tickets.len());
        let mut sequences = Vec::with_capacity(tickets.len());
        let mut states = Vec::with_capacity(tickets.len());
        let mut prices = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            ids.push(*ticket.id.as_uuid());
            raffle_ids.push(*ticket.raffle_id.as_uuid());
            sequences.push(u32_to_sql(ticket.sequence, "sequence")?);
            states.push(ticket.state.as_str());
            prices.push(money_to_sql(ticket.price)?);
        }

        sqlx::query(
            r"
            INSERT INTO tickets (id, raffle_id, sequence, state, price)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::int4[], $4::text[], $5::int8[])
            ",
        )
        .bind(ids)
        .bind(raffle_ids)
        .bind(sequences)
        .bind(states)
        .bind(prices)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(rows::ticket).transpose()
    }

    async fn tickets_for_ledger_entry(
        &mut self,
        ledger_entry_id: LedgerEntryId,
    ) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ledger_entry_id = $1 ORDER BY sequence"
        );
        let found = sqlx::query(&sql)
            .bind(ledger_entry_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::ticket).collect()
    }

    async fn tickets_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE raffle_id = $1 AND state = $2 ORDER BY sequence"
        );
        let found = sqlx::query(&sql)
            .bind(raffle_id.as_uuid())
            .bind(state.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::ticket).collect()
    }

    async fn paid_tickets(&mut self, raffle_id: RaffleId) -> Result<Vec<Ticket>, StoreError> {
        let found = sqlx::query(
            r"
            SELECT t.id, t.raffle_id, t.sequence, t.state, t.owner_id, t.purchased_at,
                   t.ledger_entry_id, t.price
            FROM tickets t
            JOIN ledger_entries l ON l.id = t.ledger_entry_id
            WHERE t.raffle_id = $1 AND t.state = 'sold' AND l.state = 'succeeded'
            ORDER BY t.sequence
            ",
        )
        .bind(raffle_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        found.iter().map(rows::ticket).collect()
    }

    async fn tickets_for_owner(
        &mut self,
        owner: UserId,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE owner_id = $1 \
             ORDER BY purchased_at DESC, raffle_id, sequence LIMIT $2 OFFSET $3"
        );
        let found = sqlx::query(&sql)
            .bind(owner.as_uuid())
            .bind(i64::from(limit))
            .bind(offset_to_sql(offset)?)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::ticket).collect()
    }

    async fn count_for_owner(&mut self, owner: UserId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE owner_id = $1")
            .bind(owner.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        u64::try_from(count).map_err(|e| StoreError::Corrupt(format!("count: {e}")))
    }

    async fn count_in_state(
        &mut self,
        raffle_id: RaffleId,
        state: TicketState,
    ) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE raffle_id = $1 AND state = $2")
                .bind(raffle_id.as_uuid())
                .bind(state.as_str())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(db_error)?;
        u64::try_from(count).map_err(|e| StoreError::Corrupt(format!("count: {e}")))
    }

    async fn set_ticket_states(
        &mut self,
        ticket_ids: &[TicketId],
        from: TicketState,
        to: TicketState,
    ) -> Result<u64, StoreError> {
        check_ticket_transition(from, to)?;
        let result =
            sqlx::query("UPDATE tickets SET state = $3 WHERE id = ANY($1) AND state = $2")
                .bind(uuids(ticket_ids, |id| *id.as_uuid()))
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn release_tickets(&mut self, ledger_entry_id: LedgerEntryId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE tickets
            SET state = 'available', owner_id = NULL, purchased_at = NULL, ledger_entry_id = NULL
            WHERE ledger_entry_id = $1 AND state = 'sold'
            ",
        )
        .bind(ledger_entry_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn void_available(&mut self, raffle_id: RaffleId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET state = 'voided' WHERE raffle_id = $1 AND state = 'available'",
        )
        .bind(raffle_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
