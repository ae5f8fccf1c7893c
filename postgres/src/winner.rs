//! Winner rows.

use crate::rows::{self, WINNER_COLUMNS, money_to_sql, uuids};
use crate::{PgUnitOfWork, db_error, lock_clause};
use chrono::{DateTime, Utc};
use rifa_core::store::{RowLock, StoreError, WinnerStore};
use rifa_core::types::{RaffleId, TicketId, Winner, WinnerId};
use uuid::Uuid;

impl WinnerStore for PgUnitOfWork {
    async fn existing_winner_tickets(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> Result<Vec<TicketId>, StoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT ticket_id FROM winners WHERE ticket_id = ANY($1)")
                .bind(uuids(ticket_ids, |id| *id.as_uuid()))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(db_error)?;
        Ok(ids.into_iter().map(TicketId::from_uuid).collect())
    }

    async fn insert_winner(&mut self, winner: &Winner) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO winners (
                id, raffle_id, ticket_id, prize_tier, amount, paid_at, payout_ref, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ticket_id) DO NOTHING
            ",
        )
        .bind(winner.id.as_uuid())
        .bind(winner.raffle_id.as_uuid())
        .bind(winner.ticket_id.as_uuid())
        .bind(&winner.prize_tier)
        .bind(money_to_sql(winner.amount)?)
        .bind(winner.paid_at)
        .bind(winner.payout_ref.as_deref())
        .bind(winner.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn winners_for_raffle(&mut self, raffle_id: RaffleId) -> Result<Vec<Winner>, StoreError> {
        let found = sqlx::query(
            r"
            SELECT w.id, w.raffle_id, w.ticket_id, w.prize_tier, w.amount, w.paid_at,
                   w.payout_ref, w.created_at
            FROM winners w
            JOIN tickets t ON t.id = w.ticket_id
            WHERE w.raffle_id = $1
            ORDER BY t.sequence
            ",
        )
        .bind(raffle_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        found.iter().map(rows::winner).collect()
    }

    async fn delete_winners(&mut self, raffle_id: RaffleId) -> Result<Vec<TicketId>, StoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM winners WHERE raffle_id = $1 RETURNING ticket_id")
                .bind(raffle_id.as_uuid())
                .fetch_all(&mut *self.tx)
                .await
                .map_err(db_error)?;
        Ok(ids.into_iter().map(TicketId::from_uuid).collect())
    }

    async fn delete_unpaid_winners(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> Result<Vec<TicketId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM winners WHERE ticket_id = ANY($1) AND paid_at IS NULL RETURNING ticket_id",
        )
        .bind(uuids(ticket_ids, |id| *id.as_uuid()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(ids.into_iter().map(TicketId::from_uuid).collect())
    }

    async fn unpaid_winners(&mut self, raffle_id: Option<RaffleId>) -> Result<Vec<Winner>, StoreError> {
        let sql = format!(
            "SELECT {WINNER_COLUMNS} FROM winners \
             WHERE paid_at IS NULL AND ($1::uuid IS NULL OR raffle_id = $1) \
             ORDER BY created_at, id"
        );
        let found = sqlx::query(&sql)
            .bind(raffle_id.map(|id| *id.as_uuid()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::winner).collect()
    }

    async fn winner(&mut self, id: WinnerId, lock: RowLock) -> Result<Option<Winner>, StoreError> {
        let sql = format!(
            "SELECT {WINNER_COLUMNS} FROM winners WHERE id = $1{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(rows::winner).transpose()
    }

    async fn mark_winner_paid(
        &mut self,
        id: WinnerId,
        at: DateTime<Utc>,
        payout_ref: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE winners SET paid_at = $2, payout_ref = $3 WHERE id = $1 AND paid_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(payout_ref)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}
