//! Raffle rows.

use crate::rows::{self, RAFFLE_COLUMNS, money_to_sql, offset_to_sql, u32_to_sql};
use crate::{PgUnitOfWork, db_error, lock_clause};
use chrono::{DateTime, Utc};
use rifa_core::store::{RaffleStore, RowLock, StoreError};
use rifa_core::types::{Raffle, RaffleId, RaffleState};

impl RaffleStore for PgUnitOfWork {
    async fn insert_raffle(&mut self, raffle: &Raffle) -> Result<(), StoreError> {
        let category = &raffle.category;
        sqlx::query(
            r"
            INSERT INTO raffles (
                id, name, category_name, ticket_price, rake_bps, prize_fund, prize_per_winner,
                lottery_id, total_tickets, winner_count, starts_at, ends_at, state, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(raffle.id.as_uuid())
        .bind(&raffle.name)
        .bind(&category.name)
        .bind(money_to_sql(category.ticket_price)?)
        .bind(u32_to_sql(category.rake_bps, "rake_bps")?)
        .bind(category.prize_fund.map(money_to_sql).transpose()?)
        .bind(category.prize_per_winner.map(money_to_sql).transpose()?)
        .bind(raffle.lottery_id.as_str())
        .bind(u32_to_sql(raffle.total_tickets, "total_tickets")?)
        .bind(u32_to_sql(raffle.winner_count, "winner_count")?)
        .bind(raffle.starts_at)
        .bind(raffle.ends_at)
        .bind(raffle.state.as_str())
        .bind(raffle.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn raffle(&mut self, id: RaffleId, lock: RowLock) -> Result<Option<Raffle>, StoreError> {
        let sql = format!(
            "SELECT {RAFFLE_COLUMNS} FROM raffles WHERE id = $1{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(rows::raffle).transpose()
    }

    async fn list_raffles(&mut self, offset: u64, limit: u32) -> Result<Vec<Raffle>, StoreError> {
        let sql = format!(
            "SELECT {RAFFLE_COLUMNS} FROM raffles ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
        );
        let found = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(offset_to_sql(offset)?)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::raffle).collect()
    }

    async fn count_raffles(&mut self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raffles")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        u64::try_from(count).map_err(|e| StoreError::Corrupt(format!("count: {e}")))
    }

    async fn active_raffles_ending_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Raffle>, StoreError> {
        let sql = format!(
            "SELECT {RAFFLE_COLUMNS} FROM raffles \
             WHERE state = 'active' AND ends_at <= $1 ORDER BY ends_at"
        );
        let found = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        found.iter().map(rows::raffle).collect()
    }

    async fn set_raffle_state(
        &mut self,
        id: RaffleId,
        from: RaffleState,
        to: RaffleState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE raffles SET state = $3 WHERE id = $1 AND state = $2")
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}
