//! Ledger rows.

use crate::rows::{self, LEDGER_COLUMNS, money_to_sql};
use crate::{PgUnitOfWork, db_error};
use rifa_core::store::{LedgerStore, StoreError, check_ledger_transition};
use rifa_core::types::{IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerState};

impl PgUnitOfWork {
    async fn ledger_where(
        &mut self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE {predicate} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(rows::ledger_entry).transpose()
    }
}

impl LedgerStore for PgUnitOfWork {
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<bool, StoreError> {
        // a concurrent insert of the same key blocks here until the other
        // transaction finishes, then reports the conflict
        let result = sqlx::query(
            r"
            INSERT INTO ledger_entries (
                id, kind, user_id, amount, currency, provider, provider_ref,
                idempotency_key, state, failure_reason, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.user_id.as_uuid())
        .bind(money_to_sql(entry.amount)?)
        .bind(&entry.currency)
        .bind(&entry.provider)
        .bind(entry.provider_ref.as_deref())
        .bind(entry.idempotency_key.as_str())
        .bind(entry.state.as_str())
        .bind(entry.failure_reason.as_deref())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            tracing::debug!(idempotency_key = %entry.idempotency_key, "Ledger key already present");
        }
        Ok(inserted)
    }

    async fn ledger_entry(&mut self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(rows::ledger_entry).transpose()
    }

    async fn ledger_by_key(&mut self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>, StoreError> {
        self.ledger_where("idempotency_key", key.as_str()).await
    }

    async fn ledger_by_provider_ref(
        &mut self,
        provider_ref: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.ledger_where("provider_ref", provider_ref).await
    }

    async fn set_provider_ref(
        &mut self,
        id: LedgerEntryId,
        provider_ref: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE ledger_entries SET provider_ref = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(provider_ref)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn transition_ledger(
        &mut self,
        id: LedgerEntryId,
        from: LedgerState,
        to: LedgerState,
    ) -> Result<bool, StoreError> {
        check_ledger_transition(from, to)?;
        let result =
            sqlx::query("UPDATE ledger_entries SET state = $3 WHERE id = $1 AND state = $2")
                .bind(id.as_uuid())
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}
