//! `PostgreSQL` store for the rifa engine.
//!
//! [`PostgresStore`] hands out [`PgUnitOfWork`]s, each wrapping one database
//! transaction at the default READ COMMITTED isolation. Concurrency control
//! relies on row locks rather than serializable retries:
//!
//! - ticket reservation uses `FOR UPDATE SKIP LOCKED`, so concurrent buyers
//!   take disjoint tickets without waiting on each other
//! - raffle and winner reads can take `FOR SHARE` / `FOR UPDATE` locks
//! - inserts guarded by a unique key use `ON CONFLICT DO NOTHING` and report
//!   whether the row was written
//! - state changes are compare-and-set `UPDATE ... WHERE state = $from`
//!
//! # Example
//!
//! ```no_run
//! use rifa_postgres::{PoolSettings, PostgresStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/rifa", &PoolSettings::default()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod inventory;
mod ledger;
mod raffle;
mod rows;
mod winner;

use rifa_core::store::{RowLock, Store, StoreError, UnitOfWork};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long `begin` waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL`-backed [`Store`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        tracing::info!(
            max_connections = settings.max_connections,
            "PostgreSQL pool ready"
        );
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

impl Store for PostgresStore {
    type UnitOfWork = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(PgUnitOfWork { tx })
    }
}

/// One `PostgreSQL` transaction.
///
/// Dropping it without [`UnitOfWork::commit`] rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(db_error)
    }
}

/// SQLSTATE of a serialization failure.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE of a detected deadlock.
const DEADLOCK_DETECTED: &str = "40P01";

/// Map a driver error onto the store taxonomy.
///
/// Outages become [`StoreError::Unavailable`] and lost transaction races
/// become [`StoreError::Conflict`]; both are retryable. Everything else is a
/// plain [`StoreError::Database`].
pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            metrics::counter!("rifa_store_unavailable_total").increment(1);
            StoreError::Unavailable(error.to_string())
        }
        sqlx::Error::Database(ref db) if is_conflict(db.code().as_deref()) => {
            metrics::counter!("rifa_store_conflicts_total").increment(1);
            StoreError::Conflict(error.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

fn is_conflict(sqlstate: Option<&str>) -> bool {
    matches!(sqlstate, Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED))
}

/// SQL suffix for a row-lock mode.
pub(crate) const fn lock_clause(lock: RowLock) -> &'static str {
    match lock {
        RowLock::None => "",
        RowLock::Share => " FOR SHARE",
        RowLock::Update => " FOR UPDATE",
    }
}
