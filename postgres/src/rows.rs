//! Row decoding and integer conversions.
//!
//! Money and counts are unsigned in the domain and signed in SQL; every
//! crossing is checked.

use rifa_core::store::StoreError;
use rifa_core::types::{
    Category, IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerKind, LedgerState, LotteryId,
    Money, Raffle, RaffleId, RaffleState, Ticket, TicketId, TicketState, UserId, Winner, WinnerId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) const RAFFLE_COLUMNS: &str = "id, name, category_name, ticket_price, rake_bps, \
     prize_fund, prize_per_winner, lottery_id, total_tickets, winner_count, starts_at, ends_at, \
     state, created_at";

pub(crate) const TICKET_COLUMNS: &str =
    "id, raffle_id, sequence, state, owner_id, purchased_at, ledger_entry_id, price";

pub(crate) const LEDGER_COLUMNS: &str = "id, kind, user_id, amount, currency, provider, \
     provider_ref, idempotency_key, state, failure_reason, created_at";

pub(crate) const WINNER_COLUMNS: &str =
    "id, raffle_id, ticket_id, prize_tier, amount, paid_at, payout_ref, created_at";

fn corrupt(column: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {error}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(|e| corrupt(column, e))
}

pub(crate) fn offset_to_sql(offset: u64) -> Result<i64, StoreError> {
    i64::try_from(offset).map_err(|e| corrupt("offset", e))
}

pub(crate) fn money_to_sql(money: Money) -> Result<i64, StoreError> {
    i64::try_from(money.minor_units()).map_err(|e| corrupt("amount", e))
}

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    let raw: i64 = get(row, column)?;
    u64::try_from(raw)
        .map(Money::from_minor)
        .map_err(|e| corrupt(column, e))
}

fn optional_money(row: &PgRow, column: &str) -> Result<Option<Money>, StoreError> {
    let raw: Option<i64> = get(row, column)?;
    raw.map(|v| u64::try_from(v).map(Money::from_minor).map_err(|e| corrupt(column, e)))
        .transpose()
}

pub(crate) fn u32_to_sql(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|e| corrupt(column, e))
}

fn unsigned(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let raw: i32 = get(row, column)?;
    u32::try_from(raw).map_err(|e| corrupt(column, e))
}

pub(crate) fn raffle(row: &PgRow) -> Result<Raffle, StoreError> {
    let state: String = get(row, "state")?;
    Ok(Raffle {
        id: RaffleId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        category: Category {
            name: get(row, "category_name")?,
            ticket_price: money(row, "ticket_price")?,
            rake_bps: unsigned(row, "rake_bps")?,
            prize_fund: optional_money(row, "prize_fund")?,
            prize_per_winner: optional_money(row, "prize_per_winner")?,
        },
        lottery_id: LotteryId::new(get::<String>(row, "lottery_id")?),
        total_tickets: unsigned(row, "total_tickets")?,
        winner_count: unsigned(row, "winner_count")?,
        starts_at: get(row, "starts_at")?,
        ends_at: get(row, "ends_at")?,
        state: RaffleState::parse(&state).map_err(|e| corrupt("state", e))?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    let state: String = get(row, "state")?;
    Ok(Ticket {
        id: TicketId::from_uuid(get(row, "id")?),
        raffle_id: RaffleId::from_uuid(get(row, "raffle_id")?),
        sequence: unsigned(row, "sequence")?,
        state: TicketState::parse(&state).map_err(|e| corrupt("state", e))?,
        owner: get::<Option<Uuid>>(row, "owner_id")?.map(UserId::from_uuid),
        purchased_at: get(row, "purchased_at")?,
        ledger_entry_id: get::<Option<Uuid>>(row, "ledger_entry_id")?.map(LedgerEntryId::from_uuid),
        price: money(row, "price")?,
    })
}

pub(crate) fn ledger_entry(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind: String = get(row, "kind")?;
    let state: String = get(row, "state")?;
    let key: String = get(row, "idempotency_key")?;
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(get(row, "id")?),
        kind: LedgerKind::parse(&kind).map_err(|e| corrupt("kind", e))?,
        user_id: UserId::from_uuid(get(row, "user_id")?),
        amount: money(row, "amount")?,
        currency: get(row, "currency")?,
        provider: get(row, "provider")?,
        provider_ref: get(row, "provider_ref")?,
        idempotency_key: IdempotencyKey::from_stored(key)
            .map_err(|e| corrupt("idempotency_key", e))?,
        state: LedgerState::parse(&state).map_err(|e| corrupt("state", e))?,
        failure_reason: get(row, "failure_reason")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn winner(row: &PgRow) -> Result<Winner, StoreError> {
    Ok(Winner {
        id: WinnerId::from_uuid(get(row, "id")?),
        raffle_id: RaffleId::from_uuid(get(row, "raffle_id")?),
        ticket_id: TicketId::from_uuid(get(row, "ticket_id")?),
        prize_tier: get(row, "prize_tier")?,
        amount: money(row, "amount")?,
        paid_at: get(row, "paid_at")?,
        payout_ref: get(row, "payout_ref")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn uuids<T>(ids: &[T], as_uuid: impl Fn(&T) -> Uuid) -> Vec<Uuid> {
    ids.iter().map(as_uuid).collect()
}
