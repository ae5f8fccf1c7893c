//! Domain types for the raffle engine.
//!
//! Value objects (identifiers, [`Money`], [`IdempotencyKey`]), lifecycle states
//! and the four persisted entities: [`Raffle`], [`Ticket`], [`LedgerEntry`] and
//! [`Winner`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a raffle
    RaffleId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a ledger entry
    LedgerEntryId
);
uuid_id!(
    /// Unique identifier for a winner record
    WinnerId
);
uuid_id!(
    /// Unique identifier for a user (owned by the identity system)
    UserId
);

/// Identifier of an external lottery whose draw decides a raffle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotteryId(String);

impl LotteryId {
    /// Creates a lottery identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LotteryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Idempotency key
// ============================================================================

/// Maximum length of an idempotency key (matches the ledger column width).
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Prefix of the keys the engine mints for payout ledger entries.
pub const PAYOUT_KEY_PREFIX: &str = "payout:";

/// Rejected idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdempotencyKey {
    /// Key is empty or only whitespace.
    #[error("idempotency key must not be empty")]
    Empty,
    /// Key exceeds [`MAX_IDEMPOTENCY_KEY_LEN`].
    #[error("idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} characters")]
    TooLong,
    /// Key uses a prefix the engine mints for its own ledger entries.
    #[error("idempotency key must not start with \"{PAYOUT_KEY_PREFIX}\"")]
    Reserved,
}

/// Caller-supplied key guaranteeing a money movement is applied at most once.
///
/// Keys are globally unique across the ledger and immutable once a ledger
/// entry has been written with them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a caller-supplied key.
    ///
    /// Caller keys share the ledger's unique namespace with payout keys, so
    /// the payout prefix is refused here.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdempotencyKey`] if the key is blank, too long or
    /// starts with [`PAYOUT_KEY_PREFIX`].
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidIdempotencyKey> {
        let key = Self::from_stored(raw)?;
        if key.0.trim_start().starts_with(PAYOUT_KEY_PREFIX) {
            return Err(InvalidIdempotencyKey::Reserved);
        }
        Ok(key)
    }

    /// Key used for the ledger entry recording a winner's payout.
    #[must_use]
    pub fn for_payout(winner_id: WinnerId) -> Self {
        Self(format!("{PAYOUT_KEY_PREFIX}{winner_id}"))
    }

    /// Rebuild a key read back from storage, where payout keys are legal.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdempotencyKey`] if the key is blank or too long.
    pub fn from_stored(raw: impl Into<String>) -> Result<Self, InvalidIdempotencyKey> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidIdempotencyKey::Empty);
        }
        if raw.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(InvalidIdempotencyKey::TooLong);
        }
        Ok(Self(raw))
    }

    /// Whether the engine minted this key for a payout.
    #[must_use]
    pub fn is_payout(&self) -> bool {
        self.0.starts_with(PAYOUT_KEY_PREFIX)
    }

    /// Borrow the raw key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = InvalidIdempotencyKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount in the currency's minor unit (whole pesos for COP).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Takes `basis_points / 10_000` of the amount, rounding down.
    #[must_use]
    pub const fn checked_share(self, basis_points: u32) -> Option<Self> {
        match self.0.checked_mul(basis_points as u64) {
            Some(product) => Some(Self(product / 10_000)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lifecycle states
// ============================================================================

/// A stored state string that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

/// Lifecycle state of a raffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaffleState {
    /// Created, not yet selling
    Pending,
    /// Selling tickets
    Active,
    /// Winners assigned
    Closed,
    /// Abandoned; unsold tickets voided
    Cancelled,
}

impl RaffleState {
    /// Convert state to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse state from database string.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known state.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant {
                kind: "raffle state",
                value: s.to_string(),
            }),
        }
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    ///
    /// Transitions are monotonic: nothing leaves `closed` or `cancelled`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active | Self::Cancelled)
                | (Self::Active, Self::Closed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RaffleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Purchasable
    Available,
    /// Owned by a user
    Sold,
    /// Sold and matched a prize tier
    Winner,
    /// Withdrawn from sale (terminal)
    Voided,
}

impl TicketState {
    /// Convert state to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Sold => "sold",
            Self::Winner => "winner",
            Self::Voided => "voided",
        }
    }

    /// Parse state from database string.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known state.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "available" => Ok(Self::Available),
            "sold" => Ok(Self::Sold),
            "winner" => Ok(Self::Winner),
            "voided" => Ok(Self::Voided),
            _ => Err(UnknownVariant {
                kind: "ticket state",
                value: s.to_string(),
            }),
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `sold -> available` only happens when an asynchronously failed charge
    /// releases its reservation; `winner -> sold` only during recalculation.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Sold | Self::Voided)
                | (Self::Sold, Self::Winner | Self::Available)
                | (Self::Winner, Self::Sold)
        )
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// Charge created, outcome unknown
    Pending,
    /// Money moved
    Succeeded,
    /// Charge rejected
    Failed,
    /// Money returned after success
    Refunded,
}

impl LedgerState {
    /// Convert state to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse state from database string.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known state.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(UnknownVariant {
                kind: "ledger state",
                value: s.to_string(),
            }),
        }
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded | Self::Failed) | (Self::Succeeded, Self::Refunded)
        )
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Customer paid for tickets
    Purchase,
    /// Prize paid to a winner
    Payout,
}

impl LedgerKind {
    /// Convert kind to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Payout => "payout",
        }
    }

    /// Parse kind from database string.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "payout" => Ok(Self::Payout),
            _ => Err(UnknownVariant {
                kind: "ledger kind",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Pricing and prize-fund rules shared by raffles of the same category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category name
    pub name: String,
    /// Price of a single ticket
    pub ticket_price: Money,
    /// House share of sales, in basis points
    pub rake_bps: u32,
    /// Advertised prize fund, if fixed
    pub prize_fund: Option<Money>,
    /// Advertised prize per winner, if fixed
    pub prize_per_winner: Option<Money>,
}

impl Category {
    /// Category with only a ticket price.
    #[must_use]
    pub fn priced(name: impl Into<String>, ticket_price: Money) -> Self {
        Self {
            name: name.into(),
            ticket_price,
            rake_bps: 0,
            prize_fund: None,
            prize_per_winner: None,
        }
    }
}

/// A time-boxed draw against a fixed pool of numbered tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raffle {
    /// Raffle ID
    pub id: RaffleId,
    /// Display name
    pub name: String,
    /// Pricing rules
    pub category: Category,
    /// Lottery whose draw decides the winners
    pub lottery_id: LotteryId,
    /// Fixed at creation
    pub total_tickets: u32,
    /// Winners per prize tier
    pub winner_count: u32,
    /// Sales open
    pub starts_at: Option<DateTime<Utc>>,
    /// Sales close; the lottery draw on this date decides the raffle
    pub ends_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: RaffleState,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Raffle {
    /// Unit price of a ticket.
    #[must_use]
    pub const fn unit_price(&self) -> Money {
        self.category.ticket_price
    }

    /// Date of the lottery draw that settles this raffle.
    #[must_use]
    pub fn draw_date(&self) -> NaiveDate {
        self.ends_at.date_naive()
    }

    /// Whether the raffle is active and its sales window has ended.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == RaffleState::Active && self.ends_at <= now
    }
}

/// One numbered, purchasable unit of a raffle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning raffle
    pub raffle_id: RaffleId,
    /// 1-based, dense, unique within the raffle
    pub sequence: u32,
    /// Lifecycle state
    pub state: TicketState,
    /// Buyer, set when sold
    pub owner: Option<UserId>,
    /// Purchase time, set when sold
    pub purchased_at: Option<DateTime<Utc>>,
    /// Ledger entry that paid for the ticket
    pub ledger_entry_id: Option<LedgerEntryId>,
    /// Price at provisioning time
    pub price: Money,
}

impl Ticket {
    /// A fresh `available` ticket.
    #[must_use]
    pub fn available(raffle_id: RaffleId, sequence: u32, price: Money) -> Self {
        Self {
            id: TicketId::new(),
            raffle_id,
            sequence,
            state: TicketState::Available,
            owner: None,
            purchased_at: None,
            ledger_entry_id: None,
            price,
        }
    }

    /// Sequence number as a zero-padded decimal string of `width` digits.
    #[must_use]
    pub fn padded_number(&self, width: usize) -> String {
        format!("{:0width$}", self.sequence)
    }
}

/// A record of money movement tied to one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID
    pub id: LedgerEntryId,
    /// Purchase or payout
    pub kind: LedgerKind,
    /// Paying (or paid) user
    pub user_id: UserId,
    /// Amount moved
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Payment provider name
    pub provider: String,
    /// Provider-side charge or payout id
    pub provider_ref: Option<String>,
    /// Globally unique, immutable
    pub idempotency_key: IdempotencyKey,
    /// Lifecycle state
    pub state: LedgerState,
    /// Provider reason, recorded when a charge is declined
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A ticket that won a prize tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Winner ID
    pub id: WinnerId,
    /// Raffle the ticket belongs to
    pub raffle_id: RaffleId,
    /// Winning ticket (unique)
    pub ticket_id: TicketId,
    /// Prize tier name from the lottery result
    pub prize_tier: String,
    /// Prize amount
    pub amount: Money,
    /// Set exactly once when paid
    pub paid_at: Option<DateTime<Utc>>,
    /// Provider payout reference
    pub payout_ref: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Winner {
    /// Whether the prize has been paid out.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn raffle_state_roundtrip() {
        for state in [
            RaffleState::Pending,
            RaffleState::Active,
            RaffleState::Closed,
            RaffleState::Cancelled,
        ] {
            assert_eq!(RaffleState::parse(state.as_str()).unwrap(), state);
        }
        assert!(RaffleState::parse("activa").is_err());
    }

    #[test]
    fn raffle_transitions_are_monotonic() {
        assert!(RaffleState::Pending.can_transition_to(RaffleState::Active));
        assert!(RaffleState::Active.can_transition_to(RaffleState::Closed));
        assert!(RaffleState::Active.can_transition_to(RaffleState::Cancelled));
        assert!(!RaffleState::Closed.can_transition_to(RaffleState::Active));
        assert!(!RaffleState::Cancelled.can_transition_to(RaffleState::Active));
        assert!(!RaffleState::Pending.can_transition_to(RaffleState::Closed));
    }

    #[test]
    fn voided_is_terminal_and_only_reachable_from_available() {
        assert!(TicketState::Available.can_transition_to(TicketState::Voided));
        assert!(!TicketState::Sold.can_transition_to(TicketState::Voided));
        for next in [
            TicketState::Available,
            TicketState::Sold,
            TicketState::Winner,
        ] {
            assert!(!TicketState::Voided.can_transition_to(next));
        }
    }

    #[test]
    fn only_sold_tickets_become_winners() {
        assert!(TicketState::Sold.can_transition_to(TicketState::Winner));
        assert!(!TicketState::Available.can_transition_to(TicketState::Winner));
    }

    #[test]
    fn ledger_transitions() {
        assert!(LedgerState::Pending.can_transition_to(LedgerState::Succeeded));
        assert!(LedgerState::Pending.can_transition_to(LedgerState::Failed));
        assert!(LedgerState::Succeeded.can_transition_to(LedgerState::Refunded));
        assert!(!LedgerState::Failed.can_transition_to(LedgerState::Succeeded));
        assert!(!LedgerState::Succeeded.can_transition_to(LedgerState::Pending));
    }

    #[test]
    fn idempotency_key_validation() {
        assert_eq!(IdempotencyKey::parse("   "), Err(InvalidIdempotencyKey::Empty));
        assert_eq!(
            IdempotencyKey::parse("k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)),
            Err(InvalidIdempotencyKey::TooLong)
        );
        assert_eq!(IdempotencyKey::parse("k1").unwrap().as_str(), "k1");
    }

    #[test]
    fn caller_keys_cannot_take_the_payout_prefix() {
        let winner_id = WinnerId::new();
        let payout = IdempotencyKey::for_payout(winner_id);
        assert!(payout.is_payout());
        assert_eq!(
            IdempotencyKey::parse(payout.as_str()),
            Err(InvalidIdempotencyKey::Reserved)
        );
        assert_eq!(
            IdempotencyKey::parse(" payout:x"),
            Err(InvalidIdempotencyKey::Reserved)
        );
        assert!(!IdempotencyKey::parse("order-payout:1").unwrap().is_payout());
        assert_eq!(IdempotencyKey::from_stored(payout.as_str()).unwrap(), payout);
    }

    #[test]
    fn idempotency_key_deserialization_validates() {
        let err = serde_json::from_str::<IdempotencyKey>("\"\"");
        assert!(err.is_err());
        let key: IdempotencyKey = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(key.as_str(), "abc");
    }

    #[test]
    fn padded_number_is_fixed_width() {
        let ticket = Ticket::available(RaffleId::new(), 42, Money::from_minor(1000));
        assert_eq!(ticket.padded_number(5), "00042");
        assert_eq!(ticket.padded_number(2), "42");
    }

    #[test]
    fn money_share_rounds_down() {
        let pot = Money::from_minor(1_001);
        assert_eq!(pot.checked_share(5_000), Some(Money::from_minor(500)));
        assert_eq!(Money::from_minor(u64::MAX).checked_share(2), None);
    }
}
