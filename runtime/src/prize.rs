//! Prize amounts and winner selection.
//!
//! Both functions are pure: no store, no clock, no provider.

use rifa_core::results::ResultSet;
use rifa_core::types::{Money, Ticket, TicketId, TicketState};
use std::collections::HashSet;

/// Share of the pot for tiers not in the table, in basis points.
pub const DEFAULT_TIER_BPS: u32 = 1_000;

/// Share of the pot paid to a prize tier, in basis points.
///
/// First, second and third prize take 50%, 30% and 20%; every other tier
/// takes 10%. Tier names are matched case-insensitively.
#[must_use]
pub fn tier_share_bps(tier: &str) -> u32 {
    match tier.trim().to_lowercase().as_str() {
        "primer premio" | "first prize" => 5_000,
        "segundo premio" | "second prize" => 3_000,
        "tercer premio" | "third prize" => 2_000,
        _ => DEFAULT_TIER_BPS,
    }
}

/// Prize for one winning ticket of `tier`.
///
/// The pot is the value of the whole inventory: `total_tickets * unit_price`.
/// Returns `None` on overflow.
#[must_use]
pub fn prize_amount(total_tickets: u32, unit_price: Money, tier: &str) -> Option<Money> {
    unit_price
        .checked_multiply(total_tickets)?
        .checked_share(tier_share_bps(tier))
}

/// A ticket chosen for a prize tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Winning ticket
    pub ticket_id: TicketId,
    /// Its sequence number
    pub sequence: u32,
    /// Tier it won
    pub tier: String,
}

/// Match sold tickets against a draw. Callers pass only tickets whose
/// charge has succeeded.
///
/// For each tier, in published order, the `sold` tickets whose number padded
/// to `width` digits equals the winning number are taken in ascending
/// sequence order, at most `winner_count` per tier. A ticket already taken by
/// an earlier tier is not considered again.
#[must_use]
pub fn select_winners(
    tickets: &[Ticket],
    results: &ResultSet,
    winner_count: u32,
    width: usize,
) -> Vec<Selection> {
    let mut sold: Vec<&Ticket> = tickets
        .iter()
        .filter(|t| t.state == TicketState::Sold)
        .collect();
    sold.sort_by_key(|t| t.sequence);

    let mut taken = HashSet::new();
    let mut selections = Vec::new();
    for prize in &results.prizes {
        let winning = prize.winning_number.trim();
        let matches = sold
            .iter()
            .filter(|t| !taken.contains(&t.id) && t.padded_number(width) == winning)
            .take(winner_count as usize)
            .map(|t| (t.id, t.sequence))
            .collect::<Vec<_>>();

        for (ticket_id, sequence) in matches {
            taken.insert(ticket_id);
            selections.push(Selection {
                ticket_id,
                sequence,
                tier: prize.tier.clone(),
            });
        }
    }
    selections
}
