//! Asynchronous payment confirmation.
//!
//! Providers report the final outcome of charges that were still
//! processing when the purchase committed. The signature is checked before
//! anything is read or written. Settling is a compare-and-set on the ledger
//! state, so redelivered events are harmless.

use crate::error::WebhookError;
use rifa_core::environment::Clock;
use rifa_core::payment::{PaymentEvent, PaymentGateway};
use rifa_core::store::{
    InventoryStore, LedgerStore, RaffleStore, RowLock, Store, StoreError, UnitOfWork, WinnerStore,
};
use rifa_core::types::{LedgerEntryId, LedgerState, RaffleState, TicketState};
use serde::Serialize;
use std::sync::Arc;

/// What a verified event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// A pending entry moved to its final state
    Settled {
        /// Entry settled
        ledger_entry_id: LedgerEntryId,
        /// New state
        state: LedgerState,
    },
    /// The entry was already final; nothing changed
    AlreadySettled {
        /// Entry
        ledger_entry_id: LedgerEntryId,
        /// Its current state
        state: LedgerState,
    },
    /// No entry carries this provider reference (yet)
    UnknownCharge {
        /// Reference from the event
        provider_ref: String,
    },
    /// Event type this engine does not act on
    Ignored {
        /// Provider event type
        event_type: String,
    },
}

/// Applies provider events to the ledger.
pub struct WebhookProcessor<S: Store> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> WebhookProcessor<S> {
    /// Creates a processor
    #[must_use]
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            gateway,
            clock,
        }
    }

    /// Verify and apply one delivery.
    ///
    /// A successful charge moves its `pending` entry to `succeeded`. A failed
    /// charge moves it to `failed` and takes its tickets back: any unpaid
    /// winner rows on them are deleted, and the tickets return to `available`
    /// while the raffle sells or are voided once it no longer does.
    ///
    /// # Errors
    ///
    /// - [`WebhookError::Signature`] if the payload is not authentic
    /// - [`WebhookError::Store`] if the store fails
    #[tracing::instrument(skip(self, payload, signature), fields(provider = self.gateway.provider_name()))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event = self
            .gateway
            .verify_webhook(payload, signature, self.clock.now())
            .inspect_err(|error| tracing::warn!(error = %error, "Webhook rejected"))?;

        let outcome = match event {
            PaymentEvent::ChargeSucceeded { provider_ref } => {
                self.settle(&provider_ref, LedgerState::Succeeded, None).await?
            }
            PaymentEvent::ChargeFailed {
                provider_ref,
                reason,
            } => self.settle(&provider_ref, LedgerState::Failed, reason).await?,
            PaymentEvent::Ignored { event_type } => {
                tracing::debug!(%event_type, "Webhook event ignored");
                WebhookOutcome::Ignored { event_type }
            }
        };

        metrics::counter!("rifa_webhook_events_total", "outcome" => outcome_label(&outcome))
            .increment(1);
        Ok(outcome)
    }

    async fn settle(
        &self,
        provider_ref: &str,
        target: LedgerState,
        reason: Option<String>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let mut uow = self.store.begin().await?;
        let Some(entry) = uow.ledger_by_provider_ref(provider_ref).await? else {
            uow.rollback().await?;
            tracing::warn!(provider_ref, "Webhook for unknown charge");
            return Ok(WebhookOutcome::UnknownCharge {
                provider_ref: provider_ref.to_string(),
            });
        };

        if !uow
            .transition_ledger(entry.id, LedgerState::Pending, target)
            .await?
        {
            uow.rollback().await?;
            tracing::debug!(ledger_entry_id = %entry.id, state = %entry.state, "Ledger entry already settled");
            return Ok(WebhookOutcome::AlreadySettled {
                ledger_entry_id: entry.id,
                state: entry.state,
            });
        }

        if target == LedgerState::Failed {
            Self::take_back_tickets(&mut uow, entry.id).await?;
            tracing::info!(
                ledger_entry_id = %entry.id,
                reason = reason.as_deref().unwrap_or("unspecified"),
                "Charge failed, tickets taken back"
            );
        }
        uow.commit().await?;

        tracing::info!(ledger_entry_id = %entry.id, state = %target, "Ledger entry settled");
        Ok(WebhookOutcome::Settled {
            ledger_entry_id: entry.id,
            state: target,
        })
    }

    async fn take_back_tickets(
        uow: &mut S::UnitOfWork,
        ledger_entry_id: LedgerEntryId,
    ) -> Result<(), StoreError> {
        let tickets = uow.tickets_for_ledger_entry(ledger_entry_id).await?;
        let Some(raffle_id) = tickets.first().map(|t| t.raffle_id) else {
            return Ok(());
        };
        let raffle = uow.raffle(raffle_id, RowLock::Share).await?;

        let ids: Vec<_> = tickets.iter().map(|t| t.id).collect();
        let unseated = uow.delete_unpaid_winners(&ids).await?;
        if !unseated.is_empty() {
            uow.set_ticket_states(&unseated, TicketState::Winner, TicketState::Sold)
                .await?;
            tracing::warn!(
                %ledger_entry_id,
                winners = unseated.len(),
                "Unpaid winners removed after their charge failed"
            );
        }

        let released = uow.release_tickets(ledger_entry_id).await?;
        let selling = raffle.is_some_and(|r| r.state == RaffleState::Active);
        let voided = if selling {
            0
        } else {
            uow.set_ticket_states(&ids, TicketState::Available, TicketState::Voided)
                .await?
        };
        tracing::debug!(%ledger_entry_id, released, voided, "Tickets taken back");
        Ok(())
    }
}

const fn outcome_label(outcome: &WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Settled { .. } => "settled",
        WebhookOutcome::AlreadySettled { .. } => "already_settled",
        WebhookOutcome::UnknownCharge { .. } => "unknown_charge",
        WebhookOutcome::Ignored { .. } => "ignored",
    }
}
