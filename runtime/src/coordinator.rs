//! Purchase coordinator.
//!
//! Reserves a block of tickets, opens a ledger entry and drives the payment
//! provider, all inside one unit of work:
//!
//! 1. A ledger entry with the request's idempotency key short-circuits to the
//!    tickets that entry paid for.
//! 2. The raffle must be `active` (read under a share lock so a concurrent
//!    close waits for in-flight purchases).
//! 3. A `pending` ledger entry is inserted. Losing the unique-key race rolls
//!    back and answers from the winner's entry.
//! 4. `quantity` available tickets are locked, lowest sequence numbers first.
//!    A short reservation fails with `InsufficientInventory`.
//! 5. The charge is created and the tickets are marked `sold`.
//! 6. The charge is confirmed. Success commits everything with a `succeeded`
//!    entry; `processing` commits with a `pending` entry for the webhook to
//!    settle; anything else rolls back.
//!
//! The whole attempt runs under a deadline. Exceeding it drops the unit of
//! work (rolling it back) and reports `ProviderUnavailable`; retrying with the
//! same key is safe because providers dedupe on it too.

use crate::config::PurchaseConfig;
use crate::error::PurchaseError;
use crate::metrics::PurchaseMetrics;
use rifa_core::environment::Clock;
use rifa_core::payment::{
    ChargeMetadata, ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway,
};
use rifa_core::store::{
    InventoryStore, LedgerStore, RaffleStore, RowLock, Store, StoreError, UnitOfWork,
};
use rifa_core::types::{
    IdempotencyKey, LedgerEntry, LedgerEntryId, LedgerKind, LedgerState, RaffleId, RaffleState,
    Ticket, TicketId, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// A request to buy tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    /// Raffle to buy from
    pub raffle_id: RaffleId,
    /// Buyer
    pub user_id: UserId,
    /// Number of tickets
    pub quantity: u32,
    /// Client-chosen key; identical keys yield one purchase
    pub idempotency_key: IdempotencyKey,
}

/// The tickets a ledger entry paid for.
///
/// Every call with the same idempotency key returns the same entry id and
/// the same tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    /// Ledger entry recording the charge
    pub ledger_entry_id: LedgerEntryId,
    /// `succeeded`, or `pending` while the provider is still processing
    pub status: LedgerState,
    /// Tickets, ordered by sequence number
    pub tickets: Vec<Ticket>,
}

/// Orchestrates ticket purchases against a [`Store`] and a payment provider.
pub struct PurchaseCoordinator<S: Store> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: PurchaseConfig,
}

impl<S: Store> PurchaseCoordinator<S> {
    /// Creates a coordinator
    #[must_use]
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    /// Buy `quantity` tickets.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::Validation`] for a zero or oversized quantity, or a
    ///   key already used by another user
    /// - [`PurchaseError::RaffleNotFound`] / [`PurchaseError::RaffleNotActive`]
    /// - [`PurchaseError::InsufficientInventory`] if fewer tickets are available
    /// - [`PurchaseError::PaymentDeclined`] if the provider rejected the charge
    /// - [`PurchaseError::ProviderUnavailable`] on provider failure or deadline;
    ///   retry with the same key
    #[tracing::instrument(
        name = "purchase",
        skip(self, request),
        fields(
            raffle_id = %request.raffle_id,
            user_id = %request.user_id,
            quantity = request.quantity,
            idempotency_key = %request.idempotency_key,
        )
    )]
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        let started = Instant::now();
        PurchaseMetrics::attempt();

        let result = self.run(&request).await;
        match &result {
            Ok(receipt) => {
                tracing::info!(
                    ledger_entry_id = %receipt.ledger_entry_id,
                    status = %receipt.status,
                    tickets = receipt.tickets.len(),
                    "Purchase completed"
                );
                PurchaseMetrics::succeeded(started.elapsed());
            }
            Err(error) => {
                tracing::warn!(error = %error, code = error.code(), "Purchase failed");
                PurchaseMetrics::failed(error.code(), started.elapsed());
            }
        }
        result
    }

    async fn run(&self, request: &PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        self.validate(request)?;

        if let Some(receipt) = self.replay(request).await? {
            PurchaseMetrics::replayed();
            return Ok(receipt);
        }

        match tokio::time::timeout(self.config.payment_timeout, self.attempt(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.payment_timeout.as_millis(),
                    "Purchase deadline exceeded, reservation rolled back"
                );
                Err(PurchaseError::ProviderUnavailable {
                    reason: "purchase deadline exceeded".to_string(),
                })
            }
        }
    }

    fn validate(&self, request: &PurchaseRequest) -> Result<(), PurchaseError> {
        if request.quantity == 0 {
            return Err(PurchaseError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        if request.quantity > self.config.max_quantity {
            return Err(PurchaseError::Validation(format!(
                "quantity must be at most {}",
                self.config.max_quantity
            )));
        }
        Ok(())
    }

    /// Answer from an existing ledger entry, if the key was used before.
    async fn replay(&self, request: &PurchaseRequest) -> Result<Option<PurchaseReceipt>, PurchaseError> {
        let mut uow = self.store.begin().await?;
        let Some(entry) = uow.ledger_by_key(&request.idempotency_key).await? else {
            uow.rollback().await?;
            return Ok(None);
        };

        if entry.user_id != request.user_id {
            uow.rollback().await?;
            return Err(PurchaseError::Validation(
                "idempotency key already used for another purchase".to_string(),
            ));
        }

        tracing::debug!(
            ledger_entry_id = %entry.id,
            state = %entry.state,
            "Replaying purchase from ledger"
        );

        if entry.state == LedgerState::Failed {
            uow.rollback().await?;
            return Err(PurchaseError::PaymentDeclined {
                reason: entry
                    .failure_reason
                    .unwrap_or_else(|| "payment failed".to_string()),
            });
        }

        let tickets = uow.tickets_for_ledger_entry(entry.id).await?;
        uow.rollback().await?;
        Ok(Some(PurchaseReceipt {
            ledger_entry_id: entry.id,
            status: entry.state,
            tickets,
        }))
    }

    async fn attempt(&self, request: &PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        let mut uow = self.store.begin().await?;

        let raffle = uow
            .raffle(request.raffle_id, RowLock::Share)
            .await?
            .ok_or(PurchaseError::RaffleNotFound(request.raffle_id))?;
        if raffle.state != RaffleState::Active {
            return Err(PurchaseError::RaffleNotActive {
                raffle_id: raffle.id,
                state: raffle.state,
            });
        }

        let amount = raffle
            .unit_price()
            .checked_multiply(request.quantity)
            .ok_or_else(|| PurchaseError::Validation("purchase amount overflows".to_string()))?;
        let now = self.clock.now();

        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            kind: LedgerKind::Purchase,
            user_id: request.user_id,
            amount,
            currency: self.config.currency.clone(),
            provider: self.gateway.provider_name().to_string(),
            provider_ref: None,
            idempotency_key: request.idempotency_key.clone(),
            state: LedgerState::Pending,
            failure_reason: None,
            created_at: now,
        };

        if !uow.insert_ledger_entry(&entry).await? {
            uow.rollback().await?;
            tracing::info!("Lost idempotency race, answering from the committed entry");
            return self
                .replay(request)
                .await?
                .ok_or_else(|| PurchaseError::ProviderUnavailable {
                    reason: "a purchase with this idempotency key is in progress".to_string(),
                });
        }

        // after the key insert, so same-key retries wait on the key instead
        // of competing for tickets
        let reserved = uow.reserve_available(raffle.id, request.quantity).await?;
        let reserved_count = u32::try_from(reserved.len()).unwrap_or(u32::MAX);
        if reserved_count < request.quantity {
            // dropping the unit of work discards the entry and the partial reservation
            return Err(PurchaseError::InsufficientInventory {
                requested: request.quantity,
                available: reserved_count,
            });
        }

        let charge = match self
            .gateway
            .create_charge(ChargeRequest {
                amount,
                currency: entry.currency.clone(),
                metadata: ChargeMetadata {
                    raffle_id: raffle.id,
                    user_id: request.user_id,
                    quantity: request.quantity,
                    idempotency_key: request.idempotency_key.clone(),
                },
            })
            .await
        {
            Ok(charge) => charge,
            Err(error) => return self.abandon(uow, entry, None, error).await,
        };
        uow.set_provider_ref(entry.id, charge.as_str()).await?;

        let ticket_ids: Vec<TicketId> = reserved.iter().map(|t| t.id).collect();
        let marked = uow
            .bulk_mark_sold(&ticket_ids, request.user_id, entry.id, now)
            .await?;
        if marked != ticket_ids.len() as u64 {
            return Err(PurchaseError::Store(StoreError::Database(format!(
                "marked {marked} of {} reserved tickets",
                ticket_ids.len()
            ))));
        }

        let outcome = match self.gateway.confirm_charge(&charge).await {
            Ok(outcome) => outcome,
            Err(error) => {
                return self
                    .abandon(uow, entry, Some(charge.as_str().to_string()), error)
                    .await;
            }
        };

        let status = match outcome {
            ChargeOutcome::Succeeded => {
                uow.transition_ledger(entry.id, LedgerState::Pending, LedgerState::Succeeded)
                    .await?;
                LedgerState::Succeeded
            }
            ChargeOutcome::Processing => {
                tracing::info!(charge = %charge, "Charge processing, awaiting provider webhook");
                LedgerState::Pending
            }
            ChargeOutcome::Failed { reason } => {
                return self
                    .abandon(
                        uow,
                        entry,
                        Some(charge.as_str().to_string()),
                        GatewayError::Declined { reason },
                    )
                    .await;
            }
        };

        let tickets = uow.tickets_for_ledger_entry(entry.id).await?;
        uow.commit().await?;

        Ok(PurchaseReceipt {
            ledger_entry_id: entry.id,
            status,
            tickets,
        })
    }

    /// Roll back the reservation and translate the provider error.
    ///
    /// A decline is recorded as a `failed` ledger entry in its own unit of
    /// work so replays of the key keep answering `PaymentDeclined`.
    async fn abandon(
        &self,
        uow: S::UnitOfWork,
        mut entry: LedgerEntry,
        provider_ref: Option<String>,
        error: GatewayError,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        if let Err(rollback_error) = uow.rollback().await {
            tracing::warn!(error = %rollback_error, "Rollback failed; transaction discarded");
        }

        match error {
            GatewayError::Declined { reason } | GatewayError::InvalidRequest { reason } => {
                entry.state = LedgerState::Failed;
                entry.provider_ref = provider_ref;
                entry.failure_reason = Some(reason.clone());
                if let Err(record_error) = self.record_failure(&entry).await {
                    tracing::warn!(
                        error = %record_error,
                        "Could not record declined charge; a replay will retry the purchase"
                    );
                }
                Err(PurchaseError::PaymentDeclined { reason })
            }
            GatewayError::Unavailable { reason } => {
                Err(PurchaseError::ProviderUnavailable { reason })
            }
            GatewayError::Timeout => Err(PurchaseError::ProviderUnavailable {
                reason: "payment provider timed out".to_string(),
            }),
        }
    }

    async fn record_failure(&self, entry: &LedgerEntry) -> Result<(), PurchaseError> {
        let mut uow = self.store.begin().await?;
        if uow.insert_ledger_entry(entry).await? {
            uow.commit().await?;
        } else {
            uow.rollback().await?;
        }
        Ok(())
    }
}
