//! Delivery transaction workflow: all-or-nothing issuance and reversal.

use std::collections::HashMap;

use chrono::Utc;
use ledger_store::{
    ChangeSet, DeliveryRecord, DeliveryStatus, DeliveryWrite, LedgerStore, LedgerStoreExt,
    LineItem, MovementEntry, MovementType, QuantityChange, Reversal, SignatureRef, StoreError,
    Variant,
};
use serde::Deserialize;

use common::{DeliveryId, RecipientId, VariantId};

use crate::error::{DomainError, Result};
use crate::ledger::plan_movement;

/// Ledger reason written on every outbound entry of a delivery.
pub const DELIVERY_REASON: &str = "delivery";

/// Ledger reason written on every compensating entry of a reversal.
pub const REVERSAL_REASON: &str = "reversal";

/// Request to issue stock to one recipient.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryRequest {
    pub recipient_id: RecipientId,
    pub line_items: Vec<LineItem>,
    pub notes: Option<String>,
    pub signature_ref: Option<SignatureRef>,
    pub actor: String,
}

impl DeliveryRequest {
    pub fn new(recipient_id: RecipientId, actor: impl Into<String>) -> Self {
        Self {
            recipient_id,
            line_items: Vec::new(),
            notes: None,
            signature_ref: None,
            actor: actor.into(),
        }
    }

    pub fn item(mut self, variant_id: VariantId, quantity: i64) -> Self {
        self.line_items.push(LineItem::new(variant_id, quantity));
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_signature(mut self, signature_ref: SignatureRef) -> Self {
        self.signature_ref = Some(signature_ref);
        self
    }
}

/// Rejects non-positive quantities and sums lines for the same variant,
/// keeping the order in which variants first appear.
fn merge_line_items(items: &[LineItem]) -> Result<Vec<LineItem>> {
    if items.is_empty() {
        return Err(DomainError::EmptyDelivery);
    }

    let mut merged: Vec<LineItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            return Err(DomainError::InvalidQuantity(format!(
                "line for variant {} has quantity {}",
                item.variant_id, item.quantity
            )));
        }
        match merged.iter_mut().find(|m| m.variant_id == item.variant_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(
                    || {
                        DomainError::InvalidQuantity(format!(
                            "total for variant {} is out of range",
                            item.variant_id
                        ))
                    },
                )?;
            }
            None => merged.push(*item),
        }
    }
    Ok(merged)
}

fn error_kind(error: &DomainError) -> &'static str {
    match error {
        DomainError::NotFound { .. } => "not_found",
        DomainError::Conflict { .. } => "conflict",
        DomainError::InsufficientStock { .. } => "insufficient_stock",
        DomainError::InvalidQuantity(_) | DomainError::EmptyDelivery => "invalid",
        DomainError::VariantRetired(_) => "retired",
        _ => "other",
    }
}

/// Orchestrates deliveries against the catalog and the ledger.
pub struct DeliveryService<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> DeliveryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issues every line of the request or nothing.
    ///
    /// Lines for the same variant are summed before the stock check. The
    /// outbound entries, quantity updates and the new ACTIVE record are
    /// committed as one change set guarded by the quantities read here, so
    /// a concurrent delivery that drained the stock first is reported as
    /// `InsufficientStock`.
    #[tracing::instrument(skip(self))]
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryRecord> {
        match self.try_deliver(request).await {
            Ok(record) => {
                metrics::counter!("deliveries_total").increment(1);
                tracing::info!(
                    delivery_id = %record.id,
                    recipient_id = %record.recipient_id,
                    lines = record.line_items.len(),
                    units = record.total_units(),
                    "delivery committed"
                );
                Ok(record)
            }
            Err(e) => {
                let kind = error_kind(&e);
                metrics::counter!("deliveries_rejected_total", "reason" => kind).increment(1);
                tracing::warn!(reason = kind, error = %e, "delivery rejected");
                Err(e)
            }
        }
    }

    async fn try_deliver(&self, request: DeliveryRequest) -> Result<DeliveryRecord> {
        let line_items = merge_line_items(&request.line_items)?;
        self.store.require_recipient(request.recipient_id).await?;

        let delivery_id = DeliveryId::new();
        let mut variants: HashMap<VariantId, Variant> = HashMap::new();
        let mut change_set = ChangeSet::new();
        for item in &line_items {
            let variant = self.store.require_variant(item.variant_id).await?;
            if !variant.active {
                return Err(DomainError::VariantRetired(variant.code));
            }
            let entry = plan_movement(
                &variant,
                MovementType::Outbound,
                item.quantity,
                DELIVERY_REASON,
                &request.actor,
            )?
            .for_delivery(delivery_id);
            change_set = change_set.change(QuantityChange::new(entry));
            variants.insert(variant.id, variant);
        }

        let record = DeliveryRecord {
            id: delivery_id,
            recipient_id: request.recipient_id,
            line_items,
            delivered_at: Utc::now(),
            delivered_by: request.actor,
            notes: request.notes,
            signature_ref: request.signature_ref,
            status: DeliveryStatus::Active,
            reversal: None,
        };

        let result = self
            .store
            .commit(change_set.with_delivery(DeliveryWrite::Insert(record.clone())))
            .await;
        match result {
            Ok(()) => Ok(record),
            Err(StoreError::QuantityConflict {
                variant_id,
                expected,
                actual,
            }) => {
                let requested = record
                    .line_items
                    .iter()
                    .find(|item| item.variant_id == variant_id)
                    .map(|item| item.quantity)
                    .unwrap_or_default();
                if actual < requested {
                    let variant = variants
                        .get(&variant_id)
                        .map(|v| v.code.clone())
                        .unwrap_or_else(|| variant_id.to_string());
                    Err(DomainError::InsufficientStock {
                        variant,
                        requested,
                        available: actual,
                    })
                } else {
                    Err(DomainError::Conflict {
                        variant_id,
                        expected,
                        actual,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Restores the stock of an ACTIVE delivery and marks it REVERSED.
    ///
    /// The original outbound entries are left untouched; one compensating
    /// inbound entry is written per line item.
    #[tracing::instrument(skip(self))]
    pub async fn reverse(
        &self,
        delivery_id: DeliveryId,
        actor: &str,
        reason: &str,
    ) -> Result<DeliveryRecord> {
        let record = self.store.require_delivery(delivery_id).await?;
        if !record.status.can_reverse() {
            return Err(DomainError::AlreadyReversed(delivery_id));
        }

        let mut variants: HashMap<VariantId, Variant> = HashMap::new();
        let mut change_set = ChangeSet::new();
        for item in &record.line_items {
            let variant = match variants.remove(&item.variant_id) {
                Some(variant) => variant,
                None => self.store.require_variant(item.variant_id).await?,
            };
            let entry = plan_movement(
                &variant,
                MovementType::Inbound,
                item.quantity,
                REVERSAL_REASON,
                actor,
            )?
            .for_delivery(delivery_id);
            variants.insert(
                variant.id,
                Variant {
                    quantity: entry.new_quantity,
                    ..variant
                },
            );
            change_set = change_set.change(QuantityChange::new(entry));
        }

        let reversed = record.into_reversed(Reversal {
            reversed_at: Utc::now(),
            reversed_by: actor.to_string(),
            reason: reason.to_string(),
        });
        self.store
            .commit(change_set.with_delivery(DeliveryWrite::Reverse(reversed.clone())))
            .await?;

        metrics::counter!("reversals_total").increment(1);
        tracing::info!(%delivery_id, reversed_by = actor, "delivery reversed");
        Ok(reversed)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, delivery_id: DeliveryId) -> Result<DeliveryRecord> {
        Ok(self.store.require_delivery(delivery_id).await?)
    }

    /// The recipient's deliveries in any status, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn for_recipient(&self, recipient_id: RecipientId) -> Result<Vec<DeliveryRecord>> {
        self.store.require_recipient(recipient_id).await?;
        Ok(self.store.deliveries_for_recipient(recipient_id).await?)
    }

    /// Ledger entries written by a delivery and its reversal, if any.
    ///
    /// Still available after the delivery has been archived.
    #[tracing::instrument(skip(self))]
    pub async fn movements(&self, delivery_id: DeliveryId) -> Result<Vec<MovementEntry>> {
        Ok(self.store.movements_for_delivery(delivery_id).await?)
    }
}
