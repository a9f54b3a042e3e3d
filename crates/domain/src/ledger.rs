//! Movement ledger: the single write path for variant quantities.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::{StreamExt, TryStreamExt};
use ledger_store::{
    ChangeSet, LedgerStore, LedgerStoreExt, MovementEntry, MovementType, QuantityChange,
    StoreError, Variant,
};
use serde::Serialize;

use common::{MovementId, VariantId};

use crate::error::{DomainError, Result};

/// A lazy, finite stream of a variant's ledger entries, oldest first.
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<MovementEntry>> + Send>>;

/// Result of replaying a variant's ledger against its stored quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReport {
    pub variant_id: VariantId,
    pub code: String,
    /// Quantity currently stored on the variant.
    pub stored: i64,
    /// Sum of the signed quantities of every ledger entry.
    pub derived: i64,
    pub entries: usize,
    /// Entries whose arithmetic is wrong or that do not continue from the
    /// previous entry's `new_quantity`.
    pub broken_entries: Vec<MovementId>,
}

impl LedgerReport {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.derived && self.broken_entries.is_empty()
    }
}

/// Builds a ledger entry against the variant's current quantity.
///
/// An outbound movement larger than the stock is reported as
/// `InsufficientStock` naming the variant code.
pub(crate) fn plan_movement(
    variant: &Variant,
    movement_type: MovementType,
    quantity: i64,
    reason: &str,
    actor: &str,
) -> Result<MovementEntry> {
    if quantity <= 0 {
        return Err(DomainError::InvalidQuantity(format!(
            "movement quantity must be positive, got {quantity}"
        )));
    }
    MovementEntry::compute(
        variant.id,
        movement_type,
        quantity,
        variant.quantity,
        reason,
        actor,
    )
    .map_err(|e| match e {
        StoreError::NegativeQuantity {
            previous, quantity, ..
        } => DomainError::InsufficientStock {
            variant: variant.code.clone(),
            requested: quantity,
            available: previous,
        },
        other => other.into(),
    })
}

/// Append-only record of every stock change.
pub struct MovementLedger<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> MovementLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records one movement and updates the variant's quantity atomically.
    ///
    /// The previous quantity is read from the catalog and used as the
    /// compare-and-swap guard; a concurrent writer surfaces as `Conflict`.
    #[tracing::instrument(skip(self))]
    pub async fn record(
        &self,
        variant_id: VariantId,
        movement_type: MovementType,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> Result<MovementEntry> {
        let variant = self.store.require_variant(variant_id).await?;
        let entry = plan_movement(&variant, movement_type, quantity, reason, actor)?;

        self.store
            .commit(ChangeSet::new().change(QuantityChange::new(entry.clone())))
            .await?;

        metrics::counter!("movements_recorded_total", "type" => movement_type.as_str())
            .increment(1);
        tracing::debug!(
            code = %variant.code,
            previous = entry.previous_quantity,
            new = entry.new_quantity,
            "movement recorded"
        );
        Ok(entry)
    }

    /// Records an inbound receipt of stock.
    pub async fn receive(
        &self,
        variant_id: VariantId,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> Result<MovementEntry> {
        self.record(variant_id, MovementType::Inbound, quantity, reason, actor)
            .await
    }

    /// Streams the variant's ledger, oldest first. Each call starts over.
    #[tracing::instrument(skip(self))]
    pub async fn history(&self, variant_id: VariantId) -> Result<HistoryStream> {
        self.store.require_variant(variant_id).await?;
        let stream = self.store.movement_history(variant_id).await?;
        Ok(Box::pin(stream.map_err(DomainError::from)))
    }

    /// Replays the variant's ledger and compares it with the stored quantity.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self, variant_id: VariantId) -> Result<LedgerReport> {
        let variant = self.store.require_variant(variant_id).await?;
        let mut history = self.store.movement_history(variant_id).await?;

        let mut report = LedgerReport {
            variant_id,
            code: variant.code.clone(),
            stored: variant.quantity,
            derived: 0,
            entries: 0,
            broken_entries: Vec::new(),
        };
        while let Some(entry) = history.next().await {
            let entry = entry?;
            if !entry.is_consistent() || entry.previous_quantity != report.derived {
                report.broken_entries.push(entry.id);
            }
            report.derived += entry.signed_quantity();
            report.entries += 1;
        }

        if !report.is_consistent() {
            tracing::warn!(
                code = %report.code,
                stored = report.stored,
                derived = report.derived,
                broken = report.broken_entries.len(),
                "ledger does not match stored quantity"
            );
        }
        Ok(report)
    }

    /// Verifies every variant in the catalog, ordered by code.
    #[tracing::instrument(skip(self))]
    pub async fn verify_all(&self) -> Result<Vec<LedgerReport>> {
        let mut reports = Vec::new();
        for variant in self.store.list_all_variants().await? {
            reports.push(self.verify(variant.id).await?);
        }
        Ok(reports)
    }
}
