use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    DeliveryId, DeliveryRecord, MovementEntry, Recipient, RecipientId, Result,
    RetiredDeliveryHistory, RetiredRecipient, RetiredRecipientId, StoreError, Variant, VariantId,
    VariantKey,
};

/// One compare-and-swap update of a variant's quantity plus its ledger entry.
#[derive(Debug, Clone)]
pub struct QuantityChange {
    /// The quantity the caller observed. The write fails if the stored
    /// quantity differs at apply time.
    pub expected_previous: i64,

    /// The ledger entry to append; `entry.new_quantity` becomes the stored quantity.
    pub entry: MovementEntry,
}

impl QuantityChange {
    pub fn new(entry: MovementEntry) -> Self {
        Self {
            expected_previous: entry.previous_quantity,
            entry,
        }
    }

    pub fn variant_id(&self) -> VariantId {
        self.entry.variant_id
    }
}

/// Delivery record write applied together with a change set.
#[derive(Debug, Clone)]
pub enum DeliveryWrite {
    /// Persist a new delivery record.
    Insert(DeliveryRecord),

    /// Replace an active delivery with its reversed form. Fails with
    /// `DeliveryNotActive` if the stored record is no longer active.
    Reverse(DeliveryRecord),
}

impl DeliveryWrite {
    pub fn record(&self) -> &DeliveryRecord {
        match self {
            DeliveryWrite::Insert(record) | DeliveryWrite::Reverse(record) => record,
        }
    }
}

/// A set of quantity changes and an optional delivery write, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changes: Vec<QuantityChange>,
    pub delivery: Option<DeliveryWrite>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change(mut self, change: QuantityChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_delivery(mut self, write: DeliveryWrite) -> Self {
        self.delivery = Some(write);
        self
    }
}

/// Everything needed to move one recipient into the archive.
#[derive(Debug, Clone)]
pub struct ArchivalPlan {
    pub recipient_id: RecipientId,
    pub retired: RetiredRecipient,
    /// One row per active delivery of the recipient, any status.
    pub history: Vec<RetiredDeliveryHistory>,
}

impl ArchivalPlan {
    pub fn delivery_ids(&self) -> HashSet<DeliveryId> {
        self.history
            .iter()
            .map(|row| row.original_delivery_id)
            .collect()
    }
}

/// A lazy, finite stream of ledger entries.
pub type MovementStream = Pin<Box<dyn Stream<Item = Result<MovementEntry>> + Send>>;

/// Core trait for ledger store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Variant quantities
/// change only through [`LedgerStore::commit`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a newly provisioned variant.
    ///
    /// Fails with `DuplicateCode` if another variant already has the same
    /// identity key or derives the same code.
    async fn insert_variant(&self, variant: Variant) -> Result<()>;

    /// Updates the descriptive fields of a variant (name, category,
    /// minimum quantity, active flag). Identity and quantity are not touched.
    async fn update_variant_details(&self, variant: &Variant) -> Result<()>;

    async fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>>;

    async fn find_variant(&self, key: &VariantKey) -> Result<Option<Variant>>;

    async fn find_variant_by_code(&self, code: &str) -> Result<Option<Variant>>;

    /// Lists every variant, active or retired, with the given display name and category.
    async fn list_variants(&self, name: &str, category: &str) -> Result<Vec<Variant>>;

    async fn list_all_variants(&self) -> Result<Vec<Variant>>;

    /// Applies a change set atomically: either every quantity change, ledger
    /// entry and delivery write is persisted, or none is.
    async fn commit(&self, change_set: ChangeSet) -> Result<()>;

    /// Streams a variant's ledger entries, oldest first.
    async fn movement_history(&self, variant_id: VariantId) -> Result<MovementStream>;

    /// Returns the ledger entries caused by a delivery, oldest first.
    async fn movements_for_delivery(&self, delivery_id: DeliveryId)
    -> Result<Vec<MovementEntry>>;

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<DeliveryRecord>>;

    /// Returns the recipient's active-table deliveries, oldest first.
    async fn deliveries_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<DeliveryRecord>>;

    async fn insert_recipient(&self, recipient: Recipient) -> Result<()>;

    async fn get_recipient(&self, recipient_id: RecipientId) -> Result<Option<Recipient>>;

    /// Moves a recipient and their deliveries into the archive atomically.
    async fn archive(&self, plan: ArchivalPlan) -> Result<()>;

    async fn retired_recipient_for(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Option<RetiredRecipient>>;

    async fn retired_history(
        &self,
        retired_id: RetiredRecipientId,
    ) -> Result<Vec<RetiredDeliveryHistory>>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Loads a variant or fails with `VariantNotFound`.
    async fn require_variant(&self, variant_id: VariantId) -> Result<Variant> {
        self.get_variant(variant_id)
            .await?
            .ok_or(StoreError::VariantNotFound(variant_id))
    }

    /// Loads a delivery or fails with `DeliveryNotFound`.
    async fn require_delivery(&self, delivery_id: DeliveryId) -> Result<DeliveryRecord> {
        self.get_delivery(delivery_id)
            .await?
            .ok_or(StoreError::DeliveryNotFound(delivery_id))
    }

    /// Loads a recipient or fails with `RecipientNotFound`.
    async fn require_recipient(&self, recipient_id: RecipientId) -> Result<Recipient> {
        self.get_recipient(recipient_id)
            .await?
            .ok_or(StoreError::RecipientNotFound(recipient_id))
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Validates a change set before any storage is touched.
///
/// Every entry must be arithmetically consistent and start from its
/// `expected_previous`; consecutive changes to the same variant must chain.
pub fn validate_change_set(change_set: &ChangeSet) -> Result<()> {
    if change_set.changes.is_empty() {
        return Err(StoreError::InvalidChangeSet(
            "Cannot commit an empty change set".to_string(),
        ));
    }

    let mut running: HashMap<VariantId, i64> = HashMap::new();
    for change in &change_set.changes {
        let entry = &change.entry;
        if !entry.is_consistent() {
            return Err(StoreError::InvalidChangeSet(format!(
                "Entry {} for variant {} is arithmetically inconsistent",
                entry.id, entry.variant_id
            )));
        }
        if entry.previous_quantity != change.expected_previous {
            return Err(StoreError::InvalidChangeSet(format!(
                "Entry {} starts at {} but expects {}",
                entry.id, entry.previous_quantity, change.expected_previous
            )));
        }
        if let Some(previous) = running.get(&entry.variant_id)
            && *previous != change.expected_previous
        {
            return Err(StoreError::InvalidChangeSet(format!(
                "Changes to variant {} do not chain: {} then {}",
                entry.variant_id, previous, change.expected_previous
            )));
        }
        running.insert(entry.variant_id, entry.new_quantity);
    }

    if let Some(write) = &change_set.delivery {
        let delivery_id = write.record().id;
        if let Some(entry) = change_set
            .changes
            .iter()
            .map(|change| &change.entry)
            .find(|entry| entry.delivery_id != Some(delivery_id))
        {
            return Err(StoreError::InvalidChangeSet(format!(
                "Entry {} is not linked to delivery {}",
                entry.id, delivery_id
            )));
        }
    }

    Ok(())
}

/// Validates an archival plan before any storage is touched.
pub fn validate_archival_plan(plan: &ArchivalPlan) -> Result<()> {
    if plan.retired.original_id != plan.recipient_id {
        return Err(StoreError::ArchivalMismatch {
            recipient_id: plan.recipient_id,
            reason: "retired row mirrors a different recipient".to_string(),
        });
    }
    if let Some(row) = plan
        .history
        .iter()
        .find(|row| row.retired_recipient_id != plan.retired.id)
    {
        return Err(StoreError::ArchivalMismatch {
            recipient_id: plan.recipient_id,
            reason: format!(
                "history for delivery {} points at another retired recipient",
                row.original_delivery_id
            ),
        });
    }
    if plan.delivery_ids().len() != plan.history.len() {
        return Err(StoreError::ArchivalMismatch {
            recipient_id: plan.recipient_id,
            reason: "history contains the same delivery twice".to_string(),
        });
    }
    Ok(())
}

/// Checks an archival plan against the recipient's deliveries as they are
/// stored at apply time.
///
/// The plan must cover exactly those deliveries and every history row must
/// still mirror its delivery; a reversal committed after the plan was built
/// makes the plan stale.
pub fn check_archival_plan_current(plan: &ArchivalPlan, active: &[DeliveryRecord]) -> Result<()> {
    let stale = |reason: String| StoreError::ArchivalMismatch {
        recipient_id: plan.recipient_id,
        reason,
    };

    let stored: HashMap<DeliveryId, &DeliveryRecord> = active.iter().map(|d| (d.id, d)).collect();
    if stored.len() != plan.history.len()
        || stored.keys().copied().collect::<HashSet<_>>() != plan.delivery_ids()
    {
        return Err(stale(format!(
            "plan covers {} deliveries, {} are active",
            plan.history.len(),
            stored.len()
        )));
    }

    for row in &plan.history {
        let Some(delivery) = stored.get(&row.original_delivery_id) else {
            continue;
        };
        if row.status != delivery.status
            || row.reversal != delivery.reversal
            || row.line_items != delivery.line_items
        {
            return Err(stale(format!(
                "delivery {} changed since the plan was built (now {})",
                delivery.id, delivery.status
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MovementType;

    fn outbound(variant_id: VariantId, quantity: i64, previous: i64) -> QuantityChange {
        QuantityChange::new(
            MovementEntry::compute(
                variant_id,
                MovementType::Outbound,
                quantity,
                previous,
                "delivery",
                "clerk",
            )
            .unwrap(),
        )
    }

    #[test]
    fn empty_change_set_is_rejected() {
        let result = validate_change_set(&ChangeSet::new());
        assert!(matches!(result, Err(StoreError::InvalidChangeSet(_))));
    }

    #[test]
    fn chained_changes_are_accepted() {
        let variant_id = VariantId::new();
        let set = ChangeSet::new()
            .change(outbound(variant_id, 2, 10))
            .change(outbound(variant_id, 3, 8));
        assert!(validate_change_set(&set).is_ok());
    }

    #[test]
    fn broken_chain_is_rejected() {
        let variant_id = VariantId::new();
        let set = ChangeSet::new()
            .change(outbound(variant_id, 2, 10))
            .change(outbound(variant_id, 3, 10));
        assert!(matches!(
            validate_change_set(&set),
            Err(StoreError::InvalidChangeSet(_))
        ));
    }

    #[test]
    fn expected_previous_must_match_entry() {
        let mut change = outbound(VariantId::new(), 2, 10);
        change.expected_previous = 9;
        let set = ChangeSet::new().change(change);
        assert!(validate_change_set(&set).is_err());
    }
}
