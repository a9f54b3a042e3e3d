use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    DeliveryId, DeliveryRecord, MovementEntry, Recipient, RecipientId, Result,
    RetiredDeliveryHistory, RetiredRecipient, RetiredRecipientId, StoreError, Variant, VariantId,
    VariantKey,
    store::{
        ArchivalPlan, ChangeSet, DeliveryWrite, LedgerStore, MovementStream,
        check_archival_plan_current, validate_archival_plan, validate_change_set,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    variants: HashMap<VariantId, Variant>,
    movements: Vec<MovementEntry>,
    deliveries: HashMap<DeliveryId, DeliveryRecord>,
    recipients: HashMap<RecipientId, Recipient>,
    retired: HashMap<RetiredRecipientId, RetiredRecipient>,
    retired_history: Vec<RetiredDeliveryHistory>,
}

impl MemoryState {
    fn code_owner(&self, variant: &Variant) -> Option<&Variant> {
        self.variants
            .values()
            .find(|v| v.id != variant.id && (v.code == variant.code || v.key == variant.key))
    }
}

/// In-memory ledger store implementation for testing.
///
/// All state lives behind a single lock, so every write method observes and
/// applies a consistent snapshot, giving the same atomicity as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<MemoryState>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `commit` and `archive` fail before applying
    /// anything, simulating an unavailable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of ledger entries stored.
    pub async fn movement_count(&self) -> usize {
        self.state.read().await.movements.len()
    }

    /// Returns the total number of active delivery records.
    pub async fn delivery_count(&self) -> usize {
        self.state.read().await.deliveries.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_variant(&self, variant: Variant) -> Result<()> {
        let mut state = self.state.write().await;
        if state.variants.contains_key(&variant.id) || state.code_owner(&variant).is_some() {
            return Err(StoreError::DuplicateCode { code: variant.code });
        }
        state.variants.insert(variant.id, variant);
        Ok(())
    }

    async fn update_variant_details(&self, variant: &Variant) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .variants
            .get_mut(&variant.id)
            .ok_or(StoreError::VariantNotFound(variant.id))?;
        stored.name = variant.name.clone();
        stored.category = variant.category.clone();
        stored.minimum_quantity = variant.minimum_quantity;
        stored.active = variant.active;
        Ok(())
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>> {
        Ok(self.state.read().await.variants.get(&variant_id).cloned())
    }

    async fn find_variant(&self, key: &VariantKey) -> Result<Option<Variant>> {
        let state = self.state.read().await;
        Ok(state.variants.values().find(|v| &v.key == key).cloned())
    }

    async fn find_variant_by_code(&self, code: &str) -> Result<Option<Variant>> {
        let state = self.state.read().await;
        Ok(state.variants.values().find(|v| v.code == code).cloned())
    }

    async fn list_variants(&self, name: &str, category: &str) -> Result<Vec<Variant>> {
        let state = self.state.read().await;
        Ok(state
            .variants
            .values()
            .filter(|v| v.name == name && v.category == category)
            .cloned()
            .collect())
    }

    async fn list_all_variants(&self) -> Result<Vec<Variant>> {
        let state = self.state.read().await;
        let mut variants: Vec<_> = state.variants.values().cloned().collect();
        variants.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(variants)
    }

    async fn commit(&self, change_set: ChangeSet) -> Result<()> {
        validate_change_set(&change_set)?;
        self.check_writable()?;

        let mut state = self.state.write().await;

        // Check every precondition against the locked state before applying anything.
        let mut quantities: HashMap<VariantId, i64> = HashMap::new();
        for change in &change_set.changes {
            let variant_id = change.variant_id();
            let current = match quantities.get(&variant_id) {
                Some(quantity) => *quantity,
                None => {
                    state
                        .variants
                        .get(&variant_id)
                        .ok_or(StoreError::VariantNotFound(variant_id))?
                        .quantity
                }
            };
            if current != change.expected_previous {
                return Err(StoreError::QuantityConflict {
                    variant_id,
                    expected: change.expected_previous,
                    actual: current,
                });
            }
            quantities.insert(variant_id, change.entry.new_quantity);
        }

        match &change_set.delivery {
            Some(DeliveryWrite::Insert(record)) => {
                if state.deliveries.contains_key(&record.id) {
                    return Err(StoreError::DuplicateDelivery(record.id));
                }
                if !state.recipients.contains_key(&record.recipient_id) {
                    return Err(StoreError::RecipientNotFound(record.recipient_id));
                }
            }
            Some(DeliveryWrite::Reverse(record)) => {
                let stored = state
                    .deliveries
                    .get(&record.id)
                    .ok_or(StoreError::DeliveryNotFound(record.id))?;
                if !stored.status.can_reverse() {
                    return Err(StoreError::DeliveryNotActive(record.id));
                }
            }
            None => {}
        }

        for (variant_id, quantity) in quantities {
            if let Some(variant) = state.variants.get_mut(&variant_id) {
                variant.quantity = quantity;
            }
        }
        state
            .movements
            .extend(change_set.changes.into_iter().map(|change| change.entry));
        if let Some(write) = change_set.delivery {
            let record = match write {
                DeliveryWrite::Insert(record) | DeliveryWrite::Reverse(record) => record,
            };
            state.deliveries.insert(record.id, record);
        }

        Ok(())
    }

    async fn movement_history(&self, variant_id: VariantId) -> Result<MovementStream> {
        use futures_util::stream;

        let state = self.state.read().await;
        // Insertion order is commit order; the stable sort keeps it for equal timestamps.
        let mut entries: Vec<_> = state
            .movements
            .iter()
            .filter(|e| e.variant_id == variant_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);

        let stream = stream::iter(entries.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn movements_for_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<MovementEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .movements
            .iter()
            .filter(|e| e.delivery_id == Some(delivery_id))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        Ok(self.state.read().await.deliveries.get(&delivery_id).cloned())
    }

    async fn deliveries_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<DeliveryRecord>> {
        let state = self.state.read().await;
        let mut deliveries: Vec<_> = state
            .deliveries
            .values()
            .filter(|d| d.recipient_id == recipient_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| {
            a.delivered_at
                .cmp(&b.delivered_at)
                .then(a.id.cmp(&b.id))
        });
        Ok(deliveries)
    }

    async fn insert_recipient(&self, recipient: Recipient) -> Result<()> {
        let mut state = self.state.write().await;
        if state.retired.values().any(|r| r.original_id == recipient.id) {
            return Err(StoreError::AlreadyArchived(recipient.id));
        }
        state.recipients.insert(recipient.id, recipient);
        Ok(())
    }

    async fn get_recipient(&self, recipient_id: RecipientId) -> Result<Option<Recipient>> {
        Ok(self.state.read().await.recipients.get(&recipient_id).cloned())
    }

    async fn archive(&self, plan: ArchivalPlan) -> Result<()> {
        validate_archival_plan(&plan)?;
        self.check_writable()?;

        let mut state = self.state.write().await;
        let recipient_id = plan.recipient_id;

        if state
            .retired
            .values()
            .any(|r| r.original_id == recipient_id)
        {
            return Err(StoreError::AlreadyArchived(recipient_id));
        }
        if !state.recipients.contains_key(&recipient_id) {
            return Err(StoreError::RecipientNotFound(recipient_id));
        }

        let active: Vec<DeliveryRecord> = state
            .deliveries
            .values()
            .filter(|d| d.recipient_id == recipient_id)
            .cloned()
            .collect();
        check_archival_plan_current(&plan, &active)?;

        for delivery in &active {
            state.deliveries.remove(&delivery.id);
        }
        state.recipients.remove(&recipient_id);
        state.retired.insert(plan.retired.id, plan.retired);
        state.retired_history.extend(plan.history);

        Ok(())
    }

    async fn retired_recipient_for(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Option<RetiredRecipient>> {
        let state = self.state.read().await;
        Ok(state
            .retired
            .values()
            .find(|r| r.original_id == recipient_id)
            .cloned())
    }

    async fn retired_history(
        &self,
        retired_id: RetiredRecipientId,
    ) -> Result<Vec<RetiredDeliveryHistory>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .retired_history
            .iter()
            .filter(|row| row.retired_recipient_id == retired_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.delivered_at);
        Ok(rows)
    }
}
