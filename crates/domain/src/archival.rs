//! Separation archival: moves a departing recipient and their deliveries
//! out of the active tables in one unit of work.

use chrono::Utc;
use ledger_store::{
    ArchivalPlan, LedgerStore, RetiredDeliveryHistory, RetiredRecipient, StoreError,
};

use common::RecipientId;

use crate::error::{DomainError, Result};

pub struct ArchivalService<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> ArchivalService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Archives the recipient and every delivery they have, in any status.
    ///
    /// Either the retired recipient and all history rows are written and the
    /// active rows deleted, or nothing changes. Ledger entries are kept and
    /// keep pointing at the archived delivery ids.
    #[tracing::instrument(skip(self))]
    pub async fn archive_recipient(
        &self,
        recipient_id: RecipientId,
        reason: &str,
        actor: &str,
    ) -> Result<RetiredRecipient> {
        if self
            .store
            .retired_recipient_for(recipient_id)
            .await?
            .is_some()
        {
            return Err(DomainError::AlreadyArchived(recipient_id));
        }
        let recipient = self
            .store
            .get_recipient(recipient_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Recipient", recipient_id))?;
        let deliveries = self.store.deliveries_for_recipient(recipient_id).await?;

        let now = Utc::now();
        let retired = RetiredRecipient::from_recipient(&recipient, reason, actor, now);
        let history: Vec<RetiredDeliveryHistory> = deliveries
            .iter()
            .map(|delivery| RetiredDeliveryHistory::from_delivery(delivery, retired.id, now))
            .collect();
        let moved = history.len();

        let plan = ArchivalPlan {
            recipient_id,
            retired: retired.clone(),
            history,
        };
        self.store.archive(plan).await.map_err(|e| match e {
            StoreError::AlreadyArchived(_) | StoreError::RecipientNotFound(_) => e.into(),
            other => DomainError::Archival {
                recipient_id,
                reason: other.to_string(),
            },
        })?;

        metrics::counter!("recipients_archived_total").increment(1);
        tracing::info!(
            %recipient_id,
            retired_id = %retired.id,
            deliveries = moved,
            "recipient archived"
        );
        Ok(retired)
    }

    /// The archived mirror of a recipient, looked up by their former id.
    #[tracing::instrument(skip(self))]
    pub async fn retired_recipient(&self, recipient_id: RecipientId) -> Result<RetiredRecipient> {
        self.store
            .retired_recipient_for(recipient_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Retired recipient", recipient_id))
    }

    /// Archived deliveries of a former recipient, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn retired_history(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<RetiredDeliveryHistory>> {
        let retired = self.retired_recipient(recipient_id).await?;
        Ok(self.store.retired_history(retired.id).await?)
    }
}
