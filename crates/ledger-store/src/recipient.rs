//! Recipients and their archived counterparts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    DeliveryId, DeliveryRecord, DeliveryStatus, LineItem, RecipientId, RetiredRecipientId,
    Reversal, SignatureRef,
};

/// A member of the workforce who can receive deliveries.
///
/// Recipients are owned by the personnel directory; this store keeps the
/// identity fields needed to validate and archive deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub document_id: String,
    pub full_name: String,
    pub position: Option<String>,
    pub area: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    pub fn new(document_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: RecipientId::new(),
            document_id: document_id.into(),
            full_name: full_name.into(),
            position: None,
            area: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }
}

/// Archived mirror of a [`Recipient`], written once at separation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredRecipient {
    pub id: RetiredRecipientId,
    /// The id the recipient had while active.
    pub original_id: RecipientId,
    pub document_id: String,
    pub full_name: String,
    pub position: Option<String>,
    pub area: Option<String>,
    pub retired_at: DateTime<Utc>,
    pub retired_reason: String,
    pub retired_by: String,
}

impl RetiredRecipient {
    pub fn from_recipient(
        recipient: &Recipient,
        reason: impl Into<String>,
        retired_by: impl Into<String>,
        retired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RetiredRecipientId::new(),
            original_id: recipient.id,
            document_id: recipient.document_id.clone(),
            full_name: recipient.full_name.clone(),
            position: recipient.position.clone(),
            area: recipient.area.clone(),
            retired_at,
            retired_reason: reason.into(),
            retired_by: retired_by.into(),
        }
    }
}

/// Archived mirror of a [`DeliveryRecord`], keyed by the original delivery id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredDeliveryHistory {
    pub original_delivery_id: DeliveryId,
    pub retired_recipient_id: RetiredRecipientId,
    pub line_items: Vec<LineItem>,
    pub delivered_at: DateTime<Utc>,
    pub delivered_by: String,
    pub notes: Option<String>,
    pub signature_ref: Option<SignatureRef>,
    pub status: DeliveryStatus,
    pub reversal: Option<Reversal>,
    pub archived_at: DateTime<Utc>,
}

impl RetiredDeliveryHistory {
    pub fn from_delivery(
        delivery: &DeliveryRecord,
        retired_recipient_id: RetiredRecipientId,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_delivery_id: delivery.id,
            retired_recipient_id,
            line_items: delivery.line_items.clone(),
            delivered_at: delivery.delivered_at,
            delivered_by: delivery.delivered_by.clone(),
            notes: delivery.notes.clone(),
            signature_ref: delivery.signature_ref.clone(),
            status: delivery.status,
            reversal: delivery.reversal.clone(),
            archived_at,
        }
    }
}
