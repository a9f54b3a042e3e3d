//! Delivery records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryId, RecipientId, VariantId};

/// State of a delivery record.
///
/// ```text
/// Active ──► Reversed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// The issued stock is out with the recipient.
    #[default]
    Active,

    /// The delivery was undone by compensating inbound movements.
    Reversed,
}

impl DeliveryStatus {
    pub fn can_reverse(&self) -> bool {
        matches!(self, DeliveryStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Active => "ACTIVE",
            DeliveryStatus::Reversed => "REVERSED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ACTIVE" => Some(DeliveryStatus::Active),
            "REVERSED" => Some(DeliveryStatus::Reversed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One issued variant and its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub variant_id: VariantId,
    pub quantity: i64,
}

impl LineItem {
    pub fn new(variant_id: VariantId, quantity: i64) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }
}

/// Opaque pointer to a signature artifact held by an external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRef(String);

impl SignatureRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignatureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who reversed a delivery, when and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    pub reversed_at: DateTime<Utc>,
    pub reversed_by: String,
    pub reason: String,
}

/// A delivery of one or more variants to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub recipient_id: RecipientId,
    pub line_items: Vec<LineItem>,
    pub delivered_at: DateTime<Utc>,
    pub delivered_by: String,
    pub notes: Option<String>,
    pub signature_ref: Option<SignatureRef>,
    pub status: DeliveryStatus,
    pub reversal: Option<Reversal>,
}

impl DeliveryRecord {
    pub fn is_active(&self) -> bool {
        self.status == DeliveryStatus::Active
    }

    /// Total number of units across all line items.
    pub fn total_units(&self) -> i64 {
        self.line_items.iter().map(|item| item.quantity).sum()
    }

    /// Returns the reversed form of this record.
    ///
    /// Callers check [`DeliveryStatus::can_reverse`] first; the store
    /// re-checks the stored status when the write is applied.
    pub fn into_reversed(mut self, reversal: Reversal) -> Self {
        self.status = DeliveryStatus::Reversed;
        self.reversal = Some(reversal);
        self
    }
}
