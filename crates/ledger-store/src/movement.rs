//! Movement ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryId, MovementId, Result, StoreError, VariantId};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock entering the warehouse (receipts, reversals).
    Inbound,
    /// Stock leaving the warehouse (deliveries).
    Outbound,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "INBOUND" => Some(MovementType::Inbound),
            "OUTBOUND" => Some(MovementType::Outbound),
            _ => None,
        }
    }

    /// Applies a movement of `quantity` to `previous`.
    ///
    /// Returns None if the result would be negative or overflow.
    pub fn apply(&self, previous: i64, quantity: i64) -> Option<i64> {
        let next = match self {
            MovementType::Inbound => previous.checked_add(quantity)?,
            MovementType::Outbound => previous.checked_sub(quantity)?,
        };
        (next >= 0).then_some(next)
    }

    /// Returns `quantity` with the sign of this movement direction.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            MovementType::Inbound => quantity,
            MovementType::Outbound => -quantity,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger entry recording one change to a variant's quantity.
///
/// Entries are never edited or deleted. Corrections are new entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    pub variant_id: VariantId,
    pub movement_type: MovementType,
    /// Magnitude of the change, always positive.
    pub quantity: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
    pub actor: String,
    /// The delivery that caused this movement, if any.
    pub delivery_id: Option<DeliveryId>,
    pub timestamp: DateTime<Utc>,
}

impl MovementEntry {
    /// Builds an entry from the quantity observed before the change.
    ///
    /// Fails with `InvalidChangeSet` for non-positive quantities, with
    /// `NegativeQuantity` if an outbound movement would overdraw stock and
    /// with `QuantityOverflow` if the result does not fit in an `i64`.
    pub fn compute(
        variant_id: VariantId,
        movement_type: MovementType,
        quantity: i64,
        previous_quantity: i64,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Result<Self> {
        if quantity <= 0 {
            return Err(StoreError::InvalidChangeSet(format!(
                "movement quantity must be positive, got {quantity}"
            )));
        }
        let next = match movement_type {
            MovementType::Inbound => previous_quantity.checked_add(quantity),
            MovementType::Outbound => previous_quantity.checked_sub(quantity),
        };
        let new_quantity = match next {
            Some(next) if next >= 0 => next,
            Some(_) => {
                return Err(StoreError::NegativeQuantity {
                    variant_id,
                    previous: previous_quantity,
                    quantity,
                });
            }
            None => {
                return Err(StoreError::QuantityOverflow {
                    variant_id,
                    previous: previous_quantity,
                    quantity,
                });
            }
        };

        Ok(Self {
            id: MovementId::new(),
            variant_id,
            movement_type,
            quantity,
            previous_quantity,
            new_quantity,
            reason: reason.into(),
            actor: actor.into(),
            delivery_id: None,
            timestamp: Utc::now(),
        })
    }

    /// Links the entry to the delivery that caused it.
    pub fn for_delivery(mut self, delivery_id: DeliveryId) -> Self {
        self.delivery_id = Some(delivery_id);
        self
    }

    /// The change expressed as a signed delta.
    pub fn signed_quantity(&self) -> i64 {
        self.movement_type.signed(self.quantity)
    }

    /// Checks the entry arithmetic: positive magnitude, non-negative result,
    /// and `new == previous ± quantity`.
    pub fn is_consistent(&self) -> bool {
        self.quantity > 0
            && self.new_quantity >= 0
            && self
                .movement_type
                .apply(self.previous_quantity, self.quantity)
                == Some(self.new_quantity)
    }
}
