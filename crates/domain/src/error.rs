//! Domain error types.

use common::{DeliveryId, RecipientId, VariantId};
use ledger_store::{InvalidKey, StoreError};
use thiserror::Error;

/// Errors returned by the catalog, ledger, delivery and archival services.
///
/// Every error is terminal for the operation that produced it; nothing in
/// this crate retries.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another writer changed the variant's quantity first.
    #[error("Conflict on variant {variant_id}: expected quantity {expected}, found {actual}")]
    Conflict {
        variant_id: VariantId,
        expected: i64,
        actual: i64,
    },

    /// The requested quantity exceeds the variant's current stock.
    #[error("Insufficient stock for {variant}: requested {requested}, available {available}")]
    InsufficientStock {
        variant: String,
        requested: i64,
        available: i64,
    },

    /// The derived variant code belongs to another variant.
    #[error("Variant code {code} is already in use")]
    DuplicateCode { code: String },

    /// The identity key (base code, size, gender) is malformed.
    #[error("Invalid variant: {0}")]
    InvalidVariant(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("A delivery needs at least one line item")]
    EmptyDelivery,

    /// The variant has been retired and can no longer be issued.
    #[error("Variant {0} is retired")]
    VariantRetired(String),

    /// More than one variant matches a lookup that must be exact.
    #[error("{matches} variants of {name} ({category}) match the requested size and gender")]
    AmbiguousVariant {
        name: String,
        category: String,
        matches: usize,
    },

    #[error("Delivery {0} is already reversed")]
    AlreadyReversed(DeliveryId),

    #[error("Recipient {0} is already archived")]
    AlreadyArchived(RecipientId),

    /// The archival could not be applied; nothing was moved.
    #[error("Archival of recipient {recipient_id} failed: {reason}")]
    Archival {
        recipient_id: RecipientId,
        reason: String,
    },

    /// An error from the ledger store with no more specific meaning.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl DomainError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VariantNotFound(id) => DomainError::not_found("Variant", id),
            StoreError::DeliveryNotFound(id) => DomainError::not_found("Delivery", id),
            StoreError::RecipientNotFound(id) => DomainError::not_found("Recipient", id),
            StoreError::DuplicateCode { code } => DomainError::DuplicateCode { code },
            StoreError::QuantityConflict {
                variant_id,
                expected,
                actual,
            } => DomainError::Conflict {
                variant_id,
                expected,
                actual,
            },
            StoreError::NegativeQuantity {
                variant_id,
                previous,
                quantity,
            } => DomainError::InsufficientStock {
                variant: variant_id.to_string(),
                requested: quantity,
                available: previous,
            },
            StoreError::QuantityOverflow {
                variant_id,
                previous,
                quantity,
            } => DomainError::InvalidQuantity(format!(
                "adding {quantity} to {previous} overflows the quantity of variant {variant_id}"
            )),
            StoreError::DeliveryNotActive(id) => DomainError::AlreadyReversed(id),
            StoreError::AlreadyArchived(id) => DomainError::AlreadyArchived(id),
            StoreError::ArchivalMismatch {
                recipient_id,
                reason,
            } => DomainError::Archival {
                recipient_id,
                reason,
            },
            other => DomainError::Store(other),
        }
    }
}

impl From<InvalidKey> for DomainError {
    fn from(e: InvalidKey) -> Self {
        DomainError::InvalidVariant(e.0)
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
