use thiserror::Error;

use crate::{DeliveryId, RecipientId, VariantId};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The variant does not exist.
    #[error("Variant not found: {0}")]
    VariantNotFound(VariantId),

    /// The delivery does not exist in the active tables.
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),

    /// The recipient does not exist in the active tables.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(RecipientId),

    /// Another variant already owns this code or identity key.
    #[error("Variant code {code} is already owned by another variant")]
    DuplicateCode { code: String },

    /// The stored quantity did not match the expected previous quantity.
    #[error(
        "Quantity conflict for variant {variant_id}: expected {expected}, found {actual}"
    )]
    QuantityConflict {
        variant_id: VariantId,
        expected: i64,
        actual: i64,
    },

    /// A movement would drive a variant's quantity below zero.
    #[error("Quantity for variant {variant_id} would become negative: {previous} - {quantity}")]
    NegativeQuantity {
        variant_id: VariantId,
        previous: i64,
        quantity: i64,
    },

    /// A movement would push a variant's quantity past the representable range.
    #[error("Quantity for variant {variant_id} would overflow: {previous} + {quantity}")]
    QuantityOverflow {
        variant_id: VariantId,
        previous: i64,
        quantity: i64,
    },

    /// The delivery exists but is no longer active.
    #[error("Delivery {0} is not active")]
    DeliveryNotActive(DeliveryId),

    /// The delivery id is already taken.
    #[error("Delivery {0} already exists")]
    DuplicateDelivery(DeliveryId),

    /// The recipient has already been moved to the archive.
    #[error("Recipient {0} is already archived")]
    AlreadyArchived(RecipientId),

    /// The active delivery set changed between planning and applying an archival.
    #[error("Archival plan for recipient {recipient_id} is stale: {reason}")]
    ArchivalMismatch {
        recipient_id: RecipientId,
        reason: String,
    },

    /// A change set failed structural validation before touching storage.
    #[error("Invalid change set: {0}")]
    InvalidChangeSet(String),

    /// A stored value could not be decoded into its domain representation.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backing store refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
