//! Shared identifier types.

mod types;

pub use types::{DeliveryId, MovementId, RecipientId, RetiredRecipientId, VariantId};
