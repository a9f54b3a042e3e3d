//! Persistence layer for the uniform inventory ledger.
//!
//! Record types for every stored entity, the [`LedgerStore`] trait and two
//! implementations: an in-memory store for tests and a PostgreSQL store.
//! Every trait method is a single unit of work; the multi-row writes
//! ([`LedgerStore::commit`] and [`LedgerStore::archive`]) are atomic.

pub mod delivery;
pub mod error;
pub mod memory;
pub mod movement;
pub mod postgres;
pub mod recipient;
pub mod store;
pub mod variant;

pub use common::{DeliveryId, MovementId, RecipientId, RetiredRecipientId, VariantId};
pub use delivery::{DeliveryRecord, DeliveryStatus, LineItem, Reversal, SignatureRef};
pub use error::{Result, StoreError};
pub use memory::InMemoryLedgerStore;
pub use movement::{MovementEntry, MovementType};
pub use postgres::PostgresLedgerStore;
pub use recipient::{Recipient, RetiredDeliveryHistory, RetiredRecipient};
pub use store::{
    ArchivalPlan, ChangeSet, DeliveryWrite, LedgerStore, LedgerStoreExt, MovementStream,
    QuantityChange,
};
pub use variant::{Gender, InvalidKey, Size, Variant, VariantKey};
