//! Domain layer for the uniform inventory.
//!
//! Four services over a generic [`ledger_store::LedgerStore`]:
//! - [`VariantCatalog`] for variant identity, lookup and ordering
//! - [`MovementLedger`] for the append-only record of stock changes
//! - [`DeliveryService`] for all-or-nothing deliveries and their reversal
//! - [`ArchivalService`] for moving departing recipients into the archive
//!
//! Services own a store handle; clone the store to share it between them.

pub mod archival;
pub mod catalog;
pub mod delivery;
pub mod error;
pub mod ledger;

pub use archival::ArchivalService;
pub use catalog::{NewVariant, VariantCatalog, VariantDetails};
pub use delivery::{DELIVERY_REASON, DeliveryRequest, DeliveryService, REVERSAL_REASON};
pub use error::{DomainError, Result};
pub use ledger::{HistoryStream, LedgerReport, MovementLedger};
