//! Operator tooling for the uniform inventory.
//!
//! Configuration, logging setup and the audited one-off commands run by the
//! `inventory-admin` binary. The core services live in the `domain` crate.

pub mod commands;
pub mod config;
pub mod error;
pub mod telemetry;

pub use commands::{Admin, Command, Outcome};
pub use config::{Config, LogFormat};
pub use error::AdminError;
