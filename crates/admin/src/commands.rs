//! Audited one-off operations run by operators.
//!
//! Every stock change goes through the movement ledger; there is no command
//! that writes a quantity directly.

use std::io::Write;

use clap::Subcommand;
use domain::{LedgerReport, MovementLedger, VariantCatalog};
use futures_util::TryStreamExt;
use ledger_store::{LedgerStore, MovementEntry, Variant};
use serde::Serialize;

use crate::error::AdminError;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Record an inbound receipt of stock for a variant code
    Receive {
        /// Variant code, e.g. PAN001-36M
        code: String,
        /// Units received
        quantity: i64,
        #[arg(long, default_value = "receipt")]
        reason: String,
        #[arg(long, env = "INVENTORY_ACTOR")]
        actor: String,
    },

    /// Print the movement ledger of a variant, oldest first
    History { code: String },

    /// Replay every ledger and compare it with the stored quantities
    Verify,

    /// List active variants below their minimum quantity
    LowStock,

    /// List variants whose code does not follow their identity key
    AuditCodes,
}

/// Outcome of a command. `healthy` is false when an audit found problems.
#[derive(Debug, Default)]
pub struct Outcome {
    pub healthy: bool,
}

/// Runs ledger commands against one store.
pub struct Admin<S: LedgerStore> {
    catalog: VariantCatalog<S>,
    ledger: MovementLedger<S>,
    json: bool,
}

impl<S: LedgerStore + Clone> Admin<S> {
    pub fn new(store: S, json: bool) -> Self {
        Self {
            catalog: VariantCatalog::new(store.clone()),
            ledger: MovementLedger::new(store),
            json,
        }
    }

    /// Executes every command except `migrate`, which needs the concrete store.
    pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<Outcome, AdminError> {
        match command {
            Command::Migrate => Err(AdminError::Config(
                "migrate runs against the database directly".to_string(),
            )),
            Command::Receive {
                code,
                quantity,
                reason,
                actor,
            } => {
                let entry = self.receive(&code, quantity, &reason, &actor).await?;
                self.emit(out, &entry, |out, entry| {
                    writeln!(
                        out,
                        "{code}: {} -> {} (+{})",
                        entry.previous_quantity, entry.new_quantity, entry.quantity
                    )
                })?;
                Ok(Outcome { healthy: true })
            }
            Command::History { code } => {
                let entries = self.history(&code).await?;
                self.emit(out, &entries, |out, entries| {
                    for e in entries {
                        writeln!(
                            out,
                            "{}\t{}\t{}\t{} -> {}\t{}\t{}",
                            e.timestamp.to_rfc3339(),
                            e.movement_type.as_str(),
                            e.quantity,
                            e.previous_quantity,
                            e.new_quantity,
                            e.actor,
                            e.reason
                        )?;
                    }
                    Ok(())
                })?;
                Ok(Outcome { healthy: true })
            }
            Command::Verify => {
                let reports = self.ledger.verify_all().await?;
                let healthy = reports.iter().all(LedgerReport::is_consistent);
                self.emit(out, &reports, |out, reports| {
                    for r in reports.iter().filter(|r| !r.is_consistent()) {
                        writeln!(
                            out,
                            "{}: stored {} derived {} ({} broken entries)",
                            r.code,
                            r.stored,
                            r.derived,
                            r.broken_entries.len()
                        )?;
                    }
                    writeln!(out, "{} variants checked", reports.len())
                })?;
                Ok(Outcome { healthy })
            }
            Command::LowStock => {
                let variants = self.catalog.below_minimum().await?;
                self.emit(out, &variants, write_variants)?;
                Ok(Outcome { healthy: true })
            }
            Command::AuditCodes => {
                let variants = self.catalog.audit_codes().await?;
                let healthy = variants.is_empty();
                self.emit(out, &variants, |out, variants| {
                    for v in variants {
                        writeln!(out, "{}\texpected {}", v.code, v.key.code())?;
                    }
                    Ok(())
                })?;
                Ok(Outcome { healthy })
            }
        }
    }

    pub async fn receive(
        &self,
        code: &str,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> Result<MovementEntry, AdminError> {
        let variant = self.catalog.by_code(code).await?;
        Ok(self.ledger.receive(variant.id, quantity, reason, actor).await?)
    }

    pub async fn history(&self, code: &str) -> Result<Vec<MovementEntry>, AdminError> {
        let variant = self.catalog.by_code(code).await?;
        Ok(self
            .ledger
            .history(variant.id)
            .await?
            .try_collect::<Vec<_>>()
            .await?)
    }

    fn emit<T: Serialize, W: Write>(
        &self,
        out: &mut W,
        value: &T,
        text: impl FnOnce(&mut W, &T) -> std::io::Result<()>,
    ) -> Result<(), AdminError> {
        if self.json {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        } else {
            text(out, value)?;
        }
        Ok(())
    }
}

fn write_variants<W: Write>(out: &mut W, variants: &Vec<Variant>) -> std::io::Result<()> {
    for v in variants {
        writeln!(
            out,
            "{}\t{}\tquantity {}\tminimum {}",
            v.code, v.name, v.quantity, v.minimum_quantity
        )?;
    }
    Ok(())
}
