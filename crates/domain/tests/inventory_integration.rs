//! Integration tests for the delivery and archival workflows.
//!
//! These tests drive the four services together over one shared
//! in-memory store and check the ledger invariants after every workflow.

use std::sync::Arc;

use common::{RecipientId, VariantId};
use domain::{
    ArchivalService, DeliveryRequest, DeliveryService, DomainError, MovementLedger, NewVariant,
    VariantCatalog,
};
use futures_util::TryStreamExt;
use ledger_store::{
    DeliveryStatus, Gender, InMemoryLedgerStore, LedgerStore, LedgerStoreExt, MovementType,
    Recipient,
};

struct Inventory {
    store: InMemoryLedgerStore,
    catalog: VariantCatalog<InMemoryLedgerStore>,
    ledger: MovementLedger<InMemoryLedgerStore>,
    deliveries: DeliveryService<InMemoryLedgerStore>,
    archival: ArchivalService<InMemoryLedgerStore>,
}

impl Inventory {
    fn new() -> Self {
        let store = InMemoryLedgerStore::new();
        Self {
            catalog: VariantCatalog::new(store.clone()),
            ledger: MovementLedger::new(store.clone()),
            deliveries: DeliveryService::new(store.clone()),
            archival: ArchivalService::new(store.clone()),
            store,
        }
    }

    async fn stocked(&self, new: NewVariant, quantity: i64) -> VariantId {
        let variant = self.catalog.provision(new).await.unwrap();
        if quantity > 0 {
            self.ledger
                .receive(variant.id, quantity, "initial stock", "clerk")
                .await
                .unwrap();
        }
        variant.id
    }

    async fn recipient(&self, name: &str) -> RecipientId {
        let recipient = Recipient::new(format!("doc-{name}"), name);
        let id = recipient.id;
        self.store.insert_recipient(recipient).await.unwrap();
        id
    }

    async fn quantity(&self, variant_id: VariantId) -> i64 {
        self.store.require_variant(variant_id).await.unwrap().quantity
    }

    /// Ledger consistency and entry arithmetic for every variant.
    async fn assert_ledger_consistent(&self) {
        for report in self.ledger.verify_all().await.unwrap() {
            assert!(report.is_consistent(), "inconsistent ledger: {report:?}");
        }
    }
}

fn pants_36m() -> NewVariant {
    NewVariant::new("PAN001", "Pantalon", "Uniforme")
        .with_size("36")
        .with_gender(Gender::Male)
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn delivery_reversal_lifecycle() {
        let inv = Inventory::new();
        let pants = inv.stocked(pants_36m(), 10).await;
        let first = inv.recipient("Ana").await;
        let second = inv.recipient("Luis").await;

        // Scenario 1: a delivery decrements stock and writes one outbound entry.
        let record = inv
            .deliveries
            .deliver(DeliveryRequest::new(first, "clerk").item(pants, 3))
            .await
            .unwrap();
        assert_eq!(inv.quantity(pants).await, 7);
        let entries = inv.deliveries.movements(record.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].movement_type, MovementType::Outbound);
        assert_eq!(entries[0].previous_quantity, 10);
        assert_eq!(entries[0].new_quantity, 7);

        // Scenario 2: an overdraw is rejected with the numbers and writes nothing.
        let movements_before = inv.store.movement_count().await;
        let result = inv
            .deliveries
            .deliver(DeliveryRequest::new(second, "clerk").item(pants, 8))
            .await;
        match result {
            Err(DomainError::InsufficientStock {
                variant,
                requested,
                available,
            }) => {
                assert_eq!(variant, "PAN001-36M");
                assert_eq!(requested, 8);
                assert_eq!(available, 7);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(inv.quantity(pants).await, 7);
        assert_eq!(inv.store.movement_count().await, movements_before);
        assert!(inv.deliveries.for_recipient(second).await.unwrap().is_empty());

        // Scenario 3: reversal restores stock.
        let reversed = inv
            .deliveries
            .reverse(record.id, "admin", "wrong size")
            .await
            .unwrap();
        assert_eq!(reversed.status, DeliveryStatus::Reversed);
        assert_eq!(inv.quantity(pants).await, 10);

        // Scenario 4: a second reversal is refused and changes nothing.
        let again = inv.deliveries.reverse(record.id, "admin", "wrong size").await;
        assert!(matches!(again, Err(DomainError::AlreadyReversed(_))));
        assert_eq!(inv.quantity(pants).await, 10);

        inv.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn archival_of_mixed_status_deliveries() {
        let inv = Inventory::new();
        let boots = inv
            .stocked(
                NewVariant::new("BOT004", "Botas", "Calzado")
                    .with_size("40")
                    .with_gender(Gender::Female),
                20,
            )
            .await;
        let recipient = inv.recipient("Ana").await;
        let colleague = inv.recipient("Luis").await;

        // Scenario 5: five deliveries, two of them reversed.
        let mut ids = Vec::new();
        for _ in 0..5 {
            let record = inv
                .deliveries
                .deliver(DeliveryRequest::new(recipient, "clerk").item(boots, 1))
                .await
                .unwrap();
            ids.push(record.id);
        }
        for id in &ids[..2] {
            inv.deliveries.reverse(*id, "admin", "returned").await.unwrap();
        }
        inv.deliveries
            .deliver(DeliveryRequest::new(colleague, "clerk").item(boots, 1))
            .await
            .unwrap();

        let before = inv.deliveries.for_recipient(recipient).await.unwrap().len();
        assert_eq!(before, 5);

        let retired = inv
            .archival
            .archive_recipient(recipient, "resigned", "hr1")
            .await
            .unwrap();

        let history = inv.archival.retired_history(recipient).await.unwrap();
        assert_eq!(history.len(), before);
        assert!(history.iter().all(|row| row.retired_recipient_id == retired.id));
        assert_eq!(
            history
                .iter()
                .filter(|row| row.status == DeliveryStatus::Reversed)
                .count(),
            2
        );

        assert!(inv.store.get_recipient(recipient).await.unwrap().is_none());
        assert!(matches!(
            inv.deliveries.for_recipient(recipient).await,
            Err(DomainError::NotFound { .. })
        ));
        for id in &ids {
            assert!(inv.store.get_delivery(*id).await.unwrap().is_none());
            // Ledger entries outlive the archived delivery.
            assert!(!inv.deliveries.movements(*id).await.unwrap().is_empty());
        }
        // The colleague is untouched.
        assert_eq!(inv.deliveries.for_recipient(colleague).await.unwrap().len(), 1);

        let again = inv
            .archival
            .archive_recipient(recipient, "resigned", "hr1")
            .await;
        assert!(matches!(again, Err(DomainError::AlreadyArchived(_))));

        inv.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn concurrent_deliveries_for_the_last_units() {
        // Scenario 6: exactly one of two racing deliveries wins.
        for _ in 0..20 {
            let inv = Inventory::new();
            let pants = inv.stocked(pants_36m(), 5).await;
            let first = inv.recipient("Ana").await;
            let second = inv.recipient("Luis").await;

            let service = Arc::new(DeliveryService::new(inv.store.clone()));
            let tasks = [first, second].map(|recipient| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .deliver(DeliveryRequest::new(recipient, "clerk").item(pants, 5))
                        .await
                })
            });

            let mut succeeded = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => succeeded += 1,
                    Err(DomainError::InsufficientStock {
                        requested,
                        available,
                        ..
                    }) => {
                        assert_eq!(requested, 5);
                        assert_eq!(available, 0);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            assert_eq!(succeeded, 1);
            assert_eq!(inv.quantity(pants).await, 0);
            inv.assert_ledger_consistent().await;
        }
    }
}

mod properties {
    use super::*;

    #[tokio::test]
    async fn failed_line_aborts_the_whole_delivery() {
        let inv = Inventory::new();
        let shirt = inv
            .stocked(
                NewVariant::new("CAM010", "Camisa", "Uniforme").with_size("M"),
                10,
            )
            .await;
        let pants = inv.stocked(pants_36m(), 1).await;
        let recipient = inv.recipient("Ana").await;
        let movements_before = inv.store.movement_count().await;

        let result = inv
            .deliveries
            .deliver(
                DeliveryRequest::new(recipient, "clerk")
                    .item(shirt, 2)
                    .item(pants, 2),
            )
            .await;
        assert!(matches!(result, Err(DomainError::InsufficientStock { .. })));

        assert_eq!(inv.quantity(shirt).await, 10);
        assert_eq!(inv.quantity(pants).await, 1);
        assert_eq!(inv.store.movement_count().await, movements_before);
        assert_eq!(inv.store.delivery_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_variant_aborts_the_whole_delivery() {
        let inv = Inventory::new();
        let shirt = inv
            .stocked(
                NewVariant::new("CAM010", "Camisa", "Uniforme").with_size("M"),
                10,
            )
            .await;
        let recipient = inv.recipient("Ana").await;

        let result = inv
            .deliveries
            .deliver(
                DeliveryRequest::new(recipient, "clerk")
                    .item(shirt, 1)
                    .item(VariantId::new(), 1),
            )
            .await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
        assert_eq!(inv.quantity(shirt).await, 10);
        assert_eq!(inv.store.delivery_count().await, 0);
    }

    #[tokio::test]
    async fn reversal_round_trip_restores_every_variant() {
        let inv = Inventory::new();
        let recipient = inv.recipient("Ana").await;
        let mut variants = Vec::new();
        for (size, quantity) in [("36", 4), ("38", 7), ("40", 9)] {
            let id = inv
                .stocked(
                    NewVariant::new("PAN001", "Pantalon", "Uniforme").with_size(size),
                    quantity,
                )
                .await;
            variants.push((id, quantity));
        }

        let mut request = DeliveryRequest::new(recipient, "clerk");
        for (id, quantity) in &variants {
            request = request.item(*id, quantity - 1);
        }
        let record = inv.deliveries.deliver(request).await.unwrap();
        for (id, _) in &variants {
            assert_eq!(inv.quantity(*id).await, 1);
        }

        inv.deliveries
            .reverse(record.id, "admin", "cancelled")
            .await
            .unwrap();
        for (id, quantity) in &variants {
            assert_eq!(inv.quantity(*id).await, *quantity);
        }
        inv.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn every_entry_balances() {
        let inv = Inventory::new();
        let pants = inv.stocked(pants_36m(), 6).await;
        let recipient = inv.recipient("Ana").await;

        let record = inv
            .deliveries
            .deliver(DeliveryRequest::new(recipient, "clerk").item(pants, 2))
            .await
            .unwrap();
        inv.catalog
            .adjust_quantity(pants, -1, 4, "damaged", "clerk")
            .await
            .unwrap();
        inv.deliveries
            .reverse(record.id, "admin", "returned")
            .await
            .unwrap();

        let entries: Vec<_> = inv
            .ledger
            .history(pants)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 4);
        let mut running = 0;
        for entry in &entries {
            assert!(entry.is_consistent());
            assert!(entry.new_quantity >= 0);
            assert_eq!(entry.previous_quantity, running);
            running = entry.new_quantity;
        }
        assert_eq!(running, inv.quantity(pants).await);
        assert_eq!(running, 5);
    }

    #[tokio::test]
    async fn codes_always_follow_the_key() {
        let inv = Inventory::new();
        for new in [
            pants_36m(),
            NewVariant::new("pan001", "Pantalon", "Uniforme").with_size("38"),
            NewVariant::new("OVR002", "Overol", "Uniforme").with_size("xl"),
            NewVariant::new("CAS003", "Casco", "Seguridad"),
            NewVariant::new("BOT004", "Botas", "Calzado").with_gender(Gender::Female),
        ] {
            inv.catalog.provision(new).await.unwrap();
        }
        // A write that would derive an existing code is refused.
        let clash = inv
            .catalog
            .provision(NewVariant::new("PAN001", "Pantalon", "Uniforme").with_size("36M"))
            .await;
        assert!(matches!(clash, Err(DomainError::DuplicateCode { .. })));

        let codes: Vec<_> = inv
            .store
            .list_all_variants()
            .await
            .unwrap()
            .into_iter()
            .map(|v| {
                assert!(v.code_matches_key());
                v.code
            })
            .collect();
        assert_eq!(
            codes,
            vec!["BOT004-F", "CAS003", "OVR002-XL", "PAN001-36M", "PAN001-38"]
        );
        assert!(inv.catalog.audit_codes().await.unwrap().is_empty());
    }
}
