//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use ledger_store::{
    ArchivalPlan, ChangeSet, DeliveryId, DeliveryRecord, DeliveryStatus, DeliveryWrite, Gender,
    LedgerStore, LedgerStoreExt, LineItem, MovementEntry, MovementType, PostgresLedgerStore,
    QuantityChange, Recipient, RecipientId, RetiredDeliveryHistory, RetiredRecipient, Reversal,
    SignatureRef, StoreError, Variant, VariantId, VariantKey,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_inventory_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE retired_delivery_history, retired_recipients, movements, deliveries, \
         recipients, variants",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresLedgerStore::new(pool)
}

fn pants(size: &str, gender: Option<Gender>) -> Variant {
    let key = VariantKey::new("PAN001", Some(size), gender).unwrap();
    Variant::provisioned(key, "Pantalon", "Uniforme", 2)
}

fn change(
    variant_id: VariantId,
    movement_type: MovementType,
    quantity: i64,
    previous: i64,
) -> MovementEntry {
    MovementEntry::compute(variant_id, movement_type, quantity, previous, "test", "clerk").unwrap()
}

async fn stocked(store: &PostgresLedgerStore, size: &str, quantity: i64) -> VariantId {
    let variant = pants(size, None);
    let id = variant.id;
    store.insert_variant(variant).await.unwrap();
    store
        .commit(ChangeSet::new().change(QuantityChange::new(change(
            id,
            MovementType::Inbound,
            quantity,
            0,
        ))))
        .await
        .unwrap();
    id
}

async fn recipient(store: &PostgresLedgerStore) -> Recipient {
    let recipient = Recipient::new("1020304050", "Ana Gomez").with_area("Planta");
    store.insert_recipient(recipient.clone()).await.unwrap();
    recipient
}

fn delivery(recipient_id: RecipientId, items: Vec<LineItem>) -> DeliveryRecord {
    DeliveryRecord {
        id: DeliveryId::new(),
        recipient_id,
        line_items: items,
        delivered_at: Utc::now(),
        delivered_by: "clerk".to_string(),
        notes: Some("first issue".to_string()),
        signature_ref: Some(SignatureRef::new("signatures/abc.png")),
        status: DeliveryStatus::Active,
        reversal: None,
    }
}

fn delivery_change_set(record: &DeliveryRecord, previous: &[i64]) -> ChangeSet {
    let mut set = ChangeSet::new();
    for (item, previous) in record.line_items.iter().zip(previous) {
        set = set.change(QuantityChange::new(
            change(item.variant_id, MovementType::Outbound, item.quantity, *previous)
                .for_delivery(record.id),
        ));
    }
    set.with_delivery(DeliveryWrite::Insert(record.clone()))
}

#[tokio::test]
#[serial]
async fn variant_round_trip() {
    let store = get_test_store().await;
    let variant = pants("36", Some(Gender::Male));
    store.insert_variant(variant.clone()).await.unwrap();

    let loaded = store.require_variant(variant.id).await.unwrap();
    assert_eq!(loaded, Variant {
        created_at: loaded.created_at,
        ..variant.clone()
    });

    let by_key = store.find_variant(&variant.key).await.unwrap().unwrap();
    assert_eq!(by_key.id, variant.id);
    let by_code = store.find_variant_by_code("PAN001-36M").await.unwrap().unwrap();
    assert_eq!(by_code.id, variant.id);
}

#[tokio::test]
#[serial]
async fn duplicate_code_is_rejected() {
    let store = get_test_store().await;
    store
        .insert_variant(pants("36", Some(Gender::Male)))
        .await
        .unwrap();

    let result = store.insert_variant(pants("36M", None)).await;
    assert!(matches!(result, Err(StoreError::DuplicateCode { .. })));
}

#[tokio::test]
#[serial]
async fn commit_is_compare_and_swap() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;

    let stale = store
        .commit(ChangeSet::new().change(QuantityChange::new(change(
            id,
            MovementType::Outbound,
            2,
            9,
        ))))
        .await;
    assert!(matches!(
        stale,
        Err(StoreError::QuantityConflict {
            expected: 9,
            actual: 10,
            ..
        })
    ));
    assert_eq!(store.require_variant(id).await.unwrap().quantity, 10);
}

#[tokio::test]
#[serial]
async fn delivery_commit_is_atomic() {
    let store = get_test_store().await;
    let a = stocked(&store, "36", 10).await;
    let b = stocked(&store, "38", 4).await;
    let ana = recipient(&store).await;

    let record = delivery(ana.id, vec![LineItem::new(a, 3), LineItem::new(b, 1)]);
    // The second line expects a stale quantity.
    let result = store.commit(delivery_change_set(&record, &[10, 5])).await;
    assert!(result.is_err());

    assert_eq!(store.require_variant(a).await.unwrap().quantity, 10);
    assert_eq!(store.require_variant(b).await.unwrap().quantity, 4);
    assert!(store.get_delivery(record.id).await.unwrap().is_none());
    assert!(store.movements_for_delivery(record.id).await.unwrap().is_empty());

    store
        .commit(delivery_change_set(&record, &[10, 4]))
        .await
        .unwrap();
    let stored = store.require_delivery(record.id).await.unwrap();
    assert_eq!(stored, record_with_time(&record, &stored));
    assert_eq!(store.require_variant(a).await.unwrap().quantity, 7);
    assert_eq!(store.require_variant(b).await.unwrap().quantity, 3);
}

// Postgres stores microseconds; compare against the stored timestamp.
fn record_with_time(record: &DeliveryRecord, stored: &DeliveryRecord) -> DeliveryRecord {
    DeliveryRecord {
        delivered_at: stored.delivered_at,
        ..record.clone()
    }
}

#[tokio::test]
#[serial]
async fn delivery_for_unknown_recipient_is_rejected() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;

    let record = delivery(RecipientId::new(), vec![LineItem::new(id, 1)]);
    let result = store.commit(delivery_change_set(&record, &[10])).await;
    assert!(matches!(result, Err(StoreError::RecipientNotFound(_))));
    assert_eq!(store.require_variant(id).await.unwrap().quantity, 10);
}

#[tokio::test]
#[serial]
async fn reversal_happens_once() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;
    let ana = recipient(&store).await;
    let record = delivery(ana.id, vec![LineItem::new(id, 3)]);
    store
        .commit(delivery_change_set(&record, &[10]))
        .await
        .unwrap();

    let reversed = record.clone().into_reversed(Reversal {
        reversed_at: Utc::now(),
        reversed_by: "admin".to_string(),
        reason: "wrong size".to_string(),
    });
    let compensate = |previous| {
        ChangeSet::new()
            .change(QuantityChange::new(
                change(id, MovementType::Inbound, 3, previous).for_delivery(record.id),
            ))
            .with_delivery(DeliveryWrite::Reverse(reversed.clone()))
    };

    store.commit(compensate(7)).await.unwrap();
    let stored = store.require_delivery(record.id).await.unwrap();
    assert_eq!(stored.status, DeliveryStatus::Reversed);
    assert_eq!(
        stored.reversal.map(|r| r.reason),
        Some("wrong size".to_string())
    );

    let again = store.commit(compensate(10)).await;
    assert!(matches!(again, Err(StoreError::DeliveryNotActive(_))));
    assert_eq!(store.require_variant(id).await.unwrap().quantity, 10);
}

#[tokio::test]
#[serial]
async fn concurrent_commits_cannot_overdraw() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 5).await;
    let ana = recipient(&store).await;

    let first = delivery(ana.id, vec![LineItem::new(id, 5)]);
    let second = delivery(ana.id, vec![LineItem::new(id, 5)]);
    let (r1, r2) = tokio::join!(
        store.commit(delivery_change_set(&first, &[5])),
        store.commit(delivery_change_set(&second, &[5])),
    );

    assert!(r1.is_ok() ^ r2.is_ok());
    assert_eq!(store.require_variant(id).await.unwrap().quantity, 0);
}

#[tokio::test]
#[serial]
async fn history_streams_across_pages() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 1).await;

    for previous in 1..300 {
        store
            .commit(ChangeSet::new().change(QuantityChange::new(change(
                id,
                MovementType::Inbound,
                1,
                previous,
            ))))
            .await
            .unwrap();
    }

    let entries: Vec<_> = store
        .movement_history(id)
        .await
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect()
        .await;
    assert_eq!(entries.len(), 300);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.new_quantity, i as i64 + 1);
    }
}

#[tokio::test]
#[serial]
async fn archive_moves_everything_once() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;
    let ana = recipient(&store).await;

    let record = delivery(ana.id, vec![LineItem::new(id, 2)]);
    store
        .commit(delivery_change_set(&record, &[10]))
        .await
        .unwrap();

    let retired = RetiredRecipient::from_recipient(&ana, "resigned", "hr1", Utc::now());
    let plan = ArchivalPlan {
        recipient_id: ana.id,
        history: vec![RetiredDeliveryHistory::from_delivery(
            &record,
            retired.id,
            Utc::now(),
        )],
        retired: retired.clone(),
    };
    store.archive(plan.clone()).await.unwrap();

    assert!(store.get_recipient(ana.id).await.unwrap().is_none());
    assert!(store.get_delivery(record.id).await.unwrap().is_none());
    let history = store.retired_history(retired.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].original_delivery_id, record.id);
    assert_eq!(store.movements_for_delivery(record.id).await.unwrap().len(), 1);

    let found = store.retired_recipient_for(ana.id).await.unwrap().unwrap();
    assert_eq!(found.id, retired.id);

    let again = store.archive(plan).await;
    assert!(matches!(again, Err(StoreError::AlreadyArchived(_))));
}

#[tokio::test]
#[serial]
async fn stale_archival_plan_changes_nothing() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;
    let ana = recipient(&store).await;

    let retired = RetiredRecipient::from_recipient(&ana, "resigned", "hr1", Utc::now());
    let plan = ArchivalPlan {
        recipient_id: ana.id,
        retired: retired.clone(),
        history: vec![],
    };

    let record = delivery(ana.id, vec![LineItem::new(id, 1)]);
    store
        .commit(delivery_change_set(&record, &[10]))
        .await
        .unwrap();

    let result = store.archive(plan).await;
    assert!(matches!(result, Err(StoreError::ArchivalMismatch { .. })));
    assert!(store.get_recipient(ana.id).await.unwrap().is_some());
    assert!(store.retired_recipient_for(ana.id).await.unwrap().is_none());
    assert_eq!(store.deliveries_for_recipient(ana.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn reversal_after_planning_makes_the_plan_stale() {
    let store = get_test_store().await;
    let id = stocked(&store, "36", 10).await;
    let ana = recipient(&store).await;
    let record = delivery(ana.id, vec![LineItem::new(id, 2)]);
    store
        .commit(delivery_change_set(&record, &[10]))
        .await
        .unwrap();

    let retired = RetiredRecipient::from_recipient(&ana, "resigned", "hr1", Utc::now());
    let plan = ArchivalPlan {
        recipient_id: ana.id,
        history: store
            .deliveries_for_recipient(ana.id)
            .await
            .unwrap()
            .iter()
            .map(|d| RetiredDeliveryHistory::from_delivery(d, retired.id, Utc::now()))
            .collect(),
        retired: retired.clone(),
    };

    let reversed = record.clone().into_reversed(Reversal {
        reversed_at: Utc::now(),
        reversed_by: "admin".to_string(),
        reason: "wrong size".to_string(),
    });
    store
        .commit(
            ChangeSet::new()
                .change(QuantityChange::new(
                    change(id, MovementType::Inbound, 2, 8).for_delivery(record.id),
                ))
                .with_delivery(DeliveryWrite::Reverse(reversed)),
        )
        .await
        .unwrap();

    let result = store.archive(plan).await;
    assert!(matches!(result, Err(StoreError::ArchivalMismatch { .. })));
    assert!(store.retired_recipient_for(ana.id).await.unwrap().is_none());
    assert_eq!(
        store.require_delivery(record.id).await.unwrap().status,
        DeliveryStatus::Reversed
    );

    let fresh = ArchivalPlan {
        recipient_id: ana.id,
        history: store
            .deliveries_for_recipient(ana.id)
            .await
            .unwrap()
            .iter()
            .map(|d| RetiredDeliveryHistory::from_delivery(d, retired.id, Utc::now()))
            .collect(),
        retired: retired.clone(),
    };
    store.archive(fresh).await.unwrap();
    let history = store.retired_history(retired.id).await.unwrap();
    assert_eq!(history[0].status, DeliveryStatus::Reversed);
    assert_eq!(
        history[0].reversal.as_ref().map(|r| r.reason.as_str()),
        Some("wrong size")
    );
}
