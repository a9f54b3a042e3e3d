use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DeliveryId, DeliveryRecord, DeliveryStatus, Gender, LineItem, MovementEntry, MovementId,
    MovementType, Recipient, RecipientId, Result, RetiredDeliveryHistory, RetiredRecipient,
    RetiredRecipientId, Reversal, SignatureRef, StoreError, Variant, VariantId, VariantKey,
    store::{
        ArchivalPlan, ChangeSet, DeliveryWrite, LedgerStore, MovementStream, QuantityChange,
        check_archival_plan_current, validate_archival_plan, validate_change_set,
    },
};

const VARIANT_COLUMNS: &str = "id, base_code, size, gender, code, name, category, quantity, \
     minimum_quantity, active, created_at";

const MOVEMENT_COLUMNS: &str = "seq, id, variant_id, movement_type, quantity, previous_quantity, \
     new_quantity, reason, actor, delivery_id, timestamp";

const DELIVERY_COLUMNS: &str = "id, recipient_id, line_items, delivered_at, delivered_by, notes, \
     signature_ref, status, reversed_at, reversed_by, reversal_reason";

/// Entries fetched per round trip when streaming a variant's history.
const HISTORY_PAGE_SIZE: i64 = 256;

/// Position after the last streamed entry; `None` once the history is exhausted.
type HistoryCursor = Option<(Option<DateTime<Utc>>, i64)>;

/// PostgreSQL-backed ledger store implementation.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_variant(row: PgRow) -> Result<Variant> {
        let base_code: String = row.try_get("base_code")?;
        let size: Option<String> = row.try_get("size")?;
        let gender = match row.try_get::<Option<String>, _>("gender")? {
            Some(code) => Some(
                Gender::from_code(&code)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown gender {code:?}")))?,
            ),
            None => None,
        };
        let key = VariantKey::new(&base_code, size.as_deref(), gender)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(Variant {
            id: VariantId::from_uuid(row.try_get::<Uuid, _>("id")?),
            key,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            quantity: row.try_get("quantity")?,
            minimum_quantity: row.try_get("minimum_quantity")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_movement(row: &PgRow) -> Result<MovementEntry> {
        let movement_type: String = row.try_get("movement_type")?;
        Ok(MovementEntry {
            id: MovementId::from_uuid(row.try_get::<Uuid, _>("id")?),
            variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
            movement_type: MovementType::from_code(&movement_type).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown movement type {movement_type:?}"))
            })?,
            quantity: row.try_get("quantity")?,
            previous_quantity: row.try_get("previous_quantity")?,
            new_quantity: row.try_get("new_quantity")?,
            reason: row.try_get("reason")?,
            actor: row.try_get("actor")?,
            delivery_id: row
                .try_get::<Option<Uuid>, _>("delivery_id")?
                .map(DeliveryId::from_uuid),
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn decode_status(row: &PgRow) -> Result<DeliveryStatus> {
        let status: String = row.try_get("status")?;
        DeliveryStatus::from_code(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown delivery status {status:?}")))
    }

    fn decode_reversal(row: &PgRow) -> Result<Option<Reversal>> {
        let reversed_at: Option<DateTime<Utc>> = row.try_get("reversed_at")?;
        Ok(match reversed_at {
            Some(reversed_at) => Some(Reversal {
                reversed_at,
                reversed_by: row
                    .try_get::<Option<String>, _>("reversed_by")?
                    .unwrap_or_default(),
                reason: row
                    .try_get::<Option<String>, _>("reversal_reason")?
                    .unwrap_or_default(),
            }),
            None => None,
        })
    }

    fn decode_line_items(row: &PgRow) -> Result<Vec<LineItem>> {
        let json: serde_json::Value = row.try_get("line_items")?;
        Ok(serde_json::from_value(json)?)
    }

    fn row_to_delivery(row: PgRow) -> Result<DeliveryRecord> {
        Ok(DeliveryRecord {
            id: DeliveryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            recipient_id: RecipientId::from_uuid(row.try_get::<Uuid, _>("recipient_id")?),
            line_items: Self::decode_line_items(&row)?,
            delivered_at: row.try_get("delivered_at")?,
            delivered_by: row.try_get("delivered_by")?,
            notes: row.try_get("notes")?,
            signature_ref: row
                .try_get::<Option<String>, _>("signature_ref")?
                .map(SignatureRef::new),
            status: Self::decode_status(&row)?,
            reversal: Self::decode_reversal(&row)?,
        })
    }

    fn row_to_recipient(row: PgRow) -> Result<Recipient> {
        Ok(Recipient {
            id: RecipientId::from_uuid(row.try_get::<Uuid, _>("id")?),
            document_id: row.try_get("document_id")?,
            full_name: row.try_get("full_name")?,
            position: row.try_get("position")?,
            area: row.try_get("area")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_retired(row: PgRow) -> Result<RetiredRecipient> {
        Ok(RetiredRecipient {
            id: RetiredRecipientId::from_uuid(row.try_get::<Uuid, _>("id")?),
            original_id: RecipientId::from_uuid(row.try_get::<Uuid, _>("original_recipient_id")?),
            document_id: row.try_get("document_id")?,
            full_name: row.try_get("full_name")?,
            position: row.try_get("position")?,
            area: row.try_get("area")?,
            retired_at: row.try_get("retired_at")?,
            retired_reason: row.try_get("retired_reason")?,
            retired_by: row.try_get("retired_by")?,
        })
    }

    fn row_to_history(row: PgRow) -> Result<RetiredDeliveryHistory> {
        Ok(RetiredDeliveryHistory {
            original_delivery_id: DeliveryId::from_uuid(
                row.try_get::<Uuid, _>("original_delivery_id")?,
            ),
            retired_recipient_id: RetiredRecipientId::from_uuid(
                row.try_get::<Uuid, _>("retired_recipient_id")?,
            ),
            line_items: Self::decode_line_items(&row)?,
            delivered_at: row.try_get("delivered_at")?,
            delivered_by: row.try_get("delivered_by")?,
            notes: row.try_get("notes")?,
            signature_ref: row
                .try_get::<Option<String>, _>("signature_ref")?
                .map(SignatureRef::new),
            status: Self::decode_status(&row)?,
            reversal: Self::decode_reversal(&row)?,
            archived_at: row.try_get("archived_at")?,
        })
    }

    fn map_variant_write_error(e: sqlx::Error, code: &str) -> StoreError {
        // Unique violations on either the code or the structured key mean
        // another variant already owns this identity.
        if let sqlx::Error::Database(ref db_err) = e
            && matches!(
                db_err.constraint(),
                Some("unique_variant_code") | Some("unique_variant_key") | Some("variants_pkey")
            )
        {
            return StoreError::DuplicateCode {
                code: code.to_string(),
            };
        }
        StoreError::Database(e)
    }

    async fn apply_change(
        tx: &mut Transaction<'static, Postgres>,
        change: &QuantityChange,
    ) -> Result<()> {
        let variant_id = change.variant_id();
        let entry = &change.entry;

        // Compare-and-swap: concurrent writers block on the row lock and
        // then re-evaluate the predicate against the committed quantity.
        let updated = sqlx::query("UPDATE variants SET quantity = $3 WHERE id = $1 AND quantity = $2")
            .bind(variant_id.as_uuid())
            .bind(change.expected_previous)
            .bind(entry.new_quantity)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        if updated == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT quantity FROM variants WHERE id = $1")
                    .bind(variant_id.as_uuid())
                    .fetch_optional(&mut **tx)
                    .await?;
            return Err(match actual {
                Some(actual) => StoreError::QuantityConflict {
                    variant_id,
                    expected: change.expected_previous,
                    actual,
                },
                None => StoreError::VariantNotFound(variant_id),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO movements (id, variant_id, movement_type, quantity, previous_quantity,
                                   new_quantity, reason, actor, delivery_id, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(variant_id.as_uuid())
        .bind(entry.movement_type.as_str())
        .bind(entry.quantity)
        .bind(entry.previous_quantity)
        .bind(entry.new_quantity)
        .bind(&entry.reason)
        .bind(&entry.actor)
        .bind(entry.delivery_id.map(|id| id.as_uuid()))
        .bind(entry.timestamp)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_delivery(
        tx: &mut Transaction<'static, Postgres>,
        record: &DeliveryRecord,
    ) -> Result<()> {
        let line_items = serde_json::to_value(&record.line_items)?;
        sqlx::query(
            r#"
            INSERT INTO deliveries (id, recipient_id, line_items, delivered_at, delivered_by,
                                    notes, signature_ref, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.recipient_id.as_uuid())
        .bind(line_items)
        .bind(record.delivered_at)
        .bind(&record.delivered_by)
        .bind(&record.notes)
        .bind(record.signature_ref.as_ref().map(SignatureRef::as_str))
        .bind(record.status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("deliveries_recipient_fk") => {
                        return StoreError::RecipientNotFound(record.recipient_id);
                    }
                    Some("deliveries_pkey") => return StoreError::DuplicateDelivery(record.id),
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn reverse_delivery(
        tx: &mut Transaction<'static, Postgres>,
        record: &DeliveryRecord,
    ) -> Result<()> {
        let reversal = record.reversal.as_ref().ok_or_else(|| {
            StoreError::InvalidChangeSet(format!("delivery {} has no reversal details", record.id))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = $2, reversed_at = $3, reversed_by = $4, reversal_reason = $5
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(DeliveryStatus::Reversed.as_str())
        .bind(reversal.reversed_at)
        .bind(&reversal.reversed_by)
        .bind(&reversal.reason)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM deliveries WHERE id = $1")
                .bind(record.id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::DeliveryNotActive(record.id),
                None => StoreError::DeliveryNotFound(record.id),
            });
        }
        Ok(())
    }

    /// Fetches one page of a variant's history after `cursor`.
    ///
    /// Pages are keyed on `(timestamp, seq)`; a short page ends the stream.
    async fn history_page(
        pool: PgPool,
        sql: String,
        variant_id: VariantId,
        cursor: HistoryCursor,
    ) -> Result<Option<(Vec<MovementEntry>, HistoryCursor)>> {
        let Some((after_timestamp, after_seq)) = cursor else {
            return Ok(None);
        };
        let rows = sqlx::query(&sql)
            .bind(variant_id.as_uuid())
            .bind(after_timestamp)
            .bind(after_seq)
            .bind(HISTORY_PAGE_SIZE)
            .fetch_all(&pool)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let next = match rows.last() {
            Some(last) if rows.len() as i64 == HISTORY_PAGE_SIZE => Some((
                Some(last.try_get::<DateTime<Utc>, _>("timestamp")?),
                last.try_get::<i64, _>("seq")?,
            )),
            _ => None,
        };
        let entries = rows
            .iter()
            .map(Self::row_to_movement)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some((entries, next)))
    }

    async fn fetch_variants(&self, sql: &str, binds: &[&str]) -> Result<Vec<Variant>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_variant).collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn insert_variant(&self, variant: Variant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO variants (id, base_code, size, gender, code, name, category, quantity,
                                  minimum_quantity, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(variant.key.base_code())
        .bind(variant.key.size().map(|s| s.as_str()))
        .bind(variant.key.gender().map(|g| g.as_str()))
        .bind(&variant.code)
        .bind(&variant.name)
        .bind(&variant.category)
        .bind(variant.quantity)
        .bind(variant.minimum_quantity)
        .bind(variant.active)
        .bind(variant.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_variant_write_error(e, &variant.code))?;

        Ok(())
    }

    async fn update_variant_details(&self, variant: &Variant) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE variants
            SET name = $2, category = $3, minimum_quantity = $4, active = $5
            WHERE id = $1
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.name)
        .bind(&variant.category)
        .bind(variant.minimum_quantity)
        .bind(variant.active)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::VariantNotFound(variant.id));
        }
        Ok(())
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>> {
        let row = sqlx::query(&format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE id = $1"))
            .bind(variant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_variant).transpose()
    }

    async fn find_variant(&self, key: &VariantKey) -> Result<Option<Variant>> {
        let row = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants \
             WHERE base_code = $1 AND size IS NOT DISTINCT FROM $2 AND gender IS NOT DISTINCT FROM $3"
        ))
        .bind(key.base_code())
        .bind(key.size().map(|s| s.as_str()))
        .bind(key.gender().map(|g| g.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_variant).transpose()
    }

    async fn find_variant_by_code(&self, code: &str) -> Result<Option<Variant>> {
        let row = sqlx::query(&format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_variant).transpose()
    }

    async fn list_variants(&self, name: &str, category: &str) -> Result<Vec<Variant>> {
        self.fetch_variants(
            &format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE name = $1 AND category = $2"),
            &[name, category],
        )
        .await
    }

    async fn list_all_variants(&self) -> Result<Vec<Variant>> {
        self.fetch_variants(
            &format!("SELECT {VARIANT_COLUMNS} FROM variants ORDER BY code ASC"),
            &[],
        )
        .await
    }

    async fn commit(&self, change_set: ChangeSet) -> Result<()> {
        validate_change_set(&change_set)?;

        // Dropping the transaction on any error rolls everything back.
        let mut tx = self.pool.begin().await?;

        if let Some(DeliveryWrite::Reverse(record)) = &change_set.delivery {
            Self::reverse_delivery(&mut tx, record).await?;
        }

        for change in &change_set.changes {
            Self::apply_change(&mut tx, change).await?;
        }

        if let Some(DeliveryWrite::Insert(record)) = &change_set.delivery {
            Self::insert_delivery(&mut tx, record).await?;
        }

        tx.commit().await?;
        tracing::debug!(
            changes = change_set.changes.len(),
            delivery = ?change_set.delivery.as_ref().map(|w| w.record().id),
            "change set committed"
        );
        Ok(())
    }

    async fn movement_history(&self, variant_id: VariantId) -> Result<MovementStream> {
        let pool = self.pool.clone();
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements \
             WHERE variant_id = $1 AND ($2::timestamptz IS NULL OR (timestamp, seq) > ($2, $3)) \
             ORDER BY timestamp ASC, seq ASC LIMIT $4"
        );

        let start: HistoryCursor = Some((None, 0));
        let pages = stream::try_unfold(start, move |cursor| {
            Self::history_page(pool.clone(), sql.clone(), variant_id, cursor)
        });

        Ok(Box::pin(
            pages
                .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, StoreError>)))
                .try_flatten(),
        ))
    }

    async fn movements_for_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<MovementEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE delivery_id = $1 \
             ORDER BY timestamp ASC, seq ASC"
        ))
        .bind(delivery_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
        ))
        .bind(delivery_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_delivery).transpose()
    }

    async fn deliveries_for_recipient(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE recipient_id = $1 \
             ORDER BY delivered_at ASC, id ASC"
        ))
        .bind(recipient_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_delivery).collect()
    }

    async fn insert_recipient(&self, recipient: Recipient) -> Result<()> {
        let archived: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM retired_recipients WHERE original_recipient_id = $1",
        )
        .bind(recipient.id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        if archived.is_some() {
            return Err(StoreError::AlreadyArchived(recipient.id));
        }

        sqlx::query(
            r#"
            INSERT INTO recipients (id, document_id, full_name, position, area, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                document_id = EXCLUDED.document_id,
                full_name = EXCLUDED.full_name,
                position = EXCLUDED.position,
                area = EXCLUDED.area
            "#,
        )
        .bind(recipient.id.as_uuid())
        .bind(&recipient.document_id)
        .bind(&recipient.full_name)
        .bind(&recipient.position)
        .bind(&recipient.area)
        .bind(recipient.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_recipient(&self, recipient_id: RecipientId) -> Result<Option<Recipient>> {
        let row = sqlx::query(
            "SELECT id, document_id, full_name, position, area, created_at \
             FROM recipients WHERE id = $1",
        )
        .bind(recipient_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_recipient).transpose()
    }

    async fn archive(&self, plan: ArchivalPlan) -> Result<()> {
        validate_archival_plan(&plan)?;
        let recipient_id = plan.recipient_id;

        let mut tx = self.pool.begin().await?;

        let archived: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM retired_recipients WHERE original_recipient_id = $1",
        )
        .bind(recipient_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if archived.is_some() {
            return Err(StoreError::AlreadyArchived(recipient_id));
        }

        // Lock the recipient so no delivery can be inserted for it meanwhile.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM recipients WHERE id = $1 FOR UPDATE")
                .bind(recipient_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::RecipientNotFound(recipient_id));
        }

        let active = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE recipient_id = $1 FOR UPDATE"
        ))
        .bind(recipient_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Self::row_to_delivery)
        .collect::<Result<Vec<_>>>()?;
        check_archival_plan_current(&plan, &active)?;

        let retired = &plan.retired;
        sqlx::query(
            r#"
            INSERT INTO retired_recipients (id, original_recipient_id, document_id, full_name,
                                            position, area, retired_at, retired_reason, retired_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(retired.id.as_uuid())
        .bind(recipient_id.as_uuid())
        .bind(&retired.document_id)
        .bind(&retired.full_name)
        .bind(&retired.position)
        .bind(&retired.area)
        .bind(retired.retired_at)
        .bind(&retired.retired_reason)
        .bind(&retired.retired_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_retired_original")
            {
                return StoreError::AlreadyArchived(recipient_id);
            }
            StoreError::Database(e)
        })?;

        for row in &plan.history {
            let reversal = row.reversal.as_ref();
            sqlx::query(
                r#"
                INSERT INTO retired_delivery_history (original_delivery_id, retired_recipient_id,
                    line_items, delivered_at, delivered_by, notes, signature_ref, status,
                    reversed_at, reversed_by, reversal_reason, archived_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(row.original_delivery_id.as_uuid())
            .bind(retired.id.as_uuid())
            .bind(serde_json::to_value(&row.line_items)?)
            .bind(row.delivered_at)
            .bind(&row.delivered_by)
            .bind(&row.notes)
            .bind(row.signature_ref.as_ref().map(SignatureRef::as_str))
            .bind(row.status.as_str())
            .bind(reversal.map(|r| r.reversed_at))
            .bind(reversal.map(|r| r.reversed_by.as_str()))
            .bind(reversal.map(|r| r.reason.as_str()))
            .bind(row.archived_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM deliveries WHERE recipient_id = $1")
            .bind(recipient_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM recipients WHERE id = $1")
            .bind(recipient_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(%recipient_id, deliveries = plan.history.len(), "recipient archived");
        Ok(())
    }

    async fn retired_recipient_for(
        &self,
        recipient_id: RecipientId,
    ) -> Result<Option<RetiredRecipient>> {
        let row = sqlx::query(
            "SELECT id, original_recipient_id, document_id, full_name, position, area, \
             retired_at, retired_reason, retired_by \
             FROM retired_recipients WHERE original_recipient_id = $1",
        )
        .bind(recipient_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_retired).transpose()
    }

    async fn retired_history(
        &self,
        retired_id: RetiredRecipientId,
    ) -> Result<Vec<RetiredDeliveryHistory>> {
        let rows = sqlx::query(
            "SELECT original_delivery_id, retired_recipient_id, line_items, delivered_at, \
             delivered_by, notes, signature_ref, status, reversed_at, reversed_by, \
             reversal_reason, archived_at \
             FROM retired_delivery_history WHERE retired_recipient_id = $1 \
             ORDER BY delivered_at ASC",
        )
        .bind(retired_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_history).collect()
    }
}
