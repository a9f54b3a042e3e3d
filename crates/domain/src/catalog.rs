//! Variant catalog: identity, lookup and ordering of stock-keeping units.

use ledger_store::{
    ChangeSet, Gender, LedgerStore, LedgerStoreExt, MovementType, QuantityChange, Size, Variant,
    VariantKey,
};
use serde::Deserialize;

use common::VariantId;

use crate::error::{DomainError, Result};
use crate::ledger::plan_movement;

/// Input for provisioning a new variant.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVariant {
    pub base_code: String,
    pub size: Option<String>,
    pub gender: Option<Gender>,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub minimum_quantity: i64,
}

impl NewVariant {
    pub fn new(
        base_code: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            base_code: base_code.into(),
            size: None,
            gender: None,
            name: name.into(),
            category: category.into(),
            minimum_quantity: 0,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn with_minimum(mut self, minimum_quantity: i64) -> Self {
        self.minimum_quantity = minimum_quantity;
        self
    }
}

/// Descriptive fields that may change after provisioning. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariantDetails {
    pub name: Option<String>,
    pub category: Option<String>,
    pub minimum_quantity: Option<i64>,
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::InvalidVariant(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value.to_string())
}

fn require_minimum(minimum_quantity: i64) -> Result<i64> {
    if minimum_quantity < 0 {
        return Err(DomainError::InvalidQuantity(format!(
            "minimum quantity must not be negative, got {minimum_quantity}"
        )));
    }
    Ok(minimum_quantity)
}

/// Refuses catalog writes to rows whose stored code no longer derives from
/// their key. Such rows show up in `audit_codes` and need a data fix first.
fn require_derived_code(variant: &Variant) -> Result<()> {
    if !variant.code_matches_key() {
        return Err(DomainError::InvalidVariant(format!(
            "stored code {} does not match derived code {}",
            variant.code,
            variant.key.code()
        )));
    }
    Ok(())
}

/// Source of truth for variant identity and current quantity.
pub struct VariantCatalog<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> VariantCatalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a variant with zero stock. Stock arrives through the ledger.
    ///
    /// Fails with `DuplicateCode` if the derived code or the identity key is
    /// already owned by another variant.
    #[tracing::instrument(skip(self))]
    pub async fn provision(&self, new: NewVariant) -> Result<Variant> {
        let key = VariantKey::new(&new.base_code, new.size.as_deref(), new.gender)?;
        let variant = Variant::provisioned(
            key,
            require_text("name", &new.name)?,
            require_text("category", &new.category)?,
            require_minimum(new.minimum_quantity)?,
        );

        self.store.insert_variant(variant.clone()).await?;

        tracing::info!(code = %variant.code, id = %variant.id, "variant provisioned");
        Ok(variant)
    }

    /// Changes name, category or minimum quantity. Identity is immutable.
    #[tracing::instrument(skip(self))]
    pub async fn update_details(
        &self,
        variant_id: VariantId,
        details: VariantDetails,
    ) -> Result<Variant> {
        let mut variant = self.store.require_variant(variant_id).await?;
        require_derived_code(&variant)?;
        if let Some(name) = &details.name {
            variant.name = require_text("name", name)?;
        }
        if let Some(category) = &details.category {
            variant.category = require_text("category", category)?;
        }
        if let Some(minimum_quantity) = details.minimum_quantity {
            variant.minimum_quantity = require_minimum(minimum_quantity)?;
        }

        self.store.update_variant_details(&variant).await?;
        Ok(variant)
    }

    /// Marks a variant inactive. Retiring twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn retire(&self, variant_id: VariantId) -> Result<Variant> {
        let mut variant = self.store.require_variant(variant_id).await?;
        require_derived_code(&variant)?;
        if variant.active {
            variant.active = false;
            self.store.update_variant_details(&variant).await?;
            tracing::info!(code = %variant.code, "variant retired");
        }
        Ok(variant)
    }

    /// Exact lookup by display name, category, size and gender.
    ///
    /// Size and gender are part of the identity: a variant without a gender
    /// does not match a request for `F`, and vice versa.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        name: &str,
        category: &str,
        size: Option<&str>,
        gender: Option<Gender>,
    ) -> Result<Variant> {
        let size = size
            .map(Size::parse)
            .transpose()
            .map_err(DomainError::from)?;

        let mut matches: Vec<Variant> = self
            .store
            .list_variants(name, category)
            .await?
            .into_iter()
            .filter(|v| v.key.size() == size.as_ref() && v.key.gender() == gender)
            .collect();

        match matches.len() {
            0 => Err(DomainError::not_found(
                "Variant",
                describe(name, category, size.as_ref(), gender),
            )),
            1 => Ok(matches.remove(0)),
            n => Err(DomainError::AmbiguousVariant {
                name: name.to_string(),
                category: category.to_string(),
                matches: n,
            }),
        }
    }

    /// Lookup by the stored variant code.
    #[tracing::instrument(skip(self))]
    pub async fn by_code(&self, code: &str) -> Result<Variant> {
        let code = code.trim().to_ascii_uppercase();
        self.store
            .find_variant_by_code(&code)
            .await?
            .ok_or_else(|| DomainError::not_found("Variant", code))
    }

    /// Active variants of one item with stock on hand, in catalog order:
    /// numeric sizes ascending, then other sizes lexically, then unsized;
    /// female before male before ungendered within a size.
    #[tracing::instrument(skip(self))]
    pub async fn list_available(&self, name: &str, category: &str) -> Result<Vec<Variant>> {
        let mut variants: Vec<Variant> = self
            .store
            .list_variants(name, category)
            .await?
            .into_iter()
            .filter(|v| v.active && v.quantity > 0)
            .collect();
        variants.sort_by(|a, b| a.key.catalog_cmp(&b.key));
        Ok(variants)
    }

    /// Applies a signed quantity change guarded by the quantity the caller
    /// last observed. The change is always written to the ledger.
    ///
    /// Fails with `Conflict` if the stored quantity differs from
    /// `expected_previous`, and with `InsufficientStock` if the result would
    /// be negative.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_quantity(
        &self,
        variant_id: VariantId,
        delta: i64,
        expected_previous: i64,
        reason: &str,
        actor: &str,
    ) -> Result<Variant> {
        let (movement_type, quantity) = match delta.checked_abs() {
            Some(0) => {
                return Err(DomainError::InvalidQuantity(
                    "adjustment delta must not be zero".to_string(),
                ));
            }
            Some(magnitude) if delta > 0 => (MovementType::Inbound, magnitude),
            Some(magnitude) => (MovementType::Outbound, magnitude),
            None => {
                return Err(DomainError::InvalidQuantity(format!(
                    "adjustment delta {delta} is out of range"
                )));
            }
        };

        let mut variant = self.store.require_variant(variant_id).await?;
        if variant.quantity != expected_previous {
            return Err(DomainError::Conflict {
                variant_id,
                expected: expected_previous,
                actual: variant.quantity,
            });
        }

        let entry = plan_movement(&variant, movement_type, quantity, reason, actor)?;
        let new_quantity = entry.new_quantity;
        self.store
            .commit(ChangeSet::new().change(QuantityChange::new(entry)))
            .await?;

        metrics::counter!("movements_recorded_total", "type" => movement_type.as_str())
            .increment(1);
        variant.quantity = new_quantity;
        Ok(variant)
    }

    /// Active variants whose stock is below their reorder threshold.
    #[tracing::instrument(skip(self))]
    pub async fn below_minimum(&self) -> Result<Vec<Variant>> {
        Ok(self
            .store
            .list_all_variants()
            .await?
            .into_iter()
            .filter(|v| v.active && v.is_below_minimum())
            .collect())
    }

    /// Variants whose stored code is not the derivation of their key.
    #[tracing::instrument(skip(self))]
    pub async fn audit_codes(&self) -> Result<Vec<Variant>> {
        Ok(self
            .store
            .list_all_variants()
            .await?
            .into_iter()
            .filter(|v| !v.code_matches_key())
            .collect())
    }
}

fn describe(name: &str, category: &str, size: Option<&Size>, gender: Option<Gender>) -> String {
    format!(
        "{name} ({category}) size {} gender {}",
        size.map(Size::as_str).unwrap_or("-"),
        gender.map(|g| g.as_str()).unwrap_or("-"),
    )
}
