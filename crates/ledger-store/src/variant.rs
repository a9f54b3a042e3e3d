//! Stock-keeping unit identity and the stored variant record.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::VariantId;

/// A variant key component failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid variant key: {0}")]
pub struct InvalidKey(pub String);

/// Gender qualifier of a variant. Absent means unisex or not applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
}

impl Gender {
    /// Returns the single-letter code used as the variant code suffix.
    pub fn as_char(&self) -> char {
        match self {
            Gender::Female => 'F',
            Gender::Male => 'M',
        }
    }

    /// Returns the code as a string slice, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
        }
    }

    /// Parses a stored gender code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "F" | "f" => Some(Gender::Female),
            "M" | "m" => Some(Gender::Male),
            _ => None,
        }
    }

    // Female before male; the order only needs to be stable.
    fn rank(gender: Option<Gender>) -> u8 {
        match gender {
            Some(Gender::Female) => 0,
            Some(Gender::Male) => 1,
            None => 2,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized size label such as `36`, `7.5` or `XL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Size(String);

impl Size {
    /// Normalizes and validates a size label.
    ///
    /// Labels are trimmed and upper-cased. Hyphens and whitespace are
    /// rejected because they would make the derived variant code ambiguous.
    pub fn parse(raw: &str) -> Result<Self, InvalidKey> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(InvalidKey("size must not be empty".to_string()));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '/'))
        {
            return Err(InvalidKey(format!(
                "size {normalized:?} contains invalid character {bad:?}"
            )));
        }
        Ok(Self(normalized))
    }

    /// Returns the size label.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric value when the label is a plain decimal number.
    pub fn numeric_value(&self) -> Option<f64> {
        let mut dots = 0;
        for c in self.0.chars() {
            match c {
                '0'..='9' => {}
                '.' => dots += 1,
                _ => return None,
            }
        }
        if dots > 1 || self.0.starts_with('.') || self.0.ends_with('.') {
            return None;
        }
        self.0.parse().ok()
    }

    /// Catalog ordering: numeric sizes ascending by value, then all
    /// non-numeric sizes lexically.
    pub fn catalog_cmp(&self, other: &Size) -> Ordering {
        match (self.numeric_value(), other.numeric_value()) {
            (Some(a), Some(b)) => a.total_cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Size {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Size> for String {
    fn from(size: Size) -> Self {
        size.0
    }
}

/// Structured identity of a variant: `(base_code, size, gender)`.
///
/// The variant code is always derived from this key, never stored
/// independently of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey {
    base_code: String,
    size: Option<Size>,
    gender: Option<Gender>,
}

impl VariantKey {
    /// Builds a key, normalizing the base code and size.
    pub fn new(
        base_code: &str,
        size: Option<&str>,
        gender: Option<Gender>,
    ) -> Result<Self, InvalidKey> {
        let base_code = base_code.trim().to_ascii_uppercase();
        if base_code.is_empty() {
            return Err(InvalidKey("base code must not be empty".to_string()));
        }
        if let Some(bad) = base_code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(InvalidKey(format!(
                "base code {base_code:?} contains invalid character {bad:?}"
            )));
        }
        let size = size.map(Size::parse).transpose()?;

        Ok(Self {
            base_code,
            size,
            gender,
        })
    }

    pub fn base_code(&self) -> &str {
        &self.base_code
    }

    pub fn size(&self) -> Option<&Size> {
        self.size.as_ref()
    }

    pub fn gender(&self) -> Option<Gender> {
        self.gender
    }

    /// Derives the variant code: `BASE-SIZE` followed by the gender letter.
    ///
    /// A key with neither size nor gender derives to the bare base code.
    pub fn code(&self) -> String {
        let mut code = self.base_code.clone();
        if self.size.is_some() || self.gender.is_some() {
            code.push('-');
        }
        if let Some(size) = &self.size {
            code.push_str(size.as_str());
        }
        if let Some(gender) = self.gender {
            code.push(gender.as_char());
        }
        code
    }

    /// Ordering used when listing variants of one item: size first
    /// (numeric, then lexical, then unsized), then gender.
    pub fn catalog_cmp(&self, other: &VariantKey) -> Ordering {
        let size_order = match (&self.size, &other.size) {
            (Some(a), Some(b)) => a.catalog_cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        size_order
            .then_with(|| Gender::rank(self.gender).cmp(&Gender::rank(other.gender)))
            .then_with(|| self.base_code.cmp(&other.base_code))
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A stored variant.
///
/// `quantity` is a projection of the movement ledger and only changes
/// through [`crate::LedgerStore::commit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub key: VariantKey,
    pub code: String,
    pub name: String,
    pub category: String,
    pub quantity: i64,
    pub minimum_quantity: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Creates a new active variant with zero stock.
    pub fn provisioned(
        key: VariantKey,
        name: impl Into<String>,
        category: impl Into<String>,
        minimum_quantity: i64,
    ) -> Self {
        Self {
            id: VariantId::new(),
            code: key.code(),
            key,
            name: name.into(),
            category: category.into(),
            quantity: 0,
            minimum_quantity,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the stored code equals the derivation from the key.
    pub fn code_matches_key(&self) -> bool {
        self.code == self.key.code()
    }

    /// Returns true if stock is below the informational reorder threshold.
    pub fn is_below_minimum(&self) -> bool {
        self.quantity < self.minimum_quantity
    }
}
