//! Schema registry: static metadata for every measurement field.
//!
//! A [`Schema`] is built once at process start and never changes afterwards.
//! Clones share the same immutable field table, so callers may cache the
//! result of [`Schema::fields`] indefinitely.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::ValidationError;
use crate::value::Value;

/// Longitude in degrees.
pub const KEY_LON: &str = "location.lon";
/// Latitude in degrees.
pub const KEY_LAT: &str = "location.lat";
/// Name of the provider that produced the fix.
pub const KEY_PROVIDER: &str = "location.provider";

/// Smallest meaningful increment of a coordinate, in degrees.
const COORDINATE_RESOLUTION: f64 = 1e-9;

/// Kind of value a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Float,
    String,
    Int,
    Bool,
}

impl FieldType {
    /// Returns true for types that carry bounds and a resolution.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Float => "float",
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Description of one measurement field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Unique, process-stable identifier.
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Human-readable label.
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Lower bound; `0.0` for non-numeric fields.
    pub min: f64,
    /// Upper bound; `0.0` for non-numeric fields.
    pub max: f64,
    /// Smallest meaningful increment; `0.0` for non-numeric fields.
    pub resolution: f64,
}

impl FieldSchema {
    /// A bounded floating point field.
    pub fn float(
        key: impl Into<String>,
        display_name: impl Into<String>,
        unit: Option<&str>,
        min: f64,
        max: f64,
        resolution: f64,
    ) -> Self {
        Self {
            key: key.into(),
            field_type: FieldType::Float,
            display_name: display_name.into(),
            unit: unit.map(str::to_string),
            min,
            max,
            resolution,
        }
    }

    /// A bounded integer field.
    #[allow(clippy::cast_precision_loss)]
    pub fn int(
        key: impl Into<String>,
        display_name: impl Into<String>,
        unit: Option<&str>,
        min: i64,
        max: i64,
    ) -> Self {
        Self {
            key: key.into(),
            field_type: FieldType::Int,
            display_name: display_name.into(),
            unit: unit.map(str::to_string),
            min: min as f64,
            max: max as f64,
            resolution: 1.0,
        }
    }

    pub fn string(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::unbounded(key, display_name, FieldType::String)
    }

    pub fn bool(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::unbounded(key, display_name, FieldType::Bool)
    }

    fn unbounded(
        key: impl Into<String>,
        display_name: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            key: key.into(),
            field_type,
            display_name: display_name.into(),
            unit: None,
            min: 0.0,
            max: 0.0,
            resolution: 0.0,
        }
    }

    /// Numeric fields with `min == max == 0` are treated as unbounded.
    #[must_use]
    pub fn has_bounds(&self) -> bool {
        self.field_type.is_numeric() && !(self.min == 0.0 && self.max == 0.0)
    }

    /// Check one value against this field.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the runtime type differs, `OutOfRange` if a numeric
    /// value is not finite or falls outside `[min, max]`.
    pub fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let actual = value.field_type();
        if actual != self.field_type {
            return Err(ValidationError::TypeMismatch {
                key: self.key.clone(),
                expected: self.field_type,
                actual,
            });
        }

        if let Some(v) = value.as_float() {
            let in_range = !self.has_bounds() || (self.min..=self.max).contains(&v);
            if !v.is_finite() || !in_range {
                return Err(ValidationError::OutOfRange {
                    key: self.key.clone(),
                    value: v,
                    min: self.min,
                    max: self.max,
                });
            }
        }

        Ok(())
    }
}

/// Immutable registry of field schemas keyed by field key.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Arc<BTreeMap<String, FieldSchema>>,
}

impl Schema {
    /// Start building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// The location schema: longitude, latitude and provider.
    #[must_use]
    pub fn location() -> Self {
        let fields = [
            FieldSchema::float(
                KEY_LON,
                "Longitude",
                Some("deg"),
                -180.0,
                180.0,
                COORDINATE_RESOLUTION,
            ),
            FieldSchema::float(
                KEY_LAT,
                "Latitude",
                Some("deg"),
                -90.0,
                90.0,
                COORDINATE_RESOLUTION,
            ),
            FieldSchema::string(KEY_PROVIDER, "Provider"),
        ];
        Self {
            fields: Arc::new(fields.into_iter().map(|f| (f.key.clone(), f)).collect()),
        }
    }

    /// Full field description set.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldSchema> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldSchema> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate a set of values against the schema.
    ///
    /// Keys absent from `values` are allowed; every key present must be
    /// declared and carry a value of the declared type.
    ///
    /// # Errors
    ///
    /// Returns the first `UnknownField`, `TypeMismatch` or `OutOfRange` found.
    pub fn validate(&self, values: &BTreeMap<String, Value>) -> Result<(), ValidationError> {
        for (key, value) in values {
            let field = self
                .fields
                .get(key)
                .ok_or_else(|| ValidationError::UnknownField { key: key.clone() })?;
            field.check(value)?;
        }
        Ok(())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldSchema>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Freeze the schema.
    ///
    /// # Errors
    ///
    /// `DuplicateField` if a key is declared twice, `InvalidBounds` if a
    /// numeric field has `min > max`.
    pub fn build(self) -> Result<Schema, ValidationError> {
        let mut fields = BTreeMap::new();
        for field in self.fields {
            if field.field_type.is_numeric() && field.min > field.max {
                return Err(ValidationError::InvalidBounds {
                    key: field.key,
                    min: field.min,
                    max: field.max,
                });
            }
            if fields.contains_key(&field.key) {
                return Err(ValidationError::DuplicateField { key: field.key });
            }
            fields.insert(field.key.clone(), field);
        }
        Ok(Schema {
            fields: Arc::new(fields),
        })
    }
}
