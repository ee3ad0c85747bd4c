//! Common-info overrides applied to every trial of a batch run.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::adapter::RecordAdapter;
use crate::schema::{SchemaRegistry, Scope};
use crate::source::{SourceValue, StructRecord};
use crate::value::TypedValue;
use crate::{Error, Result};

/// Field values that replace every trial's extracted value.
///
/// Only batch fields can be overridden. Names and values are checked
/// against the Schema Registry when inserted, so a bad override fails
/// before the first trial is touched.
///
/// # Example
///
/// ```rust
/// use gait_archive::aggregate::CommonInfo;
/// use gait_archive::schema::SchemaRegistry;
///
/// let registry = SchemaRegistry::standard();
/// let info = CommonInfo::from_json_str(
///     r#"{"subjectName": "S001", "subjectMass": 70.0, "subjectLegLength": null}"#,
///     &registry,
/// )?;
/// assert_eq!(info.len(), 3);
/// assert_eq!(info.get("subjectName").and_then(|v| v.as_text()), Some("S001"));
/// # Ok::<(), gait_archive::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonInfo {
    overrides: BTreeMap<&'static str, TypedValue>,
}

impl CommonInfo {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one override.
    ///
    /// Catalog fields outside the batch layout are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`] for an uncatalogued name,
    /// [`Error::TypeMismatch`] for an ill-typed value.
    pub fn insert(&mut self, registry: &SchemaRegistry, field: &str, value: TypedValue) -> Result<()> {
        let spec = registry.describe(field)?;
        if spec.scope != Scope::Batch {
            debug!(field, "ignoring override for non-batch field");
            return Ok(());
        }
        self.overrides.insert(spec.name, value.conform(spec)?);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn with(mut self, registry: &SchemaRegistry, field: &str, value: TypedValue) -> Result<Self> {
        self.insert(registry, field, value)?;
        Ok(self)
    }

    /// Build from a JSON object mapping field names to values.
    ///
    /// `null` stands for the field's placeholder (NaN, empty string or empty list).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the document is not an object, plus the
    /// errors of [`insert`](Self::insert).
    pub fn from_json(value: &Value, registry: &SchemaRegistry) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Config(
                "common info must be a JSON object".to_string(),
            ));
        };
        let adapter = RecordAdapter::new(registry);
        let mut info = Self::new();
        for (name, raw) in map {
            let spec = registry.describe(name)?;
            let typed = if raw.is_null() {
                TypedValue::placeholder(spec)
            } else {
                let record = StructRecord::new().with(name.as_str(), SourceValue::from_json(raw));
                adapter
                    .adapt_spec(&record, spec)?
                    .unwrap_or_else(|| TypedValue::placeholder(spec))
            };
            info.insert(registry, name, typed)?;
        }
        Ok(info)
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] on malformed JSON, otherwise as [`from_json`](Self::from_json).
    pub fn from_json_str(text: &str, registry: &SchemaRegistry) -> Result<Self> {
        Self::from_json(&serde_json::from_str(text)?, registry)
    }

    /// Load a JSON file.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if unreadable, otherwise as [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>, registry: &SchemaRegistry) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?, registry)
    }

    /// Override for `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&TypedValue> {
        self.overrides.get(field)
    }

    /// Whether `field` is overridden.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.overrides.contains_key(field)
    }

    /// Overrides in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &TypedValue)> {
        self.overrides.iter().map(|(k, v)| (*k, v))
    }

    /// Number of overrides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Whether there are no overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}
