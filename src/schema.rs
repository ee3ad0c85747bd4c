//! Schema Registry - the canonical field catalog
//!
//! Pure data: every field the converter knows about, with its container
//! category, element type, rank, units and presence policy. The catalog is
//! built once and never mutated; asking for a name outside it is a
//! configuration bug and fails with [`Error::UnknownField`].

use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// How a field is materialised in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    /// Attribute on a group or dataset
    ScalarAttribute,
    /// Dataset written once with the value's exact shape
    FixedDataset,
    /// Dataset with an unbounded leading dimension, one slot per trial
    GrowableDataset,
    /// Fixed dataset of variable-length strings
    StringDataset,
}

/// Element type of a field's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// UTF-8 text
    Utf8,
    /// Boolean flag
    Bool,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 32-bit unsigned integer (sample indices)
    UInt32,
}

impl ElementType {
    /// Whether values of this type are numeric.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64 | Self::UInt32)
    }
}

/// Shape of a single value of the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    /// Single element
    Scalar,
    /// 1-D sequence (length free)
    Vector,
    /// 2-D array, optionally with a fixed column count
    Matrix {
        /// Required column count, if any
        columns: Option<usize>,
    },
    /// Ordered sequence of strings
    List,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Vector => write!(f, "vector"),
            Self::Matrix { columns: Some(c) } => write!(f, "matrix with {c} columns"),
            Self::Matrix { columns: None } => write!(f, "matrix"),
            Self::List => write!(f, "string list"),
        }
    }
}

/// What happens when the source record lacks the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Absence is a data error
    Required,
    /// Absence yields `Absent`; batch mode fills a placeholder
    Optional,
    /// No source-side computation; NaN / empty unless supplied or overridden
    BlankByDefault,
}

/// Where in the container layout the field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Attributes of `/`
    Root,
    /// Attributes of `/subject`
    Subject,
    /// Attributes and datasets of `/trials/<trialId>`
    Trial,
    /// Metadata attributes of a trial's series datasets
    Series,
    /// Root-level growable datasets, one slot per committed trial
    Batch,
}

/// Catalog entry for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name (also the container node or attribute name)
    pub name: &'static str,
    /// Container category
    pub category: FieldCategory,
    /// Element type
    pub element: ElementType,
    /// Per-value rank
    pub rank: Rank,
    /// Units metadata, when fixed by the schema
    pub units: Option<&'static str>,
    /// Absence policy
    pub presence: Presence,
    /// Layout scope
    pub scope: Scope,
    /// Path of sub-field names inside the owning source struct
    pub source_path: &'static [&'static str],
}

impl FieldSpec {
    /// Whether absence is tolerated by extraction.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.presence != Presence::Required
    }

    /// Whether the field is blank by default.
    #[must_use]
    pub fn is_blank_by_default(&self) -> bool {
        self.presence == Presence::BlankByDefault
    }

    /// Human-readable description of the declared type, used in mismatch errors.
    #[must_use]
    pub fn expected(&self) -> String {
        format!("{:?} {}", self.element, self.rank)
    }
}

#[allow(clippy::too_many_arguments)]
const fn field(
    name: &'static str,
    category: FieldCategory,
    element: ElementType,
    rank: Rank,
    units: Option<&'static str>,
    presence: Presence,
    scope: Scope,
    source_path: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        category,
        element,
        rank,
        units,
        presence,
        scope,
        source_path,
    }
}

const fn batch(
    name: &'static str,
    element: ElementType,
    rank: Rank,
    units: Option<&'static str>,
    presence: Presence,
    source_path: &'static [&'static str],
) -> FieldSpec {
    field(
        name,
        FieldCategory::GrowableDataset,
        element,
        rank,
        units,
        presence,
        Scope::Batch,
        source_path,
    )
}

use ElementType::{Bool, Float32, Float64, UInt32, Utf8};
use FieldCategory::{FixedDataset, ScalarAttribute, StringDataset};
use Presence::{BlankByDefault, Optional, Required};

const SCALAR: Rank = Rank::Scalar;

static CATALOG: &[FieldSpec] = &[
    // Root attributes
    field("schema_version", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Root, &["schema_version"]),
    field("created_by", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Root, &["created_by"]),
    field("coordinate_frame", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Root, &["coordinate_frame"]),
    // Subject attributes
    field("id", ScalarAttribute, Utf8, SCALAR, None, Required, Scope::Subject, &["id"]),
    field("sex", ScalarAttribute, Utf8, SCALAR, None, Required, Scope::Subject, &["sex"]),
    field("mass_kg", ScalarAttribute, Float64, SCALAR, Some("kg"), Required, Scope::Subject, &["mass_kg"]),
    field("height_m", ScalarAttribute, Float64, SCALAR, Some("m"), Required, Scope::Subject, &["height_m"]),
    // Trial attributes
    field("sampling_hz", ScalarAttribute, Float64, SCALAR, Some("Hz"), Required, Scope::Trial, &["sampling_hz"]),
    field("treadmill", ScalarAttribute, Bool, SCALAR, None, Required, Scope::Trial, &["treadmill"]),
    field("notes", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Trial, &["notes"]),
    // Trial datasets (source path relative to the series struct)
    field("time", FixedDataset, Float32, Rank::Vector, None, Optional, Scope::Trial, &["values"]),
    field("joint_angles", FixedDataset, Float32, Rank::Matrix { columns: None }, None, Optional, Scope::Trial, &["values"]),
    field("joint_names", StringDataset, Utf8, Rank::List, None, Optional, Scope::Trial, &["joint_names"]),
    field("grf", FixedDataset, Float32, Rank::Matrix { columns: Some(3) }, None, Optional, Scope::Trial, &["values"]),
    field("events", FixedDataset, UInt32, Rank::Vector, None, Optional, Scope::Trial, &["indices"]),
    // Series metadata attributes
    field("units", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Series, &["units"]),
    field("plane", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Series, &["plane"]),
    field("axes", ScalarAttribute, Utf8, SCALAR, None, Optional, Scope::Series, &["axes"]),
    field("labels", ScalarAttribute, Utf8, Rank::List, None, Optional, Scope::Series, &["labels"]),
    // Batch growable datasets
    batch("trialName", Utf8, SCALAR, None, Optional, &["trialName"]),
    batch("trialNumber", Float64, SCALAR, None, Optional, &["trialNumber"]),
    batch("subjectName", Utf8, SCALAR, None, Required, &["subjectName"]),
    batch("subjectHeight", Float64, SCALAR, Some("m"), Required, &["subjectHeight"]),
    batch("subjectMass", Float64, SCALAR, Some("kg"), Required, &["subjectMass"]),
    batch("subjectAge", Float64, SCALAR, Some("years"), Optional, &["subjectAge"]),
    batch("subjectSex", Utf8, SCALAR, None, Optional, &["subjectSex"]),
    batch("subjectLegLength", Float64, SCALAR, Some("m"), BlankByDefault, &["subjectLegLength"]),
    batch("subjectHipWidth", Float64, SCALAR, Some("m"), BlankByDefault, &["subjectHipWidth"]),
    batch("subjectStanceWidth", Float64, SCALAR, Some("m"), BlankByDefault, &["subjectStanceWidth"]),
    batch("perturbationMagnitudePos", Float64, SCALAR, Some("m"), BlankByDefault, &["perturbationMagnitudePos"]),
    batch("perturbationMagnitudeVel", Float64, SCALAR, Some("m/s"), BlankByDefault, &["perturbationMagnitudeVel"]),
    batch("perturbationMagnitudeAcc", Float64, SCALAR, Some("m/s^2"), BlankByDefault, &["perturbationMagnitudeAcc"]),
    batch("perturbationDirection", Float64, SCALAR, Some("deg"), Optional, &["perturbationDirection"]),
    batch("perturbationOnset", Float64, SCALAR, Some("s"), Optional, &["perturbationOnset"]),
    batch("perturbationTrace", Float64, SCALAR, None, BlankByDefault, &["perturbationTrace"]),
    batch("emgNames", Utf8, Rank::List, None, Optional, &["emgNames"]),
    batch("emgOnsets", Float64, SCALAR, Some("s"), BlankByDefault, &["emgOnsets"]),
    batch("emgBinNames", Utf8, Rank::List, None, Optional, &["emgBinNames"]),
    batch("emgBinValues", Float64, Rank::Vector, None, Required, &["emgBinValues"]),
    batch("emgBinValuesMax", Float64, Rank::Vector, None, Optional, &["emgBinValuesMax"]),
    batch("comTrace", Float64, SCALAR, Some("m"), BlankByDefault, &["comTrace"]),
];

/// Name of the running-maximum field, which the aggregator computes rather than extracts.
pub const EMG_BIN_VALUES_MAX: &str = "emgBinValuesMax";

/// Name of the per-trial EMG bin values field feeding the running maximum.
pub const EMG_BIN_VALUES: &str = "emgBinValues";

/// Read-only field catalog.
///
/// # Example
///
/// ```rust
/// use gait_archive::schema::{FieldCategory, SchemaRegistry};
///
/// let registry = SchemaRegistry::standard();
/// let grf = registry.describe("grf")?;
/// assert_eq!(grf.category, FieldCategory::FixedDataset);
/// assert!(registry.describe("not_a_field").is_err());
/// # Ok::<(), gait_archive::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    index: BTreeMap<&'static str, usize>,
}

impl SchemaRegistry {
    /// The standard biomechanics catalog.
    #[must_use]
    pub fn standard() -> Self {
        let index = CATALOG
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name, i))
            .collect();
        Self { index }
    }

    /// Describe a field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownField`] when `name` is not in the catalog.
    pub fn describe(&self, name: &str) -> Result<&'static FieldSpec> {
        self.index
            .get(name)
            .map(|&i| &CATALOG[i])
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Whether the catalog declares `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All fields, in catalog order.
    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        CATALOG.iter()
    }

    /// Fields in one layout scope, in catalog order.
    pub fn scope(&self, scope: Scope) -> impl Iterator<Item = &'static FieldSpec> {
        CATALOG.iter().filter(move |spec| spec.scope == scope)
    }

    /// Batch-mode growable fields, in catalog order.
    pub fn batch_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.scope(Scope::Batch)
    }

    /// Number of catalog entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_unique() {
        let registry = SchemaRegistry::standard();
        assert_eq!(registry.len(), CATALOG.len());
    }

    #[test]
    fn test_unknown_field() {
        let registry = SchemaRegistry::standard();
        let err = registry.describe("stride_length").unwrap_err();
        assert!(matches!(err, Error::UnknownField(name) if name == "stride_length"));
    }

    #[test]
    fn test_grf_declares_three_columns() {
        let registry = SchemaRegistry::standard();
        let grf = registry.describe("grf").unwrap();
        assert_eq!(grf.rank, Rank::Matrix { columns: Some(3) });
        assert_eq!(grf.element, ElementType::Float32);
    }

    #[test]
    fn test_batch_fields_are_growable() {
        let registry = SchemaRegistry::standard();
        assert_eq!(registry.batch_fields().count(), 22);
        assert!(registry
            .batch_fields()
            .all(|spec| spec.category == FieldCategory::GrowableDataset));
    }

    #[test]
    fn test_blank_by_default_fields() {
        let registry = SchemaRegistry::standard();
        let blanks: Vec<_> = registry
            .batch_fields()
            .filter(|s| s.is_blank_by_default())
            .map(|s| s.name)
            .collect();
        assert_eq!(blanks.len(), 9);
        assert!(blanks.contains(&"subjectLegLength"));
        assert!(blanks.contains(&"comTrace"));
    }
}
