//! Record Adapter - typed extraction from opaque source records
//!
//! Extraction rules, in order of precedence:
//!
//! 1. A single-element wrapper (1x1 cell around a char array or string
//!    object) unwraps to its content.
//! 2. A numeric array with exactly one element unwraps to a scalar.
//! 3. A cell array of string-like entries becomes an ordered string list.
//! 4. An optional field missing from the record (or holding an empty
//!    numeric array) is `Absent` (`Ok(None)`).
//!
//! The unwrapped value is then checked against the Schema Registry
//! declaration; conflicts surface as [`Error::TypeMismatch`], never as a
//! silent coercion.

use crate::schema::{ElementType, FieldSpec, Rank, SchemaRegistry};
use crate::source::{NumericArray, SourceRecord, SourceValue};
use crate::value::{Matrix, TypedValue};
use crate::{Error, Result};

/// Schema-driven extractor over [`SourceRecord`]s.
///
/// # Example
///
/// ```rust
/// use gait_archive::adapter::RecordAdapter;
/// use gait_archive::schema::SchemaRegistry;
/// use gait_archive::source::StructRecord;
///
/// let registry = SchemaRegistry::standard();
/// let adapter = RecordAdapter::new(&registry);
/// let subject = StructRecord::new().with("mass_kg", 70.0);
///
/// let mass = adapter.adapt(&subject, "mass_kg")?;
/// assert_eq!(mass.and_then(|v| v.as_scalar()), Some(70.0));
/// # Ok::<(), gait_archive::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RecordAdapter<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> RecordAdapter<'r> {
    /// Create an adapter over `registry`.
    #[must_use]
    pub const fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// The registry this adapter consults.
    #[must_use]
    pub const fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    /// Extract `field` from `record`.
    ///
    /// Returns `Ok(None)` when an optional field is absent.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownField`] when `field` is not in the catalog
    /// - [`Error::TypeMismatch`] when the value conflicts with the declaration,
    ///   or a required field is absent
    pub fn adapt<R>(&self, record: &R, field: &str) -> Result<Option<TypedValue>>
    where
        R: SourceRecord + ?Sized,
    {
        let spec = self.registry.describe(field)?;
        self.adapt_spec(record, spec)
    }

    /// Extract a field that must be present, even if the catalog marks it optional.
    ///
    /// # Errors
    ///
    /// As [`adapt`](Self::adapt), plus [`Error::TypeMismatch`] when absent.
    pub fn adapt_required<R>(&self, record: &R, field: &str) -> Result<TypedValue>
    where
        R: SourceRecord + ?Sized,
    {
        let spec = self.registry.describe(field)?;
        self.adapt_spec(record, spec)?
            .ok_or_else(|| Error::type_mismatch(spec.name, spec.expected(), "absent"))
    }

    /// Extract using an already-resolved catalog entry.
    ///
    /// # Errors
    ///
    /// See [`adapt`](Self::adapt).
    pub fn adapt_spec<R>(&self, record: &R, spec: &FieldSpec) -> Result<Option<TypedValue>>
    where
        R: SourceRecord + ?Sized,
    {
        let value = lookup(record, spec.source_path).filter(|v| !is_empty_numeric(v));
        match value {
            Some(value) => {
                let unwrapped = unwrap_value(spec, value)?;
                let conformed = unwrapped.conform(spec)?;
                check_integral(spec, &conformed)?;
                Ok(Some(conformed))
            }
            None if spec.is_optional() => Ok(None),
            None => Err(Error::type_mismatch(spec.name, spec.expected(), "absent")),
        }
    }
}

/// Walk `path` through nested structs.
pub fn lookup<'a, R>(record: &'a R, path: &[&str]) -> Option<&'a SourceValue>
where
    R: SourceRecord + ?Sized,
{
    let (first, rest) = path.split_first()?;
    let mut current = record.get_field(first)?;
    for name in rest {
        current = current.as_struct()?.get_field(name)?;
    }
    Some(current)
}

fn is_empty_numeric(value: &SourceValue) -> bool {
    matches!(value, SourceValue::Numeric(a) if a.is_empty())
}

fn unwrap_value(spec: &FieldSpec, value: &SourceValue) -> Result<TypedValue> {
    let mismatch = || Error::type_mismatch(spec.name, spec.expected(), value.describe());
    match value {
        SourceValue::Cell(items) if items.len() == 1 && spec.rank != Rank::List => {
            unwrap_value(spec, &items[0])
        }
        SourceValue::Char(s) => Ok(TypedValue::Text(s.clone())),
        SourceValue::Logical(b) => Ok(TypedValue::Bool(*b)),
        SourceValue::Numeric(array) => unwrap_numeric(spec, array).ok_or_else(mismatch),
        SourceValue::Cell(items) => items
            .iter()
            .map(string_like)
            .collect::<Option<Vec<_>>>()
            .map(TypedValue::TextList)
            .ok_or_else(mismatch),
        SourceValue::Struct(_) => Err(mismatch()),
    }
}

fn unwrap_numeric(spec: &FieldSpec, array: &NumericArray) -> Option<TypedValue> {
    if let Rank::Matrix { .. } = spec.rank {
        let matrix = Matrix::new(array.shape[0], array.shape[1], array.data.clone()).ok()?;
        return Some(TypedValue::Matrix(matrix));
    }
    if array.len() == 1 {
        return Some(TypedValue::Scalar(array.data[0]));
    }
    if array.is_vector() {
        return Some(TypedValue::Vector(array.data.clone()));
    }
    let matrix = Matrix::new(array.shape[0], array.shape[1], array.data.clone()).ok()?;
    Some(TypedValue::Matrix(matrix))
}

fn string_like(value: &SourceValue) -> Option<String> {
    match value {
        SourceValue::Char(s) => Some(s.clone()),
        SourceValue::Cell(items) if items.len() == 1 => string_like(&items[0]),
        _ => None,
    }
}

fn check_integral(spec: &FieldSpec, value: &TypedValue) -> Result<()> {
    if spec.element != ElementType::UInt32 {
        return Ok(());
    }
    let values: &[f64] = match value {
        TypedValue::Scalar(x) => std::slice::from_ref(x),
        TypedValue::Vector(v) => v,
        TypedValue::Matrix(m) => m.data(),
        _ => &[],
    };
    match values
        .iter()
        .find(|x| x.fract() != 0.0 || **x < 0.0 || **x > f64::from(u32::MAX))
    {
        Some(bad) => Err(Error::type_mismatch(
            spec.name,
            spec.expected(),
            format!("non-index value {bad}"),
        )),
        None => Ok(()),
    }
}
