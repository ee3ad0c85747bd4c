//! Source record provider contract
//!
//! The numeric-computing environment's struct decoder is an external
//! collaborator. The core only needs named sub-field access over nested
//! records with typed leaves; [`SourceRecord`] captures exactly that.
//! [`StructRecord`] is the in-memory realisation, built either
//! programmatically or from the JSON export of a decoded struct.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{Error, Result};

/// Named sub-field access over one opaque nested record.
pub trait SourceRecord {
    /// Whether the record has a sub-field called `name`.
    fn has_field(&self, name: &str) -> bool;

    /// The sub-field called `name`, if present.
    fn get_field(&self, name: &str) -> Option<&SourceValue>;

    /// Sub-field names. Order is implementation-defined; [`StructRecord`]
    /// yields them sorted by name.
    fn field_names(&self) -> Vec<String>;
}

/// Numeric array leaf (row-major, at most two dimensions).
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    /// `[rows, cols]`
    pub shape: [usize; 2],
    /// Row-major elements
    pub data: Vec<f64>,
}

impl NumericArray {
    /// 1x1 array.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: [1, 1],
            data: vec![value],
        }
    }

    /// 1xN row vector.
    #[must_use]
    pub fn row(values: Vec<f64>) -> Self {
        Self {
            shape: [1, values.len()],
            data: values,
        }
    }

    /// Row-major matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when the data does not fill the shape.
    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows * cols != data.len() {
            return Err(Error::InvalidOperation(format!(
                "numeric array {rows}x{cols} needs {} elements, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self {
            shape: [rows, cols],
            data,
        })
    }

    /// Total element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether one of the two dimensions is 1 (or the array is empty).
    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.shape[0] <= 1 || self.shape[1] <= 1
    }
}

/// Typed leaf or nested node of a decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// Char array / string object
    Char(String),
    /// Logical scalar
    Logical(bool),
    /// Numeric array
    Numeric(NumericArray),
    /// Cell array
    Cell(Vec<SourceValue>),
    /// Nested struct
    Struct(StructRecord),
}

impl SourceValue {
    /// Convert the JSON export of a decoded value.
    ///
    /// Numbers become 1x1 arrays, arrays of numbers become row vectors,
    /// arrays of equal-length numeric arrays become matrices, any other
    /// array becomes a cell array, objects become structs and `null`
    /// becomes an empty numeric array.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Numeric(NumericArray::row(Vec::new())),
            Value::Bool(b) => Self::Logical(*b),
            Value::Number(n) => Self::Numeric(NumericArray::scalar(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => Self::Char(s.clone()),
            Value::Object(map) => Self::Struct(StructRecord::from_json_map(map)),
            Value::Array(items) => Self::from_json_array(items),
        }
    }

    fn from_json_array(items: &[Value]) -> Self {
        if items.is_empty() {
            return Self::Numeric(NumericArray::row(Vec::new()));
        }
        if let Some(row) = numeric_row(items) {
            return Self::Numeric(NumericArray::row(row));
        }
        let rows: Option<Vec<Vec<f64>>> = items
            .iter()
            .map(|item| item.as_array().and_then(|inner| numeric_row(inner)))
            .collect();
        if let Some(rows) = rows {
            let cols = rows[0].len();
            if cols > 0 && rows.iter().all(|r| r.len() == cols) {
                return Self::Numeric(NumericArray {
                    shape: [rows.len(), cols],
                    data: rows.concat(),
                });
            }
        }
        Self::Cell(items.iter().map(Self::from_json).collect())
    }

    /// Short name of the variant, used in mismatch errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Char(_) => "char".to_string(),
            Self::Logical(_) => "logical".to_string(),
            Self::Numeric(a) => format!("{}x{} numeric", a.shape[0], a.shape[1]),
            Self::Cell(items) => format!("cell of {}", items.len()),
            Self::Struct(_) => "struct".to_string(),
        }
    }

    /// The nested struct, if this is one.
    #[must_use]
    pub const fn as_struct(&self) -> Option<&StructRecord> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }
}

fn numeric_row(items: &[Value]) -> Option<Vec<f64>> {
    items.iter().map(Value::as_f64).collect()
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        Self::Char(value.to_string())
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        Self::Numeric(NumericArray::scalar(value))
    }
}

impl From<bool> for SourceValue {
    fn from(value: bool) -> Self {
        Self::Logical(value)
    }
}

impl From<Vec<f64>> for SourceValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Numeric(NumericArray::row(value))
    }
}

impl From<StructRecord> for SourceValue {
    fn from(value: StructRecord) -> Self {
        Self::Struct(value)
    }
}

/// In-memory nested record.
///
/// # Example
///
/// ```rust
/// use gait_archive::source::{SourceRecord, StructRecord};
///
/// let subject = StructRecord::new()
///     .with("id", "S001")
///     .with("mass_kg", 70.0);
/// assert!(subject.has_field("id"));
/// assert!(!subject.has_field("age"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructRecord {
    fields: BTreeMap<String, SourceValue>,
}

impl StructRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SourceValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a sub-field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SourceValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Remove a sub-field.
    pub fn remove(&mut self, name: &str) -> Option<SourceValue> {
        self.fields.remove(name)
    }

    /// Parse the JSON export of a decoded struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input and [`Error::InvalidOperation`]
    /// when the top level is not an object.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Object(map) => Ok(Self::from_json_map(&map)),
            other => Err(Error::InvalidOperation(format!(
                "record root must be an object, found {}",
                json_kind(&other)
            ))),
        }
    }

    fn from_json_map(map: &serde_json::Map<String, Value>) -> Self {
        Self {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), SourceValue::from_json(v)))
                .collect(),
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl SourceRecord for StructRecord {
    fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn get_field(&self, name: &str) -> Option<&SourceValue> {
        self.fields.get(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// Loads one trial's source record by identifier.
pub trait TrialSource {
    /// Load the record for `trial`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSource`] when the record cannot be loaded.
    fn load(&self, trial: &str) -> Result<StructRecord>;
}

/// Trial records exported as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    dir: PathBuf,
}

impl JsonDirectorySource {
    /// Read trials from `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File path for a trial; `.json` is appended unless the name already ends with it.
    #[must_use]
    pub fn path_for(&self, trial: &str) -> PathBuf {
        if trial.ends_with(".json") {
            self.dir.join(trial)
        } else {
            self.dir.join(format!("{trial}.json"))
        }
    }
}

impl TrialSource for JsonDirectorySource {
    fn load(&self, trial: &str) -> Result<StructRecord> {
        let path = self.path_for(trial);
        let missing = |reason: String| Error::MissingSource {
            trial: trial.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| missing(format!("cannot read {}: {e}", path.display())))?;
        StructRecord::from_json_str(&text)
            .map_err(|e| missing(format!("cannot decode {}: {e}", path.display())))
    }
}

/// In-memory trial records keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: HashMap<String, StructRecord>,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record.
    pub fn insert(&mut self, trial: impl Into<String>, record: StructRecord) {
        self.records.insert(trial.into(), record);
    }

    /// Builder-style register.
    #[must_use]
    pub fn with(mut self, trial: impl Into<String>, record: StructRecord) -> Self {
        self.insert(trial, record);
        self
    }
}

impl TrialSource for MemorySource {
    fn load(&self, trial: &str) -> Result<StructRecord> {
        self.records
            .get(trial)
            .cloned()
            .ok_or_else(|| Error::MissingSource {
                trial: trial.to_string(),
                reason: "no record registered".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_leaves() {
        let record = StructRecord::from_json_str(
            r#"{
                "name": "S001",
                "mass": 70.5,
                "flag": true,
                "row": [1, 2, 3],
                "grid": [[1, 2], [3, 4], [5, 6]],
                "names": ["hip", "knee"],
                "nested": {"units": "deg"}
            }"#,
        )
        .unwrap();

        assert_eq!(record.get_field("name"), Some(&SourceValue::Char("S001".into())));
        assert_eq!(record.get_field("flag"), Some(&SourceValue::Logical(true)));
        match record.get_field("grid") {
            Some(SourceValue::Numeric(a)) => assert_eq!(a.shape, [3, 2]),
            other => panic!("unexpected {other:?}"),
        }
        match record.get_field("row") {
            Some(SourceValue::Numeric(a)) => assert_eq!(a.shape, [1, 3]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(record.get_field("names"), Some(SourceValue::Cell(v)) if v.len() == 2));
        assert!(record.get_field("nested").and_then(SourceValue::as_struct).is_some());
    }

    #[test]
    fn test_from_json_rejects_non_object_root() {
        assert!(StructRecord::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_memory_source_missing() {
        let source = MemorySource::new().with("t1", StructRecord::new());
        assert!(source.load("t1").is_ok());
        let err = source.load("t2").unwrap_err();
        assert!(matches!(err, Error::MissingSource { trial, .. } if trial == "t2"));
    }

    #[test]
    fn test_directory_source_path() {
        let source = JsonDirectorySource::new("/data");
        assert_eq!(source.path_for("trial01"), PathBuf::from("/data/trial01.json"));
        assert_eq!(source.path_for("trial01.json"), PathBuf::from("/data/trial01.json"));
    }

    #[test]
    fn test_directory_source_dotted_trial_name() {
        let source = JsonDirectorySource::new("/data");
        assert_eq!(source.path_for("walk.2024"), PathBuf::from("/data/walk.2024.json"));
        assert_eq!(source.path_for("S01.walk"), PathBuf::from("/data/S01.walk.json"));
    }

    #[test]
    fn test_directory_source_loads_dotted_trial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("walk.2024.json"),
            r#"{"subjectName": "S001", "subjectMass": 70.0}"#,
        )
        .unwrap();
        let record = JsonDirectorySource::new(dir.path()).load("walk.2024").unwrap();
        assert!(record.get_field("subjectName").is_some());
    }
}
