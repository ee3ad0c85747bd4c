//! Adapted values - typed, container-independent

use serde::{Deserialize, Serialize};

use crate::schema::{ElementType, FieldSpec, Rank};
use crate::{Error, Result};

/// Row-major 2-D numeric array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix from row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows * cols != data.len() {
            return Err(Error::InvalidOperation(format!(
                "matrix {rows}x{cols} needs {} elements, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from equal-length rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when rows differ in length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(Error::InvalidOperation(format!(
                "ragged rows: expected {cols} columns, found {}",
                bad.len()
            )));
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data: rows.concat(),
        })
    }

    /// Single-column matrix from a vector.
    #[must_use]
    pub fn column(values: Vec<f64>) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values,
        }
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`.
    #[must_use]
    pub const fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Row-major element slice.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Element at (`row`, `col`).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        (row < self.rows && col < self.cols).then(|| self.data[row * self.cols + col])
    }

    /// Consume into row-major data.
    #[must_use]
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }
}

/// A value extracted from a source record and checked against the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Boolean flag
    Bool(bool),
    /// Scalar number
    Scalar(f64),
    /// Plain string
    Text(String),
    /// Ordered sequence of strings
    TextList(Vec<String>),
    /// 1-D numeric sequence
    Vector(Vec<f64>),
    /// 2-D numeric array
    Matrix(Matrix),
}

impl TypedValue {
    /// Placeholder written for a missing batch value: NaN, empty string or empty sequence.
    #[must_use]
    pub fn placeholder(spec: &FieldSpec) -> Self {
        match (spec.element, spec.rank) {
            (ElementType::Utf8, Rank::List) => Self::TextList(Vec::new()),
            (ElementType::Utf8, _) => Self::Text(String::new()),
            (ElementType::Bool, _) => Self::Bool(false),
            (_, Rank::Scalar) => Self::Scalar(f64::NAN),
            (_, Rank::Vector) => Self::Vector(Vec::new()),
            (_, Rank::Matrix { .. }) => Self::Matrix(Matrix::column(Vec::new())),
            (_, Rank::List) => Self::TextList(Vec::new()),
        }
    }

    /// Short name of the variant, used in mismatch errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Bool(_) => "bool".to_string(),
            Self::Scalar(_) => "scalar".to_string(),
            Self::Text(_) => "string".to_string(),
            Self::TextList(v) => format!("string list of {}", v.len()),
            Self::Vector(v) => format!("vector of {}", v.len()),
            Self::Matrix(m) => format!("{}x{} matrix", m.rows(), m.cols()),
        }
    }

    /// Check (and where lossless, normalise) the value against a field's declaration.
    ///
    /// A scalar is accepted for a vector field, a single string for a list
    /// field, and a vector for a matrix field without a fixed column count
    /// (as one column). Nothing else is coerced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] when the value does not fit.
    pub fn conform(self, spec: &FieldSpec) -> Result<Self> {
        let mismatch = |found: &Self| Error::type_mismatch(spec.name, spec.expected(), found.describe());
        match (spec.element, spec.rank, self) {
            (ElementType::Utf8, Rank::Scalar, v @ Self::Text(_)) => Ok(v),
            (ElementType::Utf8, Rank::List, v @ Self::TextList(_)) => Ok(v),
            (ElementType::Utf8, Rank::List, Self::Text(s)) => Ok(Self::TextList(vec![s])),
            (ElementType::Bool, Rank::Scalar, v @ Self::Bool(_)) => Ok(v),
            (ElementType::Bool, Rank::Scalar, Self::Scalar(x)) if x == 0.0 || x == 1.0 => {
                Ok(Self::Bool(x != 0.0))
            }
            (e, Rank::Scalar, v @ Self::Scalar(_)) if e.is_numeric() => Ok(v),
            (e, Rank::Vector, v @ Self::Vector(_)) if e.is_numeric() => Ok(v),
            (e, Rank::Vector, Self::Scalar(x)) if e.is_numeric() => Ok(Self::Vector(vec![x])),
            (e, Rank::Matrix { columns }, Self::Matrix(m)) if e.is_numeric() => match columns {
                Some(c) if m.cols() != c => Err(Error::type_mismatch(
                    spec.name,
                    spec.expected(),
                    format!("{}x{} matrix ({} columns)", m.rows(), m.cols(), m.cols()),
                )),
                _ => Ok(Self::Matrix(m)),
            },
            (e, Rank::Matrix { columns: None }, Self::Vector(v)) if e.is_numeric() => {
                Ok(Self::Matrix(Matrix::column(v)))
            }
            (_, _, other) => Err(mismatch(&other)),
        }
    }

    /// The string, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a scalar.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    /// The string list, if this is one.
    #[must_use]
    pub fn as_text_list(&self) -> Option<&[String]> {
        match self {
            Self::TextList(v) => Some(v),
            _ => None,
        }
    }

    /// The numeric vector, if this is one.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }
}
