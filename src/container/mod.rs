//! Hierarchical container runtime
//!
//! The converter treats the container runtime as an external capability:
//! groups, attributes and datasets addressed by `/`-separated paths, with
//! datasets that may declare an unbounded leading dimension and grow one
//! slot at a time. [`ContainerReader`] and [`ContainerRuntime`] are that
//! contract; [`MemoryContainer`] and [`FileContainer`] implement it.
//!
//! # Example
//!
//! ```rust
//! use gait_archive::container::{
//!     ContainerReader, ContainerRuntime, DatasetSpec, Dtype, MemoryContainer, Slot,
//! };
//!
//! let mut container = MemoryContainer::new();
//! container.create_dataset("/trialName", DatasetSpec::growable(Dtype::VarLenUtf8))?;
//! container.extend_dataset("/trialName", 1)?;
//! container.write_slice("/trialName", 0, Slot::Utf8("walk01".into()))?;
//!
//! let dataset = container.read_dataset("/trialName")?;
//! assert_eq!(dataset.len(), 1);
//! # Ok::<(), gait_archive::Error>(())
//! ```

mod codec;
mod file;
mod memory;
mod serde_float;

pub use codec::Codec;
pub use file::{FileContainer, OpenMode};
pub use memory::MemoryContainer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 32-bit unsigned integer
    UInt32,
    /// Boolean
    Bool,
    /// Variable-length UTF-8 string per element
    VarLenUtf8,
    /// Variable-length float64 sequence per element (ragged)
    VarLenFloat64,
    /// Variable-length string sequence per element (ragged)
    VarLenUtf8List,
}

impl Dtype {
    /// Whether each element is itself a variable-length sequence.
    #[must_use]
    pub const fn is_ragged(self) -> bool {
        matches!(self, Self::VarLenFloat64 | Self::VarLenUtf8List)
    }
}

/// Chunking and compression request. Recorded, never interpreted by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// Chunk shape, if chunked
    pub chunks: Option<Vec<usize>>,
    /// Deflate level, if compressed
    pub deflate: Option<u8>,
}

impl StorageLayout {
    /// Contiguous, uncompressed storage.
    #[must_use]
    pub const fn contiguous() -> Self {
        Self {
            chunks: None,
            deflate: None,
        }
    }

    /// Chunked storage with optional deflate compression.
    #[must_use]
    pub const fn chunked(chunks: Vec<usize>, deflate: Option<u8>) -> Self {
        Self {
            chunks: Some(chunks),
            deflate,
        }
    }

    /// Whether chunking was requested.
    #[must_use]
    pub const fn is_chunked(&self) -> bool {
        self.chunks.is_some()
    }
}

/// Shape declaration for a new dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Element type
    pub dtype: Dtype,
    /// Initial shape
    pub shape: Vec<usize>,
    /// Maximum shape; `None` marks an unbounded dimension
    pub max_shape: Vec<Option<usize>>,
    /// Chunking / compression request
    pub layout: StorageLayout,
}

impl DatasetSpec {
    /// Fixed-shape dataset.
    #[must_use]
    pub fn fixed(dtype: Dtype, shape: Vec<usize>) -> Self {
        let max_shape = shape.iter().copied().map(Some).collect();
        Self {
            dtype,
            shape,
            max_shape,
            layout: StorageLayout::contiguous(),
        }
    }

    /// 1-D dataset with an unbounded leading dimension and current length 0.
    #[must_use]
    pub fn growable(dtype: Dtype) -> Self {
        Self {
            dtype,
            shape: vec![0],
            max_shape: vec![None],
            layout: StorageLayout::contiguous(),
        }
    }

    /// Attach a storage layout.
    #[must_use]
    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    /// String
    Text(String),
    /// 64-bit float
    Float(#[serde(with = "serde_float::scalar")] f64),
    /// Boolean
    Bool(bool),
    /// Unsigned integer
    UInt(u64),
    /// Ordered string sequence
    TextList(Vec<String>),
    /// Float sequence
    Floats(#[serde(with = "serde_float::vec64")] Vec<f64>),
    /// Unsigned integer sequence
    UInts(Vec<u64>),
}

impl AttrValue {
    /// The string, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a float.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
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
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::UInt(n) => write!(f, "{n}"),
            Self::TextList(v) => write!(f, "{v:?}"),
            Self::Floats(v) => write!(f, "{v:?}"),
            Self::UInts(v) => write!(f, "{v:?}"),
        }
    }
}

/// Dataset contents, flattened row-major for fixed-width dtypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum ArrayData {
    /// 32-bit floats
    Float32(#[serde(with = "serde_float::vec32")] Vec<f32>),
    /// 64-bit floats
    Float64(#[serde(with = "serde_float::vec64")] Vec<f64>),
    /// 32-bit unsigned integers
    UInt32(Vec<u32>),
    /// Booleans
    Bool(Vec<bool>),
    /// Variable-length strings
    VarLenUtf8(Vec<String>),
    /// Ragged float64 sequences
    VarLenFloat64(#[serde(with = "serde_float::ragged64")] Vec<Vec<f64>>),
    /// Ragged string sequences
    VarLenUtf8List(Vec<Vec<String>>),
}

impl ArrayData {
    /// Empty data of the given dtype.
    #[must_use]
    pub const fn empty(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Float32 => Self::Float32(Vec::new()),
            Dtype::Float64 => Self::Float64(Vec::new()),
            Dtype::UInt32 => Self::UInt32(Vec::new()),
            Dtype::Bool => Self::Bool(Vec::new()),
            Dtype::VarLenUtf8 => Self::VarLenUtf8(Vec::new()),
            Dtype::VarLenFloat64 => Self::VarLenFloat64(Vec::new()),
            Dtype::VarLenUtf8List => Self::VarLenUtf8List(Vec::new()),
        }
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        match self {
            Self::Float32(_) => Dtype::Float32,
            Self::Float64(_) => Dtype::Float64,
            Self::UInt32(_) => Dtype::UInt32,
            Self::Bool(_) => Dtype::Bool,
            Self::VarLenUtf8(_) => Dtype::VarLenUtf8,
            Self::VarLenFloat64(_) => Dtype::VarLenFloat64,
            Self::VarLenUtf8List(_) => Dtype::VarLenUtf8List,
        }
    }

    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::VarLenUtf8(v) => v.len(),
            Self::VarLenFloat64(v) => v.len(),
            Self::VarLenUtf8List(v) => v.len(),
        }
    }

    /// Whether no elements are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink to `len` elements, filling with NaN, zero, `false` or empty.
    pub fn resize(&mut self, len: usize) {
        match self {
            Self::Float32(v) => v.resize(len, f32::NAN),
            Self::Float64(v) => v.resize(len, f64::NAN),
            Self::UInt32(v) => v.resize(len, 0),
            Self::Bool(v) => v.resize(len, false),
            Self::VarLenUtf8(v) => v.resize(len, String::new()),
            Self::VarLenFloat64(v) => v.resize(len, Vec::new()),
            Self::VarLenUtf8List(v) => v.resize(len, Vec::new()),
        }
    }

    /// 64-bit float view, if this is float data.
    #[must_use]
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float32(v) => Some(v.iter().copied().map(f64::from).collect()),
            Self::Float64(v) => Some(v.clone()),
            Self::UInt32(v) => Some(v.iter().copied().map(f64::from).collect()),
            _ => None,
        }
    }

    /// String view, if this is variable-length string data.
    #[must_use]
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::VarLenUtf8(v) => Some(v),
            _ => None,
        }
    }
}

/// One slot written along a dataset's leading dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Single 64-bit float
    Float64(f64),
    /// Single string
    Utf8(String),
    /// Row of floats (fixed-width row or ragged element)
    Floats(Vec<f64>),
    /// Row of strings (ragged element)
    Strings(Vec<String>),
}

/// A dataset node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    shape: Vec<usize>,
    max_shape: Vec<Option<usize>>,
    layout: StorageLayout,
    data: ArrayData,
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
}

impl Dataset {
    pub(crate) fn from_spec(spec: DatasetSpec) -> Result<Self> {
        if spec.shape.len() != spec.max_shape.len() || spec.shape.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "shape {:?} and max shape {:?} must have the same non-zero rank",
                spec.shape, spec.max_shape
            )));
        }
        if spec.dtype.is_ragged() && spec.shape.len() != 1 {
            return Err(Error::InvalidOperation(
                "ragged datasets must be one-dimensional".to_string(),
            ));
        }
        let mut data = ArrayData::empty(spec.dtype);
        data.resize(spec.shape.iter().product());
        Ok(Self {
            shape: spec.shape,
            max_shape: spec.max_shape,
            layout: spec.layout,
            data,
            attributes: BTreeMap::new(),
        })
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    /// Current shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Maximum shape (`None` = unbounded).
    #[must_use]
    pub fn max_shape(&self) -> &[Option<usize>] {
        &self.max_shape
    }

    /// Requested storage layout.
    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Stored data.
    #[must_use]
    pub const fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Dataset attributes.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Length of the leading dimension.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    /// Whether the leading dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the leading dimension is unbounded.
    #[must_use]
    pub fn is_growable(&self) -> bool {
        self.max_shape[0].is_none()
    }

    fn row_width(&self) -> usize {
        self.shape[1..].iter().product()
    }

    /// Check the invariants every accessor relies on; used after decoding a snapshot.
    pub(crate) fn validate(&self, path: &str) -> Result<()> {
        let corrupt = |what: String| Error::StorageError(format!("dataset '{path}': {what}"));
        if self.shape.is_empty() {
            return Err(corrupt("empty shape".to_string()));
        }
        if self.shape.len() != self.max_shape.len() {
            return Err(corrupt(format!(
                "shape {:?} and max shape {:?} differ in rank",
                self.shape, self.max_shape
            )));
        }
        if let Some(dim) = self
            .shape
            .iter()
            .zip(&self.max_shape)
            .position(|(n, max)| max.is_some_and(|m| *n > m))
        {
            return Err(corrupt(format!(
                "dimension {dim} exceeds max shape ({:?} > {:?})",
                self.shape, self.max_shape
            )));
        }
        if self.dtype().is_ragged() && self.shape.len() != 1 {
            return Err(corrupt("ragged dataset is not one-dimensional".to_string()));
        }
        let expected: usize = self.shape.iter().product();
        if self.data.len() != expected {
            return Err(corrupt(format!(
                "shape {:?} needs {expected} elements, found {}",
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn replace_data(&mut self, data: ArrayData) -> Result<()> {
        if data.dtype() != self.dtype() {
            return Err(Error::InvalidOperation(format!(
                "dtype {:?} does not match dataset dtype {:?}",
                data.dtype(),
                self.dtype()
            )));
        }
        let expected: usize = self.shape.iter().product();
        if data.len() != expected {
            return Err(Error::InvalidOperation(format!(
                "shape {:?} needs {expected} elements, got {}",
                self.shape,
                data.len()
            )));
        }
        self.data = data;
        Ok(())
    }

    pub(crate) fn extend(&mut self, new_len: usize) -> Result<()> {
        if let Some(max) = self.max_shape[0] {
            if new_len > max {
                return Err(Error::InvalidOperation(format!(
                    "cannot extend to {new_len}: leading dimension is fixed at {max}"
                )));
            }
        }
        if new_len < self.shape[0] {
            return Err(Error::InvalidOperation(format!(
                "cannot shrink leading dimension from {} to {new_len}",
                self.shape[0]
            )));
        }
        self.shape[0] = new_len;
        self.data.resize(new_len * self.row_width());
        Ok(())
    }

    pub(crate) fn write_slot(&mut self, index: usize, slot: Slot) -> Result<()> {
        if index >= self.shape[0] {
            return Err(Error::InvalidOperation(format!(
                "slot {index} out of bounds for leading length {}",
                self.shape[0]
            )));
        }
        let width = self.row_width();
        let start = index * width;
        let mismatch = |slot: &Slot, dtype: Dtype| {
            Error::InvalidOperation(format!("cannot write {slot:?} into a {dtype:?} dataset"))
        };
        match (&mut self.data, slot) {
            (ArrayData::Float64(v), Slot::Float64(x)) if width == 1 => v[start] = x,
            (ArrayData::Float64(v), Slot::Floats(row)) if row.len() == width => {
                v[start..start + width].copy_from_slice(&row);
            }
            #[allow(clippy::cast_possible_truncation)]
            (ArrayData::Float32(v), Slot::Float64(x)) if width == 1 => v[start] = x as f32,
            (ArrayData::VarLenUtf8(v), Slot::Utf8(s)) if width == 1 => v[start] = s,
            (ArrayData::VarLenFloat64(v), Slot::Floats(row)) => v[index] = row,
            (ArrayData::VarLenUtf8List(v), Slot::Strings(row)) => v[index] = row,
            (data, slot) => return Err(mismatch(&slot, data.dtype())),
        }
        Ok(())
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attributes
    }
}

/// Kind of node at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Group
    Group,
    /// Dataset
    Dataset,
}

/// Read side of the container runtime.
pub trait ContainerReader {
    /// Kind of node at `path`, if it exists.
    fn node_kind(&self, path: &str) -> Option<NodeKind>;

    /// Whether a node exists at `path`.
    fn exists(&self, path: &str) -> bool {
        self.node_kind(path).is_some()
    }

    /// Child names of the group at `path`, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when `path` is not a group.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Attribute names of the node at `path`, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when `path` does not exist.
    fn attribute_names(&self, path: &str) -> Result<Vec<String>>;

    /// Read one attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when the node or attribute does not exist.
    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue>;

    /// Read a whole dataset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when `path` is not a dataset.
    fn read_dataset(&self, path: &str) -> Result<Dataset>;

    /// Current shape of a dataset, without reading its data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when `path` is not a dataset.
    fn dataset_shape(&self, path: &str) -> Result<Vec<usize>> {
        Ok(self.read_dataset(path)?.shape().to_vec())
    }
}

/// Write side of the container runtime.
///
/// Creation never overwrites: creating a node or attribute that already
/// exists fails with [`Error::DuplicateNode`]. Missing intermediate groups
/// are created on demand.
pub trait ContainerRuntime: ContainerReader {
    /// Create a group.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateNode`] if `path` exists.
    fn create_group(&mut self, path: &str) -> Result<()>;

    /// Create an attribute on the node at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::NodeNotFound`] if the node is missing, [`Error::DuplicateNode`]
    /// if the attribute exists.
    fn create_attribute(&mut self, path: &str, name: &str, value: AttrValue) -> Result<()>;

    /// Create a dataset.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateNode`] if `path` exists, [`Error::InvalidOperation`]
    /// for an inconsistent spec.
    fn create_dataset(&mut self, path: &str, spec: DatasetSpec) -> Result<()>;

    /// Replace a dataset's full contents (shape unchanged).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] on dtype or element-count mismatch.
    fn write_dataset(&mut self, path: &str, data: ArrayData) -> Result<()>;

    /// Set the leading dimension to `new_len`. Prior slots are untouched.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] beyond the max shape or when shrinking.
    fn extend_dataset(&mut self, path: &str, new_len: usize) -> Result<()>;

    /// Write one slot along the leading dimension.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] when out of bounds or ill-typed.
    fn write_slice(&mut self, path: &str, index: usize, value: Slot) -> Result<()>;
}

/// Split a `/`-separated path into its non-empty segments.
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a parent path and a child name.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{}", child.trim_start_matches('/'))
}
