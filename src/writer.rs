//! Container Writer
//!
//! Turns adapted values into container nodes, following the Schema
//! Registry for dtype, shape and layout. Two write modes:
//!
//! - **Fixed**: a dataset or attribute created once with exactly the
//!   value's shape. Writing an existing path is a logic bug and fails
//!   with [`Error::DuplicateNode`]; there is no implicit overwrite.
//! - **Growable**: a 1-D dataset with an unbounded leading dimension,
//!   extended by exactly one slot per append.
//!
//! The writer keeps no copy of what it wrote; every length it needs is
//! asked of the container.

use tracing::debug;

use crate::config::LayoutConfig;
use crate::container::{
    segments, ArrayData, AttrValue, ContainerRuntime, DatasetSpec, Dtype, NodeKind, Slot,
    StorageLayout,
};
use crate::schema::{ElementType, FieldCategory, FieldSpec, Rank, SchemaRegistry};
use crate::value::TypedValue;
use crate::{Error, Result};

/// Schema-driven writer over a borrowed container.
pub struct ContainerWriter<'a, C: ContainerRuntime + ?Sized> {
    container: &'a mut C,
    registry: &'a SchemaRegistry,
    layout: &'a LayoutConfig,
}

impl<'a, C: ContainerRuntime + ?Sized> ContainerWriter<'a, C> {
    /// Create a writer.
    pub fn new(container: &'a mut C, registry: &'a SchemaRegistry, layout: &'a LayoutConfig) -> Self {
        Self {
            container,
            registry,
            layout,
        }
    }

    /// The underlying container.
    #[must_use]
    pub fn container(&self) -> &C {
        self.container
    }

    /// Create `path` as a group unless it already is one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if `path` is a dataset.
    pub fn ensure_group(&mut self, path: &str) -> Result<()> {
        match self.container.node_kind(path) {
            Some(NodeKind::Group) => Ok(()),
            Some(NodeKind::Dataset) => Err(Error::InvalidOperation(format!(
                "'{path}' is a dataset, not a group"
            ))),
            None => self.container.create_group(path),
        }
    }

    /// Write a catalogued attribute on the node at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`], [`Error::TypeMismatch`], [`Error::DuplicateNode`].
    pub fn write_attribute(&mut self, path: &str, field: &str, value: &TypedValue) -> Result<()> {
        let spec = self.registry.describe(field)?;
        if spec.category != FieldCategory::ScalarAttribute {
            return Err(Error::InvalidOperation(format!(
                "field '{field}' is a {:?}, not an attribute",
                spec.category
            )));
        }
        let value = value.clone().conform(spec)?;
        debug!(path, field, "write attribute");
        self.container
            .create_attribute(path, field, attr_value(&value))
    }

    /// Write an attribute outside the catalog (bookkeeping such as `units`).
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateNode`] if it exists, [`Error::NodeNotFound`] if `path` is missing.
    pub fn write_raw_attribute(&mut self, path: &str, name: &str, value: AttrValue) -> Result<()> {
        self.container.create_attribute(path, name, value)
    }

    /// Fixed write: create the dataset at `path` with exactly the value's shape.
    ///
    /// The catalog entry is the last path segment (`/trials/t1/grf` → `grf`).
    /// `attrs` are attached to the new dataset.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownField`] for an uncatalogued name
    /// - [`Error::TypeMismatch`] when the value does not fit the declaration
    /// - [`Error::DuplicateNode`] when `path` exists
    pub fn write_fixed(
        &mut self,
        path: &str,
        value: &TypedValue,
        attrs: &[(&str, AttrValue)],
    ) -> Result<()> {
        let field = segments(path)
            .last()
            .copied()
            .ok_or_else(|| Error::InvalidOperation("cannot write a dataset at '/'".to_string()))?;
        let spec = self.registry.describe(field)?;
        if !matches!(
            spec.category,
            FieldCategory::FixedDataset | FieldCategory::StringDataset
        ) {
            return Err(Error::InvalidOperation(format!(
                "field '{field}' is a {:?}, not a fixed dataset",
                spec.category
            )));
        }
        if self.container.exists(path) {
            return Err(Error::DuplicateNode(path.to_string()));
        }
        let value = value.clone().conform(spec)?;
        let (shape, data) = fixed_array(spec, value)?;
        let elements: usize = shape.iter().product();
        let layout = if is_series(spec) || elements > self.layout.chunk_threshold {
            let mut chunks = shape.clone();
            chunks[0] = shape[0].min(self.layout.chunk_rows).max(1);
            StorageLayout::chunked(chunks, Some(self.layout.deflate_level))
        } else {
            StorageLayout::contiguous()
        };
        debug!(path, ?shape, chunked = layout.is_chunked(), "write fixed dataset");
        let dtype = data.dtype();
        self.container
            .create_dataset(path, DatasetSpec::fixed(dtype, shape).with_layout(layout))?;
        self.container.write_dataset(path, data)?;
        for (name, attr) in attrs {
            self.container.create_attribute(path, name, attr.clone())?;
        }
        Ok(())
    }

    /// Create the growable dataset for `field` at `path` if it does not exist yet.
    ///
    /// Returns `true` when the dataset was created.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`], or [`Error::InvalidOperation`] for a non-growable field.
    pub fn declare_growable(&mut self, path: &str, field: &str) -> Result<bool> {
        let spec = self.growable_spec(field)?;
        if self.container.exists(path) {
            return Ok(false);
        }
        let layout = StorageLayout::chunked(
            vec![self.layout.chunk_rows],
            Some(self.layout.deflate_level),
        );
        self.container
            .create_dataset(path, DatasetSpec::growable(growable_dtype(spec)).with_layout(layout))?;
        if let Some(units) = spec.units {
            self.container
                .create_attribute(path, "units", AttrValue::Text(units.to_string()))?;
        }
        debug!(path, field, "declared growable dataset");
        Ok(true)
    }

    /// Growable write: extend the leading dimension by one and write `value` into the new slot.
    ///
    /// Creates the dataset on first use. Returns the index written.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`], [`Error::TypeMismatch`], or container errors.
    pub fn append_growable(&mut self, path: &str, field: &str, value: &TypedValue) -> Result<usize> {
        let spec = self.growable_spec(field)?;
        let value = value.clone().conform(spec)?;
        self.declare_growable(path, field)?;
        let index = self.container.dataset_shape(path)?[0];
        self.container.extend_dataset(path, index + 1)?;
        self.container.write_slice(path, index, slot(value))?;
        Ok(index)
    }

    fn growable_spec(&self, field: &str) -> Result<&'static FieldSpec> {
        let spec = self.registry.describe(field)?;
        if spec.category == FieldCategory::GrowableDataset {
            Ok(spec)
        } else {
            Err(Error::InvalidOperation(format!(
                "field '{field}' is a {:?}, not a growable dataset",
                spec.category
            )))
        }
    }
}

fn is_series(spec: &FieldSpec) -> bool {
    matches!(spec.element, ElementType::Float32 | ElementType::Float64)
        && matches!(spec.rank, Rank::Vector | Rank::Matrix { .. })
}

pub(crate) const fn growable_dtype(spec: &FieldSpec) -> Dtype {
    match (spec.element, spec.rank) {
        (ElementType::Utf8, Rank::List) => Dtype::VarLenUtf8List,
        (ElementType::Utf8, _) => Dtype::VarLenUtf8,
        (ElementType::Float32, Rank::Scalar) => Dtype::Float32,
        (_, Rank::Scalar) => Dtype::Float64,
        (_, _) => Dtype::VarLenFloat64,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fixed_array(spec: &FieldSpec, value: TypedValue) -> Result<(Vec<usize>, ArrayData)> {
    let (shape, numbers) = match value {
        TypedValue::TextList(items) => {
            return Ok((vec![items.len()], ArrayData::VarLenUtf8(items)));
        }
        TypedValue::Text(s) => return Ok((vec![1], ArrayData::VarLenUtf8(vec![s]))),
        TypedValue::Bool(b) => return Ok((vec![1], ArrayData::Bool(vec![b]))),
        TypedValue::Scalar(x) => (vec![1], vec![x]),
        TypedValue::Vector(v) => (vec![v.len()], v),
        TypedValue::Matrix(m) => (vec![m.rows(), m.cols()], m.into_data()),
    };
    let data = match spec.element {
        ElementType::Float32 => ArrayData::Float32(numbers.into_iter().map(|x| x as f32).collect()),
        ElementType::Float64 => ArrayData::Float64(numbers),
        ElementType::UInt32 => ArrayData::UInt32(numbers.into_iter().map(|x| x as u32).collect()),
        ElementType::Utf8 | ElementType::Bool => {
            return Err(Error::type_mismatch(spec.name, spec.expected(), "numeric"));
        }
    };
    Ok((shape, data))
}

/// Attribute representation of an adapted value.
#[must_use]
pub fn attr_value(value: &TypedValue) -> AttrValue {
    match value {
        TypedValue::Bool(b) => AttrValue::Bool(*b),
        TypedValue::Scalar(x) => AttrValue::Float(*x),
        TypedValue::Text(s) => AttrValue::Text(s.clone()),
        TypedValue::TextList(v) => AttrValue::TextList(v.clone()),
        TypedValue::Vector(v) => AttrValue::Floats(v.clone()),
        TypedValue::Matrix(m) => AttrValue::Floats(m.data().to_vec()),
    }
}

fn slot(value: TypedValue) -> Slot {
    match value {
        TypedValue::Bool(b) => Slot::Float64(if b { 1.0 } else { 0.0 }),
        TypedValue::Scalar(x) => Slot::Float64(x),
        TypedValue::Text(s) => Slot::Utf8(s),
        TypedValue::TextList(v) => Slot::Strings(v),
        TypedValue::Vector(v) => Slot::Floats(v),
        TypedValue::Matrix(m) => Slot::Floats(m.into_data()),
    }
}
