//! In-memory container tree.
//!
//! Data is lost when the value is dropped; wrap it in a
//! [`FileContainer`](super::FileContainer) for persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    segments, ArrayData, AttrValue, ContainerReader, ContainerRuntime, Dataset, DatasetSpec,
    NodeKind, Slot,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Group {
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    children: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Group(Group),
    Dataset(Dataset),
}

/// Container held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContainer {
    root: Group,
}

impl MemoryContainer {
    /// Create an empty container (root group only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn group(&self, segs: &[&str]) -> Option<&Group> {
        let mut group = &self.root;
        for seg in segs {
            group = match group.children.get(*seg)? {
                Node::Group(g) => g,
                Node::Dataset(_) => return None,
            };
        }
        Some(group)
    }

    fn group_mut(&mut self, segs: &[&str], create: bool) -> Result<&mut Group> {
        let mut group = &mut self.root;
        let mut walked = String::new();
        for seg in segs {
            walked.push('/');
            walked.push_str(seg);
            if create && !group.children.contains_key(*seg) {
                group
                    .children
                    .insert((*seg).to_string(), Node::Group(Group::default()));
            }
            group = match group.children.get_mut(*seg) {
                Some(Node::Group(g)) => g,
                Some(Node::Dataset(_)) => {
                    return Err(Error::InvalidOperation(format!(
                        "'{walked}' is a dataset, not a group"
                    )))
                }
                None => return Err(Error::NodeNotFound(walked)),
            };
        }
        Ok(group)
    }

    fn dataset(&self, path: &str) -> Result<&Dataset> {
        let segs = segments(path);
        let (last, parents) = segs
            .split_last()
            .ok_or_else(|| Error::NodeNotFound(path.to_string()))?;
        match self.group(parents).and_then(|g| g.children.get(*last)) {
            Some(Node::Dataset(d)) => Ok(d),
            _ => Err(Error::NodeNotFound(path.to_string())),
        }
    }

    fn dataset_mut(&mut self, path: &str) -> Result<&mut Dataset> {
        let segs = segments(path);
        let (last, parents) = segs
            .split_last()
            .ok_or_else(|| Error::NodeNotFound(path.to_string()))?;
        match self.group_mut(parents, false)?.children.get_mut(*last) {
            Some(Node::Dataset(d)) => Ok(d),
            _ => Err(Error::NodeNotFound(path.to_string())),
        }
    }

    fn attributes(&self, path: &str) -> Result<&BTreeMap<String, AttrValue>> {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            return Ok(&self.root.attributes);
        };
        match self.group(parents).and_then(|g| g.children.get(*last)) {
            Some(Node::Group(g)) => Ok(&g.attributes),
            Some(Node::Dataset(d)) => Ok(d.attributes()),
            None => Err(Error::NodeNotFound(path.to_string())),
        }
    }

    fn attributes_mut(&mut self, path: &str) -> Result<&mut BTreeMap<String, AttrValue>> {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            return Ok(&mut self.root.attributes);
        };
        match self.group_mut(parents, false)?.children.get_mut(*last) {
            Some(Node::Group(g)) => Ok(&mut g.attributes),
            Some(Node::Dataset(d)) => Ok(d.attributes_mut()),
            None => Err(Error::NodeNotFound(path.to_string())),
        }
    }

    /// Check every dataset in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageError`] for the first dataset whose shape,
    /// max shape and data disagree.
    pub fn validate(&self) -> Result<()> {
        validate_group(&self.root, "")
    }

    fn insert_node(&mut self, path: &str, node: Node) -> Result<()> {
        let segs = segments(path);
        let (last, parents) = segs
            .split_last()
            .ok_or_else(|| Error::DuplicateNode("/".to_string()))?;
        let parent = self.group_mut(parents, true)?;
        if parent.children.contains_key(*last) {
            return Err(Error::DuplicateNode(path.to_string()));
        }
        parent.children.insert((*last).to_string(), node);
        Ok(())
    }
}

fn validate_group(group: &Group, path: &str) -> Result<()> {
    for (name, node) in &group.children {
        let child = format!("{path}/{name}");
        match node {
            Node::Group(g) => validate_group(g, &child)?,
            Node::Dataset(d) => d.validate(&child)?,
        }
    }
    Ok(())
}

impl ContainerReader for MemoryContainer {
    fn node_kind(&self, path: &str) -> Option<NodeKind> {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            return Some(NodeKind::Group);
        };
        match self.group(parents)?.children.get(*last)? {
            Node::Group(_) => Some(NodeKind::Group),
            Node::Dataset(_) => Some(NodeKind::Dataset),
        }
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        self.group(&segments(path))
            .map(|g| g.children.keys().cloned().collect())
            .ok_or_else(|| Error::NodeNotFound(path.to_string()))
    }

    fn attribute_names(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.attributes(path)?.keys().cloned().collect())
    }

    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue> {
        self.attributes(path)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(format!("{path}@{name}")))
    }

    fn read_dataset(&self, path: &str) -> Result<Dataset> {
        self.dataset(path).cloned()
    }

    fn dataset_shape(&self, path: &str) -> Result<Vec<usize>> {
        Ok(self.dataset(path)?.shape().to_vec())
    }
}

impl ContainerRuntime for MemoryContainer {
    fn create_group(&mut self, path: &str) -> Result<()> {
        self.insert_node(path, Node::Group(Group::default()))
    }

    fn create_attribute(&mut self, path: &str, name: &str, value: AttrValue) -> Result<()> {
        let attributes = self.attributes_mut(path)?;
        if attributes.contains_key(name) {
            return Err(Error::DuplicateNode(format!("{path}@{name}")));
        }
        attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn create_dataset(&mut self, path: &str, spec: DatasetSpec) -> Result<()> {
        let dataset = Dataset::from_spec(spec)?;
        self.insert_node(path, Node::Dataset(dataset))
    }

    fn write_dataset(&mut self, path: &str, data: ArrayData) -> Result<()> {
        self.dataset_mut(path)?.replace_data(data)
    }

    fn extend_dataset(&mut self, path: &str, new_len: usize) -> Result<()> {
        self.dataset_mut(path)?.extend(new_len)
    }

    fn write_slice(&mut self, path: &str, index: usize, value: Slot) -> Result<()> {
        self.dataset_mut(path)?.write_slot(index, value)
    }
}
