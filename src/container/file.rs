//! File-backed container: a [`MemoryContainer`] persisted as one snapshot.
//!
//! Snapshot layout: 8-byte magic, 1-byte codec tag, payload (JSON tree,
//! compressed by the codec). Mutations stay in memory until
//! [`FileContainer::flush`] or [`FileContainer::close`]; each flush writes a
//! sibling temp file and renames it into place, so a crash never leaves a
//! half-written container. The file on disk always holds the last flushed
//! snapshot, never a partial one.

use std::fs;
use std::path::{Path, PathBuf};

use super::{
    ArrayData, AttrValue, Codec, ContainerReader, ContainerRuntime, Dataset, DatasetSpec,
    MemoryContainer, NodeKind, Slot,
};
use crate::{Error, Result};

const MAGIC: &[u8; 8] = b"GAITARC\x01";

/// How a [`FileContainer`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Mutations allowed; flushed on close
    ReadWrite,
    /// Every mutation fails with [`Error::InvalidOperation`]
    ReadOnly,
}

/// Container persisted to a single file.
///
/// The handle owns the container for its whole lifetime. The tree is
/// buffered in memory and only reaches disk on [`flush`](Self::flush) or
/// [`close`](Self::close), so memory use grows with the archive. Readers
/// opening the same path see the last flushed snapshot. Dropping an unclosed
/// read-write handle flushes on a best-effort basis and logs failures.
///
/// # Example
///
/// ```rust
/// use gait_archive::container::{AttrValue, Codec, ContainerReader, ContainerRuntime, FileContainer};
///
/// # fn main() -> gait_archive::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("gait.garc");
///
/// let mut container = FileContainer::create(&path, Codec::None)?;
/// container.create_attribute("/", "schema_version", AttrValue::Text("0.1.0".into()))?;
/// container.close()?;
///
/// let reopened = FileContainer::open_read_only(&path)?;
/// assert!(reopened.read_attribute("/", "schema_version").is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileContainer {
    path: PathBuf,
    tree: MemoryContainer,
    mode: OpenMode,
    codec: Codec,
    dirty: bool,
    closed: bool,
}

impl FileContainer {
    /// Create a new container at `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error if the empty snapshot cannot be written.
    pub fn create(path: impl AsRef<Path>, codec: Codec) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            tracing::debug!(path = %path.display(), "replacing existing container");
            fs::remove_file(&path)?;
        }
        let mut container = Self {
            path,
            tree: MemoryContainer::new(),
            mode: OpenMode::ReadWrite,
            codec,
            dirty: true,
            closed: false,
        };
        container.flush()?;
        Ok(container)
    }

    /// Build a new container for `path` inside `f` and publish it only on success.
    ///
    /// The container is staged at `<path>.partial` and renamed over `path`
    /// once `f` returns `Ok` and the close succeeds. On any error the staging
    /// file is removed and whatever was at `path` is left untouched. An error
    /// from `f` takes precedence over a close error.
    ///
    /// # Errors
    ///
    /// Returns the creation error, the error from `f`, the close error, or the
    /// rename error, in that order.
    pub fn scoped<T>(
        path: impl AsRef<Path>,
        codec: Codec,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let target = path.as_ref();
        let staging = sibling(target, ".partial");
        let mut container = Self::create(&staging, codec)?;
        let outcome = f(&mut container);
        let closed = container.close();
        let published = match (outcome, closed) {
            (Ok(value), Ok(())) => fs::rename(&staging, target)
                .map(|()| value)
                .map_err(Error::from),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        };
        if published.is_err() && staging.exists() {
            if let Err(e) = fs::remove_file(&staging) {
                tracing::warn!(path = %staging.display(), error = %e, "staging file not removed");
            }
        }
        published
    }

    /// Open an existing container without write access.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error if the file is missing or malformed.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::ReadOnly)
    }

    /// Open an existing container for further writes.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error if the file is missing or malformed.
    pub fn open_read_write(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::ReadWrite)
    }

    fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        let (codec, tree) = decode_snapshot(&bytes)?;
        Ok(Self {
            path,
            tree,
            mode,
            codec,
            dirty: false,
            closed: false,
        })
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open mode.
    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Snapshot codec.
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Write pending changes to disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error if encoding or writing fails.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly || !self.dirty {
            return Ok(());
        }
        let bytes = encode_snapshot(&self.tree, self.codec)?;
        let tmp = sibling(&self.path, ".tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "container flushed");
        Ok(())
    }

    /// Flush and release the handle.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any.
    pub fn close(mut self) -> Result<()> {
        let result = self.flush();
        self.closed = true;
        result
    }

    fn writable(&mut self) -> Result<&mut MemoryContainer> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::InvalidOperation(format!(
                "container {} is open read-only",
                self.path.display()
            )));
        }
        self.dirty = true;
        Ok(&mut self.tree)
    }
}

impl Drop for FileContainer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "container flush on drop failed");
        }
    }
}

/// `path` with `suffix` appended to the file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn encode_snapshot(tree: &MemoryContainer, codec: Codec) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(tree)?;
    let compressed = codec.compress(&payload)?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + 1 + compressed.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(codec.tag());
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}

fn decode_snapshot(bytes: &[u8]) -> Result<(Codec, MemoryContainer)> {
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::StorageError(
            "not a gait-archive container (bad magic)".to_string(),
        ));
    }
    let codec = Codec::from_tag(bytes[MAGIC.len()])?;
    let payload = codec.decompress(&bytes[MAGIC.len() + 1..])?;
    let tree: MemoryContainer = serde_json::from_slice(&payload)
        .map_err(|e| Error::StorageError(format!("corrupt container payload: {e}")))?;
    tree.validate()?;
    Ok((codec, tree))
}

impl ContainerReader for FileContainer {
    fn node_kind(&self, path: &str) -> Option<NodeKind> {
        self.tree.node_kind(path)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        self.tree.children(path)
    }

    fn attribute_names(&self, path: &str) -> Result<Vec<String>> {
        self.tree.attribute_names(path)
    }

    fn read_attribute(&self, path: &str, name: &str) -> Result<AttrValue> {
        self.tree.read_attribute(path, name)
    }

    fn read_dataset(&self, path: &str) -> Result<Dataset> {
        self.tree.read_dataset(path)
    }

    fn dataset_shape(&self, path: &str) -> Result<Vec<usize>> {
        self.tree.dataset_shape(path)
    }
}

impl ContainerRuntime for FileContainer {
    fn create_group(&mut self, path: &str) -> Result<()> {
        self.writable()?.create_group(path)
    }

    fn create_attribute(&mut self, path: &str, name: &str, value: AttrValue) -> Result<()> {
        self.writable()?.create_attribute(path, name, value)
    }

    fn create_dataset(&mut self, path: &str, spec: DatasetSpec) -> Result<()> {
        self.writable()?.create_dataset(path, spec)
    }

    fn write_dataset(&mut self, path: &str, data: ArrayData) -> Result<()> {
        self.writable()?.write_dataset(path, data)
    }

    fn extend_dataset(&mut self, path: &str, new_len: usize) -> Result<()> {
        self.writable()?.extend_dataset(path, new_len)
    }

    fn write_slice(&mut self, path: &str, index: usize, value: Slot) -> Result<()> {
        self.writable()?.write_slice(path, index, value)
    }
}
