//! Snapshot codec for on-disk containers
//!
//! LZ4 for speed, ZSTD for ratio; both behind the `compression` feature.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Compression applied to a container snapshot payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Plain JSON payload
    None,
    /// LZ4 frame with prepended size
    Lz4,
    /// ZSTD, level 3
    Zstd,
}

impl Default for Codec {
    fn default() -> Self {
        if cfg!(feature = "compression") {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

impl Codec {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// One-byte tag stored in the snapshot header.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zstd => 2,
        }
    }

    /// Codec for a header tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageError`] for an unknown tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Zstd),
            other => Err(Error::StorageError(format!("unknown snapshot codec tag {other}"))),
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails, or the `compression` feature is off
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "compression")]
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::StorageError(format!("ZSTD compression failed: {e}"))),
            #[cfg(not(feature = "compression"))]
            Self::Lz4 | Self::Zstd => Err(self.unavailable()),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "compression")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::StorageError(format!("LZ4 decompression failed: {e}"))),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::StorageError(format!("ZSTD decompression failed: {e}"))),
            #[cfg(not(feature = "compression"))]
            Self::Lz4 | Self::Zstd => Err(self.unavailable()),
        }
    }

    #[cfg(not(feature = "compression"))]
    fn unavailable(self) -> Error {
        Error::StorageError(format!(
            "{} snapshots need the `compression` feature",
            self.as_str()
        ))
    }
}
