//! Conversion configuration
//!
//! Everything is optional in the JSON document; missing keys take the
//! defaults below.
//!
//! ```json
//! {
//!   "created_by": "lab pipeline",
//!   "layout": { "chunk_rows": 512, "deflate_level": 4 },
//!   "codec": "zstd"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::container::Codec;
use crate::{Error, Result};

/// Chunking and compression requests forwarded to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Leading-dimension chunk size for chunked datasets
    pub chunk_rows: usize,
    /// Deflate level requested for compressed datasets (0-9)
    pub deflate_level: u8,
    /// Fixed datasets with more elements than this are chunked and compressed
    pub chunk_threshold: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 256,
            deflate_level: 9,
            chunk_threshold: 256,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Root `schema_version` attribute
    pub schema_version: String,
    /// Root `created_by` attribute
    pub created_by: String,
    /// Root `coordinate_frame` attribute
    pub coordinate_frame: String,
    /// Dataset layout requests
    pub layout: LayoutConfig,
    /// How many progress reports a batch run emits
    pub progress_divisions: usize,
    /// Snapshot codec for file containers
    pub codec: Codec,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            schema_version: "0.1.0".to_string(),
            created_by: concat!("gait-archive ", env!("CARGO_PKG_VERSION")).to_string(),
            coordinate_frame: "lab: +X fwd, +Y left, +Z up".to_string(),
            layout: LayoutConfig::default(),
            progress_divisions: 10,
            codec: Codec::default(),
        }
    }
}

impl ArchiveConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed JSON or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Config`] if invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.layout.chunk_rows == 0 {
            return Err(Error::Config("layout.chunk_rows must be positive".to_string()));
        }
        if self.layout.deflate_level > 9 {
            return Err(Error::Config(format!(
                "layout.deflate_level must be 0-9, got {}",
                self.layout.deflate_level
            )));
        }
        if self.progress_divisions == 0 {
            return Err(Error::Config("progress_divisions must be positive".to_string()));
        }
        Ok(())
    }
}
