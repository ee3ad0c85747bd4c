//! Error types for gait-archive
//!
//! Two families: configuration-level errors that abort a run, and
//! trial-local data errors the batch aggregator downgrades to a skip.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gait-archive error types
#[derive(Error, Debug)]
pub enum Error {
    /// Field name is not in the schema catalog (configuration bug)
    #[error("Unknown field '{0}': not declared in the schema registry")]
    UnknownField(String),

    /// Extracted value conflicts with the declared element type or shape
    #[error("Type mismatch for field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field being extracted
        field: String,
        /// What the schema registry declares
        expected: String,
        /// What the source record actually holds
        found: String,
    },

    /// Attempted to create a node that already exists (write-ordering bug)
    #[error("Duplicate node: '{0}' already exists in the container")]
    DuplicateNode(String),

    /// A named source record could not be loaded
    #[error("Missing source for trial '{trial}': {reason}")]
    MissingSource {
        /// Trial identifier
        trial: String,
        /// Why loading failed
        reason: String,
    },

    /// Container path does not exist
    #[error("Node not found: '{0}'")]
    NodeNotFound(String),

    /// Operation not permitted on this node or handle
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Snapshot encoding/decoding or compression failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid configuration or common-info document
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::TypeMismatch`] from displayable parts.
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether the error only invalidates the current trial.
    ///
    /// Trial-local errors are downgraded to a skip by the batch aggregator;
    /// everything else terminates the run.
    #[must_use]
    pub const fn is_trial_local(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. } | Self::MissingSource { .. })
    }

    /// Short variant name used in skip reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownField(_) => "UnknownFieldError",
            Self::TypeMismatch { .. } => "TypeMismatchError",
            Self::DuplicateNode(_) => "DuplicateNodeError",
            Self::MissingSource { .. } => "MissingSourceError",
            Self::NodeNotFound(_) => "NodeNotFoundError",
            Self::InvalidOperation(_) => "InvalidOperationError",
            Self::StorageError(_) => "StorageError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }
}
