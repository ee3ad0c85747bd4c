//! # gait-archive: Biomechanics Records to Hierarchical Containers
//!
//! **Version**: 0.1.0
//!
//! Converts nested, loosely-typed experiment records (as exported by a
//! numeric-computing environment's struct decoder) into a self-describing
//! hierarchical container of groups, attributes and fixed or growable
//! datasets.
//!
//! Two usage modes:
//!
//! - **Single-trial translation** ([`translate`]): one experiment record
//!   becomes `/`, `/subject` and `/trials/<trialId>` with units metadata.
//! - **Batch aggregation** ([`aggregate`]): hundreds of per-trial records
//!   fold into root-level growable datasets, one slot per committed trial,
//!   with NaN placeholders, common-info overrides and a running
//!   elementwise maximum over ragged EMG bins.
//!
//! ## Components
//!
//! - [`schema`]: the field catalog (pure data)
//! - [`adapter`]: typed extraction from opaque source records
//! - [`writer`]: schema-driven fixed and growable writes
//! - [`aggregate`]: the batch state machine
//! - [`verify`]: read-back checks and structure listing
//!
//! ## Example
//!
//! ```rust
//! use gait_archive::aggregate::BatchAggregator;
//! use gait_archive::config::ArchiveConfig;
//! use gait_archive::schema::SchemaRegistry;
//! use gait_archive::source::{MemorySource, StructRecord};
//! use gait_archive::verify::Verifier;
//!
//! let registry = SchemaRegistry::standard();
//! let config = ArchiveConfig::default();
//! let source = MemorySource::new().with(
//!     "walk01",
//!     StructRecord::new()
//!         .with("subjectName", "S001")
//!         .with("subjectHeight", 1.70)
//!         .with("subjectMass", 70.0)
//!         .with("emgBinValues", vec![0.1, 0.4, 0.2]),
//! );
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("batch.garc");
//! let report = BatchAggregator::new(&registry, &config).run_to_file(&path, &source, &["walk01"])?;
//! assert_eq!(report.committed, 1);
//!
//! let verification = Verifier::new(&registry).verify_file(&path)?;
//! assert!(verification.is_clean());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod adapter;
pub mod aggregate;
pub mod config;
pub mod container;
pub mod error;
pub mod observability;
pub mod schema;
pub mod source;
pub mod translate;
pub mod value;
pub mod verify;
pub mod writer;

pub use error::{Error, Result};
