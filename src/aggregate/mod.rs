//! Batch Aggregator
//!
//! Folds an ordered collection of trial records into one container with a
//! root-level growable dataset per batch field. Each trial moves through
//! [`TrialState`]:
//!
//! ```text
//! Pending -> Processing -> Committed { index }
//!                       \-> Skipped { kind, reason }
//!                       \-> Aborted { kind, reason }
//! ```
//!
//! `Aborted` marks the trial that hit a fatal error; the run stops there and
//! the aggregator refuses any further run.
//!
//! A trial is adapted in full before anything is written, so a skipped
//! trial never consumes a slot and every growable dataset has length equal
//! to the committed count after each trial.
//!
//! # Example
//!
//! ```rust
//! use gait_archive::aggregate::BatchAggregator;
//! use gait_archive::config::ArchiveConfig;
//! use gait_archive::container::{ContainerReader, MemoryContainer};
//! use gait_archive::schema::SchemaRegistry;
//! use gait_archive::source::{MemorySource, StructRecord};
//!
//! let registry = SchemaRegistry::standard();
//! let config = ArchiveConfig::default();
//! let trial = StructRecord::new()
//!     .with("subjectName", "S001")
//!     .with("subjectHeight", 1.70)
//!     .with("subjectMass", 70.0)
//!     .with("emgBinValues", vec![0.2, 0.5, 0.1]);
//! let source = MemorySource::new().with("walk01", trial);
//!
//! let mut container = MemoryContainer::new();
//! let report = BatchAggregator::new(&registry, &config)
//!     .run(&mut container, &source, &["walk01", "missing"])?;
//!
//! assert_eq!(report.committed, 1);
//! assert_eq!(report.skipped.len(), 1);
//! assert_eq!(container.read_dataset("/trialName")?.len(), 1);
//! # Ok::<(), gait_archive::Error>(())
//! ```

mod accumulator;
mod common_info;
mod report;

pub use accumulator::EmgMaxAccumulator;
pub use common_info::CommonInfo;
pub use report::{BatchReport, SkippedTrial};

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adapter::RecordAdapter;
use crate::config::ArchiveConfig;
use crate::container::{join, AttrValue, ContainerRuntime, FileContainer};
use crate::schema::{FieldSpec, SchemaRegistry, Scope, EMG_BIN_VALUES, EMG_BIN_VALUES_MAX};
use crate::source::{SourceRecord, SourceValue, StructRecord, TrialSource};
use crate::value::TypedValue;
use crate::writer::ContainerWriter;
use crate::{Error, Result};

/// Trial series a batch record may carry. They are checked against the
/// catalog so a malformed trial is skipped, but never written.
const CARRIED_SERIES: [&str; 4] = ["time", "joint_angles", "grf", "events"];

/// Lifecycle of one trial within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialState {
    /// Not yet loaded
    Pending,
    /// Loaded, being adapted and written
    Processing,
    /// Consumed growable slot `index`
    Committed {
        /// Zero-based slot index
        index: usize,
    },
    /// Dropped without consuming a slot
    Skipped {
        /// Error kind
        kind: &'static str,
        /// Human-readable reason
        reason: String,
    },
    /// Hit a fatal error that ended the run
    Aborted {
        /// Error kind
        kind: &'static str,
        /// Human-readable reason
        reason: String,
    },
}

impl TrialState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed { .. } | Self::Skipped { .. } | Self::Aborted { .. }
        )
    }
}

/// Drives the Record Adapter and Container Writer across many trials.
///
/// The trial counter and the `emgBinValuesMax` accumulator are owned here
/// and only readable from outside. One aggregator performs one run; a run
/// that fails still spends it, since the counter and accumulator may
/// already reflect written trials.
#[derive(Debug)]
pub struct BatchAggregator<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ArchiveConfig,
    common: CommonInfo,
    started: bool,
    next_index: usize,
    accumulator: EmgMaxAccumulator,
    states: Vec<(String, TrialState)>,
}

impl<'a> BatchAggregator<'a> {
    /// Create an aggregator with no overrides.
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry, config: &'a ArchiveConfig) -> Self {
        Self {
            registry,
            config,
            common: CommonInfo::new(),
            started: false,
            next_index: 0,
            accumulator: EmgMaxAccumulator::new(),
            states: Vec::new(),
        }
    }

    /// Apply `common` to every trial.
    #[must_use]
    pub fn with_common_info(mut self, common: CommonInfo) -> Self {
        self.common = common;
        self
    }

    /// Whether [`run`](Self::run) has been called, successfully or not.
    #[must_use]
    pub const fn has_run(&self) -> bool {
        self.started
    }

    /// Trials committed so far.
    #[must_use]
    pub const fn committed(&self) -> usize {
        self.next_index
    }

    /// The running-maximum accumulator.
    #[must_use]
    pub const fn accumulator(&self) -> &EmgMaxAccumulator {
        &self.accumulator
    }

    /// Per-trial states of the current or last run, in processing order.
    #[must_use]
    pub fn trial_states(&self) -> &[(String, TrialState)] {
        &self.states
    }

    /// Process `trials` in order into `container`.
    ///
    /// Trial-local errors (load failure, type mismatch) skip the trial and
    /// are listed in the report; any other error ends the run.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if this aggregator already ran, even if
    /// that run failed. Otherwise the first fatal error
    /// ([`Error::UnknownField`], [`Error::DuplicateNode`], container failures).
    pub fn run<C, S, T>(&mut self, container: &mut C, source: &S, trials: &[T]) -> Result<BatchReport>
    where
        C: ContainerRuntime + ?Sized,
        S: TrialSource + ?Sized,
        T: AsRef<str>,
    {
        self.ensure_unused()?;
        self.started = true;
        let started_at = Utc::now();
        let total = trials.len();
        let step = (total / self.config.progress_divisions.max(1)).max(1);
        self.states = trials
            .iter()
            .map(|t| (t.as_ref().to_string(), TrialState::Pending))
            .collect();
        info!(trials = total, overrides = self.common.len(), "batch run started");

        let (registry, config) = (self.registry, self.config);
        let mut writer = ContainerWriter::new(container, registry, &config.layout);
        self.begin(&mut writer)?;

        let mut skipped = Vec::new();
        for (position, trial) in trials.iter().map(|t| t.as_ref()).enumerate() {
            self.states[position].1 = TrialState::Processing;
            let state = match self.process(&mut writer, source, trial) {
                Ok(index) => TrialState::Committed { index },
                Err(e) if e.is_trial_local() => {
                    warn!(trial, kind = e.kind(), error = %e, "trial skipped");
                    skipped.push(SkippedTrial {
                        trial: trial.to_string(),
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                    TrialState::Skipped {
                        kind: e.kind(),
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    warn!(trial, kind = e.kind(), error = %e, "batch run aborted");
                    self.states[position].1 = TrialState::Aborted {
                        kind: e.kind(),
                        reason: e.to_string(),
                    };
                    return Err(e);
                }
            };
            self.states[position].1 = state;

            let processed = position + 1;
            if processed % step == 0 || processed == total {
                info!(processed, total, committed = self.next_index, "batch progress");
            }
        }

        let emg_max_shape = self.finish(&mut writer)?;
        let report = BatchReport {
            committed: self.next_index,
            skipped,
            emg_max_shape,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            committed = report.committed,
            skipped = report.skipped.len(),
            bins = emg_max_shape[0],
            "batch run finished"
        );
        Ok(report)
    }

    /// Run into a new file at `path`.
    ///
    /// The archive is only published at `path` when the run succeeds; on
    /// error an existing file at `path` is left as it was.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus I/O and storage errors.
    pub fn run_to_file<S, T>(&mut self, path: impl AsRef<Path>, source: &S, trials: &[T]) -> Result<BatchReport>
    where
        S: TrialSource + ?Sized,
        T: AsRef<str>,
    {
        self.ensure_unused()?;
        let codec = self.config.codec;
        FileContainer::scoped(path, codec, |container| self.run(container, source, trials))
    }

    fn ensure_unused(&self) -> Result<()> {
        if self.started {
            return Err(Error::InvalidOperation(
                "batch aggregator already ran; create a new one".to_string(),
            ));
        }
        Ok(())
    }

    fn begin<C: ContainerRuntime + ?Sized>(&self, writer: &mut ContainerWriter<'_, C>) -> Result<()> {
        let root = [
            ("schema_version", &self.config.schema_version),
            ("created_by", &self.config.created_by),
            ("coordinate_frame", &self.config.coordinate_frame),
        ];
        for (name, value) in root {
            writer.write_attribute("/", name, &TypedValue::Text(value.clone()))?;
        }
        for spec in self.registry.batch_fields() {
            writer.declare_growable(&join("/", spec.name), spec.name)?;
        }
        Ok(())
    }

    fn process<C, S>(&mut self, writer: &mut ContainerWriter<'_, C>, source: &S, trial: &str) -> Result<usize>
    where
        C: ContainerRuntime + ?Sized,
        S: TrialSource + ?Sized,
    {
        let record = source.load(trial)?;
        let entry = self.extract(&record, trial)?;

        let index = self.next_index;
        let committed = self.write_entry(writer, &entry).and_then(|()| {
            if let Some(bins) = entry_value(&entry, EMG_BIN_VALUES).and_then(TypedValue::as_vector) {
                self.accumulator.update(bins)?;
            }
            let max = match self.common.get(EMG_BIN_VALUES_MAX) {
                Some(value) => value.clone(),
                None => TypedValue::Vector(self.accumulator.current().unwrap_or_default().to_vec()),
            };
            writer.append_growable(&join("/", EMG_BIN_VALUES_MAX), EMG_BIN_VALUES_MAX, &max)?;
            Ok(())
        });
        // Past this point a slot may already be written; nothing is trial-local any more.
        committed.map_err(|e| {
            if e.is_trial_local() {
                Error::InvalidOperation(format!("trial '{trial}' failed after writing began: {e}"))
            } else {
                e
            }
        })?;
        self.next_index += 1;
        debug!(trial, index, "trial committed");
        Ok(index)
    }

    /// Adapt every batch field; no container access.
    fn extract(&self, record: &StructRecord, trial: &str) -> Result<Vec<(&'static FieldSpec, TypedValue)>> {
        let adapter = RecordAdapter::new(self.registry);
        for name in CARRIED_SERIES {
            if let Some(SourceValue::Struct(series)) = record.get_field(name) {
                adapter.adapt(series, name)?;
            }
        }
        let mut entry = Vec::new();
        for spec in self.registry.scope(Scope::Batch) {
            if spec.name == EMG_BIN_VALUES_MAX {
                continue;
            }
            if let Some(value) = self.common.get(spec.name) {
                entry.push((spec, value.clone()));
                continue;
            }
            let value = match adapter.adapt_spec(record, spec) {
                Ok(Some(value)) => value,
                Ok(None) => self.default_value(spec, trial),
                Err(e) if spec.is_blank_by_default() && e.is_trial_local() => {
                    warn!(trial, field = spec.name, error = %e, "ignoring ill-typed blank-by-default value");
                    TypedValue::placeholder(spec)
                }
                Err(e) => return Err(e),
            };
            entry.push((spec, value));
        }
        Ok(entry)
    }

    #[allow(clippy::cast_precision_loss)]
    fn default_value(&self, spec: &FieldSpec, trial: &str) -> TypedValue {
        match spec.name {
            "trialName" => TypedValue::Text(trial.to_string()),
            "trialNumber" => TypedValue::Scalar((self.next_index + 1) as f64),
            _ => TypedValue::placeholder(spec),
        }
    }

    fn write_entry<C: ContainerRuntime + ?Sized>(
        &self,
        writer: &mut ContainerWriter<'_, C>,
        entry: &[(&'static FieldSpec, TypedValue)],
    ) -> Result<()> {
        for (spec, value) in entry {
            writer.append_growable(&join("/", spec.name), spec.name, value)?;
        }
        Ok(())
    }

    fn finish<C: ContainerRuntime + ?Sized>(&mut self, writer: &mut ContainerWriter<'_, C>) -> Result<[usize; 2]> {
        let column = self.accumulator.finalize();
        let path = join("/", EMG_BIN_VALUES_MAX);
        writer.write_raw_attribute(&path, "finalized", AttrValue::Floats(column.data().to_vec()))?;
        let shape = column.shape();
        writer.write_raw_attribute(
            &path,
            "finalized_shape",
            AttrValue::UInts(shape.iter().map(|&n| n as u64).collect()),
        )?;
        writer.write_raw_attribute("/", "committed_trials", AttrValue::UInt(self.next_index as u64))?;
        Ok(shape)
    }
}

fn entry_value<'e>(entry: &'e [(&'static FieldSpec, TypedValue)], field: &str) -> Option<&'e TypedValue> {
    entry
        .iter()
        .find(|(spec, _)| spec.name == field)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ArrayData, ContainerReader, MemoryContainer};
    use crate::source::MemorySource;

    fn trial(name: &str, bins: Vec<f64>) -> StructRecord {
        StructRecord::new()
            .with("subjectName", name)
            .with("subjectHeight", 1.7)
            .with("subjectMass", 70.0)
            .with("emgBinValues", bins)
    }

    #[test]
    fn test_skip_does_not_consume_index() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let source = MemorySource::new()
            .with("t1", trial("S1", vec![1.0]))
            .with("t3", trial("S1", vec![2.0]));
        let mut container = MemoryContainer::new();
        let mut aggregator = BatchAggregator::new(&registry, &config);
        let report = aggregator
            .run(&mut container, &source, &["t1", "t2", "t3"])
            .unwrap();

        assert_eq!(report.committed, 2);
        assert_eq!(report.skipped[0].kind, "MissingSourceError");
        assert_eq!(
            aggregator.trial_states()[2].1,
            TrialState::Committed { index: 1 }
        );
        let numbers = container.read_dataset("/trialNumber").unwrap();
        assert_eq!(numbers.data().as_f64().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_max_snapshot_per_slot() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let source = MemorySource::new()
            .with("a", trial("S1", vec![3.0, 5.0, 1.0]))
            .with("b", trial("S1", vec![4.0, 2.0]));
        let mut container = MemoryContainer::new();
        BatchAggregator::new(&registry, &config)
            .run(&mut container, &source, &["a", "b"])
            .unwrap();

        let max = container.read_dataset("/emgBinValuesMax").unwrap();
        assert_eq!(
            max.data(),
            &ArrayData::VarLenFloat64(vec![vec![3.0, 5.0, 1.0], vec![4.0, 5.0, 1.0]])
        );
        assert_eq!(
            container
                .read_attribute("/emgBinValuesMax", "finalized_shape")
                .unwrap(),
            AttrValue::UInts(vec![3, 1])
        );
    }

    #[test]
    fn test_second_run_rejected() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let source = MemorySource::new();
        let mut aggregator = BatchAggregator::new(&registry, &config);
        let mut container = MemoryContainer::new();
        aggregator
            .run(&mut container, &source, &[] as &[&str])
            .unwrap();
        assert!(matches!(
            aggregator.run(&mut MemoryContainer::new(), &source, &[] as &[&str]),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_blank_field_ill_typed_is_tolerated() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let source =
            MemorySource::new().with("a", trial("S1", vec![1.0]).with("comTrace", "not a number"));
        let mut container = MemoryContainer::new();
        let report = BatchAggregator::new(&registry, &config)
            .run(&mut container, &source, &["a"])
            .unwrap();
        assert_eq!(report.committed, 1);
        let com = container.read_dataset("/comTrace").unwrap();
        assert!(com.data().as_f64().unwrap()[0].is_nan());
    }
}
