//! Batch Aggregation Tests
//!
//! Growable-length and no-gap invariants, override precedence, the
//! ragged running maximum and skip-on-error, end to end.

use gait_archive::aggregate::{BatchAggregator, CommonInfo, TrialState};
use gait_archive::config::ArchiveConfig;
use gait_archive::container::{
    ArrayData, AttrValue, ContainerReader, ContainerRuntime, FileContainer, MemoryContainer,
};
use gait_archive::schema::SchemaRegistry;
use gait_archive::source::{JsonDirectorySource, MemorySource, StructRecord, TrialSource};
use gait_archive::value::TypedValue;
use gait_archive::Error;
use serde_json::json;

fn trial(subject: &str, mass: f64, bins: Vec<f64>) -> StructRecord {
    StructRecord::new()
        .with("subjectName", subject)
        .with("subjectHeight", 1.75)
        .with("subjectMass", mass)
        .with("subjectAge", 31.0)
        .with("emgBinValues", bins)
}

fn run(source: &MemorySource, trials: &[&str]) -> (MemoryContainer, gait_archive::aggregate::BatchReport) {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let mut container = MemoryContainer::new();
    let report = BatchAggregator::new(&registry, &config)
        .run(&mut container, source, trials)
        .unwrap();
    (container, report)
}

// =============================================================================
// Growable Invariants
// =============================================================================

#[test]
fn test_every_batch_dataset_has_committed_length() {
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![1.0, 2.0]))
        .with("t2", trial("S1", 71.0, vec![0.5]))
        .with("t3", trial("S2", 65.0, vec![3.0, 1.0, 4.0]));
    let (container, report) = run(&source, &["t1", "t2", "t3"]);

    assert_eq!(report.committed, 3);
    let registry = SchemaRegistry::standard();
    for spec in registry.batch_fields() {
        let ds = container.read_dataset(&format!("/{}", spec.name)).unwrap();
        assert_eq!(ds.len(), 3, "{} has wrong length", spec.name);
        assert!(ds.is_growable());
    }
    assert_eq!(
        container.read_attribute("/", "committed_trials").unwrap(),
        AttrValue::UInt(3)
    );
}

#[test]
fn test_blank_fields_are_nan_not_gaps() {
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![1.0]))
        .with("t2", trial("S1", 70.0, vec![1.0]).with("subjectLegLength", 0.92));
    let (container, _) = run(&source, &["t1", "t2"]);

    let leg = container.read_dataset("/subjectLegLength").unwrap();
    let values = leg.data().as_f64().unwrap();
    assert!(values[0].is_nan());
    assert!((values[1] - 0.92).abs() < f64::EPSILON);

    let sex = container.read_dataset("/subjectSex").unwrap();
    assert_eq!(sex.data(), &ArrayData::VarLenUtf8(vec![String::new(), String::new()]));

    let names = container.read_dataset("/emgNames").unwrap();
    assert_eq!(names.data(), &ArrayData::VarLenUtf8List(vec![vec![], vec![]]));
}

#[test]
fn test_trial_name_and_number_defaults() {
    let source = MemorySource::new()
        .with("walk01", trial("S1", 70.0, vec![1.0]))
        .with("walk02", trial("S1", 70.0, vec![1.0]).with("trialName", "fast walk"));
    let (container, _) = run(&source, &["walk01", "walk02"]);

    let names = container.read_dataset("/trialName").unwrap();
    assert_eq!(
        names.data(),
        &ArrayData::VarLenUtf8(vec!["walk01".into(), "fast walk".into()])
    );
    let numbers = container.read_dataset("/trialNumber").unwrap();
    assert_eq!(numbers.data().as_f64().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_units_on_growable_datasets() {
    let source = MemorySource::new().with("t1", trial("S1", 70.0, vec![1.0]));
    let (container, _) = run(&source, &["t1"]);
    assert_eq!(
        container.read_attribute("/subjectMass", "units").unwrap(),
        AttrValue::Text("kg".into())
    );
    assert!(container.read_attribute("/subjectName", "units").is_err());
}

// =============================================================================
// Ragged Running Maximum
// =============================================================================

#[test]
fn test_ragged_max_keeps_tail() {
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![3.0, 5.0, 1.0]))
        .with("t2", trial("S1", 70.0, vec![4.0, 2.0]));
    let (container, report) = run(&source, &["t1", "t2"]);

    assert_eq!(report.emg_max_shape, [3, 1]);
    assert_eq!(
        container
            .read_attribute("/emgBinValuesMax", "finalized")
            .unwrap(),
        AttrValue::Floats(vec![4.0, 5.0, 1.0])
    );
    let bins = container.read_dataset("/emgBinValues").unwrap();
    assert_eq!(
        bins.data(),
        &ArrayData::VarLenFloat64(vec![vec![3.0, 5.0, 1.0], vec![4.0, 2.0]])
    );
}

#[test]
fn test_accumulator_sealed_after_run() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let source = MemorySource::new().with("t1", trial("S1", 70.0, vec![2.0, 8.0]));
    let mut aggregator = BatchAggregator::new(&registry, &config);
    aggregator
        .run(&mut MemoryContainer::new(), &source, &["t1"])
        .unwrap();
    assert!(aggregator.accumulator().is_sealed());
    assert_eq!(aggregator.accumulator().current(), Some(&[2.0, 8.0][..]));
}

// =============================================================================
// Common-Info Overrides
// =============================================================================

#[test]
fn test_override_wins_for_every_trial() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let common = CommonInfo::from_json(
        &json!({"subjectMass": 68.0, "subjectSex": "F", "emgNames": ["TA", "SOL"]}),
        &registry,
    )
    .unwrap();
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![1.0]))
        .with("t2", trial("S1", 99.0, vec![1.0]).with("subjectSex", "M"));
    let mut container = MemoryContainer::new();
    BatchAggregator::new(&registry, &config)
        .with_common_info(common)
        .run(&mut container, &source, &["t1", "t2"])
        .unwrap();

    let mass = container.read_dataset("/subjectMass").unwrap();
    assert_eq!(mass.data().as_f64().unwrap(), vec![68.0, 68.0]);
    let sex = container.read_dataset("/subjectSex").unwrap();
    assert_eq!(sex.data(), &ArrayData::VarLenUtf8(vec!["F".into(), "F".into()]));
    let names = container.read_dataset("/emgNames").unwrap();
    assert_eq!(
        names.data(),
        &ArrayData::VarLenUtf8List(vec![
            vec!["TA".into(), "SOL".into()],
            vec!["TA".into(), "SOL".into()]
        ])
    );
}

#[test]
fn test_override_satisfies_absent_required_field() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let common = CommonInfo::new()
        .with(&registry, "subjectName", TypedValue::Text("S009".into()))
        .unwrap();
    let record = StructRecord::new()
        .with("subjectHeight", 1.6)
        .with("subjectMass", 55.0)
        .with("emgBinValues", vec![0.3]);
    let source = MemorySource::new().with("t1", record);
    let mut container = MemoryContainer::new();
    let report = BatchAggregator::new(&registry, &config)
        .with_common_info(common)
        .run(&mut container, &source, &["t1"])
        .unwrap();
    assert_eq!(report.committed, 1);
}

// =============================================================================
// Skips
// =============================================================================

#[test]
fn test_two_column_grf_is_skipped() {
    let bad = trial("S1", 70.0, vec![9.0, 9.0, 9.0, 9.0]).with(
        "grf",
        StructRecord::from_json_str(r#"{"values": [[0, 700], [0, 710]]}"#).unwrap(),
    );
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![1.0]))
        .with("t2", bad)
        .with("t3", trial("S1", 70.0, vec![2.0]));

    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let mut container = MemoryContainer::new();
    let mut aggregator = BatchAggregator::new(&registry, &config);
    let report = aggregator
        .run(&mut container, &source, &["t1", "t2", "t3"])
        .unwrap();

    assert_eq!(report.committed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].trial, "t2");
    assert_eq!(report.skipped[0].kind, "TypeMismatchError");
    assert!(report.skipped[0].reason.contains("grf"));

    assert_eq!(aggregator.trial_states()[2].1, TrialState::Committed { index: 1 });
    assert!(aggregator.trial_states().iter().all(|(_, s)| s.is_terminal()));

    // The skipped trial's bins never reached the accumulator.
    assert_eq!(report.emg_max_shape, [1, 1]);
    assert_eq!(container.read_dataset("/trialNumber").unwrap().len(), 2);
}

#[test]
fn test_missing_required_field_is_skipped() {
    let source = MemorySource::new()
        .with("t1", StructRecord::new().with("subjectName", "S1"))
        .with("t2", trial("S1", 70.0, vec![1.0]));
    let (_, report) = run(&source, &["t1", "t2"]);
    assert_eq!(report.committed, 1);
    assert_eq!(report.skipped[0].kind, "TypeMismatchError");
    assert!(report.skipped[0].reason.contains("absent"));
}

#[test]
fn test_all_trials_skipped() {
    let (container, report) = run(&MemorySource::new(), &["a", "b"]);
    assert_eq!(report.committed, 0);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.emg_max_shape, [0, 1]);
    assert_eq!(container.read_dataset("/subjectName").unwrap().len(), 0);
}

#[test]
fn test_unknown_override_is_fatal_before_run() {
    let registry = SchemaRegistry::standard();
    let err = CommonInfo::from_json(&json!({"cadence": 110.0}), &registry).unwrap_err();
    assert!(matches!(err, Error::UnknownField(_)));
}

// =============================================================================
// File-Backed Runs
// =============================================================================

#[test]
fn test_run_to_file_from_json_directory() {
    let dir = tempfile::tempdir().unwrap();
    for (name, mass, bins) in [("trial001", 70.0, json!([0.1, 0.9])), ("trial002", 71.0, json!([[0.5], [0.2], [0.7]]))] {
        let doc = json!({
            "subjectName": "S001",
            "subjectHeight": 1.7,
            "subjectMass": mass,
            "emgBinValues": bins
        });
        std::fs::write(dir.path().join(format!("{name}.json")), doc.to_string()).unwrap();
    }
    std::fs::write(dir.path().join("trial003.json"), "{ truncated").unwrap();

    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let source = JsonDirectorySource::new(dir.path());
    let path = dir.path().join("batch.garc");
    let report = BatchAggregator::new(&registry, &config)
        .run_to_file(&path, &source, &["trial001", "trial002", "trial003", "trial004"])
        .unwrap();

    assert_eq!(report.committed, 2);
    assert!(report.skipped.iter().all(|s| s.kind == "MissingSourceError"));

    let container = FileContainer::open_read_only(&path).unwrap();
    assert_eq!(
        container
            .read_attribute("/emgBinValuesMax", "finalized")
            .unwrap(),
        AttrValue::Floats(vec![0.5, 0.9, 0.7])
    );
}

#[test]
fn test_rejected_rerun_keeps_published_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fatal.garc");
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let source = MemorySource::new()
        .with("t1", trial("S1", 70.0, vec![1.0]))
        .with("t2", trial("S1", 71.0, vec![2.0]));

    let mut aggregator = BatchAggregator::new(&registry, &config);
    aggregator.run_to_file(&path, &source, &["t1"]).unwrap();
    assert!(matches!(
        aggregator.run_to_file(&path, &source, &["t1", "t2"]),
        Err(Error::InvalidOperation(_))
    ));

    let container = FileContainer::open_read_only(&path).unwrap();
    assert_eq!(container.dataset_shape("/trialName").unwrap(), vec![1]);
    assert_eq!(container.dataset_shape("/emgBinValuesMax").unwrap(), vec![1]);
}

/// Source whose backing store fails outright for one trial.
struct FailingSource {
    inner: MemorySource,
    broken: &'static str,
}

impl TrialSource for FailingSource {
    fn load(&self, trial: &str) -> gait_archive::Result<StructRecord> {
        if trial == self.broken {
            return Err(Error::StorageError(format!("device error reading {trial}")));
        }
        self.inner.load(trial)
    }
}

#[test]
fn test_fatal_error_aborts_trial_and_spends_aggregator() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let source = FailingSource {
        inner: MemorySource::new()
            .with("t1", trial("S1", 70.0, vec![1.0]))
            .with("t3", trial("S1", 70.0, vec![3.0])),
        broken: "t2",
    };

    let mut aggregator = BatchAggregator::new(&registry, &config);
    let mut container = MemoryContainer::new();
    assert!(matches!(
        aggregator.run(&mut container, &source, &["t1", "t2", "t3"]),
        Err(Error::StorageError(_))
    ));

    let states = aggregator.trial_states();
    assert_eq!(states[0].1, TrialState::Committed { index: 0 });
    assert!(matches!(
        &states[1].1,
        TrialState::Aborted { kind: "StorageError", reason } if reason.contains("t2")
    ));
    assert!(states[1].1.is_terminal());
    assert_eq!(states[2].1, TrialState::Pending);
    assert!(aggregator.has_run());

    assert!(matches!(
        aggregator.run(&mut MemoryContainer::new(), &source.inner, &["t1"]),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_failed_setup_spends_aggregator() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let source = MemorySource::new().with("t1", trial("S1", 70.0, vec![1.0]));

    let mut occupied = MemoryContainer::new();
    occupied
        .create_attribute("/", "created_by", AttrValue::Text("someone else".into()))
        .unwrap();

    let mut aggregator = BatchAggregator::new(&registry, &config);
    assert!(matches!(
        aggregator.run(&mut occupied, &source, &["t1"]),
        Err(Error::DuplicateNode(_))
    ));
    assert_eq!(aggregator.committed(), 0);
    assert!(matches!(
        aggregator.run(&mut MemoryContainer::new(), &source, &["t1"]),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_fatal_run_to_file_leaves_existing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing.garc");
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let good = MemorySource::new().with("t1", trial("S1", 70.0, vec![1.0]));
    BatchAggregator::new(&registry, &config)
        .run_to_file(&path, &good, &["t1"])
        .unwrap();

    let failing = FailingSource {
        inner: good,
        broken: "t2",
    };
    assert!(BatchAggregator::new(&registry, &config)
        .run_to_file(&path, &failing, &["t1", "t2"])
        .is_err());

    let container = FileContainer::open_read_only(&path).unwrap();
    assert_eq!(container.dataset_shape("/trialName").unwrap(), vec![1]);
    let staged: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "existing.garc")
        .collect();
    assert!(staged.is_empty(), "leftover files: {staged:?}");
}
