//! Verifier Tests
//!
//! Clean containers verify clean; every tampering shows up as a
//! discrepancy rather than an error.

use gait_archive::aggregate::BatchAggregator;
use gait_archive::config::ArchiveConfig;
use gait_archive::container::{
    AttrValue, Codec, ContainerRuntime, DatasetSpec, Dtype, FileContainer, MemoryContainer, Slot,
};
use gait_archive::schema::SchemaRegistry;
use gait_archive::source::{MemorySource, StructRecord};
use gait_archive::translate::TrialTranslator;
use gait_archive::value::TypedValue;
use gait_archive::verify::{VerificationReport, Verifier};
use gait_archive::writer::ContainerWriter;
use gait_archive::Error;
use serde_json::json;

fn batch_container() -> MemoryContainer {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let trial = |name: &str, bins: Vec<f64>| {
        StructRecord::new()
            .with("subjectName", name)
            .with("subjectHeight", 1.8)
            .with("subjectMass", 75.0)
            .with("emgBinValues", bins)
    };
    let source = MemorySource::new()
        .with("t1", trial("S1", vec![0.1, 0.4]))
        .with("t2", trial("S2", vec![0.3]));
    let mut container = MemoryContainer::new();
    BatchAggregator::new(&registry, &config)
        .run(&mut container, &source, &["t1", "t2"])
        .unwrap();
    container
}

fn single_container() -> MemoryContainer {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let doc = json!({
        "subject": {"id": "S001", "sex": "U", "mass_kg": 60.0, "height_m": 1.6},
        "trials": {
            "trial001": {
                "sampling_hz": 200.0,
                "treadmill": true,
                "time": {"values": [0.0, 0.5, 1.0], "units": "s"},
                "grf": {"values": [[0, 0, 600], [0, 0, 610], [0, 0, 605]], "units": "N"}
            }
        }
    });
    let record = StructRecord::from_json_str(&doc.to_string()).unwrap();
    let mut container = MemoryContainer::new();
    TrialTranslator::new(&registry, &config)
        .translate(&mut container, &record)
        .unwrap();
    container
}

fn verify(container: &MemoryContainer) -> VerificationReport {
    let registry = SchemaRegistry::standard();
    Verifier::new(&registry).verify(container)
}

fn mentions(report: &VerificationReport, path: &str, text: &str) -> bool {
    report
        .discrepancies
        .iter()
        .any(|d| d.path == path && d.message.contains(text))
}

// =============================================================================
// Clean Containers
// =============================================================================

#[test]
fn test_batch_container_is_clean() {
    let report = verify(&batch_container());
    assert!(report.is_clean(), "{:?}", report.discrepancies);
    assert!(report.checked > 0);
}

#[test]
fn test_single_trial_container_is_clean() {
    let report = verify(&single_container());
    assert!(report.is_clean(), "{:?}", report.discrepancies);
}

#[test]
fn test_batch_file_is_clean() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.garc");
    let source = MemorySource::new().with(
        "t1",
        StructRecord::new()
            .with("subjectName", "S1")
            .with("subjectHeight", 1.8)
            .with("subjectMass", 75.0)
            .with("emgBinValues", vec![f64::NAN, 0.2]),
    );
    BatchAggregator::new(&registry, &config)
        .run_to_file(&path, &source, &["t1"])
        .unwrap();
    let report = Verifier::new(&registry).verify_file(&path).unwrap();
    assert!(report.is_clean(), "{:?}", report.discrepancies);
}

#[test]
fn test_missing_file_is_an_error() {
    let registry = SchemaRegistry::standard();
    let dir = tempfile::tempdir().unwrap();
    assert!(Verifier::new(&registry)
        .verify_file(dir.path().join("absent.garc"))
        .is_err());
}

#[test]
fn test_corrupt_file_is_an_error_not_a_panic() {
    let registry = SchemaRegistry::standard();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.garc");
    let mut container = FileContainer::create(&path, Codec::None).unwrap();
    container
        .create_dataset("/trialName", DatasetSpec::growable(Dtype::VarLenUtf8))
        .unwrap();
    container.extend_dataset("/trialName", 1).unwrap();
    container.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (header, payload) = bytes.split_at(9);
    let payload = String::from_utf8(payload.to_vec()).unwrap();
    assert!(payload.contains("\"shape\":[1]"));
    let mut tampered = header.to_vec();
    tampered.extend_from_slice(payload.replacen("\"shape\":[1]", "\"shape\":[]", 1).as_bytes());
    std::fs::write(&path, tampered).unwrap();

    assert!(matches!(
        Verifier::new(&registry).verify_file(&path),
        Err(Error::StorageError(_))
    ));
}

// =============================================================================
// Batch Tampering
// =============================================================================

#[test]
fn test_length_mismatch_detected() {
    let mut container = batch_container();
    container.extend_dataset("/subjectAge", 3).unwrap();
    let report = verify(&container);
    assert!(mentions(&report, "/subjectAge", "length 3 but expected 2"));
}

#[test]
fn test_empty_required_string_detected() {
    let mut container = batch_container();
    container
        .write_slice("/subjectName", 1, Slot::Utf8(String::new()))
        .unwrap();
    let report = verify(&container);
    assert!(mentions(&report, "/subjectName", "required value empty at slot 1"));
}

#[test]
fn test_unfinalized_batch_detected() {
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    let mut container = MemoryContainer::new();
    {
        let mut writer = ContainerWriter::new(&mut container, &registry, &config.layout);
        for spec in registry.batch_fields() {
            writer
                .declare_growable(&format!("/{}", spec.name), spec.name)
                .unwrap();
        }
        writer
            .append_growable("/subjectMass", "subjectMass", &TypedValue::Scalar(70.0))
            .unwrap();
    }
    let report = verify(&container);
    assert!(mentions(&report, "/@committed_trials", "missing"));
    assert!(mentions(&report, "/emgBinValuesMax@finalized", "run not finalized"));
    assert!(mentions(&report, "/subjectMass", "length 1 but expected 0"));
}

#[test]
fn test_finalized_shape_mismatch_detected() {
    let mut container = MemoryContainer::new();
    let registry = SchemaRegistry::standard();
    let config = ArchiveConfig::default();
    {
        let mut writer = ContainerWriter::new(&mut container, &registry, &config.layout);
        for spec in registry.batch_fields() {
            writer
                .declare_growable(&format!("/{}", spec.name), spec.name)
                .unwrap();
        }
        writer
            .write_raw_attribute("/emgBinValuesMax", "finalized", AttrValue::Floats(vec![1.0, 2.0]))
            .unwrap();
        writer
            .write_raw_attribute("/emgBinValuesMax", "finalized_shape", AttrValue::UInts(vec![1, 2]))
            .unwrap();
        writer
            .write_raw_attribute("/", "committed_trials", AttrValue::UInt(0))
            .unwrap();
    }
    let report = verify(&container);
    assert!(mentions(&report, "/emgBinValuesMax@finalized_shape", "2 finalized bins"));
}

// =============================================================================
// Single-Trial Tampering
// =============================================================================

#[test]
fn test_trial_without_attributes_detected() {
    let mut container = single_container();
    container.create_group("/trials/trial002").unwrap();
    let report = verify(&container);
    assert!(mentions(&report, "/trials/trial002@sampling_hz", "missing"));
    assert!(mentions(&report, "/trials/trial002@treadmill", "missing"));
}

#[test]
fn test_row_count_disagreement_detected() {
    let mut container = single_container();
    let trial = "/trials/trial002";
    container.create_group(trial).unwrap();
    container
        .create_attribute(trial, "sampling_hz", AttrValue::Float(100.0))
        .unwrap();
    container
        .create_attribute(trial, "treadmill", AttrValue::Bool(false))
        .unwrap();
    container
        .create_dataset(&format!("{trial}/time"), DatasetSpec::fixed(Dtype::Float32, vec![4]))
        .unwrap();
    container
        .create_dataset(&format!("{trial}/grf"), DatasetSpec::fixed(Dtype::Float32, vec![3, 2]))
        .unwrap();

    let report = verify(&container);
    assert!(mentions(&report, "/trials/trial002/grf", "3 rows, but time has 4"));
    assert!(mentions(&report, "/trials/trial002/grf", "expected 3 columns"));
    assert!(!mentions(&report, "/trials/trial001/grf", ""));
}

#[test]
fn test_events_without_labels_detected() {
    let mut container = single_container();
    container
        .create_dataset(
            "/trials/trial001/events",
            DatasetSpec::fixed(Dtype::UInt32, vec![2]),
        )
        .unwrap();
    let report = verify(&container);
    assert!(mentions(&report, "/trials/trial001/events@labels", "missing"));
}

#[test]
fn test_empty_container_reported() {
    let report = verify(&MemoryContainer::new());
    assert!(mentions(&report, "/", "neither /trials nor batch datasets present"));
    assert!(mentions(&report, "/@created_by", "missing"));
}

#[test]
fn test_report_serializes() {
    let report = verify(&MemoryContainer::new());
    let text = serde_json::to_string(&report).unwrap();
    assert!(text.contains("discrepancies"));
}
