//! Verifier - read-back consistency checks
//!
//! Never mutates the container. Every problem found becomes a
//! [`Discrepancy`]; whether a non-empty report is a failure is the
//! caller's call.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::container::{join, AttrValue, ContainerReader, Dataset, Dtype, FileContainer, NodeKind};
use crate::schema::{FieldSpec, Presence, SchemaRegistry, Scope, EMG_BIN_VALUES_MAX};
use crate::writer::growable_dtype;
use crate::Result;

/// One problem found in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    /// Node path (attributes as `path@name`)
    pub path: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of verifying one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Problems, in discovery order
    pub discrepancies: Vec<Discrepancy>,
    /// Number of nodes and attributes inspected
    pub checked: usize,
}

impl VerificationReport {
    /// Whether no discrepancies were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    fn report(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.discrepancies.push(Discrepancy {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Structural and length checks over a finished container.
#[derive(Debug, Clone, Copy)]
pub struct Verifier<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> Verifier<'r> {
    /// Create a verifier.
    #[must_use]
    pub const fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Open `path` read-only and verify it.
    ///
    /// # Errors
    ///
    /// Only when the file cannot be opened; content problems are discrepancies.
    pub fn verify_file(&self, path: impl AsRef<Path>) -> Result<VerificationReport> {
        let container = FileContainer::open_read_only(path)?;
        Ok(self.verify(&container))
    }

    /// Verify whichever layouts the container holds.
    pub fn verify<R: ContainerReader + ?Sized>(&self, reader: &R) -> VerificationReport {
        let mut report = VerificationReport::default();
        self.check_text_attrs(reader, "/", Scope::Root, &mut report);

        let single = reader.exists("/trials");
        let batch = self
            .registry
            .batch_fields()
            .any(|spec| reader.exists(&join("/", spec.name)));
        if single {
            self.check_subject(reader, &mut report);
            self.check_trials(reader, &mut report);
        }
        if batch {
            self.check_batch(reader, &mut report);
        }
        if !single && !batch {
            report.report("/", "neither /trials nor batch datasets present");
        }
        info!(
            checked = report.checked,
            discrepancies = report.discrepancies.len(),
            "verification finished"
        );
        report
    }

    fn check_text_attrs<R: ContainerReader + ?Sized>(
        &self,
        reader: &R,
        path: &str,
        scope: Scope,
        report: &mut VerificationReport,
    ) {
        for spec in self.registry.scope(scope) {
            report.checked += 1;
            match reader.read_attribute(path, spec.name) {
                Ok(AttrValue::Text(_)) => {}
                Ok(other) => report.report(attr_path(path, spec.name), format!("expected text, found {other}")),
                Err(_) => report.report(attr_path(path, spec.name), "missing"),
            }
        }
    }

    fn check_subject<R: ContainerReader + ?Sized>(&self, reader: &R, report: &mut VerificationReport) {
        if reader.node_kind("/subject") != Some(NodeKind::Group) {
            report.report("/subject", "missing group");
            return;
        }
        for spec in self.registry.scope(Scope::Subject) {
            report.checked += 1;
            let at = attr_path("/subject", spec.name);
            match (spec.name, reader.read_attribute("/subject", spec.name)) {
                (_, Err(_)) => report.report(at, "missing"),
                ("sex", Ok(AttrValue::Text(s))) if !matches!(s.as_str(), "M" | "F" | "U") => {
                    report.report(at, format!("'{s}' is not one of M, F, U"));
                }
                ("mass_kg" | "height_m", Ok(AttrValue::Float(x))) if x <= 0.0 || x.is_nan() => {
                    report.report(at, format!("must be positive, found {x}"));
                }
                ("mass_kg" | "height_m", Ok(AttrValue::Float(_)))
                | ("id" | "sex", Ok(AttrValue::Text(_))) => {}
                (_, Ok(other)) => report.report(at, format!("unexpected value {other}")),
            }
        }
    }

    fn check_trials<R: ContainerReader + ?Sized>(&self, reader: &R, report: &mut VerificationReport) {
        let trials = match reader.children("/trials") {
            Ok(trials) => trials,
            Err(e) => {
                report.report("/trials", e.to_string());
                return;
            }
        };
        for trial in trials {
            let path = join("/trials", &trial);
            debug!(trial = %path, "verifying trial");
            self.check_trial(reader, &path, report);
        }
    }

    fn check_trial<R: ContainerReader + ?Sized>(&self, reader: &R, path: &str, report: &mut VerificationReport) {
        report.checked += 1;
        match reader.read_attribute(path, "sampling_hz") {
            Ok(AttrValue::Float(hz)) if hz > 0.0 => {}
            Ok(other) => report.report(attr_path(path, "sampling_hz"), format!("must be positive, found {other}")),
            Err(_) => report.report(attr_path(path, "sampling_hz"), "missing"),
        }
        report.checked += 1;
        match reader.read_attribute(path, "treadmill") {
            Ok(AttrValue::Bool(_)) => {}
            Ok(other) => report.report(attr_path(path, "treadmill"), format!("expected bool, found {other}")),
            Err(_) => report.report(attr_path(path, "treadmill"), "missing"),
        }

        let dataset = |name: &str| reader.read_dataset(&join(path, name)).ok();
        let expect = |report: &mut VerificationReport, name: &str, ds: &Dataset, dtype: Dtype, rank: usize| {
            if ds.dtype() != dtype || ds.shape().len() != rank {
                report.report(
                    join(path, name),
                    format!("expected {dtype:?} rank {rank}, found {:?} {:?}", ds.dtype(), ds.shape()),
                );
            }
        };

        let time = dataset("time");
        let angles = dataset("joint_angles");
        let grf = dataset("grf");
        let mut rows: Option<(&str, usize)> = None;
        for (name, ds, rank) in [("time", &time, 1), ("joint_angles", &angles, 2), ("grf", &grf, 2)] {
            let Some(ds) = ds else { continue };
            report.checked += 1;
            expect(report, name, ds, Dtype::Float32, rank);
            match rows {
                None => rows = Some((name, ds.len())),
                Some((first, n)) if n != ds.len() => report.report(
                    join(path, name),
                    format!("{} rows, but {first} has {n}", ds.len()),
                ),
                Some(_) => {}
            }
        }
        if let Some(grf) = &grf {
            if grf.shape().get(1) != Some(&3) {
                report.report(join(path, "grf"), format!("expected 3 columns, found shape {:?}", grf.shape()));
            }
        }

        match (&angles, dataset("joint_names")) {
            (Some(angles), Some(names)) => {
                report.checked += 1;
                let names = names.data().as_strings().unwrap_or_default();
                let cols = angles.shape().get(1).copied().unwrap_or(0);
                if names.len() != cols {
                    report.report(
                        join(path, "joint_names"),
                        format!("{} names for {cols} joint_angles columns", names.len()),
                    );
                }
                let mut seen = HashSet::new();
                if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
                    report.report(join(path, "joint_names"), format!("duplicate joint name '{dup}'"));
                }
            }
            (Some(_), None) => report.report(join(path, "joint_names"), "missing for joint_angles"),
            (None, Some(_)) => report.report(join(path, "joint_names"), "present without joint_angles"),
            (None, None) => {}
        }

        if let Some(events) = dataset("events") {
            report.checked += 1;
            expect(report, "events", &events, Dtype::UInt32, 1);
            let events_path = join(path, "events");
            match events.attributes().get("labels").and_then(AttrValue::as_text_list) {
                Some(labels) if labels.len() == events.len() => {}
                Some(labels) => report.report(
                    attr_path(&events_path, "labels"),
                    format!("{} labels for {} events", labels.len(), events.len()),
                ),
                None => report.report(attr_path(&events_path, "labels"), "missing"),
            }
        }
    }

    fn check_batch<R: ContainerReader + ?Sized>(&self, reader: &R, report: &mut VerificationReport) {
        let expected = match reader.read_attribute("/", "committed_trials") {
            Ok(AttrValue::UInt(n)) => usize::try_from(n).ok(),
            Ok(other) => {
                report.report("/@committed_trials", format!("expected unsigned integer, found {other}"));
                None
            }
            Err(_) => {
                report.report("/@committed_trials", "missing");
                None
            }
        };
        let mut lengths: Option<usize> = expected;
        for spec in self.registry.batch_fields() {
            report.checked += 1;
            let path = join("/", spec.name);
            let Ok(ds) = reader.read_dataset(&path) else {
                report.report(path, "missing batch dataset");
                continue;
            };
            check_growable(spec, &path, &ds, report);
            match lengths {
                None => lengths = Some(ds.len()),
                Some(n) if n != ds.len() => {
                    report.report(&path, format!("length {} but expected {n}", ds.len()));
                }
                Some(_) => {}
            }
        }
        self.check_finalized(reader, report);
    }

    fn check_finalized<R: ContainerReader + ?Sized>(&self, reader: &R, report: &mut VerificationReport) {
        let path = join("/", EMG_BIN_VALUES_MAX);
        report.checked += 1;
        let finalized = reader.read_attribute(&path, "finalized");
        let shape = reader.read_attribute(&path, "finalized_shape");
        match (finalized, shape) {
            (Ok(AttrValue::Floats(values)), Ok(AttrValue::UInts(shape))) => {
                let bins = u64::try_from(values.len()).unwrap_or(u64::MAX);
                if shape != [bins, 1] {
                    report.report(
                        attr_path(&path, "finalized_shape"),
                        format!("{shape:?} does not match {} finalized bins", values.len()),
                    );
                }
            }
            (Err(_), _) => report.report(attr_path(&path, "finalized"), "missing (run not finalized)"),
            (_, Err(_)) => report.report(attr_path(&path, "finalized_shape"), "missing"),
            _ => report.report(attr_path(&path, "finalized"), "unexpected attribute types"),
        }
    }
}

fn check_growable(spec: &FieldSpec, path: &str, ds: &Dataset, report: &mut VerificationReport) {
    if !ds.is_growable() {
        report.report(path, "leading dimension is not unbounded");
    }
    let dtype = growable_dtype(spec);
    if ds.dtype() != dtype {
        report.report(path, format!("expected {dtype:?}, found {:?}", ds.dtype()));
    }
    if spec.presence == Presence::Required && ds.dtype() == Dtype::VarLenUtf8 {
        if let Some(i) = ds.data().as_strings().and_then(|v| v.iter().position(String::is_empty)) {
            report.report(path, format!("required value empty at slot {i}"));
        }
    }
    if let Some(units) = spec.units {
        match ds.attributes().get("units").and_then(AttrValue::as_text) {
            Some(found) if found == units => {}
            Some(found) => report.report(attr_path(path, "units"), format!("expected '{units}', found '{found}'")),
            None => report.report(attr_path(path, "units"), "missing"),
        }
    }
}

fn attr_path(path: &str, name: &str) -> String {
    format!("{path}@{name}")
}

/// Render the container hierarchy: groups, datasets with dtype, shape and
/// layout, and every attribute.
///
/// # Errors
///
/// Propagates reader errors.
pub fn structure_listing<R: ContainerReader + ?Sized>(reader: &R) -> Result<Vec<String>> {
    let mut lines = vec!["/".to_string()];
    list_attributes(reader, "/", 1, &mut lines)?;
    list_group(reader, "/", 1, &mut lines)?;
    Ok(lines)
}

fn list_group<R: ContainerReader + ?Sized>(
    reader: &R,
    path: &str,
    depth: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    let indent = "  ".repeat(depth);
    for name in reader.children(path)? {
        let child = join(path, &name);
        match reader.node_kind(&child) {
            Some(NodeKind::Group) => {
                lines.push(format!("{indent}{name}/"));
                list_attributes(reader, &child, depth + 1, lines)?;
                list_group(reader, &child, depth + 1, lines)?;
            }
            Some(NodeKind::Dataset) => {
                let ds = reader.read_dataset(&child)?;
                let mut line = format!("{indent}{name} {:?} {:?}", ds.dtype(), ds.shape());
                if ds.is_growable() {
                    line.push_str(" growable");
                }
                if let Some(chunks) = &ds.layout().chunks {
                    line.push_str(&format!(" chunks={chunks:?}"));
                }
                if let Some(level) = ds.layout().deflate {
                    line.push_str(&format!(" deflate={level}"));
                }
                lines.push(line);
                list_attributes(reader, &child, depth + 1, lines)?;
            }
            None => {}
        }
    }
    Ok(())
}

fn list_attributes<R: ContainerReader + ?Sized>(
    reader: &R,
    path: &str,
    depth: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    let indent = "  ".repeat(depth);
    for name in reader.attribute_names(path)? {
        let value = reader.read_attribute(path, &name)?;
        lines.push(format!("{indent}@{name} = {value}"));
    }
    Ok(())
}
