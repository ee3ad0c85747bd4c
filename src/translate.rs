//! Single-trial structural translation
//!
//! Re-expresses one experiment record as the canonical layout:
//!
//! ```text
//! /                      schema_version, created_by, coordinate_frame
//! /subject               id, sex, mass_kg, height_m
//! /trials/<trialId>      sampling_hz, treadmill, notes
//!     time               units
//!     joint_angles       units, plane
//!     joint_names
//!     grf                units, axes
//!     events             labels
//! ```
//!
//! Every trial is adapted and validated before the first node is written,
//! so a bad record leaves the container untouched.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::RecordAdapter;
use crate::config::ArchiveConfig;
use crate::container::{join, AttrValue, ContainerRuntime, FileContainer};
use crate::schema::{FieldCategory, SchemaRegistry, Scope};
use crate::source::{SourceRecord, SourceValue, StructRecord};
use crate::value::TypedValue;
use crate::writer::{attr_value, ContainerWriter};
use crate::{Error, Result};

/// Series sub-structs of a trial and the metadata attributes each carries.
const SERIES: &[(&str, &[&str])] = &[
    ("time", &["units"]),
    ("joint_angles", &["units", "plane"]),
    ("grf", &["units", "axes"]),
    ("events", &["labels"]),
];

const SEXES: &[&str] = &["M", "F", "U"];

/// What was written for one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialSummary {
    /// Trial identifier (child name under `/trials`)
    pub trial: String,
    /// Sample count shared by the time series, if any were present
    pub samples: Option<usize>,
    /// Datasets written under the trial group
    pub datasets: Vec<String>,
}

/// Outcome of a single-record translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationReport {
    /// Subject identifier
    pub subject: String,
    /// One entry per translated trial, sorted by trial name
    pub trials: Vec<TrialSummary>,
}

struct SeriesPlan {
    name: &'static str,
    value: TypedValue,
    attrs: Vec<(&'static str, AttrValue)>,
}

struct TrialPlan {
    id: String,
    attributes: Vec<(&'static str, TypedValue)>,
    series: Vec<SeriesPlan>,
    samples: Option<usize>,
}

/// Translates one experiment record into a container.
#[derive(Debug, Clone, Copy)]
pub struct TrialTranslator<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ArchiveConfig,
}

impl<'a> TrialTranslator<'a> {
    /// Create a translator.
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry, config: &'a ArchiveConfig) -> Self {
        Self { registry, config }
    }

    /// Translate `record` into `container`.
    ///
    /// # Errors
    ///
    /// - [`Error::TypeMismatch`] for a missing or ill-typed required value,
    ///   or a violated layout invariant (row counts, joint names, event labels)
    /// - [`Error::DuplicateNode`] if the container already holds the layout
    pub fn translate<C, R>(&self, container: &mut C, record: &R) -> Result<TranslationReport>
    where
        C: ContainerRuntime + ?Sized,
        R: SourceRecord + ?Sized,
    {
        let adapter = RecordAdapter::new(self.registry);
        let root = self.root_attributes(&adapter, record)?;
        let subject = self.subject_attributes(&adapter, record)?;
        let trials = struct_field(record, "trials")?;
        let plans = trials
            .field_names()
            .into_iter()
            .map(|id| {
                let trial = struct_field(trials, &id)?;
                self.plan_trial(&adapter, id, trial)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut writer = ContainerWriter::new(container, self.registry, &self.config.layout);
        for (name, value) in &root {
            writer.write_attribute("/", name, value)?;
        }
        writer.ensure_group("/subject")?;
        for (name, value) in &subject {
            writer.write_attribute("/subject", name, value)?;
        }
        writer.ensure_group("/trials")?;

        let mut summaries = Vec::with_capacity(plans.len());
        for plan in plans {
            summaries.push(write_trial(&mut writer, plan)?);
        }

        let subject_id = subject
            .iter()
            .find(|(name, _)| *name == "id")
            .and_then(|(_, v)| v.as_text())
            .unwrap_or_default()
            .to_string();
        info!(subject = %subject_id, trials = summaries.len(), "record translated");
        Ok(TranslationReport {
            subject: subject_id,
            trials: summaries,
        })
    }

    /// Translate `record` into a new file at `path`.
    ///
    /// The file is only published when translation succeeds; on error an
    /// existing file at `path` is left as it was.
    ///
    /// # Errors
    ///
    /// As [`translate`](Self::translate), plus I/O and storage errors.
    pub fn translate_to_file<R>(&self, path: impl AsRef<Path>, record: &R) -> Result<TranslationReport>
    where
        R: SourceRecord + ?Sized,
    {
        FileContainer::scoped(path, self.config.codec, |container| {
            self.translate(container, record)
        })
    }

    fn root_attributes<R>(
        &self,
        adapter: &RecordAdapter<'_>,
        record: &R,
    ) -> Result<Vec<(&'static str, TypedValue)>>
    where
        R: SourceRecord + ?Sized,
    {
        self.registry
            .scope(Scope::Root)
            .map(|spec| {
                let value = match adapter.adapt_spec(record, spec)? {
                    Some(v) => v,
                    None => TypedValue::Text(self.root_fallback(spec.name)),
                };
                Ok((spec.name, value))
            })
            .collect()
    }

    fn root_fallback(&self, name: &str) -> String {
        match name {
            "schema_version" => self.config.schema_version.clone(),
            "created_by" => self.config.created_by.clone(),
            _ => self.config.coordinate_frame.clone(),
        }
    }

    fn subject_attributes<R>(
        &self,
        adapter: &RecordAdapter<'_>,
        record: &R,
    ) -> Result<Vec<(&'static str, TypedValue)>>
    where
        R: SourceRecord + ?Sized,
    {
        let subject = struct_field(record, "subject")?;
        let attrs = self
            .registry
            .scope(Scope::Subject)
            .map(|spec| Ok((spec.name, adapter.adapt_required(subject, spec.name)?)))
            .collect::<Result<Vec<_>>>()?;
        for (name, value) in &attrs {
            match (*name, value) {
                ("sex", TypedValue::Text(s)) if !SEXES.contains(&s.as_str()) => {
                    return Err(Error::type_mismatch("sex", "one of M, F, U", format!("'{s}'")));
                }
                ("mass_kg" | "height_m", TypedValue::Scalar(x)) => positive(name, *x)?,
                _ => {}
            }
        }
        Ok(attrs)
    }

    fn plan_trial(
        &self,
        adapter: &RecordAdapter<'_>,
        id: String,
        trial: &StructRecord,
    ) -> Result<TrialPlan> {
        let mut attributes = Vec::new();
        for spec in self.registry.scope(Scope::Trial) {
            if spec.category != FieldCategory::ScalarAttribute {
                continue;
            }
            if let Some(value) = adapter.adapt_spec(trial, spec)? {
                if let ("sampling_hz", TypedValue::Scalar(hz)) = (spec.name, &value) {
                    positive(spec.name, *hz)?;
                }
                attributes.push((spec.name, value));
            }
        }

        let mut series = Vec::new();
        for &(name, attr_names) in SERIES {
            let Some(sub) = optional_struct_field(trial, name)? else {
                continue;
            };
            let Some(value) = adapter.adapt(sub, name)? else {
                continue;
            };
            let mut attrs = Vec::new();
            for attr in attr_names {
                if let Some(v) = adapter.adapt(sub, attr)? {
                    attrs.push((*attr, attr_value(&v)));
                }
            }
            if name == "events" {
                check_labels(&value, &attrs)?;
            }
            let joint_names = if name == "joint_angles" {
                adapter.adapt(sub, "joint_names")?
            } else {
                None
            };
            if let Some(names) = &joint_names {
                check_joint_names(&value, names)?;
            }
            series.push(SeriesPlan { name, value, attrs });
            if let Some(names) = joint_names {
                series.push(SeriesPlan {
                    name: "joint_names",
                    value: names,
                    attrs: Vec::new(),
                });
            }
        }

        let samples = check_rows(&id, &series)?;
        debug!(trial = %id, series = series.len(), ?samples, "trial planned");
        Ok(TrialPlan {
            id,
            attributes,
            series,
            samples,
        })
    }
}

fn write_trial<C: ContainerRuntime + ?Sized>(
    writer: &mut ContainerWriter<'_, C>,
    plan: TrialPlan,
) -> Result<TrialSummary> {
    let path = join("/trials", &plan.id);
    writer.ensure_group(&path)?;
    for (name, value) in &plan.attributes {
        writer.write_attribute(&path, name, value)?;
    }
    let mut datasets = Vec::with_capacity(plan.series.len());
    for series in &plan.series {
        writer.write_fixed(&join(&path, series.name), &series.value, &series.attrs)?;
        datasets.push(series.name.to_string());
    }
    Ok(TrialSummary {
        trial: plan.id,
        samples: plan.samples,
        datasets,
    })
}

fn struct_field<'r, R>(record: &'r R, name: &str) -> Result<&'r StructRecord>
where
    R: SourceRecord + ?Sized,
{
    optional_struct_field(record, name)?
        .ok_or_else(|| Error::type_mismatch(name, "struct", "absent"))
}

fn optional_struct_field<'r, R>(record: &'r R, name: &str) -> Result<Option<&'r StructRecord>>
where
    R: SourceRecord + ?Sized,
{
    match record.get_field(name) {
        None => Ok(None),
        Some(SourceValue::Struct(s)) => Ok(Some(s)),
        Some(other) => Err(Error::type_mismatch(name, "struct", other.describe())),
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(Error::type_mismatch(field, "positive number", value.to_string()))
    }
}

fn leading_rows(value: &TypedValue) -> Option<usize> {
    match value {
        TypedValue::Vector(v) => Some(v.len()),
        TypedValue::Matrix(m) => Some(m.rows()),
        _ => None,
    }
}

fn check_rows(trial: &str, series: &[SeriesPlan]) -> Result<Option<usize>> {
    let mut samples: Option<(&str, usize)> = None;
    for plan in series
        .iter()
        .filter(|s| matches!(s.name, "time" | "joint_angles" | "grf"))
    {
        let Some(rows) = leading_rows(&plan.value) else {
            continue;
        };
        match samples {
            None => samples = Some((plan.name, rows)),
            Some((first, n)) if n != rows => {
                return Err(Error::type_mismatch(
                    plan.name,
                    format!("{n} rows (as {first} in trial {trial})"),
                    format!("{rows} rows"),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(samples.map(|(_, n)| n))
}

fn check_joint_names(angles: &TypedValue, names: &TypedValue) -> Result<()> {
    let names = names.as_text_list().unwrap_or_default();
    if let TypedValue::Matrix(m) = angles {
        if m.cols() != names.len() {
            return Err(Error::type_mismatch(
                "joint_names",
                format!("{} names (one per joint_angles column)", m.cols()),
                format!("{} names", names.len()),
            ));
        }
    }
    let mut seen = HashSet::with_capacity(names.len());
    if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
        return Err(Error::type_mismatch(
            "joint_names",
            "unique joint names",
            format!("duplicate '{dup}'"),
        ));
    }
    Ok(())
}

fn check_labels(events: &TypedValue, attrs: &[(&str, AttrValue)]) -> Result<()> {
    let count = leading_rows(events).unwrap_or(1);
    let labels = attrs
        .iter()
        .find(|(name, _)| *name == "labels")
        .and_then(|(_, v)| v.as_text_list())
        .map_or(0, <[String]>::len);
    if labels == count {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            "labels",
            format!("{count} labels (one per event)"),
            format!("{labels} labels"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerReader, MemoryContainer};
    use crate::source::NumericArray;

    fn record() -> StructRecord {
        let subject = StructRecord::new()
            .with("id", "S001")
            .with("sex", "F")
            .with("mass_kg", 70.0)
            .with("height_m", 1.70);
        let trial = StructRecord::new()
            .with("sampling_hz", 100.0)
            .with("treadmill", false)
            .with(
                "time",
                StructRecord::new()
                    .with("values", vec![0.0, 0.5, 1.0])
                    .with("units", "s"),
            )
            .with(
                "grf",
                StructRecord::new().with(
                    "values",
                    SourceValue::Numeric(NumericArray::matrix(3, 3, vec![0.0; 9]).unwrap()),
                ),
            );
        StructRecord::new()
            .with("subject", subject)
            .with("trials", StructRecord::new().with("trial001", trial))
    }

    #[test]
    fn test_translate_minimal_record() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let mut container = MemoryContainer::new();
        let report = TrialTranslator::new(&registry, &config)
            .translate(&mut container, &record())
            .unwrap();

        assert_eq!(report.subject, "S001");
        assert_eq!(report.trials[0].samples, Some(3));
        assert_eq!(
            container.read_attribute("/", "schema_version").unwrap(),
            AttrValue::Text("0.1.0".into())
        );
        assert_eq!(
            container.read_attribute("/trials/trial001/time", "units").unwrap(),
            AttrValue::Text("s".into())
        );
        assert!(!container.exists("/trials/trial001/events"));
        assert!(container
            .read_attribute("/trials/trial001", "notes")
            .is_err());
    }

    #[test]
    fn test_row_mismatch_writes_nothing() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let mut rec = record();
        let mut trials = rec.remove("trials").unwrap().as_struct().unwrap().clone();
        let mut trial = trials.remove("trial001").unwrap().as_struct().unwrap().clone();
        trial.insert(
            "time",
            StructRecord::new().with("values", vec![0.0, 1.0]),
        );
        trials.insert("trial001", trial);
        rec.insert("trials", trials);

        let mut container = MemoryContainer::new();
        let err = TrialTranslator::new(&registry, &config)
            .translate(&mut container, &rec)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(container.attribute_names("/").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_sex_rejected() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let mut rec = record();
        let subject = rec
            .remove("subject")
            .unwrap()
            .as_struct()
            .unwrap()
            .clone()
            .with("sex", "X");
        rec.insert("subject", subject);
        let err = TrialTranslator::new(&registry, &config)
            .translate(&mut MemoryContainer::new(), &rec)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { field, .. } if field == "sex"));
    }

    #[test]
    fn test_trials_reported_in_name_order() {
        let registry = SchemaRegistry::standard();
        let config = ArchiveConfig::default();
        let mut rec = record();
        let mut trials = rec.remove("trials").unwrap().as_struct().unwrap().clone();
        let trial = trials.remove("trial001").unwrap().as_struct().unwrap().clone();
        let mut renamed = StructRecord::new();
        renamed.insert("walk02", trial.clone());
        renamed.insert("walk01", trial);
        rec.insert("trials", renamed);

        let report = TrialTranslator::new(&registry, &config)
            .translate(&mut MemoryContainer::new(), &rec)
            .unwrap();
        let names: Vec<_> = report.trials.iter().map(|t| t.trial.as_str()).collect();
        assert_eq!(names, ["walk01", "walk02"]);
    }
}
