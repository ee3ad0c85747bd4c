//! Final batch run report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;

/// A trial that did not consume a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTrial {
    /// Trial identifier
    pub trial: String,
    /// Error kind, e.g. `TypeMismatchError`
    pub kind: &'static str,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Trials that consumed a slot
    pub committed: usize,
    /// Trials that were skipped, in processing order
    pub skipped: Vec<SkippedTrial>,
    /// Shape of the finalized `emgBinValuesMax` column
    pub emg_max_shape: [usize; 2],
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Number of skipped trials.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Trials processed (committed + skipped).
    #[must_use]
    pub fn total(&self) -> usize {
        self.committed + self.skipped.len()
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// JSON rendering for run logs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "committed trials: {}", self.committed)?;
        writeln!(f, "skipped trials:   {}", self.skipped.len())?;
        for skip in &self.skipped {
            writeln!(f, "  {} [{}] {}", skip.trial, skip.kind, skip.reason)?;
        }
        write!(
            f,
            "emgBinValuesMax:  [{} x {}]",
            self.emg_max_shape[0], self.emg_max_shape[1]
        )
    }
}
