//! Running elementwise maximum over ragged per-trial EMG bins.

use crate::value::Matrix;
use crate::{Error, Result};

/// Accumulator behind `emgBinValuesMax`.
///
/// Ragged policy: the overlapping prefix takes the elementwise maximum, a
/// shorter trial leaves the accumulator's tail untouched, and a longer trial
/// appends its extra bins. The bin count therefore never shrinks.
/// NaN never wins over a number.
///
/// # Example
///
/// ```rust
/// use gait_archive::aggregate::EmgMaxAccumulator;
///
/// let mut acc = EmgMaxAccumulator::new();
/// acc.update(&[3.0, 5.0, 1.0])?;
/// acc.update(&[4.0, 2.0])?;
/// assert_eq!(acc.current(), Some(&[4.0, 5.0, 1.0][..]));
///
/// let column = acc.finalize();
/// assert_eq!(column.shape(), [3, 1]);
/// assert!(acc.update(&[9.0]).is_err());
/// # Ok::<(), gait_archive::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmgMaxAccumulator {
    values: Option<Vec<f64>>,
    finalized: Option<Matrix>,
}

impl EmgMaxAccumulator {
    /// Empty accumulator; the first update initialises it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trial's per-bin values into the running maximum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] after [`finalize`](Self::finalize).
    pub fn update(&mut self, bins: &[f64]) -> Result<()> {
        if self.finalized.is_some() {
            return Err(Error::InvalidOperation(
                "emgBinValuesMax accumulator is finalized".to_string(),
            ));
        }
        match &mut self.values {
            None => self.values = Some(bins.to_vec()),
            Some(current) => {
                for (acc, &x) in current.iter_mut().zip(bins) {
                    *acc = acc.max(x);
                }
                if bins.len() > current.len() {
                    current.extend_from_slice(&bins[current.len()..]);
                }
            }
        }
        Ok(())
    }

    /// Running maximum, once at least one trial was folded in.
    #[must_use]
    pub fn current(&self) -> Option<&[f64]> {
        self.values.as_deref()
    }

    /// Number of bins observed so far.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.values.as_ref().map_or(0, Vec::len)
    }

    /// Whether the accumulator is read-only.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.finalized.is_some()
    }

    /// Reduce to a `[bins x 1]` column and seal.
    ///
    /// Idempotent: later calls return the same column.
    pub fn finalize(&mut self) -> Matrix {
        self.finalized
            .get_or_insert_with(|| Matrix::column(self.values.clone().unwrap_or_default()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_initialises() {
        let mut acc = EmgMaxAccumulator::new();
        assert_eq!(acc.current(), None);
        acc.update(&[0.2, 0.4]).unwrap();
        assert_eq!(acc.current(), Some(&[0.2, 0.4][..]));
    }

    #[test]
    fn test_shorter_trial_keeps_tail() {
        let mut acc = EmgMaxAccumulator::new();
        acc.update(&[3.0, 5.0, 1.0]).unwrap();
        acc.update(&[4.0, 2.0]).unwrap();
        assert_eq!(acc.current(), Some(&[4.0, 5.0, 1.0][..]));
    }

    #[test]
    fn test_longer_trial_extends() {
        let mut acc = EmgMaxAccumulator::new();
        acc.update(&[1.0]).unwrap();
        acc.update(&[0.5, 7.0, 2.0]).unwrap();
        assert_eq!(acc.current(), Some(&[1.0, 7.0, 2.0][..]));
        assert_eq!(acc.bins(), 3);
    }

    #[test]
    fn test_nan_never_wins() {
        let mut acc = EmgMaxAccumulator::new();
        acc.update(&[f64::NAN, 1.0]).unwrap();
        acc.update(&[2.0, f64::NAN]).unwrap();
        assert_eq!(acc.current(), Some(&[2.0, 1.0][..]));
    }

    #[test]
    fn test_finalize_idempotent_and_seals() {
        let mut acc = EmgMaxAccumulator::new();
        acc.update(&[3.0, 5.0]).unwrap();
        let first = acc.finalize();
        let second = acc.finalize();
        assert_eq!(first, second);
        assert_eq!(first.shape(), [2, 1]);
        assert!(acc.is_sealed());
        assert!(matches!(acc.update(&[1.0]), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_finalize_empty() {
        let mut acc = EmgMaxAccumulator::new();
        assert_eq!(acc.finalize().shape(), [0, 1]);
    }
}
