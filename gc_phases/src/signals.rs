use ndarray::Array1;

use crate::PhaseError;

/// Growth-rate signal of a smoothed curve, prepared for segmentation.
///
/// The upstream estimator may trim `offset` samples from each end of the
/// curve, so derivative index `i` corresponds to curve index `i + offset`.
#[derive(Clone, Debug)]
pub struct DerivativeSignal {
    pub values: Array1<f64>,
    /// Ascending rank of every value, ties broken by position.
    pub ranks: Vec<usize>,
    /// Sign of the second derivative, zero at both ends.
    pub curvature_signs: Vec<i8>,
    pub offset: usize,
}

impl DerivativeSignal {
    /// Prepare a derivative for a curve of `curve_len` samples.
    pub fn new(values: Array1<f64>, curve_len: usize) -> Result<Self, PhaseError> {
        let len = values.len();
        if len > curve_len {
            return Err(PhaseError::LengthMismatch {
                what: "derivative",
                expected: curve_len,
                found: len,
            });
        }
        if (curve_len - len) % 2 != 0 {
            return Err(PhaseError::UnevenTrim {
                curve: curve_len,
                derivative: len,
            });
        }
        if len < 3 {
            return Err(PhaseError::InsufficientData);
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(PhaseError::InvalidParameter(format!(
                "derivative sample {idx} is not finite ({})",
                values[idx]
            )));
        }
        let ranks = value_ranks(&values.to_vec());
        let curvature_signs = curvature_signs(&values);
        Ok(Self {
            values,
            ranks,
            curvature_signs,
            offset: (curve_len - len) / 2,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Derivative index covering curve index `curve_idx`, clamped to the
    /// derivative range for the untrimmed edges.
    pub fn index_for_curve(&self, curve_idx: usize) -> usize {
        curve_idx
            .saturating_sub(self.offset)
            .min(self.len().saturating_sub(1))
    }
}

/// Rank transform: position of every value in a stable ascending sort.
pub fn value_ranks(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = rank;
    }
    ranks
}

/// Central-difference sign of the change in `values`, padded with 0.
pub fn curvature_signs(values: &Array1<f64>) -> Vec<i8> {
    let n = values.len();
    let mut signs = vec![0i8; n];
    for i in 1..n.saturating_sub(1) {
        let delta = values[i + 1] - values[i - 1];
        signs[i] = if delta > 0.0 {
            1
        } else if delta < 0.0 {
            -1
        } else {
            0
        };
    }
    signs
}

/// Total doublings between the first and last sample of a curve.
pub fn experiment_doublings(curve: &Array1<f64>) -> Option<f64> {
    let first = *curve.first()?;
    let last = *curve.last()?;
    let doublings = last.log2() - first.log2();
    doublings.is_finite().then_some(doublings)
}
