use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::phases::{CurvePhase, Thresholds};
use crate::phenotypes::{phenotype_phases, PhaseInstance};
use crate::segmenter::{segment_curve, SegmentationWarning};
use crate::signals::{experiment_doublings, DerivativeSignal};
use crate::PhaseError;

/// Smoothed growth curve of one position and its growth-rate signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrowthCurve {
    pub curve: Array1<f64>,
    pub derivative: Array1<f64>,
    /// Total experiment doublings, derived from the curve ends when absent.
    pub doublings: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurveAnalysis {
    pub labels: Vec<CurvePhase>,
    pub phases: Vec<PhaseInstance>,
    pub warnings: Vec<SegmentationWarning>,
    pub doublings: f64,
}

impl CurveAnalysis {
    /// Per-sample integer codes for overlay plotting.
    pub fn label_codes(&self) -> Vec<i8> {
        self.labels.iter().map(|label| label.code()).collect()
    }
}

/// Segment and phenotype a single curve.
pub fn analyse_curve(
    times: &Array1<f64>,
    growth: &GrowthCurve,
    thresholds: &Thresholds,
) -> Result<CurveAnalysis, PhaseError> {
    thresholds.validate()?;
    let n = growth.curve.len();
    if times.len() != n {
        return Err(PhaseError::LengthMismatch {
            what: "time vector",
            expected: n,
            found: times.len(),
        });
    }

    let signal = DerivativeSignal::new(growth.derivative.clone(), n)?;
    let segmentation = segment_curve(&signal, n, thresholds)?;
    let doublings = growth
        .doublings
        .or_else(|| experiment_doublings(&growth.curve))
        .unwrap_or(f64::NAN);
    let phases = phenotype_phases(&growth.curve, times, &signal, &segmentation.labels, doublings)?;

    Ok(CurveAnalysis {
        labels: segmentation.labels,
        phases,
        warnings: segmentation.warnings,
        doublings,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub enum PositionOutcome {
    /// No curve at this position.
    Empty,
    Analysed(CurveAnalysis),
    Failed(PhaseError),
}

impl PositionOutcome {
    pub fn analysis(&self) -> Option<&CurveAnalysis> {
        match self {
            PositionOutcome::Analysed(analysis) => Some(analysis),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlateAnalysis {
    pub outcomes: Array2<PositionOutcome>,
}

impl PlateAnalysis {
    /// Phase lists in plate shape, `None` where nothing was analysed.
    pub fn phase_grid(&self) -> Array2<Option<Vec<PhaseInstance>>> {
        self.outcomes
            .map(|outcome| outcome.analysis().map(|analysis| analysis.phases.clone()))
    }

    pub fn failures(&self) -> Vec<((usize, usize), &PhaseError)> {
        self.outcomes
            .indexed_iter()
            .filter_map(|(pos, outcome)| match outcome {
                PositionOutcome::Failed(err) => Some((pos, err)),
                _ => None,
            })
            .collect()
    }
}

/// Analyse every position of a plate in parallel.
///
/// A failing position is recorded in its own outcome and never stops the
/// rest of the plate.
pub fn analyse_plate(
    times: &Array1<f64>,
    curves: &Array2<Option<GrowthCurve>>,
    thresholds: &Thresholds,
) -> Result<PlateAnalysis, PhaseError> {
    thresholds.validate()?;
    let positions: Vec<((usize, usize), &Option<GrowthCurve>)> = curves.indexed_iter().collect();

    let outcomes: Vec<PositionOutcome> = positions
        .par_iter()
        .map(|&((row, col), growth)| match growth {
            None => PositionOutcome::Empty,
            Some(growth) => match analyse_curve(times, growth, thresholds) {
                Ok(analysis) => {
                    debug!(
                        "position ({}, {}): {} phases, {} warnings",
                        row,
                        col,
                        analysis.phases.len(),
                        analysis.warnings.len()
                    );
                    PositionOutcome::Analysed(analysis)
                }
                Err(err) => {
                    warn!("position ({}, {}) failed: {}", row, col, err);
                    PositionOutcome::Failed(err)
                }
            },
        })
        .collect();

    let outcomes = Array2::from_shape_vec(curves.dim(), outcomes)
        .map_err(|e| PhaseError::InvalidParameter(e.to_string()))?;
    Ok(PlateAnalysis { outcomes })
}
