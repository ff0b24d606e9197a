use std::collections::BTreeMap;

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::locate::label_runs;
use crate::phases::{CurvePhase, PhasePhenotype};
use crate::signals::DerivativeSignal;
use crate::PhaseError;

/// A maximal run of one phase label with its measured phenotypes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhaseInstance {
    pub phase: CurvePhase,
    /// Inclusive first curve index.
    pub left: usize,
    /// Exclusive last curve index.
    pub right: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub phenotypes: BTreeMap<PhasePhenotype, f64>,
}

impl PhaseInstance {
    pub fn get(&self, key: PhasePhenotype) -> Option<f64> {
        self.phenotypes.get(&key).copied()
    }

    /// Phase start as recorded in the phenotypes, absent for undetermined runs.
    pub fn start(&self) -> Option<f64> {
        self.get(PhasePhenotype::Start)
    }
}

/// Describe every phase run of a finished classification.
///
/// The result is ordered by phase start; runs without phenotypes sort last.
/// Doubling times are `1 / slope` of the log2 curve and stay negative for
/// declining phases.
pub fn phenotype_phases(
    curve: &Array1<f64>,
    times: &Array1<f64>,
    signal: &DerivativeSignal,
    labels: &[CurvePhase],
    doublings: f64,
) -> Result<Vec<PhaseInstance>, PhaseError> {
    let n = curve.len();
    if times.len() != n {
        return Err(PhaseError::LengthMismatch {
            what: "time vector",
            expected: n,
            found: times.len(),
        });
    }
    if labels.len() != n {
        return Err(PhaseError::LengthMismatch {
            what: "phase labels",
            expected: n,
            found: labels.len(),
        });
    }

    let log_curve = curve.mapv(f64::log2);
    let mut instances = Vec::new();

    for phase in [CurvePhase::Multiple]
        .into_iter()
        .chain(CurvePhase::ASSIGNABLE)
    {
        let mask: Vec<bool> = labels.iter().map(|&label| label == phase).collect();
        for run in label_runs(&mask) {
            let (left, right) = (run.start, run.end);
            let start_time = times[left];
            let end_time = times[right - 1];
            let mut phenotypes = BTreeMap::new();

            match phase {
                CurvePhase::Undetermined | CurvePhase::Multiple => {}
                CurvePhase::Acceleration | CurvePhase::Retardation => {
                    let k1 = signal.values[signal.index_for_curve(left)];
                    let k2 = signal.values[signal.index_for_curve(right - 1)];
                    let (intersection, angle) = asymptotes(
                        (start_time, log_curve[left], k1),
                        (end_time, log_curve[right - 1], k2),
                    );
                    phenotypes.insert(PhasePhenotype::AsymptoteIntersection, intersection);
                    phenotypes.insert(PhasePhenotype::AsymptoteAngle, angle);
                }
                CurvePhase::Flat | CurvePhase::Impulse => {
                    let run_times = times.slice(s![left..right]).to_vec();
                    let run_log = log_curve.slice(s![left..right]).to_vec();
                    let (slope, intercept) =
                        linear_fit(&run_times, &run_log).unwrap_or((f64::NAN, f64::NAN));
                    let doubling_time = if slope != 0.0 { 1.0 / slope } else { f64::NAN };
                    phenotypes.insert(PhasePhenotype::PopulationDoublingTime, doubling_time);
                    phenotypes.insert(PhasePhenotype::LinearModelSlope, slope);
                    phenotypes.insert(PhasePhenotype::LinearModelIntercept, intercept);
                }
            }

            if !matches!(phase, CurvePhase::Undetermined | CurvePhase::Multiple) {
                phenotypes.insert(PhasePhenotype::Duration, end_time - start_time);
                phenotypes.insert(
                    PhasePhenotype::FractionYield,
                    (log_curve[right - 1] - log_curve[left]) / doublings,
                );
                phenotypes.insert(PhasePhenotype::Start, start_time);
            }

            instances.push(PhaseInstance {
                phase,
                left,
                right,
                start_time,
                end_time,
                phenotypes,
            });
        }
    }

    instances.sort_by(|a, b| {
        let a = a.start().unwrap_or(f64::INFINITY);
        let b = b.start().unwrap_or(f64::INFINITY);
        a.total_cmp(&b)
    });
    Ok(instances)
}

/// Intersection of the tangents at both edges of a curved phase.
///
/// Each edge is `(time, log2 population, slope)`. Returns the intersection
/// time as a fraction of the phase duration and the signed angle between the
/// tangents; either is NaN where the geometry is singular.
pub fn asymptotes(first: (f64, f64, f64), last: (f64, f64, f64)) -> (f64, f64) {
    let (t1, y1, k1) = first;
    let (t2, y2, k2) = last;
    let m1 = y1 - k1 * t1;
    let m2 = y2 - k2 * t2;

    let intersection_time = (m2 - m1) / (k1 - k2);
    let intersection = (intersection_time - t1) / (t2 - t1);
    let intersection = if intersection.is_finite() {
        intersection
    } else {
        f64::NAN
    };

    let denominator = 1.0 + k1 * k2;
    let angle = if denominator != 0.0 {
        ((k2 - k1) / denominator).atan()
    } else {
        f64::NAN
    };
    (intersection, angle)
}

/// Ordinary least squares of `y` against `x`, returning `(slope, intercept)`.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        sxx += (xi - mean_x) * (xi - mean_x);
        sxy += (xi - mean_x) * (yi - mean_y);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}
