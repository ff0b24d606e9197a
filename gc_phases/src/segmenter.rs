//! Recursive phase segmentation of a growth curve.
//!
//! Each region of the curve is searched for its point of maximal growth. The
//! impulse around that point is labelled first, then an acceleration phase to
//! its left and a retardation phase to its right. Whatever lies beyond those
//! is flat and goes back on the worklist, since it may hold another impulse
//! (diauxic growth). Every pending region is strictly smaller than the region
//! that produced it, so the worklist drains after at most one pass per phase.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::locate::{build_filter, label_runs, locate_segment, median3, reset_filter};
use crate::phases::{CurvePhase, Thresholds};
use crate::signals::DerivativeSignal;
use crate::PhaseError;

/// Recoverable detection failure met while segmenting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum SegmentationWarning {
    NoImpulse { peak_rate: f64, threshold: f64 },
    ImpulseNotContiguous { peak_rate: f64, threshold: f64 },
    FilterNotHomogeneous { segments: usize },
    NoAcceleration { max_rate: f64, threshold: f64 },
    NoRetardation { max_rate: f64, threshold: f64 },
}

impl fmt::Display for SegmentationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationWarning::NoImpulse { peak_rate, threshold } => write!(
                f,
                "no impulse detected, max rate is {peak_rate} (threshold {threshold})"
            ),
            SegmentationWarning::ImpulseNotContiguous { peak_rate, threshold } => write!(
                f,
                "max rate {peak_rate} super-seeded threshold {threshold} but no contiguous impulse phase found"
            ),
            SegmentationWarning::FilterNotHomogeneous { segments } => {
                write!(f, "filter not homogeneous, contains {segments} segments")
            }
            SegmentationWarning::NoAcceleration { max_rate, threshold } => write!(
                f,
                "no acceleration phase, max |rate| before impulse is {max_rate} (flatline threshold {threshold})"
            ),
            SegmentationWarning::NoRetardation { max_rate, threshold } => write!(
                f,
                "no retardation phase, max |rate| after impulse is {max_rate} (flatline threshold {threshold})"
            ),
        }
    }
}

/// Finished classification of one curve.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segmentation {
    /// One label per curve sample.
    pub labels: Vec<CurvePhase>,
    pub warnings: Vec<SegmentationWarning>,
}

/// Segment a whole curve of `curve_len` samples.
pub fn segment_curve(
    signal: &DerivativeSignal,
    curve_len: usize,
    thresholds: &Thresholds,
) -> Result<Segmentation, PhaseError> {
    let mut labels = vec![CurvePhase::Undetermined; curve_len];
    let filter = build_filter(signal.len(), None, None);
    let warnings = segment_region(signal, &mut labels, &filter, thresholds)?;
    Ok(Segmentation { labels, warnings })
}

/// Assign phases to every curve sample selected by `filter`.
///
/// `filter` is indexed like the derivative. All selected samples must carry
/// the same label beforehand; anything else is a [`PhaseError::MixedRegion`].
pub fn segment_region(
    signal: &DerivativeSignal,
    labels: &mut [CurvePhase],
    filter: &[bool],
    thresholds: &Thresholds,
) -> Result<Vec<SegmentationWarning>, PhaseError> {
    let expected = signal.len() + 2 * signal.offset;
    if labels.len() != expected {
        return Err(PhaseError::LengthMismatch {
            what: "phase labels",
            expected,
            found: labels.len(),
        });
    }
    if filter.len() != signal.len() {
        return Err(PhaseError::LengthMismatch {
            what: "region filter",
            expected: signal.len(),
            found: filter.len(),
        });
    }

    let mut segmenter = Segmenter {
        signal,
        thresholds,
        labels,
        scratch: vec![false; signal.len()],
        warnings: Vec::new(),
    };
    segmenter.run(filter)?;
    Ok(segmenter.warnings)
}

/// What a single region pass found.
struct RegionPass {
    impulse: bool,
    pending: Vec<Range<usize>>,
}

struct Segmenter<'a> {
    signal: &'a DerivativeSignal,
    thresholds: &'a Thresholds,
    labels: &'a mut [CurvePhase],
    scratch: Vec<bool>,
    warnings: Vec<SegmentationWarning>,
}

impl<'a> Segmenter<'a> {
    fn run(&mut self, filter: &[bool]) -> Result<(), PhaseError> {
        if !filter.iter().any(|&selected| selected) {
            return Ok(());
        }
        self.require_single_label(filter)?;

        let Some((left, right)) = locate_segment(filter) else {
            let segments = label_runs(filter).len();
            self.warnings
                .push(SegmentationWarning::FilterNotHomogeneous { segments });
            return Ok(());
        };
        let size = self.signal.len();
        let whole_curve = left == 0 && right == size;

        let first = self.segment_once(left..right, whole_curve);
        let mut pending: Vec<Range<usize>> = first.pending.into_iter().rev().collect();

        while let Some(region) = pending.pop() {
            let mut filter = std::mem::take(&mut self.scratch);
            reset_filter(&mut filter, Some(region.start), Some(region.end));
            let checked = self.require_single_label(&filter);
            self.scratch = filter;
            checked?;

            debug!("segmenting remainder [{}, {})", region.start, region.end);
            let pass = self.segment_once(region, false);
            pending.extend(pass.pending.into_iter().rev());
        }

        // Samples without derivative coverage copy their nearest covered neighbour.
        if first.impulse {
            self.extend_edges(true, true);
        } else {
            self.extend_edges(left == 0, right == size);
        }
        Ok(())
    }

    fn require_single_label(&self, filter: &[bool]) -> Result<(), PhaseError> {
        let offset = self.signal.offset;
        let found: BTreeSet<CurvePhase> = filter
            .iter()
            .enumerate()
            .filter(|&(_, &selected)| selected)
            .map(|(idx, _)| self.labels[idx + offset])
            .collect();
        if found.len() > 1 {
            return Err(PhaseError::MixedRegion {
                labels: found.into_iter().collect(),
            });
        }
        if found.contains(&CurvePhase::Multiple) {
            return Err(PhaseError::DisplayOnlyPhase);
        }
        Ok(())
    }

    fn segment_once(&mut self, region: Range<usize>, whole_curve: bool) -> RegionPass {
        let values = &self.signal.values;
        let ranks = &self.signal.ranks;
        let Range { start: left, end: right } = region;

        let loc_max = (left..right).max_by_key(|&idx| ranks[idx]).unwrap_or(left);
        let peak_rate = values[loc_max];
        let threshold = self.thresholds.impulse_slope_requirement;

        if !(peak_rate >= threshold) {
            if whole_curve {
                self.warn(SegmentationWarning::NoImpulse {
                    peak_rate,
                    threshold,
                });
            }
            self.flatten_undetermined(left..right);
            return RegionPass {
                impulse: false,
                pending: Vec::new(),
            };
        }

        let Some(impulse) = self.locate_impulse(left..right, loc_max) else {
            if whole_curve {
                self.warn(SegmentationWarning::ImpulseNotContiguous {
                    peak_rate,
                    threshold,
                });
            }
            self.flatten_undetermined(left..right);
            return RegionPass {
                impulse: false,
                pending: Vec::new(),
            };
        };
        self.assign(impulse.clone(), CurvePhase::Impulse);

        let mut pending = Vec::new();

        let accel_left = match self.locate_acceleration(left..impulse.start) {
            Some(acceleration) => {
                self.assign(acceleration.clone(), CurvePhase::Acceleration);
                acceleration.start
            }
            None => {
                self.assign(left..impulse.start, CurvePhase::Undetermined);
                left
            }
        };
        if left != accel_left {
            self.assign(left..accel_left, CurvePhase::Flat);
            pending.push(left..accel_left);
        }

        let retard_right = match self.locate_retardation(impulse.end..right) {
            Some(retardation) => {
                self.assign(retardation.clone(), CurvePhase::Retardation);
                retardation.end
            }
            None => {
                self.assign(impulse.end..right, CurvePhase::Undetermined);
                right
            }
        };
        if right != retard_right {
            self.assign(retard_right..right, CurvePhase::Flat);
            pending.push(retard_right..right);
        }

        RegionPass {
            impulse: true,
            pending,
        }
    }

    /// Run of samples above the extension threshold that contains `loc_max`.
    fn locate_impulse(&self, region: Range<usize>, loc_max: usize) -> Option<Range<usize>> {
        let values = &self.signal.values;
        let floor = values[loc_max] * self.thresholds.impulse_extension;
        let candidates: Vec<bool> = region.clone().map(|idx| values[idx] > floor).collect();
        label_runs(&median3(&candidates))
            .into_iter()
            .map(|run| run.start + region.start..run.end + region.start)
            .find(|run| run.contains(&loc_max))
    }

    /// Rightmost accelerating run in `region`, the one nearest the impulse.
    fn locate_acceleration(&mut self, region: Range<usize>) -> Option<Range<usize>> {
        if region.is_empty() {
            return None;
        }
        let found = self.curvature_runs(region.clone(), 1).pop();
        if found.is_none() {
            let max_rate = self.max_abs_rate(region);
            self.warn(SegmentationWarning::NoAcceleration {
                max_rate,
                threshold: self.thresholds.flatline_slope_requirement,
            });
        }
        found
    }

    /// First retarding run in `region`.
    fn locate_retardation(&mut self, region: Range<usize>) -> Option<Range<usize>> {
        if region.is_empty() {
            return None;
        }
        let found = self.curvature_runs(region.clone(), -1).into_iter().next();
        if found.is_none() {
            let max_rate = self.max_abs_rate(region);
            self.warn(SegmentationWarning::NoRetardation {
                max_rate,
                threshold: self.thresholds.flatline_slope_requirement,
            });
        }
        found
    }

    /// Non-flat runs in `region` whose second derivative has sign `sign`.
    fn curvature_runs(&self, region: Range<usize>, sign: i8) -> Vec<Range<usize>> {
        let values = &self.signal.values;
        let signs = &self.signal.curvature_signs;
        let flatline = self.thresholds.flatline_slope_requirement;
        let candidates: Vec<bool> = region
            .clone()
            .map(|idx| values[idx].abs() > flatline && signs[idx] == sign)
            .collect();
        label_runs(&median3(&candidates))
            .into_iter()
            .map(|run| run.start + region.start..run.end + region.start)
            .collect()
    }

    fn max_abs_rate(&self, region: Range<usize>) -> f64 {
        region
            .map(|idx| self.signal.values[idx].abs())
            .fold(f64::NAN, f64::max)
    }

    /// Label derivative-indexed `range` on the curve.
    fn assign(&mut self, range: Range<usize>, phase: CurvePhase) {
        let offset = self.signal.offset;
        self.labels[range.start + offset..range.end + offset].fill(phase);
    }

    /// A region without impulse material is flat unless already classified.
    fn flatten_undetermined(&mut self, range: Range<usize>) {
        let offset = self.signal.offset;
        for label in &mut self.labels[range.start + offset..range.end + offset] {
            if *label == CurvePhase::Undetermined {
                *label = CurvePhase::Flat;
            }
        }
    }

    fn extend_edges(&mut self, left: bool, right: bool) {
        let offset = self.signal.offset;
        let n = self.labels.len();
        if offset == 0 || n <= 2 * offset {
            return;
        }
        if left {
            let edge = self.labels[offset];
            self.labels[..offset].fill(edge);
        }
        if right {
            let edge = self.labels[n - offset - 1];
            self.labels[n - offset..].fill(edge);
        }
    }

    fn warn(&mut self, warning: SegmentationWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn signal(values: &[f64], offset: usize) -> DerivativeSignal {
        DerivativeSignal::new(Array1::from_vec(values.to_vec()), values.len() + 2 * offset)
            .unwrap()
    }

    fn bump(n: usize, center: f64, width: f64, height: f64) -> Vec<f64> {
        (0..n)
            .map(|i| height * (-((i as f64 - center) / width).powi(2)).exp())
            .collect()
    }

    #[test]
    fn constant_growth_is_one_impulse() {
        let signal = signal(&[0.5; 20], 2);
        let segmentation = segment_curve(&signal, 24, &Thresholds::default()).unwrap();
        assert!(segmentation
            .labels
            .iter()
            .all(|&label| label == CurvePhase::Impulse));
        assert!(segmentation.warnings.is_empty());
    }

    #[test]
    fn flat_curve_is_flat_with_warning() {
        let signal = signal(&[0.0; 20], 1);
        let segmentation = segment_curve(&signal, 22, &Thresholds::default()).unwrap();
        assert!(segmentation
            .labels
            .iter()
            .all(|&label| label == CurvePhase::Flat));
        assert!(matches!(
            segmentation.warnings.as_slice(),
            [SegmentationWarning::NoImpulse { .. }]
        ));
    }

    #[test]
    fn single_bump_has_acceleration_impulse_retardation() {
        let values = bump(60, 30.0, 8.0, 0.6);
        let signal = signal(&values, 3);
        let segmentation = segment_curve(&signal, 66, &Thresholds::default()).unwrap();
        let labels = &segmentation.labels;

        assert_eq!(labels[3 + 30], CurvePhase::Impulse);
        let first_accel = labels.iter().position(|&l| l == CurvePhase::Acceleration);
        let first_impulse = labels.iter().position(|&l| l == CurvePhase::Impulse);
        let first_retard = labels.iter().position(|&l| l == CurvePhase::Retardation);
        assert!(first_accel < first_impulse);
        assert!(first_impulse < first_retard);
        assert_eq!(labels[0], CurvePhase::Flat);
        assert_eq!(labels[65], CurvePhase::Flat);
    }

    #[test]
    fn edges_copy_nearest_covered_label() {
        let values = bump(40, 20.0, 6.0, 0.6);
        let signal = signal(&values, 4);
        let segmentation = segment_curve(&signal, 48, &Thresholds::default()).unwrap();
        let labels = &segmentation.labels;
        assert!(labels[..4].iter().all(|&l| l == labels[4]));
        assert!(labels[44..].iter().all(|&l| l == labels[43]));
    }

    fn codes(labels: &[CurvePhase]) -> String {
        labels.iter().map(|label| label.code().to_string()).collect()
    }

    #[test]
    fn missing_acceleration_leaves_left_remainder_undetermined() {
        let mut values = vec![0.05; 20];
        values.extend([0.5; 20]);
        let signal = signal(&values, 2);
        let segmentation = segment_curve(&signal, 44, &Thresholds::default()).unwrap();

        assert_eq!(codes(&segmentation.labels), "0".repeat(22) + &"4".repeat(22));
        assert_eq!(
            segmentation.warnings,
            vec![SegmentationWarning::NoAcceleration {
                max_rate: 0.05,
                threshold: 0.02
            }]
        );
    }

    #[test]
    fn missing_retardation_leaves_right_remainder_undetermined() {
        let mut values = vec![0.5; 20];
        values.extend([0.05; 20]);
        let signal = signal(&values, 2);
        let segmentation = segment_curve(&signal, 44, &Thresholds::default()).unwrap();

        assert_eq!(codes(&segmentation.labels), "4".repeat(22) + &"0".repeat(22));
        assert_eq!(
            segmentation.warnings,
            vec![SegmentationWarning::NoRetardation {
                max_rate: 0.05,
                threshold: 0.02
            }]
        );
    }

    #[test]
    fn isolated_spike_is_not_an_impulse() {
        let mut values = vec![0.0; 20];
        values[10] = 1.0;
        let signal = signal(&values, 1);
        let segmentation = segment_curve(&signal, 22, &Thresholds::default()).unwrap();

        assert!(segmentation
            .labels
            .iter()
            .all(|&label| label == CurvePhase::Flat));
        assert_eq!(
            segmentation.warnings,
            vec![SegmentationWarning::ImpulseNotContiguous {
                peak_rate: 1.0,
                threshold: 0.1
            }]
        );
    }

    #[test]
    fn mixed_region_is_a_contract_violation() {
        let signal = signal(&[0.5; 10], 0);
        let mut labels = vec![CurvePhase::Flat; 10];
        labels[6..].fill(CurvePhase::Impulse);
        let filter = build_filter(10, None, None);
        let err = segment_region(&signal, &mut labels, &filter, &Thresholds::default())
            .unwrap_err();
        assert_eq!(
            err,
            PhaseError::MixedRegion {
                labels: vec![CurvePhase::Flat, CurvePhase::Impulse]
            }
        );
    }

    #[test]
    fn multiple_label_never_reaches_segmentation() {
        let signal = signal(&[0.5; 10], 0);
        let mut labels = vec![CurvePhase::Multiple; 10];
        let filter = build_filter(10, None, None);
        let err = segment_region(&signal, &mut labels, &filter, &Thresholds::default())
            .unwrap_err();
        assert_eq!(err, PhaseError::DisplayOnlyPhase);
    }

    #[test]
    fn fragmented_filter_is_skipped_with_warning() {
        let signal = signal(&[0.5; 10], 0);
        let mut labels = vec![CurvePhase::Undetermined; 10];
        let mut filter = build_filter(10, Some(0), Some(3));
        filter[6] = true;
        let warnings =
            segment_region(&signal, &mut labels, &filter, &Thresholds::default()).unwrap();
        assert_eq!(
            warnings,
            vec![SegmentationWarning::FilterNotHomogeneous { segments: 2 }]
        );
        assert!(labels.iter().all(|&l| l == CurvePhase::Undetermined));
    }

    #[test]
    fn segmentation_is_repeatable() {
        let mut values = bump(80, 20.0, 5.0, 0.5);
        for (v, w) in values.iter_mut().zip(bump(80, 60.0, 5.0, 0.3)) {
            *v += w;
        }
        let signal = signal(&values, 2);
        let first = segment_curve(&signal, 84, &Thresholds::default()).unwrap();
        let second = segment_curve(&signal, 84, &Thresholds::default()).unwrap();
        assert_eq!(first, second);
    }
}
