use serde::{Deserialize, Serialize};

use crate::PhaseError;

/// Growth-dynamics category of one curve sample.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CurvePhase {
    /// Display-only: a drawn span covering more than one phase.
    Multiple,
    Undetermined,
    Flat,
    Acceleration,
    Retardation,
    Impulse,
}

impl Default for CurvePhase {
    fn default() -> Self {
        CurvePhase::Undetermined
    }
}

impl CurvePhase {
    /// Phases a segmentation can assign, in phenotyping order.
    pub const ASSIGNABLE: [CurvePhase; 5] = [
        CurvePhase::Undetermined,
        CurvePhase::Flat,
        CurvePhase::Acceleration,
        CurvePhase::Retardation,
        CurvePhase::Impulse,
    ];

    pub fn code(self) -> i8 {
        match self {
            CurvePhase::Multiple => -1,
            CurvePhase::Undetermined => 0,
            CurvePhase::Flat => 1,
            CurvePhase::Acceleration => 2,
            CurvePhase::Retardation => 3,
            CurvePhase::Impulse => 4,
        }
    }

    pub fn from_code(code: i8) -> Result<Self, PhaseError> {
        match code {
            -1 => Ok(CurvePhase::Multiple),
            0 => Ok(CurvePhase::Undetermined),
            1 => Ok(CurvePhase::Flat),
            2 => Ok(CurvePhase::Acceleration),
            3 => Ok(CurvePhase::Retardation),
            4 => Ok(CurvePhase::Impulse),
            other => Err(PhaseError::InvalidParameter(format!(
                "unknown curve phase code {other}"
            ))),
        }
    }

    /// Overlay colour used when plotting segmented curves.
    pub fn plot_color(self) -> Option<&'static str> {
        match self {
            CurvePhase::Multiple => Some("#5f3275"),
            CurvePhase::Undetermined => None,
            CurvePhase::Flat => Some("#f9e812"),
            CurvePhase::Acceleration => Some("#ea5207"),
            CurvePhase::Retardation => Some("#c797c1"),
            CurvePhase::Impulse => Some("#99220c"),
        }
    }

    /// Flat and impulse phases are modelled as straight lines in log2 space.
    pub fn is_linear(self) -> bool {
        matches!(self, CurvePhase::Flat | CurvePhase::Impulse)
    }

    /// Acceleration and retardation phases are described by their edge tangents.
    pub fn is_curved(self) -> bool {
        matches!(self, CurvePhase::Acceleration | CurvePhase::Retardation)
    }
}

/// Label shown for the span `[left, right)` of a classification.
///
/// An empty span has no label and reports `Undetermined`.
pub fn span_phase(labels: &[CurvePhase], left: usize, right: usize) -> CurvePhase {
    let right = right.min(labels.len());
    let left = left.min(right);
    let mut span = labels[left..right].iter();
    match span.next() {
        None => CurvePhase::Undetermined,
        Some(&first) => {
            if span.all(|&label| label == first) {
                first
            } else {
                CurvePhase::Multiple
            }
        }
    }
}

/// Numeric measure attached to a phase instance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhasePhenotype {
    PopulationDoublingTime,
    Duration,
    FractionYield,
    Start,
    LinearModelSlope,
    LinearModelIntercept,
    AsymptoteAngle,
    AsymptoteIntersection,
}

impl PhasePhenotype {
    /// Whether phenotyping a phase of type `phase` fills this key.
    pub fn populated_for(self, phase: CurvePhase) -> bool {
        match self {
            PhasePhenotype::Duration | PhasePhenotype::FractionYield | PhasePhenotype::Start => {
                phase.is_linear() || phase.is_curved()
            }
            PhasePhenotype::PopulationDoublingTime
            | PhasePhenotype::LinearModelSlope
            | PhasePhenotype::LinearModelIntercept => phase.is_linear(),
            PhasePhenotype::AsymptoteAngle | PhasePhenotype::AsymptoteIntersection => {
                phase.is_curved()
            }
        }
    }
}

/// Detection thresholds for one segmentation run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Fraction of the peak growth rate a sample must exceed to extend the impulse.
    pub impulse_extension: f64,
    /// Minimal peak growth rate for an impulse to exist at all.
    pub impulse_slope_requirement: f64,
    /// Minimal absolute growth rate for a sample to count as non-flat.
    pub flatline_slope_requirement: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            impulse_extension: 0.75,
            impulse_slope_requirement: 0.1,
            flatline_slope_requirement: 0.02,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), PhaseError> {
        if !(self.impulse_extension > 0.0 && self.impulse_extension <= 1.0) {
            return Err(PhaseError::InvalidParameter(format!(
                "impulse extension must be in (0, 1], got {}",
                self.impulse_extension
            )));
        }
        for (name, value) in [
            ("impulse slope requirement", self.impulse_slope_requirement),
            ("flatline slope requirement", self.flatline_slope_requirement),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PhaseError::InvalidParameter(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}
