//! Growth curve phase segmentation and phase phenotypes.
//!
//! A smoothed growth curve is split into flat, acceleration, impulse and
//! retardation phases around its points of maximal growth; each phase is then
//! described by doubling time, duration, yield and asymptote geometry, and a
//! plate of phase lists can be summarised into one value per position.

use thiserror::Error;

pub mod locate;
pub mod meta;
pub mod phases;
pub mod phenotypes;
pub mod plate;
pub mod segmenter;
pub mod signals;

pub use locate::{build_filter, label_runs, locate_segment, median3, reset_filter};
pub use meta::{
    MetaPhenotype, MetaPhenotypeRegistry, MetaRule, PhaseExtraction, Requirement, Selector,
};
pub use phases::{span_phase, CurvePhase, PhasePhenotype, Thresholds};
pub use phenotypes::{phenotype_phases, PhaseInstance};
pub use plate::{
    analyse_curve, analyse_plate, CurveAnalysis, GrowthCurve, PlateAnalysis, PositionOutcome,
};
pub use segmenter::{segment_curve, segment_region, Segmentation, SegmentationWarning};
pub use signals::{experiment_doublings, DerivativeSignal};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseError {
    #[error("impossible to segment region spanning multiple phases {labels:?}")]
    MixedRegion { labels: Vec<CurvePhase> },
    #[error("display-only phase label reached the segmenter")]
    DisplayOnlyPhase,
    #[error("{what} length mismatch: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("derivative of {derivative} samples is not trimmed symmetrically from a curve of {curve}")]
    UnevenTrim { curve: usize, derivative: usize },
    #[error("insufficient data for phase segmentation")]
    InsufficientData,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
