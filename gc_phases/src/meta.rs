//! Plate-level summaries: one scalar per position from its phase list.
//!
//! Each [`MetaPhenotype`] maps to a [`MetaRule`] held in a
//! [`MetaPhenotypeRegistry`]. Rules are checked once when the registry is
//! built. Positions whose phases do not meet a rule's requirement get NaN.

use std::collections::BTreeMap;

use ndarray::Array2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::phases::{CurvePhase, PhasePhenotype};
use crate::phenotypes::PhaseInstance;
use crate::PhaseError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetaPhenotype {
    MajorImpulseYieldContribution,
    FirstMinorImpulseYieldContribution,
    MajorImpulseAveragePopulationDoublingTime,
    FirstMinorImpulseAveragePopulationDoublingTime,
    InitialAccelerationAsymptoteAngle,
    FinalRetardationAsymptoteAngle,
    InitialAccelerationAsymptoteIntersect,
    FinalRetardationAsymptoteIntersect,
    InitialLag,
    Modalities,
}

impl MetaPhenotype {
    pub const ALL: [MetaPhenotype; 10] = [
        MetaPhenotype::MajorImpulseYieldContribution,
        MetaPhenotype::FirstMinorImpulseYieldContribution,
        MetaPhenotype::MajorImpulseAveragePopulationDoublingTime,
        MetaPhenotype::FirstMinorImpulseAveragePopulationDoublingTime,
        MetaPhenotype::InitialAccelerationAsymptoteAngle,
        MetaPhenotype::FinalRetardationAsymptoteAngle,
        MetaPhenotype::InitialAccelerationAsymptoteIntersect,
        MetaPhenotype::FinalRetardationAsymptoteIntersect,
        MetaPhenotype::InitialLag,
        MetaPhenotype::Modalities,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            MetaPhenotype::MajorImpulseYieldContribution => "major_impulse_yield_contribution",
            MetaPhenotype::FirstMinorImpulseYieldContribution => {
                "first_minor_impulse_yield_contribution"
            }
            MetaPhenotype::MajorImpulseAveragePopulationDoublingTime => {
                "major_impulse_doubling_time"
            }
            MetaPhenotype::FirstMinorImpulseAveragePopulationDoublingTime => {
                "first_minor_impulse_doubling_time"
            }
            MetaPhenotype::InitialAccelerationAsymptoteAngle => "initial_acceleration_angle",
            MetaPhenotype::FinalRetardationAsymptoteAngle => "final_retardation_angle",
            MetaPhenotype::InitialAccelerationAsymptoteIntersect => {
                "initial_acceleration_intersect"
            }
            MetaPhenotype::FinalRetardationAsymptoteIntersect => "final_retardation_intersect",
            MetaPhenotype::InitialLag => "initial_lag",
            MetaPhenotype::Modalities => "modalities",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetaPhenotype::MajorImpulseYieldContribution => {
                "Fraction of total yield from the impulse contributing most yield."
            }
            MetaPhenotype::FirstMinorImpulseYieldContribution => {
                "Fraction of total yield from the impulse contributing second most yield."
            }
            MetaPhenotype::MajorImpulseAveragePopulationDoublingTime => {
                "Doubling time of the impulse contributing most yield."
            }
            MetaPhenotype::FirstMinorImpulseAveragePopulationDoublingTime => {
                "Doubling time of the impulse contributing second most yield."
            }
            MetaPhenotype::InitialAccelerationAsymptoteAngle => {
                "Angle between the edge tangents of the first acceleration phase."
            }
            MetaPhenotype::FinalRetardationAsymptoteAngle => {
                "Angle between the edge tangents of the last retardation phase."
            }
            MetaPhenotype::InitialAccelerationAsymptoteIntersect => {
                "Relative position of the tangent intersection in the first acceleration phase."
            }
            MetaPhenotype::FinalRetardationAsymptoteIntersect => {
                "Relative position of the tangent intersection in the last retardation phase."
            }
            MetaPhenotype::InitialLag => {
                "Time where the first flat and first impulse linear models intersect."
            }
            MetaPhenotype::Modalities => "Number of impulse phases.",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let normalized = id.trim();
        MetaPhenotype::ALL
            .into_iter()
            .find(|meta| meta.id() == normalized)
    }
}

/// How many candidate phases a position needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    AtLeast(usize),
}

impl Requirement {
    pub fn is_met(&self, candidates: usize) -> bool {
        match self {
            Requirement::AtLeast(n) => candidates >= *n,
        }
    }
}

/// Which candidate phase supplies the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    /// The candidate at `rank` when sorted by `key`, largest first.
    RankedBy { key: PhasePhenotype, rank: usize },
    Earliest,
    Latest,
}

impl Selector {
    pub fn select<'a>(&self, candidates: &[&'a PhaseInstance]) -> Option<&'a PhaseInstance> {
        let start = |phase: &PhaseInstance| OrderedFloat(phase.start().unwrap_or(f64::INFINITY));
        match self {
            Selector::RankedBy { key, rank } => {
                // Missing values rank below every measured one.
                let value = |phase: &PhaseInstance| {
                    OrderedFloat(
                        phase
                            .get(*key)
                            .filter(|v| !v.is_nan())
                            .unwrap_or(f64::NEG_INFINITY),
                    )
                };
                let mut ranked = candidates.to_vec();
                ranked.sort_by(|a, b| {
                    value(*b)
                        .cmp(&value(*a))
                        .then_with(|| start(*a).cmp(&start(*b)))
                });
                ranked.get(*rank).copied()
            }
            Selector::Earliest => candidates.iter().copied().min_by_key(|phase| start(*phase)),
            Selector::Latest => candidates.iter().copied().max_by_key(|phase| start(*phase)),
        }
    }
}

/// Extract `measure` from one selected phase of type `phase`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseExtraction {
    pub phase: CurvePhase,
    pub measure: PhasePhenotype,
    pub requirement: Requirement,
    pub selector: Selector,
}

impl PhaseExtraction {
    pub fn extract(&self, instances: &[PhaseInstance]) -> f64 {
        let candidates: Vec<&PhaseInstance> = instances
            .iter()
            .filter(|instance| instance.phase == self.phase)
            .collect();
        if !self.requirement.is_met(candidates.len()) {
            return f64::NAN;
        }
        self.selector
            .select(&candidates)
            .and_then(|instance| instance.get(self.measure))
            .unwrap_or(f64::NAN)
    }

    fn validate(&self) -> Result<(), PhaseError> {
        if !self.measure.populated_for(self.phase) {
            return Err(PhaseError::InvalidParameter(format!(
                "{:?} phases carry no {:?}",
                self.phase, self.measure
            )));
        }
        if let Selector::RankedBy { key, rank } = self.selector {
            if !key.populated_for(self.phase) {
                return Err(PhaseError::InvalidParameter(format!(
                    "{:?} phases cannot be ranked by {:?}",
                    self.phase, key
                )));
            }
            let Requirement::AtLeast(n) = self.requirement;
            if n <= rank {
                return Err(PhaseError::InvalidParameter(format!(
                    "selecting rank {rank} requires at least {} phases, rule requires {n}",
                    rank + 1
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaRule {
    Extract(PhaseExtraction),
    /// Time where the linear models of a flat and an impulse phase cross.
    LagIntersection {
        flat: Selector,
        impulse: Selector,
    },
    Count(CurvePhase),
}

impl MetaRule {
    pub fn evaluate(&self, instances: &[PhaseInstance]) -> f64 {
        let value = match self {
            MetaRule::Extract(extraction) => extraction.extract(instances),
            MetaRule::LagIntersection { flat, impulse } => {
                let line = |phase: CurvePhase, selector: Selector| {
                    let extraction = |measure: PhasePhenotype| PhaseExtraction {
                        phase,
                        measure,
                        requirement: Requirement::AtLeast(1),
                        selector,
                    };
                    (
                        extraction(PhasePhenotype::LinearModelSlope).extract(instances),
                        extraction(PhasePhenotype::LinearModelIntercept).extract(instances),
                    )
                };
                let (flat_slope, flat_intercept) = line(CurvePhase::Flat, *flat);
                let (impulse_slope, impulse_intercept) = line(CurvePhase::Impulse, *impulse);
                (impulse_intercept - flat_intercept) / (flat_slope - impulse_slope)
            }
            MetaRule::Count(phase) => instances
                .iter()
                .filter(|instance| instance.phase == *phase)
                .count() as f64,
        };
        if value.is_finite() {
            value
        } else {
            f64::NAN
        }
    }

    fn validate(&self) -> Result<(), PhaseError> {
        match self {
            MetaRule::Extract(extraction) => extraction.validate(),
            MetaRule::LagIntersection { flat, impulse } => {
                for selector in [flat, impulse] {
                    if matches!(selector, Selector::RankedBy { .. }) {
                        return Err(PhaseError::InvalidParameter(
                            "lag intersection selects phases by time".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            MetaRule::Count(CurvePhase::Multiple) => Err(PhaseError::DisplayOnlyPhase),
            MetaRule::Count(_) => Ok(()),
        }
    }
}

/// Validated table of meta-phenotype rules.
#[derive(Clone, Debug)]
pub struct MetaPhenotypeRegistry {
    rules: BTreeMap<MetaPhenotype, MetaRule>,
}

impl MetaPhenotypeRegistry {
    pub fn new(
        rules: impl IntoIterator<Item = (MetaPhenotype, MetaRule)>,
    ) -> Result<Self, PhaseError> {
        let rules: BTreeMap<_, _> = rules.into_iter().collect();
        for (meta, rule) in &rules {
            rule.validate().map_err(|err| {
                PhaseError::InvalidParameter(format!("rule {}: {}", meta.id(), err))
            })?;
        }
        Ok(Self { rules })
    }

    /// All shipped meta-phenotypes.
    pub fn standard() -> Result<Self, PhaseError> {
        let impulse = |measure, requirement, rank| {
            MetaRule::Extract(PhaseExtraction {
                phase: CurvePhase::Impulse,
                measure,
                requirement,
                selector: Selector::RankedBy {
                    key: PhasePhenotype::FractionYield,
                    rank,
                },
            })
        };
        let edge = |phase, measure, selector| {
            MetaRule::Extract(PhaseExtraction {
                phase,
                measure,
                requirement: Requirement::AtLeast(1),
                selector,
            })
        };

        Self::new([
            (
                MetaPhenotype::MajorImpulseYieldContribution,
                impulse(PhasePhenotype::FractionYield, Requirement::AtLeast(1), 0),
            ),
            (
                MetaPhenotype::FirstMinorImpulseYieldContribution,
                impulse(PhasePhenotype::FractionYield, Requirement::AtLeast(2), 1),
            ),
            (
                MetaPhenotype::MajorImpulseAveragePopulationDoublingTime,
                impulse(PhasePhenotype::PopulationDoublingTime, Requirement::AtLeast(1), 0),
            ),
            (
                MetaPhenotype::FirstMinorImpulseAveragePopulationDoublingTime,
                impulse(PhasePhenotype::PopulationDoublingTime, Requirement::AtLeast(2), 1),
            ),
            (
                MetaPhenotype::InitialAccelerationAsymptoteAngle,
                edge(
                    CurvePhase::Acceleration,
                    PhasePhenotype::AsymptoteAngle,
                    Selector::Earliest,
                ),
            ),
            (
                MetaPhenotype::FinalRetardationAsymptoteAngle,
                edge(
                    CurvePhase::Retardation,
                    PhasePhenotype::AsymptoteAngle,
                    Selector::Latest,
                ),
            ),
            (
                MetaPhenotype::InitialAccelerationAsymptoteIntersect,
                edge(
                    CurvePhase::Acceleration,
                    PhasePhenotype::AsymptoteIntersection,
                    Selector::Earliest,
                ),
            ),
            (
                MetaPhenotype::FinalRetardationAsymptoteIntersect,
                edge(
                    CurvePhase::Retardation,
                    PhasePhenotype::AsymptoteIntersection,
                    Selector::Latest,
                ),
            ),
            (
                MetaPhenotype::InitialLag,
                MetaRule::LagIntersection {
                    flat: Selector::Earliest,
                    impulse: Selector::Earliest,
                },
            ),
            (
                MetaPhenotype::Modalities,
                MetaRule::Count(CurvePhase::Impulse),
            ),
        ])
    }

    pub fn rule(&self, meta: MetaPhenotype) -> Option<&MetaRule> {
        self.rules.get(&meta)
    }

    pub fn registered(&self) -> impl Iterator<Item = MetaPhenotype> + '_ {
        self.rules.keys().copied()
    }

    /// Value of `meta` for one position's phases.
    pub fn evaluate(
        &self,
        meta: MetaPhenotype,
        instances: &[PhaseInstance],
    ) -> Result<f64, PhaseError> {
        let rule = self.rule(meta).ok_or_else(|| {
            PhaseError::InvalidParameter(format!("meta-phenotype {} not registered", meta.id()))
        })?;
        Ok(rule.evaluate(instances))
    }

    /// Value of `meta` for every position of a plate; unanalysed positions are NaN.
    pub fn filter_plate(
        &self,
        meta: MetaPhenotype,
        plate: &Array2<Option<Vec<PhaseInstance>>>,
    ) -> Result<Array2<f64>, PhaseError> {
        let rule = self.rule(meta).ok_or_else(|| {
            PhaseError::InvalidParameter(format!("meta-phenotype {} not registered", meta.id()))
        })?;
        Ok(plate.map(|position| match position {
            Some(instances) => rule.evaluate(instances),
            None => f64::NAN,
        }))
    }
}
