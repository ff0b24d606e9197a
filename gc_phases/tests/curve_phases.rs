//! End-to-end segmentation and phenotyping of synthetic growth curves.

use gc_phases::{
    analyse_curve, analyse_plate, build_filter, segment_region, CurvePhase, DerivativeSignal,
    GrowthCurve, MetaPhenotype, MetaPhenotypeRegistry, PhaseError, PhasePhenotype,
    SegmentationWarning, Thresholds,
};
use ndarray::{Array1, Array2};

const SAMPLES: usize = 100;
const STEP_H: f64 = 0.5;
const TRIM: usize = 2;

fn times() -> Array1<f64> {
    Array1::from_iter((0..SAMPLES).map(|i| i as f64 * STEP_H))
}

/// Curve integrating `rate` from 1000 cells, with the derivative trimmed by `TRIM`.
fn growth_from_rate(rate: impl Fn(f64) -> f64) -> GrowthCurve {
    let times = times();
    let rates = times.mapv(&rate);
    let mut log_population = 1000f64.ln();
    let mut curve = Vec::with_capacity(SAMPLES);
    curve.push(log_population.exp());
    for i in 1..SAMPLES {
        log_population += 0.5 * (rates[i - 1] + rates[i]) * STEP_H;
        curve.push(log_population.exp());
    }
    GrowthCurve {
        curve: Array1::from_vec(curve),
        derivative: rates.slice(ndarray::s![TRIM..SAMPLES - TRIM]).to_owned(),
        doublings: None,
    }
}

fn gauss(t: f64, center: f64, width: f64) -> f64 {
    (-((t - center) / width).powi(2)).exp()
}

fn diauxic() -> GrowthCurve {
    growth_from_rate(|t| 0.6 * gauss(t, 12.0, 3.0) + 0.4 * gauss(t, 35.0, 3.0))
}

fn lag_then_growth() -> GrowthCurve {
    growth_from_rate(|t| {
        0.5 / (1.0 + (-(t - 15.0)).exp()) / (1.0 + (t - 35.0).exp())
    })
}

/// Phase sequence with consecutive duplicates collapsed.
fn sequence(labels: &[CurvePhase]) -> Vec<CurvePhase> {
    let mut out: Vec<CurvePhase> = Vec::new();
    for &label in labels {
        if out.last() != Some(&label) {
            out.push(label);
        }
    }
    out
}

#[test]
fn exponential_curve_is_a_single_impulse() {
    let rate = 0.35;
    let growth = growth_from_rate(|_| rate);
    let analysis = analyse_curve(&times(), &growth, &Thresholds::default()).unwrap();

    assert_eq!(sequence(&analysis.labels), vec![CurvePhase::Impulse]);
    assert_eq!(analysis.phases.len(), 1);

    let impulse = &analysis.phases[0];
    let doubling_time = impulse.get(PhasePhenotype::PopulationDoublingTime).unwrap();
    assert!((doubling_time - std::f64::consts::LN_2 / rate).abs() < 1e-6);
    let fraction = impulse.get(PhasePhenotype::FractionYield).unwrap();
    assert!((fraction - 1.0).abs() < 1e-9);
    assert!(analysis.warnings.is_empty());
}

#[test]
fn flat_curve_is_a_single_flat_phase() {
    let growth = growth_from_rate(|_| 0.0);
    let analysis = analyse_curve(&times(), &growth, &Thresholds::default()).unwrap();

    assert_eq!(sequence(&analysis.labels), vec![CurvePhase::Flat]);
    assert_eq!(analysis.phases.len(), 1);
    assert_eq!(analysis.phases[0].phase, CurvePhase::Flat);
    assert!(analysis.warnings.iter().any(|warning| matches!(
        warning,
        SegmentationWarning::NoImpulse { peak_rate, threshold }
            if *peak_rate == 0.0 && *threshold == 0.1
    )));
}

#[test]
fn diauxic_curve_has_two_growth_bursts() {
    let analysis = analyse_curve(&times(), &diauxic(), &Thresholds::default()).unwrap();

    assert_eq!(
        sequence(&analysis.labels),
        vec![
            CurvePhase::Flat,
            CurvePhase::Acceleration,
            CurvePhase::Impulse,
            CurvePhase::Retardation,
            CurvePhase::Flat,
            CurvePhase::Acceleration,
            CurvePhase::Impulse,
            CurvePhase::Retardation,
            CurvePhase::Flat,
        ]
    );

    let registry = MetaPhenotypeRegistry::standard().unwrap();
    let modality = registry
        .evaluate(MetaPhenotype::Modalities, &analysis.phases)
        .unwrap();
    assert_eq!(modality, 2.0);

    let major = registry
        .evaluate(MetaPhenotype::MajorImpulseYieldContribution, &analysis.phases)
        .unwrap();
    let minor = registry
        .evaluate(MetaPhenotype::FirstMinorImpulseYieldContribution, &analysis.phases)
        .unwrap();
    assert!(major > minor);
    assert!(minor > 0.0);
}

#[test]
fn lag_curve_reports_initial_lag_before_impulse() {
    let analysis = analyse_curve(&times(), &lag_then_growth(), &Thresholds::default()).unwrap();
    assert_eq!(
        sequence(&analysis.labels),
        vec![
            CurvePhase::Flat,
            CurvePhase::Acceleration,
            CurvePhase::Impulse,
            CurvePhase::Retardation,
            CurvePhase::Flat,
        ]
    );

    let registry = MetaPhenotypeRegistry::standard().unwrap();
    let lag = registry
        .evaluate(MetaPhenotype::InitialLag, &analysis.phases)
        .unwrap();
    let impulse_start = analysis
        .phases
        .iter()
        .find(|phase| phase.phase == CurvePhase::Impulse)
        .and_then(|phase| phase.start())
        .unwrap();
    assert!(lag > 0.0 && lag < impulse_start);

    let angle = registry
        .evaluate(MetaPhenotype::InitialAccelerationAsymptoteAngle, &analysis.phases)
        .unwrap();
    assert!(angle > 0.0);
    let angle = registry
        .evaluate(MetaPhenotype::FinalRetardationAsymptoteAngle, &analysis.phases)
        .unwrap();
    assert!(angle < 0.0);
}

#[test]
fn every_sample_is_labelled_and_edges_follow_neighbours() {
    for growth in [diauxic(), lag_then_growth(), growth_from_rate(|_| 0.2)] {
        let analysis = analyse_curve(&times(), &growth, &Thresholds::default()).unwrap();
        let labels = &analysis.labels;
        assert_eq!(labels.len(), SAMPLES);
        assert!(labels.iter().all(|label| *label != CurvePhase::Multiple));
        assert!(labels[..TRIM].iter().all(|&l| l == labels[TRIM]));
        assert!(labels[SAMPLES - TRIM..]
            .iter()
            .all(|&l| l == labels[SAMPLES - TRIM - 1]));
    }
}

#[test]
fn segmentation_is_idempotent() {
    let growth = diauxic();
    let first = analyse_curve(&times(), &growth, &Thresholds::default()).unwrap();
    let second = analyse_curve(&times(), &growth, &Thresholds::default()).unwrap();
    assert_eq!(first.labels, second.labels);
    assert_eq!(first.phases, second.phases);
}

#[test]
fn phases_are_ordered_by_start() {
    let analysis = analyse_curve(&times(), &diauxic(), &Thresholds::default()).unwrap();
    let starts: Vec<f64> = analysis
        .phases
        .iter()
        .filter_map(|phase| phase.start())
        .collect();
    assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(starts.len(), analysis.phases.len());
}

#[test]
fn region_spanning_two_labels_is_rejected() {
    let growth = diauxic();
    let signal = DerivativeSignal::new(growth.derivative.clone(), SAMPLES).unwrap();
    let mut labels = vec![CurvePhase::Flat; SAMPLES];
    labels[50..].fill(CurvePhase::Impulse);
    let filter = build_filter(signal.len(), None, None);

    let err = segment_region(&signal, &mut labels, &filter, &Thresholds::default()).unwrap_err();
    assert!(matches!(err, PhaseError::MixedRegion { .. }));
}

#[test]
fn plate_grid_matches_single_curve_analysis() {
    let times = times();
    let curves = Array2::from_shape_vec(
        (1, 3),
        vec![Some(diauxic()), Some(lag_then_growth()), None],
    )
    .unwrap();
    let plate = analyse_plate(&times, &curves, &Thresholds::default()).unwrap();
    assert!(plate.failures().is_empty());

    let registry = MetaPhenotypeRegistry::standard().unwrap();
    let modalities = registry
        .filter_plate(MetaPhenotype::Modalities, &plate.phase_grid())
        .unwrap();
    assert_eq!(modalities[[0, 0]], 2.0);
    assert_eq!(modalities[[0, 1]], 1.0);
    assert!(modalities[[0, 2]].is_nan());
}

#[test]
fn strict_impulse_slope_requirement_suppresses_impulses() {
    let thresholds = Thresholds {
        impulse_slope_requirement: 1.0,
        ..Thresholds::default()
    };
    let analysis = analyse_curve(&times(), &diauxic(), &thresholds).unwrap();
    assert_eq!(sequence(&analysis.labels), vec![CurvePhase::Flat]);
    assert!(matches!(
        analysis.warnings.as_slice(),
        [SegmentationWarning::NoImpulse { .. }]
    ));
}
