use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use gc_phases::{
    analyse_plate, GrowthCurve, MetaPhenotype, MetaPhenotypeRegistry, PhaseInstance,
    PlateAnalysis, PositionOutcome, Thresholds,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Growth curve phase segmentation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment and phenotype every curve of a plate
    Analyse(AnalyseArgs),
    /// List the available meta-phenotypes
    ListMeta,
}

#[derive(Parser, Debug)]
struct AnalyseArgs {
    /// Plate JSON with times and per-position curves and derivatives
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output report JSON path (`-` for stdout)
    #[arg(short, long, default_value = "phases.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output CSV of meta-phenotypes per position
    #[arg(long, value_hint = ValueHint::FilePath)]
    meta_csv: Option<PathBuf>,

    /// Meta-phenotype ids to compute (comma separated, default all)
    #[arg(long)]
    meta: Option<String>,

    /// Thresholds JSON; missing keys keep their defaults
    #[arg(long, value_hint = ValueHint::FilePath)]
    thresholds: Option<PathBuf>,

    /// Fraction of peak growth rate that still extends the impulse
    #[arg(long)]
    impulse_extension: Option<f64>,

    /// Minimal peak growth rate for an impulse
    #[arg(long)]
    impulse_slope: Option<f64>,

    /// Minimal absolute growth rate for non-flat samples
    #[arg(long)]
    flatline_slope: Option<f64>,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Deserialize, Debug)]
struct PlateFile {
    rows: usize,
    cols: usize,
    times: Vec<f64>,
    positions: Vec<PositionRecord>,
}

#[derive(Deserialize, Debug)]
struct PositionRecord {
    row: usize,
    col: usize,
    curve: Vec<f64>,
    derivative: Vec<f64>,
    #[serde(default)]
    doublings: Option<f64>,
}

#[derive(Serialize, Debug)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    source: String,
    thresholds: Thresholds,
    positions: Vec<PositionReport<'a>>,
    failures: Vec<FailureReport>,
}

#[derive(Serialize, Debug)]
struct PositionReport<'a> {
    row: usize,
    col: usize,
    labels: Vec<i8>,
    phases: &'a [PhaseInstance],
    warnings: Vec<String>,
}

#[derive(Serialize, Debug)]
struct FailureReport {
    row: usize,
    col: usize,
    error: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Command::Analyse(args) if args.verbose => "debug",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyse(args) => handle_analyse(args),
        Command::ListMeta => handle_list_meta(),
    }
}

fn handle_analyse(args: AnalyseArgs) -> Result<()> {
    let thresholds = load_thresholds(&args)?;
    thresholds.validate()?;
    let registry = MetaPhenotypeRegistry::standard()?;
    let metas = match args.meta.as_ref() {
        Some(list) => parse_meta_list(list)?,
        None => MetaPhenotype::ALL.to_vec(),
    };

    let (times, curves) = load_plate(&args.input)?;
    info!(
        "Loaded plate {}x{} with {} time points",
        curves.nrows(),
        curves.ncols(),
        times.len()
    );

    let t_compute = Instant::now();
    let plate = analyse_plate(&times, &curves, &thresholds)?;
    let failures = plate.failures();
    info!(
        "Segmented plate in {:.1} ms ({} failed positions)",
        t_compute.elapsed().as_secs_f64() * 1000.0,
        failures.len()
    );
    for ((row, col), err) in &failures {
        warn!("Position ({}, {}) skipped: {}", row, col, err);
    }

    let report = build_report(&plate, &thresholds, &args.input);
    write_report(&report, &args.output)?;

    if let Some(path) = args.meta_csv.as_ref() {
        write_meta_csv(&plate, &registry, &metas, path)?;
        info!("Wrote meta-phenotypes: {}", path.display());
    }
    Ok(())
}

fn handle_list_meta() -> Result<()> {
    let registry = MetaPhenotypeRegistry::standard()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for meta in registry.registered() {
        writeln!(handle, "{:<42} {}", meta.id(), meta.description())?;
    }
    Ok(())
}

fn load_thresholds(args: &AnalyseArgs) -> Result<Thresholds> {
    let mut thresholds = match args.thresholds.as_ref() {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("invalid thresholds in {}", path.display()))?
        }
        None => Thresholds::default(),
    };
    if let Some(value) = args.impulse_extension {
        thresholds.impulse_extension = value;
    }
    if let Some(value) = args.impulse_slope {
        thresholds.impulse_slope_requirement = value;
    }
    if let Some(value) = args.flatline_slope {
        thresholds.flatline_slope_requirement = value;
    }
    Ok(thresholds)
}

fn parse_meta_list(input: &str) -> Result<Vec<MetaPhenotype>> {
    let mut out = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let meta = MetaPhenotype::from_id(token)
            .ok_or_else(|| anyhow!("unknown meta-phenotype '{}'", token))?;
        out.push(meta);
    }
    if out.is_empty() {
        return Err(anyhow!("--meta list was empty"));
    }
    Ok(out)
}

fn load_plate(path: &Path) -> Result<(Array1<f64>, Array2<Option<GrowthCurve>>)> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let plate: PlateFile = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse plate {}", path.display()))?;

    let mut curves: Array2<Option<GrowthCurve>> = Array2::from_elem((plate.rows, plate.cols), None);
    for record in plate.positions {
        let slot = curves
            .get_mut((record.row, record.col))
            .ok_or_else(|| {
                anyhow!(
                    "position ({}, {}) outside {}x{} plate",
                    record.row,
                    record.col,
                    plate.rows,
                    plate.cols
                )
            })?;
        if slot.is_some() {
            warn!(
                "Position ({}, {}) listed twice, keeping the last entry",
                record.row, record.col
            );
        }
        *slot = Some(GrowthCurve {
            curve: Array1::from_vec(record.curve),
            derivative: Array1::from_vec(record.derivative),
            doublings: record.doublings,
        });
    }
    Ok((Array1::from_vec(plate.times), curves))
}

fn build_report<'a>(plate: &'a PlateAnalysis, thresholds: &Thresholds, input: &Path) -> Report<'a> {
    let mut positions = Vec::new();
    let mut failures = Vec::new();
    for ((row, col), outcome) in plate.outcomes.indexed_iter() {
        match outcome {
            PositionOutcome::Empty => {}
            PositionOutcome::Analysed(analysis) => positions.push(PositionReport {
                row,
                col,
                labels: analysis.label_codes(),
                phases: &analysis.phases,
                warnings: analysis.warnings.iter().map(|w| w.to_string()).collect(),
            }),
            PositionOutcome::Failed(err) => failures.push(FailureReport {
                row,
                col,
                error: err.to_string(),
            }),
        }
    }
    Report {
        generated_at: Utc::now(),
        source: input.display().to_string(),
        thresholds: *thresholds,
        positions,
        failures,
    }
}

fn write_report(report: &Report<'_>, path: &Path) -> Result<()> {
    if path == Path::new("-") {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, report)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(io::BufWriter::new(file), report)?;
    info!("Wrote phase report: {}", path.display());
    Ok(())
}

fn write_meta_csv(
    plate: &PlateAnalysis,
    registry: &MetaPhenotypeRegistry,
    metas: &[MetaPhenotype],
    path: &Path,
) -> Result<()> {
    let grid = plate.phase_grid();
    let mut columns = Vec::with_capacity(metas.len());
    for &meta in metas {
        columns.push(registry.filter_plate(meta, &grid)?);
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut header = vec!["row".to_string(), "col".to_string()];
    header.extend(metas.iter().map(|meta| meta.id().to_string()));
    writer.write_record(&header)?;

    for ((row, col), _) in grid.indexed_iter() {
        let mut record = vec![row.to_string(), col.to_string()];
        for column in &columns {
            let value = column[[row, col]];
            record.push(if value.is_nan() {
                String::new()
            } else {
                format!("{value:.6}")
            });
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
