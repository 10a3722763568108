use crate::cli::SimulateArgs;
use crate::config::{PartialSimulationConfig, SimulationConfig};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use phantasm::core::io::atoms::read_atoms_from_path;
use phantasm::core::models::sample::Sample;
use phantasm::engine::dispatch::RunSummary;
use phantasm::engine::error::EngineError;
use phantasm::engine::perturb::ThermalJitter;
use phantasm::engine::progress::ProgressReporter;
use phantasm::engine::projection::ProjectionEngineFactory;
use phantasm::engine::sink::{AngleLog, MrcPotentialSeries, MrcVolume};
use phantasm::workflows::simulate::{self, SimulationInputs};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationKind {
    ExitWave,
    ProjectedPotential,
}

#[derive(Debug, Serialize)]
struct AngleRow {
    index: usize,
    angle: f64,
}

pub fn run(args: SimulateArgs, kind: SimulationKind) -> Result<()> {
    // --- Configuration ---
    info!("Loading and merging configuration...");
    let partial_config = PartialSimulationConfig::from_file(&args.config)?;
    let config = partial_config.merge_with_cli(&args)?;
    info!("Configuration loaded successfully.");

    // --- Sample ---
    info!("Reading sample from {:?}", args.sample);
    let atoms = read_atoms_from_path(&args.sample)?;
    if atoms.is_empty() {
        return Err(CliError::Argument(format!(
            "sample file {} contains no atoms",
            args.sample.display()
        )));
    }
    let sample = Sample::new(atoms);
    let scan = config.scan.build(sample.radius())?;
    info!("Loaded {} atoms; scan has {} frames.", sample.len(), scan.len());

    let handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(handler.get_callback());
    let factory = ProjectionEngineFactory::default();
    let jitter = ThermalJitter::new(config.params.noise_seed);

    let mut inputs = SimulationInputs::new(&config.microscope, &sample, &scan, &config.params)
        .with_cluster(config.cluster)
        .with_device(config.device);
    if config.thermal_jitter {
        inputs = inputs.with_perturbation(&jitter);
    }
    // Must pass before any output is created or truncated.
    inputs.validate().map_err(EngineError::from)?;

    let summary = match kind {
        SimulationKind::ExitWave => {
            run_exit_wave(&inputs, &config, &factory, &args.output, &reporter)?
        }
        SimulationKind::ProjectedPotential => {
            run_projected_potential(&inputs, &factory, &args.output, &reporter)?
        }
    };

    println!(
        "Simulated {} frames with {} worker(s) into {}",
        summary.frames_written,
        summary.workers,
        args.output.display()
    );
    Ok(())
}

fn run_exit_wave(
    inputs: &SimulationInputs<'_>,
    config: &SimulationConfig,
    factory: &ProjectionEngineFactory,
    output: &Path,
    reporter: &ProgressReporter,
) -> Result<RunSummary> {
    let mut volume = MrcVolume::create(
        output,
        inputs.output_shape(),
        config.microscope.detector.pixel_size,
    )?;
    let result = simulate::exit_wave(inputs, factory, &mut volume, reporter);

    // Frames written before a failure stay in the volume.
    let angles = volume.finish()?;
    let summary = result.inspect_err(|e| warn!("Run aborted, keeping partial volume: {}", e))?;

    let angles_path = angles_path(output);
    write_angles(&angles_path, &angles)?;
    info!("Wrote frame angles to {:?}", angles_path);
    Ok(summary)
}

fn run_projected_potential(
    inputs: &SimulationInputs<'_>,
    factory: &ProjectionEngineFactory,
    output: &Path,
    reporter: &ProgressReporter,
) -> Result<RunSummary> {
    std::fs::create_dir_all(output)?;
    let potentials = MrcPotentialSeries::new(output);
    let (num_frames, ny, nx) = inputs.output_shape();
    let mut angles = AngleLog::new(num_frames, ny, nx);

    let summary =
        simulate::projected_potential(inputs, factory, &potentials, &mut angles, reporter)?;

    write_angles(&output.join("angles.csv"), angles.angles())?;
    Ok(summary)
}

/// `stack.mrc` keeps its angles in `stack.angles.csv`.
fn angles_path(output: &Path) -> PathBuf {
    output.with_extension("angles.csv")
}

fn write_angles(path: &Path, angles: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    for (index, &angle) in angles.iter().enumerate() {
        writer
            .serialize(AngleRow { index, angle })
            .map_err(|e| CliError::Other(e.into()))?;
    }
    writer.flush()?;
    Ok(())
}
