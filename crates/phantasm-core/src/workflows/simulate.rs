use crate::core::models::microscope::Microscope;
use crate::core::models::sample::Sample;
use crate::core::models::scan::Scan;
use crate::engine::backend::{EngineFactory, SystemConfiguration};
use crate::engine::config::{ClusterConfig, ConfigError, Device, SimulationParams};
use crate::engine::context::SimulationContext;
use crate::engine::dispatch::{Dispatcher, RunMode, RunSummary};
use crate::engine::error::EngineError;
use crate::engine::frame::{AtomPerturbation, FrameTask};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sink::{PotentialSink, ResultSink, check_shape};
use crate::engine::tasks::{ExitWaveTask, ProjectedPotentialTask};
use tracing::{info, instrument};

/// Fully resolved inputs of one simulation run.
#[derive(Clone, Copy)]
pub struct SimulationInputs<'a> {
    pub microscope: &'a Microscope,
    pub sample: &'a Sample,
    pub scan: &'a Scan,
    pub params: &'a SimulationParams,
    pub cluster: ClusterConfig,
    pub device: Device,
    pub perturbation: Option<&'a dyn AtomPerturbation>,
}

impl<'a> SimulationInputs<'a> {
    pub fn new(
        microscope: &'a Microscope,
        sample: &'a Sample,
        scan: &'a Scan,
        params: &'a SimulationParams,
    ) -> Self {
        Self {
            microscope,
            sample,
            scan,
            params,
            cluster: ClusterConfig::default(),
            device: Device::default(),
            perturbation: None,
        }
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_perturbation(mut self, perturbation: &'a dyn AtomPerturbation) -> Self {
        self.perturbation = Some(perturbation);
        self
    }

    /// `(num_frames, ny, nx)` of the output volume.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        (
            self.scan.len(),
            self.microscope.detector.ny,
            self.microscope.detector.nx,
        )
    }

    /// Checks everything a run needs before it touches a sink or starts a frame.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cluster.validate()?;
        self.params.validate()?;
        if self.scan.is_empty() {
            return Err(ConfigError::InvalidParameter {
                name: "scan",
                reason: "the scan contains no frames".to_string(),
            });
        }
        let detector = &self.microscope.detector;
        if detector.nx == 0 || detector.ny == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "detector",
                reason: format!("detector must have pixels, got {}x{}", detector.nx, detector.ny),
            });
        }
        if !(detector.pixel_size.is_finite() && detector.pixel_size > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "pixel_size",
                reason: format!("must be positive, got {}", detector.pixel_size),
            });
        }
        Ok(())
    }
}

/// Runs `task` for every frame of the scan and writes the results into `sink`.
///
/// All inputs are validated, and the sink shape checked, before the first frame starts; a
/// configuration error leaves the sink untouched.
#[instrument(skip_all, name = "simulation_workflow")]
pub fn run<F, T, S>(
    inputs: &SimulationInputs<'_>,
    factory: &F,
    task: &T,
    sink: &mut S,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError>
where
    F: EngineFactory,
    T: FrameTask<F::Engine>,
    S: ResultSink + ?Sized,
{
    // === Phase 1: Validation ===
    reporter.report(Progress::PhaseStart { name: "Validation" });
    inputs.validate()?;
    check_shape(sink, inputs.output_shape())?;
    let system = SystemConfiguration::resolve(inputs.device, factory.gpu_available());
    info!(
        "Validated {} frames of {}x{} pixels on {:?}.",
        inputs.scan.len(),
        inputs.microscope.detector.nx,
        inputs.microscope.detector.ny,
        system.device
    );
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Simulation ===
    reporter.report(Progress::PhaseStart { name: "Simulation" });
    let mut ctx = SimulationContext::new(
        inputs.microscope,
        inputs.sample,
        inputs.scan,
        inputs.params,
        system,
        reporter,
    );
    if let Some(perturbation) = inputs.perturbation {
        ctx = ctx.with_perturbation(perturbation);
    }
    let summary = Dispatcher::new(RunMode::from(inputs.cluster)).run(&ctx, factory, task, sink)?;
    reporter.report(Progress::PhaseFinish);

    info!(
        "Simulation complete: {} frames written by {} worker(s).",
        summary.frames_written, summary.workers
    );
    Ok(summary)
}

/// Simulates the exit-wave image of every frame.
pub fn exit_wave<F, S>(
    inputs: &SimulationInputs<'_>,
    factory: &F,
    sink: &mut S,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError>
where
    F: EngineFactory,
    S: ResultSink + ?Sized,
{
    run(inputs, factory, &ExitWaveTask, sink, reporter)
}

/// Computes the projected potential of every frame into `potentials`. `sink` only receives
/// the frame angles.
pub fn projected_potential<F, S>(
    inputs: &SimulationInputs<'_>,
    factory: &F,
    potentials: &dyn PotentialSink,
    sink: &mut S,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError>
where
    F: EngineFactory,
    S: ResultSink + ?Sized,
{
    run(
        inputs,
        factory,
        &ProjectedPotentialTask::new(potentials),
        sink,
        reporter,
    )
}
