//! The capability boundary between the frame pipeline and a simulation engine.
//!
//! An engine is anything that can turn a plain-data description of one frame (system
//! configuration, input parameters, atoms) into a 2-D field. The pipeline never looks inside
//! an engine; it only relies on the two operations of [`SimulationEngine`].

use super::config::Device;
use super::slicer::Slab;
use crate::core::models::atom::AtomRecord;
use nalgebra::{Complex, DMatrix};
use thiserror::Error;
use tracing::warn;

/// A real-valued image, `rows = y`, `cols = x`.
pub type Field = DMatrix<f64>;
/// A complex wave function on the same grid as [`Field`].
pub type ComplexField = DMatrix<Complex<f64>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Engine initialization failed: {0}")]
    Initialization(String),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Engine returned no usable output field")]
    EmptyOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Float,
    Double,
}

/// Where and at which precision the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfiguration {
    pub device: Device,
    pub precision: Precision,
}

impl SystemConfiguration {
    /// Resolves the requested device against what the engine reports as available.
    ///
    /// A GPU request on a machine without one downgrades to the CPU and logs a warning instead
    /// of failing the run.
    pub fn resolve(requested: Device, gpu_available: bool) -> Self {
        let device = match requested {
            Device::Gpu if !gpu_available => {
                warn!("GPU not present, reverting to CPU");
                Device::Cpu
            }
            other => other,
        };
        Self {
            device,
            precision: Precision::Float,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationType {
    /// Exit wave (real-space) of the specimen.
    ExitWave,
    /// Projected potential of each slab.
    ProjectedPotential,
}

/// Per-frame engine input: the padded simulation box and the optics.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParams {
    pub simulation_type: SimulationType,
    /// Padded grid width in pixels (detector width plus twice the margin).
    pub nx: usize,
    /// Padded grid height in pixels.
    pub ny: usize,
    pub pixel_size: f64,
    /// Specimen box, Angstroms.
    pub spec_lx: f64,
    pub spec_ly: f64,
    pub spec_lz: f64,
    pub slice_thickness: f64,
    /// Depth of the sample centre within the specimen box.
    pub z_centre: f64,
    pub beam_energy_kev: f64,
    pub defocus: f64,
    pub spherical_aberration: f64,
    pub tilt_angle: f64,
}

/// The atoms handed to an engine: a flat list, or z-ordered slabs for multislice.
#[derive(Debug, Clone, Copy)]
pub enum AtomInput<'a> {
    Flat(&'a [AtomRecord]),
    Slabs(&'a [Slab]),
}

impl<'a> AtomInput<'a> {
    pub fn num_atoms(&self) -> usize {
        match self {
            AtomInput::Flat(atoms) => atoms.len(),
            AtomInput::Slabs(slabs) => slabs.iter().map(|s| s.atoms.len()).sum(),
        }
    }

    pub fn atoms(&self) -> Box<dyn Iterator<Item = &'a AtomRecord> + 'a> {
        match *self {
            AtomInput::Flat(atoms) => Box::new(atoms.iter()),
            AtomInput::Slabs(slabs) => Box::new(slabs.iter().flat_map(|s| s.atoms.iter())),
        }
    }
}

/// Raw result of a wave simulation. Which fields are populated is up to the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub intensity: Option<Field>,
    pub wave: Option<ComplexField>,
}

impl EngineOutput {
    /// The intensity field, derived as `|wave|^2` when the engine only produced a wave.
    pub fn into_intensity(self) -> Result<Field, BackendError> {
        match (self.intensity, self.wave) {
            (Some(intensity), _) => Ok(intensity),
            (None, Some(wave)) => {
                tracing::debug!("Engine produced no intensity; deriving it from the wave.");
                Ok(wave.map(|c| c.norm_sqr()))
            }
            (None, None) => Err(BackendError::EmptyOutput),
        }
    }
}

pub trait SimulationEngine {
    /// Propagates the beam through `atoms` and returns the resulting field(s).
    fn simulate_wave(
        &mut self,
        system: &SystemConfiguration,
        input: &InputParams,
        atoms: AtomInput<'_>,
    ) -> Result<EngineOutput, BackendError>;

    /// Computes the projected potential, calling `on_slab(z0, z1, potential)` once per slab.
    fn compute_projected_potential(
        &mut self,
        system: &SystemConfiguration,
        input: &InputParams,
        atoms: &[AtomRecord],
        on_slab: &mut dyn FnMut(f64, f64, Field),
    ) -> Result<(), BackendError>;
}

/// Creates engine instances. Engines are not assumed to be shareable, so a pooled run asks
/// for one instance per worker.
pub trait EngineFactory: Sync {
    type Engine: SimulationEngine;

    fn create(&self, system: &SystemConfiguration) -> Result<Self::Engine, BackendError>;

    fn gpu_available(&self) -> bool {
        false
    }
}

impl<E, F> EngineFactory for F
where
    E: SimulationEngine,
    F: Fn(&SystemConfiguration) -> Result<E, BackendError> + Sync,
{
    type Engine = E;

    fn create(&self, system: &SystemConfiguration) -> Result<E, BackendError> {
        self(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn gpu_request_falls_back_to_cpu_when_unavailable() {
        let system = SystemConfiguration::resolve(Device::Gpu, false);
        assert_eq!(system.device, Device::Cpu);
        let system = SystemConfiguration::resolve(Device::Gpu, true);
        assert_eq!(system.device, Device::Gpu);
        let system = SystemConfiguration::resolve(Device::Cpu, true);
        assert_eq!(system.device, Device::Cpu);
    }

    #[test]
    fn intensity_is_preferred_over_wave() {
        let output = EngineOutput {
            intensity: Some(Field::from_element(2, 2, 0.5)),
            wave: Some(ComplexField::from_element(2, 2, Complex::new(3.0, 4.0))),
        };
        assert_eq!(output.into_intensity().unwrap(), Field::from_element(2, 2, 0.5));
    }

    #[test]
    fn intensity_is_derived_from_wave_when_missing() {
        let output = EngineOutput {
            intensity: None,
            wave: Some(ComplexField::from_element(1, 3, Complex::new(3.0, 4.0))),
        };
        assert_eq!(output.into_intensity().unwrap(), Field::from_element(1, 3, 25.0));
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(
            EngineOutput::default().into_intensity(),
            Err(BackendError::EmptyOutput)
        ));
    }

    #[test]
    fn atom_input_counts_atoms_across_slabs() {
        let atom = AtomRecord::new(6, Point3::origin());
        let slabs = vec![
            Slab { z0: 0.0, z1: 1.0, atoms: vec![atom; 2] },
            Slab { z0: 1.0, z1: 2.0, atoms: vec![atom; 3] },
        ];
        let input = AtomInput::Slabs(&slabs);
        assert_eq!(input.num_atoms(), 5);
        assert_eq!(input.atoms().count(), 5);
        assert_eq!(AtomInput::Flat(&[atom]).num_atoms(), 1);
    }
}
