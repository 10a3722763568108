use super::backend::{
    AtomInput, BackendError, EngineFactory, EngineOutput, Field, InputParams, SimulationEngine,
    SystemConfiguration,
};
use crate::core::models::atom::AtomRecord;
use tracing::trace;

pub const DEFAULT_ABSORPTION: f64 = 0.01;

/// A deterministic stand-in for a multislice engine.
///
/// Each atom deposits `atomic_number * occupancy` into the pixel under it. A wave simulation
/// returns the intensity `exp(-absorption * V)` of the summed projection; the projected
/// potential is reported one `slice_thickness` slab at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionEngine {
    absorption: f64,
}

impl Default for ProjectionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ABSORPTION)
    }
}

impl ProjectionEngine {
    pub fn new(absorption: f64) -> Self {
        Self { absorption }
    }

    pub fn absorption(&self) -> f64 {
        self.absorption
    }

    fn check_grid(input: &InputParams) -> Result<(), BackendError> {
        if input.nx == 0 || input.ny == 0 {
            return Err(BackendError::Simulation(format!(
                "empty simulation grid {}x{}",
                input.ny, input.nx
            )));
        }
        if !(input.pixel_size > 0.0) {
            return Err(BackendError::Simulation(format!(
                "pixel size must be positive, got {}",
                input.pixel_size
            )));
        }
        Ok(())
    }

    fn deposit<'a>(input: &InputParams, potential: &mut Field, atoms: impl Iterator<Item = &'a AtomRecord>) {
        for atom in atoms {
            let col = (atom.position.x / input.pixel_size).floor();
            let row = (atom.position.y / input.pixel_size).floor();
            if col < 0.0 || row < 0.0 {
                continue;
            }
            let (row, col) = (row as usize, col as usize);
            if row < input.ny && col < input.nx {
                potential[(row, col)] += atom.atomic_number as f64 * atom.occupancy;
            }
        }
    }
}

impl SimulationEngine for ProjectionEngine {
    fn simulate_wave(
        &mut self,
        _system: &SystemConfiguration,
        input: &InputParams,
        atoms: AtomInput<'_>,
    ) -> Result<EngineOutput, BackendError> {
        Self::check_grid(input)?;
        let mut potential = Field::zeros(input.ny, input.nx);
        Self::deposit(input, &mut potential, atoms.atoms());
        let absorption = self.absorption;
        Ok(EngineOutput {
            intensity: Some(potential.map(|v| (-absorption * v).exp())),
            wave: None,
        })
    }

    fn compute_projected_potential(
        &mut self,
        _system: &SystemConfiguration,
        input: &InputParams,
        atoms: &[AtomRecord],
        on_slab: &mut dyn FnMut(f64, f64, Field),
    ) -> Result<(), BackendError> {
        Self::check_grid(input)?;
        let thickness = input.slice_thickness;
        if !(thickness > 0.0 && input.spec_lz > 0.0) {
            return Err(BackendError::Simulation(format!(
                "cannot slice a {} A specimen into {} A slabs",
                input.spec_lz, thickness
            )));
        }

        let num_slabs = ((input.spec_lz / thickness).ceil() as usize).max(1);
        let mut slabs: Vec<Vec<&AtomRecord>> = vec![Vec::new(); num_slabs];
        for atom in atoms {
            let slab = ((atom.position.z / thickness).floor().max(0.0) as usize).min(num_slabs - 1);
            slabs[slab].push(atom);
        }

        for (i, members) in slabs.into_iter().enumerate() {
            let z0 = i as f64 * thickness;
            let z1 = ((i + 1) as f64 * thickness).min(input.spec_lz).max(z0);
            let mut potential = Field::zeros(input.ny, input.nx);
            Self::deposit(input, &mut potential, members.into_iter());
            trace!("Projected slab {:.2} -> {:.2}", z0, z1);
            on_slab(z0, z1, potential);
        }
        Ok(())
    }
}

/// Creates [`ProjectionEngine`]s. The reference engine has no GPU path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionEngineFactory {
    pub absorption: Option<f64>,
}

impl EngineFactory for ProjectionEngineFactory {
    type Engine = ProjectionEngine;

    fn create(&self, _system: &SystemConfiguration) -> Result<ProjectionEngine, BackendError> {
        match self.absorption {
            Some(a) if !a.is_finite() => Err(BackendError::Initialization(format!(
                "absorption coefficient must be finite, got {a}"
            ))),
            Some(a) => Ok(ProjectionEngine::new(a)),
            None => Ok(ProjectionEngine::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::SimulationType;
    use crate::engine::config::Device;
    use nalgebra::Point3;

    fn input(nx: usize, ny: usize) -> InputParams {
        InputParams {
            simulation_type: SimulationType::ExitWave,
            nx,
            ny,
            pixel_size: 1.0,
            spec_lx: nx as f64,
            spec_ly: ny as f64,
            spec_lz: 6.0,
            slice_thickness: 2.0,
            z_centre: 3.0,
            beam_energy_kev: 300.0,
            defocus: 0.0,
            spherical_aberration: 0.0,
            tilt_angle: 0.0,
        }
    }

    fn system() -> SystemConfiguration {
        SystemConfiguration::resolve(Device::Cpu, false)
    }

    #[test]
    fn atoms_darken_the_pixel_under_them() {
        let atoms = [
            AtomRecord::new(6, Point3::new(1.5, 0.2, 1.0)),
            AtomRecord::new(6, Point3::new(1.9, 0.9, 4.0)),
            AtomRecord::new(8, Point3::new(-0.5, 0.0, 0.0)),
        ];
        let mut engine = ProjectionEngine::new(0.1);
        let out = engine
            .simulate_wave(&system(), &input(3, 2), AtomInput::Flat(&atoms))
            .unwrap();
        let intensity = out.into_intensity().unwrap();
        assert_eq!(intensity.shape(), (2, 3));
        assert!((intensity[(0, 1)] - (-1.2f64).exp()).abs() < 1e-12);
        assert_eq!(intensity[(0, 0)], 1.0);
        assert_eq!(intensity[(1, 2)], 1.0);
    }

    #[test]
    fn projected_potential_reports_every_slab_in_order() {
        let atoms = [
            AtomRecord::new(6, Point3::new(0.5, 0.5, 0.5)),
            AtomRecord::new(8, Point3::new(0.5, 0.5, 5.9)),
            AtomRecord::new(1, Point3::new(0.5, 0.5, 6.0)),
        ];
        let mut engine = ProjectionEngine::default();
        let mut seen = Vec::new();
        engine
            .compute_projected_potential(&system(), &input(2, 2), &atoms, &mut |z0, z1, v| {
                seen.push((z0, z1, v[(0, 0)]));
            })
            .unwrap();
        assert_eq!(seen, vec![(0.0, 2.0, 6.0), (2.0, 4.0, 0.0), (4.0, 6.0, 9.0)]);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let mut engine = ProjectionEngine::default();
        assert!(matches!(
            engine.simulate_wave(&system(), &input(0, 2), AtomInput::Flat(&[])),
            Err(BackendError::Simulation(_))
        ));
    }

    #[test]
    fn factory_has_no_gpu_and_validates_absorption() {
        let factory = ProjectionEngineFactory::default();
        assert!(!factory.gpu_available());
        assert_eq!(factory.create(&system()).unwrap().absorption(), DEFAULT_ABSORPTION);
        let bad = ProjectionEngineFactory {
            absorption: Some(f64::NAN),
        };
        assert!(matches!(
            bad.create(&system()),
            Err(BackendError::Initialization(_))
        ));
    }
}
