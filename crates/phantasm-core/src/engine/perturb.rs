use super::error::EngineError;
use super::frame::AtomPerturbation;
use super::noise::frame_rng;
use crate::core::geometry::BoundingBox;
use crate::core::models::atom::AtomRecord;
use rand_distr::{Distribution, Normal};

/// Displaces every atom by an isotropic Gaussian of width `atom.sigma`, clamped to the
/// simulation box. Seeded like the shot noise, so each frame is reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalJitter {
    pub seed: Option<u64>,
}

impl ThermalJitter {
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }
}

impl AtomPerturbation for ThermalJitter {
    fn perturb(
        &self,
        index: usize,
        atoms: &mut Vec<AtomRecord>,
        bounds: &BoundingBox,
    ) -> Result<(), EngineError> {
        let mut rng = frame_rng(self.seed.map(|s| !s), index);
        for atom in atoms.iter_mut() {
            if !(atom.sigma > 0.0) {
                continue;
            }
            let normal = Normal::new(0.0, atom.sigma)
                .map_err(|e| EngineError::SliceInvariant(format!("invalid atom sigma: {e}")))?;
            for axis in 0..3 {
                let moved = atom.position[axis] + normal.sample(&mut rng);
                atom.position[axis] = moved.clamp(bounds.min[axis], bounds.max[axis]);
            }
        }
        Ok(())
    }
}
