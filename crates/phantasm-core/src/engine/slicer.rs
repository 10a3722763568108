use super::error::EngineError;
use crate::core::models::atom::AtomRecord;
use itertools::Itertools;

/// Extra depth added above the highest atom when closing the last slab.
pub const SLAB_EPSILON: f64 = 1e-5;

/// A contiguous z-range `[z0, z1)` and the atoms whose depth falls inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Slab {
    pub z0: f64,
    pub z1: f64,
    pub atoms: Vec<AtomRecord>,
}

/// Partitions `atoms` into `num_slices` equal-width slabs covering `[0, lz)`.
///
/// The last slab is closed at `max(lz, max_z + SLAB_EPSILON)` so atoms sitting exactly on the
/// top face are kept. Only non-empty slabs are returned, in ascending z order; atom order within
/// a slab follows the input order.
///
/// # Errors
///
/// Returns [`EngineError::SliceInvariant`] when `lz` is not positive, `num_slices` is zero, or an
/// atom lies outside `[0, lz]`.
pub fn slice_atoms(
    atoms: Vec<AtomRecord>,
    lz: f64,
    num_slices: usize,
) -> Result<Vec<Slab>, EngineError> {
    if !(lz.is_finite() && lz > 0.0) {
        return Err(EngineError::SliceInvariant(format!(
            "specimen thickness must be positive, got {lz}"
        )));
    }
    if num_slices == 0 {
        return Err(EngineError::SliceInvariant(
            "slab count must be at least one".to_string(),
        ));
    }
    if atoms.is_empty() {
        return Ok(Vec::new());
    }

    let (min_z, max_z) = match atoms
        .iter()
        .map(|a| a.position.z)
        .minmax_by(|a, b| a.total_cmp(b))
        .into_option()
    {
        Some(range) => range,
        None => return Ok(Vec::new()),
    };
    if !(min_z >= 0.0 && max_z <= lz) {
        return Err(EngineError::SliceInvariant(format!(
            "atom depths [{min_z}, {max_z}] fall outside the specimen [0, {lz}]"
        )));
    }
    let top = lz.max(max_z + SLAB_EPSILON);

    if num_slices == 1 {
        return Ok(vec![Slab {
            z0: 0.0,
            z1: top,
            atoms,
        }]);
    }

    let bounds: Vec<f64> = (0..=num_slices)
        .map(|i| lz * i as f64 / num_slices as f64)
        .collect();
    let width = lz / num_slices as f64;
    let last = num_slices - 1;

    let mut buckets: Vec<Vec<AtomRecord>> = vec![Vec::new(); num_slices];
    for atom in atoms {
        let z = atom.position.z;
        let mut i = ((z / width).floor() as usize).min(last);
        while i > 0 && z < bounds[i] {
            i -= 1;
        }
        while i < last && z >= bounds[i + 1] {
            i += 1;
        }
        buckets[i].push(atom);
    }

    Ok(buckets
        .into_iter()
        .enumerate()
        .filter(|(_, atoms)| !atoms.is_empty())
        .map(|(i, atoms)| Slab {
            z0: bounds[i],
            z1: if i == last { top } else { bounds[i + 1] },
            atoms,
        })
        .collect())
}
