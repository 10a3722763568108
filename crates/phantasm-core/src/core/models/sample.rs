use super::atom::AtomRecord;
use crate::core::geometry::{BoundingBox, Rect};
use nalgebra::Point3;

/// Default edge length, in Angstroms, of one spatial index bin.
pub const DEFAULT_BIN_SIZE: f64 = 20.0;

/// A uniform 2-D bin index over atom (x, y) positions.
///
/// Atoms are bucketed by the bin containing their (x, y) coordinate, independent of z, so a
/// rectangular window only has to visit the bins it overlaps.
#[derive(Debug, Clone)]
struct SpatialIndex {
    origin: [f64; 2],
    bin_size: f64,
    shape: [usize; 2],
    bins: Vec<Vec<u32>>,
}

impl SpatialIndex {
    fn build(atoms: &[AtomRecord], bounds: &BoundingBox, bin_size: f64) -> Self {
        let origin = [bounds.min.x, bounds.min.y];
        let extent = bounds.extent();
        let shape = [
            ((extent.x / bin_size).floor() as usize) + 1,
            ((extent.y / bin_size).floor() as usize) + 1,
        ];
        let mut bins = vec![Vec::new(); shape[0] * shape[1]];
        for (i, atom) in atoms.iter().enumerate() {
            let (bx, by) = Self::bin_of(origin, bin_size, shape, atom.position.x, atom.position.y);
            bins[by * shape[0] + bx].push(i as u32);
        }
        Self {
            origin,
            bin_size,
            shape,
            bins,
        }
    }

    #[inline]
    fn bin_of(origin: [f64; 2], bin_size: f64, shape: [usize; 2], x: f64, y: f64) -> (usize, usize) {
        let clamp = |v: f64, o: f64, n: usize| -> usize {
            let b = ((v - o) / bin_size).floor();
            if b <= 0.0 { 0 } else { (b as usize).min(n - 1) }
        };
        (clamp(x, origin[0], shape[0]), clamp(y, origin[1], shape[1]))
    }

    /// Indices of every atom in the bins overlapping `rect`, in ascending atom order.
    fn candidates(&self, rect: &Rect) -> Vec<u32> {
        let (bx0, by0) = Self::bin_of(self.origin, self.bin_size, self.shape, rect.min[0], rect.min[1]);
        let (bx1, by1) = Self::bin_of(self.origin, self.bin_size, self.shape, rect.max[0], rect.max[1]);
        let mut out = Vec::new();
        for by in by0..=by1 {
            for bx in bx0..=bx1 {
                out.extend_from_slice(&self.bins[by * self.shape[0] + bx]);
            }
        }
        out.sort_unstable();
        out
    }
}

/// The specimen: an immutable atom collection with precomputed bounds and a spatial index.
///
/// `containing_box` is a cube around the bounding-box centre whose half-width equals the
/// bounding box half-diagonal, so the sample rotated about [`Sample::centre`] by any orientation
/// never leaves it. Frame jobs measure slab depths from its lower z face.
#[derive(Debug, Clone)]
pub struct Sample {
    atoms: Vec<AtomRecord>,
    bounding_box: BoundingBox,
    containing_box: BoundingBox,
    index: SpatialIndex,
}

impl Sample {
    /// Creates a sample whose bounding box is the tight bound of its atoms.
    pub fn new(atoms: Vec<AtomRecord>) -> Self {
        let bounding_box = BoundingBox::from_points(atoms.iter().map(|a| &a.position))
            .unwrap_or_else(|| BoundingBox::new(Point3::origin(), Point3::origin()));
        Self::with_bounding_box(atoms, bounding_box)
    }

    /// Creates a sample with an externally declared bounding box (e.g. the sample container).
    ///
    /// The declared box is widened if any atom lies outside it.
    pub fn with_bounding_box(atoms: Vec<AtomRecord>, declared: BoundingBox) -> Self {
        Self::with_bin_size(atoms, declared, DEFAULT_BIN_SIZE)
    }

    pub fn with_bin_size(atoms: Vec<AtomRecord>, declared: BoundingBox, bin_size: f64) -> Self {
        let bounding_box = match BoundingBox::from_points(atoms.iter().map(|a| &a.position)) {
            Some(tight) => BoundingBox::new(
                declared.min.inf(&tight.min),
                declared.max.sup(&tight.max),
            ),
            None => declared,
        };
        let centre = bounding_box.centre();
        let radius = bounding_box.half_diagonal();
        let containing_box = BoundingBox::new(
            centre - nalgebra::Vector3::repeat(radius),
            centre + nalgebra::Vector3::repeat(radius),
        );
        let bin_size = if bin_size > 0.0 { bin_size } else { DEFAULT_BIN_SIZE };
        let index = SpatialIndex::build(&atoms, &bounding_box, bin_size);
        Self {
            atoms,
            bounding_box,
            containing_box,
            index,
        }
    }

    pub fn atoms(&self) -> &[AtomRecord] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn containing_box(&self) -> &BoundingBox {
        &self.containing_box
    }

    pub fn centre(&self) -> Point3<f64> {
        self.bounding_box.centre()
    }

    /// Radius of the sphere around [`Sample::centre`] enclosing every atom.
    pub fn radius(&self) -> f64 {
        self.bounding_box.half_diagonal()
    }

    /// Returns copies of all atoms whose (x, y) lies in the half-open `rect`, at any z.
    ///
    /// Atoms come back in the order they are stored in the sample, so two identical queries
    /// always return identical subsets.
    pub fn select_atoms_in_rect(&self, rect: &Rect) -> Vec<AtomRecord> {
        if rect.is_empty() || self.atoms.is_empty() {
            return Vec::new();
        }
        self.index
            .candidates(rect)
            .into_iter()
            .map(|i| self.atoms[i as usize])
            .filter(|atom| rect.contains(atom.position.x, atom.position.y))
            .collect()
    }
}
