use nalgebra::Point3;
use phf::phf_map;
use std::str::FromStr;

/// Default isotropic displacement (thermal) parameter applied when a sample file omits it.
pub const DEFAULT_SIGMA: f64 = 0.085;

/// Element symbols indexed by atomic number (index 0 is unused).
const SYMBOLS: [&str; 37] = [
    "", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge",
    "As", "Se", "Br", "Kr",
];

static ELEMENTS: phf::Map<&'static str, u8> = phf_map! {
    "H" => 1, "HE" => 2, "LI" => 3, "BE" => 4, "B" => 5, "C" => 6, "N" => 7, "O" => 8,
    "F" => 9, "NE" => 10, "NA" => 11, "MG" => 12, "AL" => 13, "SI" => 14, "P" => 15,
    "S" => 16, "CL" => 17, "AR" => 18, "K" => 19, "CA" => 20, "SC" => 21, "TI" => 22,
    "V" => 23, "CR" => 24, "MN" => 25, "FE" => 26, "CO" => 27, "NI" => 28, "CU" => 29,
    "ZN" => 30, "GA" => 31, "GE" => 32, "AS" => 33, "SE" => 34, "BR" => 35, "KR" => 36,
    "I" => 53, "PT" => 78, "AU" => 79, "HG" => 80, "PB" => 82, "U" => 92,
};

/// A chemical element identified by its atomic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element(pub u8);

impl Element {
    pub fn atomic_number(self) -> u8 {
        self.0
    }

    pub fn symbol(self) -> Option<&'static str> {
        match self.0 {
            53 => Some("I"),
            78 => Some("Pt"),
            79 => Some("Au"),
            80 => Some("Hg"),
            82 => Some("Pb"),
            92 => Some("U"),
            z => SYMBOLS.get(z as usize).copied().filter(|s| !s.is_empty()),
        }
    }
}

impl FromStr for Element {
    type Err = ();

    /// Parses an element symbol, case-insensitively (e.g. "C", "fe", "Se").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ELEMENTS
            .get(s.trim().to_ascii_uppercase().as_str())
            .map(|&z| Element(z))
            .ok_or(())
    }
}

/// A single atom of the specimen as seen by the simulation engine.
///
/// Records are plain values: once a subset has been selected for a frame it is owned by that
/// frame's job and never shared back into the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomRecord {
    /// Species identifier (atomic number).
    pub atomic_number: u8,
    /// Position in Angstroms.
    pub position: Point3<f64>,
    /// Isotropic displacement parameter in Angstroms.
    pub sigma: f64,
    /// Site occupancy in `[0, 1]`.
    pub occupancy: f64,
}

impl AtomRecord {
    pub fn new(atomic_number: u8, position: Point3<f64>) -> Self {
        Self {
            atomic_number,
            position,
            sigma: DEFAULT_SIGMA,
            occupancy: 1.0,
        }
    }

    pub fn element(&self) -> Element {
        Element(self.atomic_number)
    }

    /// Returns a copy translated by `(dx, dy, dz)`.
    #[inline]
    pub fn translated(&self, dx: f64, dy: f64, dz: f64) -> Self {
        let mut atom = *self;
        atom.position.x += dx;
        atom.position.y += dy;
        atom.position.z += dz;
        atom
    }
}
