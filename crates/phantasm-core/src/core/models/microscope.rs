/// Electron beam parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    /// Accelerating voltage in keV.
    pub energy_kev: f64,
}

impl Default for Beam {
    fn default() -> Self {
        Self { energy_kev: 300.0 }
    }
}

/// Objective lens aberrations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    /// Defocus in Angstroms.
    pub c_10: f64,
    /// Spherical aberration in millimetres.
    pub c_30: f64,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            c_10: 20.0,
            c_30: 2.7,
        }
    }
}

/// The pixelated detector. `nx` is the image width and `ny` its height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detector {
    pub nx: usize,
    pub ny: usize,
    /// Pixel edge length in Angstroms at the specimen.
    pub pixel_size: f64,
}

/// The virtual microscope. Construction of realistic lens models happens upstream; the
/// simulation only forwards these values to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Microscope {
    pub beam: Beam,
    pub lens: Lens,
    pub detector: Detector,
}

impl Microscope {
    pub fn new(detector: Detector) -> Self {
        Self {
            beam: Beam::default(),
            lens: Lens::default(),
            detector,
        }
    }

    /// Detector field of view in Angstroms as `(width, height)`.
    pub fn field_of_view(&self) -> (f64, f64) {
        (
            self.detector.nx as f64 * self.detector.pixel_size,
            self.detector.ny as f64 * self.detector.pixel_size,
        )
    }
}
