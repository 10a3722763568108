use super::backend::SystemConfiguration;
use super::config::SimulationParams;
use super::fov::FieldOfView;
use super::frame::AtomPerturbation;
use super::progress::ProgressReporter;
use crate::core::models::microscope::Microscope;
use crate::core::models::sample::Sample;
use crate::core::models::scan::Scan;

/// Everything a frame job reads. Built once per run and shared by reference with every
/// worker; nothing in it is mutated while frames are running.
#[derive(Clone, Copy)]
pub struct SimulationContext<'a> {
    pub microscope: &'a Microscope,
    pub sample: &'a Sample,
    pub scan: &'a Scan,
    pub params: &'a SimulationParams,
    pub system: SystemConfiguration,
    pub reporter: &'a ProgressReporter<'a>,
    pub perturbation: Option<&'a dyn AtomPerturbation>,
}

impl<'a> SimulationContext<'a> {
    pub fn new(
        microscope: &'a Microscope,
        sample: &'a Sample,
        scan: &'a Scan,
        params: &'a SimulationParams,
        system: SystemConfiguration,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        Self {
            microscope,
            sample,
            scan,
            params,
            system,
            reporter,
            perturbation: None,
        }
    }

    pub fn with_perturbation(mut self, perturbation: &'a dyn AtomPerturbation) -> Self {
        self.perturbation = Some(perturbation);
        self
    }

    pub fn num_frames(&self) -> usize {
        self.scan.len()
    }

    /// Shape the result sink must have: `(num_frames, ny, nx)`.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        let detector = &self.microscope.detector;
        (self.scan.len(), detector.ny, detector.nx)
    }

    /// Padded grid the engine simulates on, as `(ny, nx)` pixels.
    pub fn padded_shape(&self) -> (usize, usize) {
        let detector = &self.microscope.detector;
        let margin = self.params.margin;
        (detector.ny + 2 * margin, detector.nx + 2 * margin)
    }

    pub fn field_of_view(&self) -> FieldOfView {
        FieldOfView::for_detector(&self.microscope.detector, self.params.margin)
    }
}
