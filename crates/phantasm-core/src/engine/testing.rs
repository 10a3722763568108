use super::backend::SystemConfiguration;
use super::config::{Device, SimulationParams, SimulationParamsBuilder};
use super::context::SimulationContext;
use super::progress::ProgressReporter;
use crate::core::models::atom::AtomRecord;
use crate::core::models::microscope::{Detector, Microscope};
use crate::core::models::sample::Sample;
use crate::core::models::scan::{Scan, ScanBuilder, ScanMode};
use nalgebra::{Point3, Vector3};

/// Uniform carbon/nitrogen/oxygen grid covering `[-2, 6)^2` in x, y and `[0, 30)` in z.
pub fn grid_sample() -> Sample {
    let mut atoms = Vec::new();
    for k in 0..6 {
        for j in 0..8 {
            for i in 0..8 {
                let z = 6 + ((i + j + k) % 3) as u8;
                let position = Point3::new(i as f64 - 2.0 + 0.25, j as f64 - 2.0 + 0.25, k as f64 * 5.0);
                atoms.push(AtomRecord::new(z, position));
            }
        }
    }
    Sample::new(atoms)
}

pub struct Fixture {
    pub microscope: Microscope,
    pub sample: Sample,
    pub scan: Scan,
    pub params: SimulationParams,
    pub reporter: ProgressReporter<'static>,
}

impl Fixture {
    /// A 4x4 detector with 1 A pixels, margin 2 and three slabs over the grid sample.
    pub fn tilt_series(num_images: usize) -> Self {
        let scan = ScanBuilder::new()
            .mode(ScanMode::TiltSeries)
            .axis(Vector3::x())
            .start_angle(-10.0)
            .step_angle(10.0)
            .num_images(num_images)
            .build()
            .unwrap();
        Self::with_scan(scan)
    }

    pub fn with_scan(scan: Scan) -> Self {
        let microscope = Microscope::new(Detector {
            nx: 4,
            ny: 4,
            pixel_size: 1.0,
        });
        let params = SimulationParamsBuilder::new()
            .margin(2)
            .slice_thickness(10.0)
            .num_slices(3)
            .electrons_per_pixel(Some(100.0))
            .noise_seed(Some(2024))
            .build()
            .unwrap();
        Self {
            microscope,
            sample: grid_sample(),
            scan,
            params,
            reporter: ProgressReporter::new(),
        }
    }

    pub fn context(&self) -> SimulationContext<'_> {
        SimulationContext::new(
            &self.microscope,
            &self.sample,
            &self.scan,
            &self.params,
            SystemConfiguration::resolve(Device::Cpu, false),
            &self.reporter,
        )
    }
}
