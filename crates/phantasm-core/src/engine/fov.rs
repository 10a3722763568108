use crate::core::geometry::{Rect, rotate_about};
use crate::core::models::atom::AtomRecord;
use crate::core::models::microscope::Detector;
use crate::core::models::sample::Sample;
use crate::core::models::scan::Pose;
use nalgebra::Point3;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// The detector footprint on the specimen plane, plus the simulated border around it.
///
/// All values are in Angstroms. The padded window `[origin - margin, origin + size + margin)`
/// is what gets simulated; the border is cropped away after the engine has run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldOfView {
    pub origin: [f64; 2],
    pub size: [f64; 2],
    pub margin: f64,
}

impl FieldOfView {
    pub fn new(origin: [f64; 2], size: [f64; 2], margin: f64) -> Self {
        Self {
            origin,
            size,
            margin,
        }
    }

    /// The field of view of `detector` anchored at the specimen origin, with a border of
    /// `margin_pixels` detector pixels.
    pub fn for_detector(detector: &Detector, margin_pixels: usize) -> Self {
        Self::new(
            [0.0, 0.0],
            [
                detector.nx as f64 * detector.pixel_size,
                detector.ny as f64 * detector.pixel_size,
            ],
            margin_pixels as f64 * detector.pixel_size,
        )
    }

    pub fn with_origin(mut self, origin: [f64; 2]) -> Self {
        self.origin = origin;
        self
    }

    pub fn padded_rect(&self) -> Rect {
        Rect::new(
            self.origin,
            [self.origin[0] + self.size[0], self.origin[1] + self.size[1]],
        )
        .padded(self.margin)
    }

    /// Width and height of the padded window.
    pub fn padded_size(&self) -> [f64; 2] {
        [
            self.size[0] + 2.0 * self.margin,
            self.size[1] + 2.0 * self.margin,
        ]
    }

    /// Selects the atoms under the padded window and moves them into frame coordinates.
    ///
    /// Selection is done on the untransformed sample. Each selected atom is rotated about the
    /// sample centre by the pose orientation, has the pose shift subtracted, and is then
    /// translated so the detector's lower corner lands at `(margin, margin)`. The sample itself
    /// is left untouched.
    pub fn select(&self, sample: &Sample, pose: &Pose) -> Vec<AtomRecord> {
        let atoms = sample.select_atoms_in_rect(&self.padded_rect());
        if atoms.is_empty() {
            return atoms;
        }

        let centre = sample.centre();
        let dx = self.margin - self.origin[0];
        let dy = self.margin - self.origin[1];
        let transform = |atom: &AtomRecord| {
            let p = rotate_about(&atom.position, &pose.orientation, &centre, &pose.shift);
            AtomRecord {
                position: Point3::new(p.x + dx, p.y + dy, p.z),
                ..*atom
            }
        };

        #[cfg(feature = "parallel")]
        let iter = atoms.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = atoms.iter();

        iter.map(transform).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::rotation_from_axis_angle;
    use nalgebra::{UnitQuaternion, Vector3};

    fn identity_pose() -> Pose {
        Pose {
            angle: 0.0,
            position: 0.0,
            orientation: UnitQuaternion::identity(),
            shift: Vector3::zeros(),
        }
    }

    fn line_sample(xs: &[f64]) -> Sample {
        Sample::new(
            xs.iter()
                .map(|&x| AtomRecord::new(6, Point3::new(x, 1.0, 5.0)))
                .collect(),
        )
    }

    #[test]
    fn padded_window_is_half_open() {
        let fov = FieldOfView::new([0.0, 0.0], [4.0, 4.0], 2.0);
        let sample = line_sample(&[-2.5, -2.0, 0.0, 5.5, 6.0, 7.0]);
        let selected = fov.select(&sample, &identity_pose());
        let xs: Vec<f64> = selected.iter().map(|a| a.position.x - 2.0).collect();
        assert_eq!(xs, vec![-2.0, 0.0, 5.5]);
    }

    #[test]
    fn detector_corner_maps_to_margin() {
        let fov = FieldOfView::new([10.0, 20.0], [4.0, 4.0], 1.5);
        let sample = Sample::new(vec![AtomRecord::new(8, Point3::new(10.0, 20.0, 3.0))]);
        let selected = fov.select(&sample, &identity_pose());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].position, Point3::new(1.5, 1.5, 3.0));
        assert_eq!(selected[0].atomic_number, 8);
    }

    #[test]
    fn rotation_is_about_the_sample_centre_and_shift_is_subtracted() {
        let sample = line_sample(&[0.0, 2.0, 4.0]);
        let pose = Pose {
            angle: 180.0,
            position: 1.0,
            orientation: rotation_from_axis_angle(&Vector3::z(), 180.0),
            shift: Vector3::new(1.0, 0.0, 0.0),
        };
        let fov = FieldOfView::new([0.0, 0.0], [10.0, 10.0], 0.0);
        let selected = fov.select(&sample, &pose);
        let xs: Vec<f64> = selected.iter().map(|a| a.position.x).collect();
        let expected = [3.0, 1.0, -1.0];
        for (x, e) in xs.iter().zip(expected) {
            assert!((x - e).abs() < 1e-9, "{x} != {e}");
        }
        assert_eq!(sample.atoms()[0].position.x, 0.0);
    }

    #[test]
    fn empty_window_returns_no_atoms() {
        let fov = FieldOfView::new([100.0, 100.0], [4.0, 4.0], 1.0);
        assert!(fov.select(&line_sample(&[0.0, 1.0]), &identity_pose()).is_empty());
    }

    #[test]
    fn detector_window_scales_with_pixel_size() {
        let detector = Detector {
            nx: 8,
            ny: 6,
            pixel_size: 0.5,
        };
        let fov = FieldOfView::for_detector(&detector, 2);
        assert_eq!(fov.size, [4.0, 3.0]);
        assert_eq!(fov.margin, 1.0);
        assert_eq!(fov.padded_size(), [6.0, 5.0]);
        assert_eq!(fov.padded_rect(), Rect::new([-1.0, -1.0], [5.0, 4.0]));
    }
}
