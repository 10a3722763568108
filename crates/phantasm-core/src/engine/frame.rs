use super::backend::{Field, InputParams, SimulationEngine, SimulationType};
use super::context::SimulationContext;
use super::dispatch::CancellationToken;
use super::error::EngineError;
use super::fov::FieldOfView;
use crate::core::geometry::BoundingBox;
use crate::core::models::atom::AtomRecord;
use crate::core::models::scan::Pose;
use nalgebra::Point3;
use tracing::info;

/// Relative slack for atoms that land a rounding error outside the specimen after rotation.
const DEPTH_TOLERANCE: f64 = 1e-9;

/// The outcome of one frame job.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub index: usize,
    pub angle: f64,
    /// The cropped `(ny, nx)` image, or `None` for simulations with side outputs only.
    pub image: Option<Field>,
}

/// A per-frame modification of the selected atoms, applied before the engine runs.
///
/// `bounds` is the padded simulation box in frame coordinates; implementations must keep
/// atoms inside it.
pub trait AtomPerturbation: Send + Sync {
    fn perturb(
        &self,
        index: usize,
        atoms: &mut Vec<AtomRecord>,
        bounds: &BoundingBox,
    ) -> Result<(), EngineError>;
}

/// The work done for one frame index.
///
/// Any `Fn(&SimulationContext, &mut E, usize, &CancellationToken) -> Result<FrameResult, _>`
/// closure is a task as well.
pub trait FrameTask<E: SimulationEngine>: Sync {
    fn run(
        &self,
        ctx: &SimulationContext<'_>,
        engine: &mut E,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FrameResult, EngineError>;
}

impl<E, F> FrameTask<E> for F
where
    E: SimulationEngine,
    F: Fn(&SimulationContext<'_>, &mut E, usize, &CancellationToken) -> Result<FrameResult, EngineError>
        + Sync,
{
    fn run(
        &self,
        ctx: &SimulationContext<'_>,
        engine: &mut E,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FrameResult, EngineError> {
        self(ctx, engine, index, cancel)
    }
}

/// Atoms and engine input for one frame, in frame coordinates.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub index: usize,
    pub pose: Pose,
    pub atoms: Vec<AtomRecord>,
    pub input: InputParams,
}

/// Selects and transforms the atoms for frame `index` and builds the matching engine input.
///
/// Depths are measured from the bottom of the sample's containing box, so every orientation
/// of the sample fits in `[0, spec_lz]`.
pub fn prepare_frame(
    ctx: &SimulationContext<'_>,
    index: usize,
    simulation_type: SimulationType,
) -> Result<PreparedFrame, EngineError> {
    ctx.params.validate()?;
    let pose = *ctx.scan.pose(index).ok_or(EngineError::FrameOutOfRange {
        index,
        num_frames: ctx.num_frames(),
    })?;
    info!("Simulating image {}", index + 1);

    let fov = ctx.field_of_view();
    let containing = ctx.sample.containing_box();
    let z0 = containing.min.z;
    let lz = containing.extent().z.max(ctx.params.slice_thickness);
    let input = create_input_params(ctx, simulation_type, &fov, lz, z0, &pose);

    let mut atoms = fov.select(ctx.sample, &pose);
    let tolerance = DEPTH_TOLERANCE * lz.max(1.0);
    for atom in &mut atoms {
        let z = atom.position.z - z0;
        atom.position.z = if z < 0.0 && z > -tolerance {
            0.0
        } else if z > lz && z < lz + tolerance {
            lz
        } else {
            z
        };
    }

    if let Some(perturbation) = ctx.perturbation {
        let bounds = BoundingBox::new(
            Point3::origin(),
            Point3::new(input.spec_lx, input.spec_ly, input.spec_lz),
        );
        perturbation.perturb(index, &mut atoms, &bounds)?;
    }
    info!("Simulating with {} atoms", atoms.len());

    Ok(PreparedFrame {
        index,
        pose,
        atoms,
        input,
    })
}

pub fn create_input_params(
    ctx: &SimulationContext<'_>,
    simulation_type: SimulationType,
    fov: &FieldOfView,
    spec_lz: f64,
    z_origin: f64,
    pose: &Pose,
) -> InputParams {
    let (ny, nx) = ctx.padded_shape();
    let [spec_lx, spec_ly] = fov.padded_size();
    let microscope = ctx.microscope;
    InputParams {
        simulation_type,
        nx,
        ny,
        pixel_size: microscope.detector.pixel_size,
        spec_lx,
        spec_ly,
        spec_lz,
        slice_thickness: ctx.params.slice_thickness,
        z_centre: ctx.sample.centre().z - z_origin,
        beam_energy_kev: microscope.beam.energy_kev,
        defocus: microscope.lens.c_10,
        spherical_aberration: microscope.lens.c_30,
        tilt_angle: pose.angle,
    }
}

/// Removes `margin` pixels from every edge of a padded `(ny + 2m, nx + 2m)` field.
pub fn crop(field: &Field, margin: usize, ny: usize, nx: usize) -> Result<Field, EngineError> {
    let (rows, cols) = field.shape();
    if rows <= 2 * margin || cols <= 2 * margin {
        return Err(EngineError::SliceInvariant(format!(
            "cannot crop {margin} pixels from each edge of a {rows}x{cols} field"
        )));
    }
    if (rows - 2 * margin, cols - 2 * margin) != (ny, nx) {
        return Err(EngineError::SliceInvariant(format!(
            "cropping {margin} pixels from a {rows}x{cols} field leaves {}x{}, expected {ny}x{nx}",
            rows - 2 * margin,
            cols - 2 * margin
        )));
    }
    Ok(field.view((margin, margin), (ny, nx)).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Fixture;

    #[test]
    fn crop_returns_detector_shape_for_any_padded_field() {
        for (ny, nx, margin) in [(4, 4, 2), (3, 7, 1), (1, 1, 5), (6, 2, 0)] {
            let raw = Field::from_fn(ny + 2 * margin, nx + 2 * margin, |r, c| (r * 100 + c) as f64);
            let cropped = crop(&raw, margin, ny, nx).unwrap();
            assert_eq!(cropped.shape(), (ny, nx));
            assert_eq!(cropped[(0, 0)], (margin * 100 + margin) as f64);
        }
    }

    #[test]
    fn degenerate_or_mismatched_crops_fail() {
        assert!(matches!(
            crop(&Field::zeros(4, 4), 2, 0, 0),
            Err(EngineError::SliceInvariant(_))
        ));
        assert!(matches!(
            crop(&Field::zeros(8, 8), 2, 3, 4),
            Err(EngineError::SliceInvariant(_))
        ));
    }

    #[test]
    fn prepared_frame_fits_in_the_specimen_box() {
        let fixture = Fixture::tilt_series(3);
        let ctx = fixture.context();
        for index in 0..3 {
            let frame = prepare_frame(&ctx, index, SimulationType::ExitWave).unwrap();
            assert_eq!(frame.input.nx, 8);
            assert_eq!(frame.input.ny, 8);
            assert_eq!(frame.input.tilt_angle, frame.pose.angle);
            assert!(!frame.atoms.is_empty());
            for atom in &frame.atoms {
                assert!(atom.position.z >= 0.0 && atom.position.z <= frame.input.spec_lz);
            }
        }
    }

    #[test]
    fn out_of_range_frame_is_reported() {
        let fixture = Fixture::tilt_series(2);
        let ctx = fixture.context();
        assert!(matches!(
            prepare_frame(&ctx, 5, SimulationType::ExitWave),
            Err(EngineError::FrameOutOfRange { index: 5, num_frames: 2 })
        ));
    }

    struct CountingPerturbation;

    impl AtomPerturbation for CountingPerturbation {
        fn perturb(
            &self,
            _index: usize,
            atoms: &mut Vec<AtomRecord>,
            bounds: &BoundingBox,
        ) -> Result<(), EngineError> {
            atoms.push(AtomRecord::new(1, bounds.centre()));
            Ok(())
        }
    }

    #[test]
    fn perturbation_runs_inside_the_padded_box() {
        let fixture = Fixture::tilt_series(1);
        let plain = prepare_frame(&fixture.context(), 0, SimulationType::ExitWave).unwrap();
        let perturbation = CountingPerturbation;
        let ctx = fixture.context().with_perturbation(&perturbation);
        let frame = prepare_frame(&ctx, 0, SimulationType::ExitWave).unwrap();
        assert_eq!(frame.atoms.len(), plain.atoms.len() + 1);
        let added = frame.atoms.last().unwrap();
        assert_eq!(added.position.x, frame.input.spec_lx / 2.0);
    }
}
