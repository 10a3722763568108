use crate::engine::backend::{Field, SimulationEngine, SimulationType};
use crate::engine::context::SimulationContext;
use crate::engine::dispatch::CancellationToken;
use crate::engine::error::EngineError;
use crate::engine::frame::{FrameResult, FrameTask, crop, prepare_frame};
use crate::engine::sink::PotentialSink;
use tracing::{debug, instrument, warn};

/// Computes the projected potential of each frame, slab by slab.
///
/// Slabs are cropped to the detector and written into `sink` as a per-frame volume of
/// `ceil(spec_lz / slice_thickness)` sections. The frame result carries no image.
#[derive(Clone, Copy)]
pub struct ProjectedPotentialTask<'s> {
    sink: &'s dyn PotentialSink,
}

impl<'s> ProjectedPotentialTask<'s> {
    pub fn new(sink: &'s dyn PotentialSink) -> Self {
        Self { sink }
    }
}

impl<E: SimulationEngine> FrameTask<E> for ProjectedPotentialTask<'_> {
    #[instrument(skip_all, name = "projected_potential_task", fields(index = index))]
    fn run(
        &self,
        ctx: &SimulationContext<'_>,
        engine: &mut E,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FrameResult, EngineError> {
        cancel.check(index)?;
        let frame = prepare_frame(ctx, index, SimulationType::ProjectedPotential)?;

        let detector = &ctx.microscope.detector;
        let (ny, nx, margin) = (detector.ny, detector.nx, ctx.params.margin);
        let thickness = ctx.params.slice_thickness;
        let num_sections = ((frame.input.spec_lz / thickness).ceil() as usize).max(1);
        self.sink.begin_frame(
            index,
            (num_sections, ny, nx),
            [detector.pixel_size, detector.pixel_size, thickness],
        )?;

        cancel.check(index)?;
        let mut failure: Option<EngineError> = None;
        let mut on_slab = |z0: f64, z1: f64, potential: Field| {
            if failure.is_some() {
                return;
            }
            if let Err(e) = cancel.check(index) {
                failure = Some(e);
                return;
            }
            let zc = (z0 + z1) / 2.0;
            let section = (zc / thickness).floor();
            if section < 0.0 || section as usize >= num_sections {
                warn!(
                    "Slab {:.2} -> {:.2} lies outside the potential volume; dropped",
                    z0, z1
                );
                return;
            }
            let section = section as usize;
            debug!(
                "Calculating potential for slice: {:.2} -> {:.2} (index: {})",
                z0, z1, section
            );
            let stored = crop(&potential, margin, ny, nx).and_then(|cropped| {
                self.sink
                    .write_slice(index, section, &cropped)
                    .map_err(EngineError::from)
            });
            if let Err(e) = stored {
                failure = Some(e);
            }
        };
        engine.compute_projected_potential(&ctx.system, &frame.input, &frame.atoms, &mut on_slab)?;
        if let Some(e) = failure {
            return Err(e);
        }

        self.sink.end_frame(index)?;
        Ok(FrameResult {
            index,
            angle: frame.pose.angle,
            image: None,
        })
    }
}
