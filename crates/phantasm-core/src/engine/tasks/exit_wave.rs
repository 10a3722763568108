use crate::engine::backend::{AtomInput, SimulationEngine, SimulationType};
use crate::engine::context::SimulationContext;
use crate::engine::dispatch::CancellationToken;
use crate::engine::error::EngineError;
use crate::engine::frame::{FrameResult, FrameTask, crop, prepare_frame};
use crate::engine::noise::{apply_shot_noise, frame_rng};
use crate::engine::slicer::slice_atoms;
use tracing::{debug, instrument};

/// Simulates the exit wave of each frame and records its detector image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitWaveTask;

impl<E: SimulationEngine> FrameTask<E> for ExitWaveTask {
    #[instrument(skip_all, name = "exit_wave_task", fields(index = index))]
    fn run(
        &self,
        ctx: &SimulationContext<'_>,
        engine: &mut E,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FrameResult, EngineError> {
        cancel.check(index)?;
        let frame = prepare_frame(ctx, index, SimulationType::ExitWave)?;
        let params = ctx.params;

        cancel.check(index)?;
        let output = if params.num_slices > 1 {
            let slabs = slice_atoms(frame.atoms, frame.input.spec_lz, params.num_slices)?;
            debug!("Partitioned frame atoms into {} slabs", slabs.len());
            engine.simulate_wave(&ctx.system, &frame.input, AtomInput::Slabs(&slabs))?
        } else {
            engine.simulate_wave(&ctx.system, &frame.input, AtomInput::Flat(&frame.atoms))?
        };
        cancel.check(index)?;

        let detector = &ctx.microscope.detector;
        let ideal = crop(&output.into_intensity()?, params.margin, detector.ny, detector.nx)?;
        let mut rng = frame_rng(params.noise_seed, index);
        let image = apply_shot_noise(ideal, params.electrons_per_pixel, &mut rng);

        Ok(FrameResult {
            index,
            angle: frame.pose.angle,
            image: Some(image),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{BackendError, EngineOutput, Field, InputParams, SystemConfiguration};
    use crate::engine::projection::ProjectionEngine;
    use crate::engine::testing::Fixture;
    use crate::core::models::atom::AtomRecord;

    #[derive(Default)]
    struct RecordingEngine {
        inputs: Vec<(usize, usize)>,
    }

    impl SimulationEngine for RecordingEngine {
        fn simulate_wave(
            &mut self,
            _system: &SystemConfiguration,
            input: &InputParams,
            atoms: AtomInput<'_>,
        ) -> Result<EngineOutput, BackendError> {
            let slabs = match atoms {
                AtomInput::Flat(_) => 0,
                AtomInput::Slabs(slabs) => slabs.len(),
            };
            self.inputs.push((slabs, atoms.num_atoms()));
            Ok(EngineOutput {
                intensity: Some(Field::from_element(input.ny, input.nx, 1.0)),
                wave: None,
            })
        }

        fn compute_projected_potential(
            &mut self,
            _system: &SystemConfiguration,
            _input: &InputParams,
            _atoms: &[AtomRecord],
            _on_slab: &mut dyn FnMut(f64, f64, Field),
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn multislice_frames_hand_slabs_to_the_engine() {
        let fixture = Fixture::tilt_series(2);
        let ctx = fixture.context();
        let mut engine = RecordingEngine::default();
        let result = ExitWaveTask
            .run(&ctx, &mut engine, 1, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.index, 1);
        assert_eq!(result.angle, 0.0);
        assert_eq!(result.image.unwrap().shape(), (4, 4));
        let (slabs, atoms) = engine.inputs[0];
        assert!(slabs >= 1 && slabs <= 3);
        assert_eq!(atoms, fixture.sample.len());
    }

    #[test]
    fn single_slice_uses_the_flat_atom_list() {
        let mut fixture = Fixture::tilt_series(1);
        fixture.params.num_slices = 1;
        fixture.params.electrons_per_pixel = None;
        let ctx = fixture.context();
        let mut engine = RecordingEngine::default();
        let result = ExitWaveTask
            .run(&ctx, &mut engine, 0, &CancellationToken::new())
            .unwrap();
        assert_eq!(engine.inputs[0].0, 0);
        assert_eq!(result.image.unwrap(), Field::from_element(4, 4, 1.0));
    }

    #[test]
    fn seeded_noise_is_reproducible_per_frame() {
        let fixture = Fixture::tilt_series(3);
        let ctx = fixture.context();
        let run = |index| {
            ExitWaveTask
                .run(&ctx, &mut ProjectionEngine::default(), index, &CancellationToken::new())
                .unwrap()
                .image
                .unwrap()
        };
        assert_eq!(run(2), run(2));
        assert!(run(2).iter().all(|v| v.fract() == 0.0));
    }

    #[test]
    fn cancelled_token_stops_before_the_engine_runs() {
        let fixture = Fixture::tilt_series(1);
        let ctx = fixture.context();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut engine = RecordingEngine::default();
        let err = ExitWaveTask.run(&ctx, &mut engine, 0, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { index: 0 }));
        assert!(engine.inputs.is_empty());
    }
}
